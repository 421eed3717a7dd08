//! llama.cpp implementation of the runtime capability traits.
//!
//! FFI is compiled in only when `build.rs` finds `llama.h`; without it the
//! runtime still initializes but every model load reports absence.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use textgen_backend::{LoadParams, Model, Runtime};

#[cfg(llama_ffi)]
#[allow(non_upper_case_globals, non_camel_case_types, non_snake_case, dead_code)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/llama_bindings.rs"));
}

static BACKEND_LIVE: AtomicBool = AtomicBool::new(false);

/// Process-wide llama backend state. At most one value exists at a time;
/// dropping it frees the backend.
pub struct LlamaRuntime {
    // The backend is bound to the thread that set it up.
    _not_send: PhantomData<*const ()>,
}

impl LlamaRuntime {
    /// Returns `None` while another `LlamaRuntime` is alive.
    pub fn init() -> Option<Self> {
        if BACKEND_LIVE.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            tracing::warn!("llama backend already initialized");
            return None;
        }
        #[cfg(llama_ffi)]
        unsafe { ffi::llama_backend_init() };
        #[cfg(not(llama_ffi))]
        tracing::warn!("built without llama.cpp; set LLAMA_CPP_DIR to enable model loading");
        Some(Self { _not_send: PhantomData })
    }
}

impl Drop for LlamaRuntime {
    fn drop(&mut self) {
        #[cfg(llama_ffi)]
        unsafe { ffi::llama_backend_free() };
        tracing::debug!("llama backend released");
        BACKEND_LIVE.store(false, Ordering::SeqCst);
    }
}

impl Runtime for LlamaRuntime {
    #[cfg(llama_ffi)]
    fn load_model(&self, path: &Path, params: &LoadParams) -> Option<Box<dyn Model + '_>> {
        imp::LlamaModel::load(path, params).map(|m| Box::new(m) as Box<dyn Model + '_>)
    }

    #[cfg(not(llama_ffi))]
    fn load_model(&self, path: &Path, _params: &LoadParams) -> Option<Box<dyn Model + '_>> {
        tracing::warn!(path = %path.display(), "llama.cpp FFI disabled; cannot load model");
        None
    }
}

#[cfg(llama_ffi)]
mod imp {
    use std::ffi::{c_char, CString};
    use std::marker::PhantomData;
    use std::path::Path;
    use std::ptr::NonNull;

    use textgen_backend::{Batch, Context, ContextParams, LoadParams, Model, TokenId, Vocabulary};

    use super::{ffi, LlamaRuntime};

    pub struct LlamaModel<'rt> {
        raw: NonNull<ffi::llama_model>,
        vocab: LlamaVocab,
        _rt: PhantomData<&'rt LlamaRuntime>,
    }

    impl LlamaModel<'_> {
        pub fn load(path: &Path, params: &LoadParams) -> Option<Self> {
            let cpath = CString::new(path.to_string_lossy().as_bytes()).ok()?;
            unsafe {
                let mut mparams = ffi::llama_model_default_params();
                if let Some(n) = params.gpu_layers { mparams.n_gpu_layers = n as i32; }
                let raw = NonNull::new(ffi::llama_model_load_from_file(cpath.as_ptr(), mparams))?;
                let vocab = LlamaVocab { raw: ffi::llama_model_get_vocab(raw.as_ptr()) };
                Some(Self { raw, vocab, _rt: PhantomData })
            }
        }
    }

    impl Drop for LlamaModel<'_> {
        fn drop(&mut self) {
            unsafe { ffi::llama_model_free(self.raw.as_ptr()) };
            tracing::debug!("llama model released");
        }
    }

    impl Model for LlamaModel<'_> {
        fn vocab(&self) -> &dyn Vocabulary { &self.vocab }

        fn new_context(&self, params: &ContextParams) -> Option<Box<dyn Context + '_>> {
            unsafe {
                let mut cparams = ffi::llama_context_default_params();
                cparams.n_ctx = params.context_length;
                cparams.n_batch = params.batch_capacity;
                let raw = NonNull::new(ffi::llama_init_from_model(self.raw.as_ptr(), cparams))?;
                Some(Box::new(LlamaContext {
                    raw,
                    scratch: None,
                    n_vocab: self.vocab.n_tokens().max(0) as usize,
                    _model: PhantomData,
                }))
            }
        }
    }

    /// Borrowed from the model; never freed on its own.
    pub struct LlamaVocab {
        raw: *const ffi::llama_vocab,
    }

    impl Vocabulary for LlamaVocab {
        fn n_tokens(&self) -> i32 { unsafe { ffi::llama_vocab_n_tokens(self.raw) } }

        fn is_end_of_generation(&self, token: TokenId) -> bool {
            unsafe { ffi::llama_vocab_is_eog(self.raw, token) }
        }

        fn tokenize(&self, text: &str, buf: &mut [TokenId], add_special: bool, parse_special: bool) -> i32 {
            let Ok(text_len) = i32::try_from(text.len()) else { return i32::MIN };
            let cap = i32::try_from(buf.len()).unwrap_or(i32::MAX);
            unsafe {
                ffi::llama_tokenize(
                    self.raw,
                    text.as_ptr() as *const c_char,
                    text_len,
                    buf.as_mut_ptr(),
                    cap,
                    add_special,
                    parse_special,
                )
            }
        }

        fn detokenize(&self, tokens: &[TokenId], buf: &mut [u8], remove_special: bool, unparse_special: bool) -> i32 {
            let Ok(n_tokens) = i32::try_from(tokens.len()) else { return i32::MIN };
            let cap = i32::try_from(buf.len()).unwrap_or(i32::MAX);
            unsafe {
                ffi::llama_detokenize(
                    self.raw,
                    tokens.as_ptr(),
                    n_tokens,
                    buf.as_mut_ptr() as *mut c_char,
                    cap,
                    remove_special,
                    unparse_special,
                )
            }
        }
    }

    /// `llama_batch` mirror of the last [`Batch`] capacity seen.
    struct RawBatch {
        raw: ffi::llama_batch,
        capacity: usize,
    }

    impl RawBatch {
        fn new(capacity: usize) -> Self {
            Self { raw: unsafe { ffi::llama_batch_init(capacity as i32, 0, 1) }, capacity }
        }

        fn copy_from(&mut self, batch: &Batch) {
            let raw = &mut self.raw;
            unsafe {
                for i in 0..batch.len() {
                    *raw.token.add(i) = batch.tokens()[i];
                    *raw.pos.add(i) = batch.positions()[i];
                    *raw.n_seq_id.add(i) = 1;
                    *(*raw.seq_id.add(i)) = batch.seq_ids()[i];
                    *raw.logits.add(i) = batch.outputs()[i] as i8;
                }
            }
            raw.n_tokens = batch.len() as i32;
        }
    }

    impl Drop for RawBatch {
        fn drop(&mut self) {
            unsafe { ffi::llama_batch_free(self.raw) };
        }
    }

    pub struct LlamaContext<'m> {
        raw: NonNull<ffi::llama_context>,
        scratch: Option<RawBatch>,
        n_vocab: usize,
        _model: PhantomData<&'m ()>,
    }

    impl Drop for LlamaContext<'_> {
        fn drop(&mut self) {
            // batch before context
            drop(self.scratch.take());
            unsafe { ffi::llama_free(self.raw.as_ptr()) };
            tracing::debug!("llama context released");
        }
    }

    impl Context for LlamaContext<'_> {
        fn context_length(&self) -> u32 { unsafe { ffi::llama_n_ctx(self.raw.as_ptr()) } }

        fn decode(&mut self, batch: &Batch) -> i32 {
            let needed = batch.capacity().max(batch.len()).max(1);
            if self.scratch.as_ref().map_or(true, |s| s.capacity < needed) {
                self.scratch = Some(RawBatch::new(needed));
            }
            let Some(scratch) = self.scratch.as_mut() else { return -1 };
            scratch.copy_from(batch);
            unsafe { ffi::llama_decode(self.raw.as_ptr(), scratch.raw) }
        }

        fn release_batch(&mut self) {
            if self.scratch.take().is_some() {
                tracing::debug!("llama batch released");
            }
        }

        fn logits(&self, index: i32) -> Option<&[f32]> {
            unsafe {
                let ptr = ffi::llama_get_logits_ith(self.raw.as_ptr(), index);
                (!ptr.is_null()).then(|| std::slice::from_raw_parts(ptr, self.n_vocab))
            }
        }
    }
}
