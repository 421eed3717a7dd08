//! Capability surface of the model runtime.
//!
//! Handles nest by borrow: a [`Context`] borrows the [`Model`] it was created
//! from, which borrows the [`Runtime`]. Dropping them in scope order releases
//! context, then model, then the process-wide backend.

use std::path::Path;

use textgen_common::{GenError, Result};

pub type TokenId = i32;
pub type Pos = i32;
pub type SeqId = i32;

/// Logits index meaning "the last output slot of the previous decode".
pub const LAST_OUTPUT: i32 = -1;

#[derive(Debug, Clone, Default)]
pub struct LoadParams {
    pub gpu_layers: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextParams {
    pub context_length: u32,
    pub batch_capacity: u32,
}

pub trait Runtime {
    /// Returns `None` when the file cannot be loaded as a model.
    fn load_model(&self, path: &Path, params: &LoadParams) -> Option<Box<dyn Model + '_>>;
}

pub trait Model {
    fn vocab(&self) -> &dyn Vocabulary;
    fn new_context(&self, params: &ContextParams) -> Option<Box<dyn Context + '_>>;
}

/// Raw tokenizer calls. Both conversions follow the size-negotiation
/// convention: when `buf` is too small the call returns the negated required
/// length and writes nothing; otherwise it returns the number of items written.
pub trait Vocabulary {
    fn n_tokens(&self) -> i32;
    fn is_end_of_generation(&self, token: TokenId) -> bool;
    fn tokenize(&self, text: &str, buf: &mut [TokenId], add_special: bool, parse_special: bool) -> i32;
    fn detokenize(&self, tokens: &[TokenId], buf: &mut [u8], remove_special: bool, unparse_special: bool) -> i32;
}

pub trait Context {
    fn context_length(&self) -> u32;
    /// Negative return values are fatal for the call.
    fn decode(&mut self, batch: &Batch) -> i32;
    /// Logits of output slot `index` of the last decode, or of the last
    /// output slot when `index` is [`LAST_OUTPUT`].
    fn logits(&self, index: i32) -> Option<&[f32]>;
    /// Frees any batch storage held for decoding. Called once the run's
    /// batch is gone; the next `decode` may allocate again.
    fn release_batch(&mut self) {}
}

/// Input of one decode call. Slot storage is allocated once; `clear` and
/// `push` never reallocate, and pushing past capacity is an error.
#[derive(Debug, Clone)]
pub struct Batch {
    capacity: usize,
    tokens: Vec<TokenId>,
    positions: Vec<Pos>,
    seq_ids: Vec<SeqId>,
    outputs: Vec<bool>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            tokens: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            seq_ids: Vec::with_capacity(capacity),
            outputs: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn len(&self) -> usize { self.tokens.len() }
    pub fn is_empty(&self) -> bool { self.tokens.is_empty() }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.positions.clear();
        self.seq_ids.clear();
        self.outputs.clear();
    }

    pub fn push(&mut self, token: TokenId, pos: Pos, seq_id: SeqId, output: bool) -> Result<()> {
        if self.tokens.len() >= self.capacity {
            return Err(GenError::BatchCapacity { capacity: self.capacity });
        }
        self.tokens.push(token);
        self.positions.push(pos);
        self.seq_ids.push(seq_id);
        self.outputs.push(output);
        Ok(())
    }

    pub fn tokens(&self) -> &[TokenId] { &self.tokens }
    pub fn positions(&self) -> &[Pos] { &self.positions }
    pub fn seq_ids(&self) -> &[SeqId] { &self.seq_ids }
    pub fn outputs(&self) -> &[bool] { &self.outputs }

    /// Slot index of the last flagged slot.
    pub fn last_output(&self) -> Option<usize> {
        self.outputs.iter().rposition(|&o| o)
    }
}

#[cfg(feature = "mock")]
pub mod mock {
    //! Scripted in-process model. Tokens are bytes (ids 0..=255) plus a few
    //! Llama-3 chat markers; every decode puts all probability mass on the
    //! next token of the script, then on `<|eot_id|>`.

    use super::*;
    use std::sync::{Arc, Mutex};

    pub const BEGIN_OF_TEXT: TokenId = 256;
    pub const START_HEADER: TokenId = 257;
    pub const END_HEADER: TokenId = 258;
    pub const EOT: TokenId = 259;
    pub const END_OF_TEXT: TokenId = 260;

    const SPECIALS: [(&str, TokenId); 5] = [
        ("<|begin_of_text|>", BEGIN_OF_TEXT),
        ("<|start_header_id|>", START_HEADER),
        ("<|end_header_id|>", END_HEADER),
        ("<|eot_id|>", EOT),
        ("<|end_of_text|>", END_OF_TEXT),
    ];

    const PEAK_LOGIT: f32 = 30.0;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Release {
        Batch,
        Context,
        Model,
        Backend,
    }

    pub type ReleaseLog = Arc<Mutex<Vec<Release>>>;

    #[derive(Debug, Clone, Default)]
    pub struct MockScript {
        /// Tokens the model "wants" to produce, in order.
        pub reply: Vec<TokenId>,
        pub fail_load: bool,
        pub fail_context: bool,
        /// Decode call index that returns an error: 0 is the prefill, `j` the j-th step.
        pub fail_decode_at: Option<usize>,
        /// Every detokenize call reports an unsizeable result.
        pub fail_detokenize: bool,
    }

    impl MockScript {
        pub fn replying(text: &str) -> Self {
            Self { reply: text.bytes().map(TokenId::from).collect(), ..Self::default() }
        }
    }

    pub struct MockRuntime {
        script: MockScript,
        log: ReleaseLog,
    }

    impl MockRuntime {
        pub fn new(script: MockScript) -> Self {
            Self { script, log: ReleaseLog::default() }
        }

        pub fn release_log(&self) -> ReleaseLog { self.log.clone() }
    }

    impl Drop for MockRuntime {
        fn drop(&mut self) { record(&self.log, Release::Backend) }
    }

    impl Runtime for MockRuntime {
        fn load_model(&self, path: &Path, _params: &LoadParams) -> Option<Box<dyn Model + '_>> {
            if self.script.fail_load {
                tracing::debug!(path = %path.display(), "mock model load refused");
                return None;
            }
            let vocab = ScriptedVocab { fail_detokenize: self.script.fail_detokenize };
            Some(Box::new(MockModel { script: &self.script, vocab, log: self.log.clone() }))
        }
    }

    pub struct MockModel<'rt> {
        script: &'rt MockScript,
        vocab: ScriptedVocab,
        log: ReleaseLog,
    }

    impl Drop for MockModel<'_> {
        fn drop(&mut self) { record(&self.log, Release::Model) }
    }

    impl Model for MockModel<'_> {
        fn vocab(&self) -> &dyn Vocabulary { &self.vocab }

        fn new_context(&self, params: &ContextParams) -> Option<Box<dyn Context + '_>> {
            if self.script.fail_context || params.context_length == 0 {
                return None;
            }
            Some(Box::new(MockContext {
                script: self.script,
                context_length: params.context_length,
                decodes: 0,
                cursor: 0,
                logits: vec![0.0; self.vocab.n_tokens() as usize],
                last_outputs: Vec::new(),
                batch_live: false,
                log: self.log.clone(),
            }))
        }
    }

    pub struct MockContext<'m> {
        script: &'m MockScript,
        context_length: u32,
        decodes: usize,
        cursor: usize,
        logits: Vec<f32>,
        last_outputs: Vec<usize>,
        /// Set once a decode has been handed batch storage.
        batch_live: bool,
        log: ReleaseLog,
    }

    impl Drop for MockContext<'_> {
        fn drop(&mut self) {
            self.release_batch();
            record(&self.log, Release::Context);
        }
    }

    impl Context for MockContext<'_> {
        fn context_length(&self) -> u32 { self.context_length }

        fn decode(&mut self, batch: &Batch) -> i32 {
            let call = self.decodes;
            self.decodes += 1;
            self.batch_live = true;
            if self.script.fail_decode_at == Some(call) {
                return -2;
            }
            if batch.is_empty() {
                return -1;
            }
            if batch.positions().iter().any(|&p| p < 0 || p as u32 >= self.context_length) {
                return -3;
            }
            let next = self.script.reply.get(self.cursor).copied().unwrap_or(EOT);
            self.cursor += 1;
            self.logits.iter_mut().for_each(|l| *l = 0.0);
            self.logits[next as usize] = PEAK_LOGIT;
            self.last_outputs = batch.outputs().iter().enumerate().filter(|&(_, &o)| o).map(|(i, _)| i).collect();
            0
        }

        fn logits(&self, index: i32) -> Option<&[f32]> {
            let valid = match index {
                LAST_OUTPUT => !self.last_outputs.is_empty(),
                i if i >= 0 => self.last_outputs.contains(&(i as usize)),
                _ => false,
            };
            valid.then_some(self.logits.as_slice())
        }

        fn release_batch(&mut self) {
            if std::mem::take(&mut self.batch_live) {
                record(&self.log, Release::Batch);
            }
        }
    }

    #[derive(Debug, Clone, Copy, Default)]
    pub struct MockVocab;

    impl MockVocab {
        fn special_text(token: TokenId) -> Option<&'static str> {
            SPECIALS.iter().find(|(_, id)| *id == token).map(|(s, _)| *s)
        }
    }

    impl Vocabulary for MockVocab {
        fn n_tokens(&self) -> i32 { 256 + SPECIALS.len() as i32 }

        fn is_end_of_generation(&self, token: TokenId) -> bool {
            token == EOT || token == END_OF_TEXT
        }

        fn tokenize(&self, text: &str, buf: &mut [TokenId], add_special: bool, parse_special: bool) -> i32 {
            let mut out = Vec::with_capacity(text.len() + 1);
            if add_special {
                out.push(BEGIN_OF_TEXT);
            }
            let bytes = text.as_bytes();
            let mut i = 0;
            'scan: while i < bytes.len() {
                if parse_special {
                    for (marker, id) in SPECIALS {
                        if bytes[i..].starts_with(marker.as_bytes()) {
                            out.push(id);
                            i += marker.len();
                            continue 'scan;
                        }
                    }
                }
                out.push(TokenId::from(bytes[i]));
                i += 1;
            }
            fill(&out, buf)
        }

        fn detokenize(&self, tokens: &[TokenId], buf: &mut [u8], remove_special: bool, unparse_special: bool) -> i32 {
            let mut tokens = tokens;
            if remove_special {
                if let [BEGIN_OF_TEXT, tail @ ..] = tokens { tokens = tail; }
                if let [head @ .., END_OF_TEXT] = tokens { tokens = head; }
            }
            let mut out = Vec::with_capacity(tokens.len());
            for &t in tokens {
                match t {
                    0..=255 => out.push(t as u8),
                    _ => {
                        if let (true, Some(s)) = (unparse_special, Self::special_text(t)) {
                            out.extend_from_slice(s.as_bytes());
                        }
                    }
                }
            }
            fill(&out, buf)
        }
    }

    /// [`MockVocab`] with scripted detokenize failures.
    struct ScriptedVocab {
        fail_detokenize: bool,
    }

    impl Vocabulary for ScriptedVocab {
        fn n_tokens(&self) -> i32 { MockVocab.n_tokens() }

        fn is_end_of_generation(&self, token: TokenId) -> bool { MockVocab.is_end_of_generation(token) }

        fn tokenize(&self, text: &str, buf: &mut [TokenId], add_special: bool, parse_special: bool) -> i32 {
            MockVocab.tokenize(text, buf, add_special, parse_special)
        }

        fn detokenize(&self, tokens: &[TokenId], buf: &mut [u8], remove_special: bool, unparse_special: bool) -> i32 {
            if self.fail_detokenize {
                return i32::MIN;
            }
            MockVocab.detokenize(tokens, buf, remove_special, unparse_special)
        }
    }

    fn fill<T: Copy>(items: &[T], buf: &mut [T]) -> i32 {
        let n = items.len() as i32;
        if buf.len() < items.len() {
            return -n;
        }
        buf[..items.len()].copy_from_slice(items);
        n
    }

    fn record(log: &ReleaseLog, what: Release) {
        if let Ok(mut l) = log.lock() { l.push(what); }
    }
}
