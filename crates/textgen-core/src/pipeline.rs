use textgen_backend::{ContextParams, LoadParams, Runtime};
use textgen_common::config::GenConfig;
use textgen_common::{DecodeStage, GenError, Result};

use crate::generation::{GenerationLimits, GenerationLoop, LoopState};
use crate::prompt::build_prompt;
use crate::sampler::SamplerChain;
use crate::tokenizer::{self, EncodeOptions};

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Best-effort text; partial when `state` is `Failed`.
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub state: LoopState,
}

impl Completion {
    pub fn error(&self) -> Option<&GenError> {
        match &self.state {
            LoopState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// One complete prompt → text run.
///
/// Model and context are released when this returns, on every path, in
/// reverse order of acquisition. A failed prefill is an error; a failure
/// after generation started still returns the text produced so far.
pub fn generate(runtime: &dyn Runtime, config: &GenConfig) -> Result<Completion> {
    let load = LoadParams { gpu_layers: config.gpu_layers };
    let model = runtime
        .load_model(&config.model_path, &load)
        .ok_or_else(|| GenError::ModelLoadFailed(config.model_path.display().to_string()))?;
    let vocab = model.vocab();
    tracing::info!(vocab_size = vocab.n_tokens(), path = %config.model_path.display(), "model loaded");

    let params = ContextParams { context_length: config.context_length, batch_capacity: config.batch_capacity };
    let mut ctx = model.new_context(&params).ok_or(GenError::ContextCreateFailed)?;

    let prompt = build_prompt(&config.user_message, &config.system);
    let prompt_tokens = tokenizer::encode(vocab, prompt.as_str(), EncodeOptions::default())?;
    tracing::info!(n_tokens = prompt_tokens.len(), "prompt tokenized");

    let mut sampler = SamplerChain::temperature_dist(config.temperature, config.seed);
    let limits = GenerationLimits { max_tokens: config.max_tokens };
    let generation = GenerationLoop::new(ctx.as_mut(), vocab, &mut sampler, limits).run(&prompt_tokens);

    if let LoopState::Failed(e @ GenError::Decode { stage: DecodeStage::Prefill, .. }) = &generation.state {
        return Err(e.clone());
    }
    if let Some(e) = generation.error() {
        tracing::error!(error = %e, generated = generation.tokens.len(), "generation stopped early");
    }

    // a detokenize failure after a failed run must not mask the run's error
    let text = match (tokenizer::decode_output(vocab, &generation.tokens), generation.error()) {
        (Ok(text), _) => text,
        (Err(decode_err), Some(loop_err)) => {
            tracing::error!(error = %decode_err, "partial output could not be decoded");
            return Err(loop_err.clone());
        }
        (Err(decode_err), None) => return Err(decode_err),
    };
    tracing::info!(output_len = text.len(), prompt_tokens = prompt_tokens.len(), "output decoded");

    Ok(Completion {
        text,
        prompt_tokens: prompt_tokens.len(),
        generated_tokens: generation.tokens.len(),
        state: generation.state,
    })
}
