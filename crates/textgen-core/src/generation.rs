//! Prefill followed by one-token decode steps until the model stops.

use textgen_backend::{Context, Pos, TokenId, Vocabulary, LAST_OUTPUT};
use textgen_common::{DecodeStage, GenError};

use crate::batch::BatchBuilder;
use crate::sampler::TokenSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The sampler produced an end-of-generation token.
    EndOfGeneration,
    MaxTokens,
    /// The next position would not fit in the context window.
    ContextFull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Prefill,
    Generating,
    Done(StopReason),
    Failed(GenError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationLimits {
    /// `None` runs until end-of-generation or a full context.
    pub max_tokens: Option<usize>,
}

/// Terminal result of a run. `tokens` holds everything sampled and appended,
/// including on failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub tokens: Vec<TokenId>,
    pub state: LoopState,
    pub next_position: Pos,
}

impl Generation {
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.state {
            LoopState::Done(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&GenError> {
        match &self.state {
            LoopState::Failed(e) => Some(e),
            _ => None,
        }
    }
}

pub struct GenerationLoop<'a> {
    ctx: &'a mut dyn Context,
    vocab: &'a dyn Vocabulary,
    sampler: &'a mut dyn TokenSampler,
    limits: GenerationLimits,
    state: LoopState,
    position: Pos,
    logits_index: i32,
    generated: Vec<TokenId>,
}

impl<'a> GenerationLoop<'a> {
    pub fn new(
        ctx: &'a mut dyn Context,
        vocab: &'a dyn Vocabulary,
        sampler: &'a mut dyn TokenSampler,
        limits: GenerationLimits,
    ) -> Self {
        Self {
            ctx,
            vocab,
            sampler,
            limits,
            state: LoopState::Prefill,
            position: 0,
            logits_index: LAST_OUTPUT,
            generated: Vec::new(),
        }
    }

    pub fn run(mut self, prompt_tokens: &[TokenId]) -> Generation {
        // one batch for the whole run, released before the context
        let mut batches = BatchBuilder::new(prompt_tokens.len());
        self.prefill(&mut batches, prompt_tokens);
        while self.state == LoopState::Generating {
            self.step(&mut batches);
        }
        drop(batches);
        self.ctx.release_batch();
        tracing::debug!(generated = self.generated.len(), state = ?self.state, "generation finished");
        Generation { tokens: self.generated, state: self.state, next_position: self.position }
    }

    fn prefill(&mut self, batches: &mut BatchBuilder, tokens: &[TokenId]) {
        let batch = match batches.prefill(tokens) {
            Ok(b) => b,
            Err(e) => return self.fail(e),
        };
        let code = self.ctx.decode(batch);
        if code < 0 {
            return self.fail(GenError::Decode { stage: DecodeStage::Prefill, code });
        }
        self.logits_index = batch.last_output().map_or(LAST_OUTPUT, |i| i as i32);
        self.position = tokens.len() as Pos;
        self.state = LoopState::Generating;
        tracing::debug!(n_tokens = tokens.len(), "prefill decoded");
    }

    fn step(&mut self, batches: &mut BatchBuilder) {
        if self.limits.max_tokens.is_some_and(|max| self.generated.len() >= max) {
            self.state = LoopState::Done(StopReason::MaxTokens);
            return;
        }
        if self.position as u32 >= self.ctx.context_length() {
            self.state = LoopState::Done(StopReason::ContextFull);
            return;
        }

        let token = match self.sampler.sample(&*self.ctx, self.logits_index) {
            Ok(t) => t,
            Err(e) => return self.fail(e),
        };
        if self.vocab.is_end_of_generation(token) {
            self.state = LoopState::Done(StopReason::EndOfGeneration);
            return;
        }
        self.generated.push(token);

        let batch = match batches.step(token, self.position) {
            Ok(b) => b,
            Err(e) => return self.fail(e),
        };
        self.position += 1;
        let code = self.ctx.decode(batch);
        if code < 0 {
            return self.fail(GenError::Decode { stage: DecodeStage::Step, code });
        }
        self.logits_index = batch.last_output().map_or(LAST_OUTPUT, |i| i as i32);
        tracing::debug!(token, position = self.position, "step decoded");
    }

    fn fail(&mut self, err: GenError) {
        tracing::warn!(error = %err, generated = self.generated.len(), "generation failed");
        self.state = LoopState::Failed(err);
    }
}
