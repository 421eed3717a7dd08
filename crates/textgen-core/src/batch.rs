use textgen_backend::{Batch, Pos, SeqId, TokenId};
use textgen_common::Result;

/// Every slot belongs to the one sequence this driver runs.
pub const SEQ_ID: SeqId = 0;

/// Owns the single [`Batch`] a generation run recycles: sized once for the
/// prefill, then reused for every one-token step.
#[derive(Debug)]
pub struct BatchBuilder {
    batch: Batch,
}

impl BatchBuilder {
    pub fn new(prefill_len: usize) -> Self {
        Self { batch: Batch::with_capacity(prefill_len.max(1)) }
    }

    /// Positions `0..n`, logits requested for the last slot only.
    pub fn prefill(&mut self, tokens: &[TokenId]) -> Result<&Batch> {
        self.batch.clear();
        let last = tokens.len().saturating_sub(1);
        for (i, &token) in tokens.iter().enumerate() {
            self.batch.push(token, i as Pos, SEQ_ID, i == last)?;
        }
        Ok(&self.batch)
    }

    pub fn step(&mut self, token: TokenId, pos: Pos) -> Result<&Batch> {
        self.batch.clear();
        self.batch.push(token, pos, SEQ_ID, true)?;
        Ok(&self.batch)
    }

    pub fn batch(&self) -> &Batch { &self.batch }
}
