//! Single-turn generation: prompt templating, tokenization, prefill,
//! sample/decode loop and detokenization over a [`textgen_backend::Runtime`].

pub mod batch;
pub mod generation;
pub mod pipeline;
pub mod prompt;
pub mod sampler;
pub mod tokenizer;

pub use generation::{Generation, GenerationLimits, GenerationLoop, LoopState, StopReason};
pub use pipeline::{generate, Completion};
