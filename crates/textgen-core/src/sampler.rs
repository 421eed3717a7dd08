use rand::prelude::*;
use textgen_backend::{Context, TokenId};
use textgen_common::config::DEFAULT_SEED;
use textgen_common::{GenError, Result};

/// What the generation loop needs from a sampler: one next token id from
/// the logits at `index` of the last decode.
pub trait TokenSampler {
    fn sample(&mut self, ctx: &dyn Context, index: i32) -> Result<TokenId>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    /// Divide logits by the temperature.
    Temperature(f32),
    /// Draw from the softmax of the current logits. The seed initialises the
    /// chain's random source; [`DEFAULT_SEED`] means an OS-seeded source.
    Dist(u32),
}

pub struct SamplerChain {
    stages: Vec<Stage>,
    rng: StdRng,
    scratch: Vec<f32>,
}

impl SamplerChain {
    pub fn new(stages: impl IntoIterator<Item = Stage>) -> Self {
        let stages: Vec<Stage> = stages.into_iter().collect();
        let seed = stages.iter().find_map(|s| match s {
            Stage::Dist(seed) => Some(*seed),
            _ => None,
        });
        let rng = match seed {
            Some(s) if s != DEFAULT_SEED => StdRng::seed_from_u64(u64::from(s)),
            _ => StdRng::from_entropy(),
        };
        Self { stages, rng, scratch: Vec::new() }
    }

    /// Temperature rescale followed by a distribution draw.
    pub fn temperature_dist(temperature: f32, seed: u32) -> Self {
        Self::new([Stage::Temperature(temperature), Stage::Dist(seed)])
    }

    pub fn stages(&self) -> &[Stage] { &self.stages }

    /// Runs the stages over `logits`. Without a `Dist` stage the highest
    /// scoring id is taken. `None` for empty logits.
    pub fn sample_logits(&mut self, logits: &[f32]) -> Option<TokenId> {
        if logits.is_empty() {
            return None;
        }
        self.scratch.clear();
        self.scratch.extend_from_slice(logits);
        let mut picked = None;
        for stage in &self.stages {
            match *stage {
                Stage::Temperature(t) => {
                    let t = t.max(1e-4);
                    self.scratch.iter_mut().for_each(|l| *l /= t);
                }
                Stage::Dist(_) => picked = Some(draw(&self.scratch, &mut self.rng)),
            }
        }
        let id = picked.unwrap_or_else(|| argmax(&self.scratch));
        Some(id as TokenId)
    }
}

impl TokenSampler for SamplerChain {
    fn sample(&mut self, ctx: &dyn Context, index: i32) -> Result<TokenId> {
        let logits = ctx.logits(index).ok_or(GenError::Logits(index))?;
        self.sample_logits(logits).ok_or(GenError::Logits(index))
    }
}

fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &l)| if l > best.1 { (i, l) } else { best })
        .0
}

fn draw(logits: &[f32], rng: &mut StdRng) -> usize {
    // Shift by the max so low temperatures do not overflow exp().
    let top = argmax(logits);
    let max = logits[top];
    let sum: f32 = logits.iter().map(|&l| (l - max).exp()).sum();
    if !sum.is_finite() || sum <= 0.0 {
        return top;
    }
    let r: f32 = rng.gen::<f32>() * sum;
    let mut acc = 0.0_f32;
    for (i, &l) in logits.iter().enumerate() {
        acc += (l - max).exp();
        if r < acc {
            return i;
        }
    }
    top
}
