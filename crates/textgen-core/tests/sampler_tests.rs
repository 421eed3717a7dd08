use textgen_core::sampler::{SamplerChain, Stage};

#[test]
fn sample_is_deterministic_with_seed() {
    let logits = vec![0.1, 0.2, 0.3, 0.4];
    let mut a = SamplerChain::temperature_dist(1.0, 42);
    let mut b = SamplerChain::temperature_dist(1.0, 42);
    let draws_a: Vec<_> = (0..32).map(|_| a.sample_logits(&logits)).collect();
    let draws_b: Vec<_> = (0..32).map(|_| b.sample_logits(&logits)).collect();
    assert_eq!(draws_a, draws_b);
    assert!(draws_a.iter().all(|d| matches!(d, Some(0..=3))));
}

#[test]
fn low_temperature_concentrates_on_best_logit() {
    let logits = vec![1.0, 1.5, 0.2];
    let mut chain = SamplerChain::temperature_dist(0.01, 7);
    for _ in 0..100 {
        assert_eq!(chain.sample_logits(&logits), Some(1));
    }
}

#[test]
fn large_logits_do_not_overflow() {
    let logits = vec![30.0, 0.0, 0.0];
    let mut chain = SamplerChain::temperature_dist(0.01, 1);
    assert_eq!(chain.sample_logits(&logits), Some(0));
}

#[test]
fn chain_without_dist_is_greedy() {
    let mut chain = SamplerChain::new([Stage::Temperature(0.5)]);
    assert_eq!(chain.sample_logits(&[0.3, 0.9, 0.1]), Some(1));
    assert_eq!(chain.stages(), &[Stage::Temperature(0.5)]);
}

#[test]
fn empty_logits_yield_nothing() {
    let mut chain = SamplerChain::temperature_dist(0.01, 3);
    assert_eq!(chain.sample_logits(&[]), None);
}
