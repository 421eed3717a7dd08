use textgen_common::config::SystemContext;
use textgen_common::GenError;
use textgen_core::batch::{BatchBuilder, SEQ_ID};
use textgen_core::prompt::{build_prompt, build_prompt_with, ChatMarkup};

#[test]
fn prompt_has_llama3_role_structure() {
    let system = SystemContext { policy: "POLICY.".into(), schema: "SCHEMA".into() };
    let prompt = build_prompt("Hallo", &system);
    assert_eq!(
        prompt.as_str(),
        "<|start_header_id|>system<|end_header_id|>POLICY.SCHEMA<|eot_id|>\
         <|start_header_id|>user<|end_header_id|>Hallo<|eot_id|>\
         <|start_header_id|>assistant<|end_header_id|>"
    );
}

#[test]
fn default_system_context_is_sql_policy() {
    let prompt = build_prompt("Zeig mir jeden Patienten der in Q4 einen Termin hatte", &SystemContext::default());
    let text = prompt.as_str();
    assert!(text.contains("postgresql datenbank abgefeuert werden.BEGIN TABLE INFO: Produkte"));
    assert!(text.ends_with("<|start_header_id|>assistant<|end_header_id|>"));
    assert_eq!(text.matches("<|eot_id|>").count(), 2);
}

#[test]
fn custom_markup_is_honoured() {
    let markup = ChatMarkup { system_open: "[S]", user_open: "[U]", assistant_open: "[A]", end_of_turn: "[E]" };
    let system = SystemContext { policy: "p".into(), schema: "s".into() };
    assert_eq!(build_prompt_with(&markup, "m", &system).to_string(), "[S]ps[E][U]m[E][A]");
}

#[test]
fn prefill_flags_only_last_slot() {
    let tokens = [11, 12, 13, 14, 15];
    let mut builder = BatchBuilder::new(tokens.len());
    let batch = builder.prefill(&tokens).expect("prefill");
    assert_eq!(batch.tokens(), &tokens);
    assert_eq!(batch.positions(), &[0, 1, 2, 3, 4]);
    assert!(batch.seq_ids().iter().all(|&s| s == SEQ_ID));
    assert_eq!(batch.outputs(), &[false, false, false, false, true]);
    assert_eq!(batch.last_output(), Some(4));
}

#[test]
fn single_token_prefill_flags_slot_zero() {
    let mut builder = BatchBuilder::new(1);
    let batch = builder.prefill(&[7]).expect("prefill");
    assert_eq!(batch.outputs(), &[true]);
}

#[test]
fn step_reuses_the_prefill_batch() {
    let mut builder = BatchBuilder::new(3);
    builder.prefill(&[1, 2, 3]).expect("prefill");
    let batch = builder.step(42, 3).expect("step");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.tokens(), &[42]);
    assert_eq!(batch.positions(), &[3]);
    assert_eq!(batch.outputs(), &[true]);
    assert_eq!(batch.capacity(), 3);
}

#[test]
fn empty_prefill_still_allows_steps() {
    let mut builder = BatchBuilder::new(0);
    assert_eq!(builder.batch().capacity(), 1);
    assert!(builder.step(1, 0).is_ok());
}

#[test]
fn prefill_larger_than_capacity_is_rejected() {
    let mut builder = BatchBuilder::new(2);
    let err = builder.prefill(&[1, 2, 3]).unwrap_err();
    assert_eq!(err, GenError::BatchCapacity { capacity: 2 });
}
