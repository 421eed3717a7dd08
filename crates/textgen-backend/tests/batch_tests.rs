use textgen_backend::mock::{MockVocab, BEGIN_OF_TEXT, EOT};
use textgen_backend::{Batch, Vocabulary};
use textgen_common::GenError;

#[test]
fn batch_rejects_push_past_capacity() {
    let mut batch = Batch::with_capacity(2);
    batch.push(1, 0, 0, false).expect("slot 0");
    batch.push(2, 1, 0, true).expect("slot 1");
    let err = batch.push(3, 2, 0, false).unwrap_err();
    assert_eq!(err, GenError::BatchCapacity { capacity: 2 });
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.last_output(), Some(1));
}

#[test]
fn batch_clear_keeps_capacity() {
    let mut batch = Batch::with_capacity(3);
    for i in 0..3 { batch.push(i, i, 0, i == 2).expect("push"); }
    batch.clear();
    assert!(batch.is_empty());
    assert_eq!(batch.capacity(), 3);
    assert_eq!(batch.last_output(), None);
}

#[test]
fn mock_vocab_reports_required_size() {
    let vocab = MockVocab;
    let n = vocab.tokenize("<|eot_id|>ab", &mut [], true, true);
    assert_eq!(n, -4);
    let mut buf = vec![0; 4];
    assert_eq!(vocab.tokenize("<|eot_id|>ab", &mut buf, true, true), 4);
    assert_eq!(buf, vec![BEGIN_OF_TEXT, EOT, 97, 98]);
}

#[test]
fn mock_vocab_renders_specials_only_when_asked() {
    let vocab = MockVocab;
    let tokens = [EOT, 104, 105];
    let mut buf = vec![0u8; 32];
    let n = vocab.detokenize(&tokens, &mut buf, false, false);
    assert_eq!(&buf[..n as usize], b"hi");
    let n = vocab.detokenize(&tokens, &mut buf, false, true);
    assert_eq!(&buf[..n as usize], b"<|eot_id|>hi");
}
