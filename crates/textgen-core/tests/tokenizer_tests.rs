use textgen_backend::mock::{MockVocab, BEGIN_OF_TEXT, EOT, START_HEADER};
use textgen_backend::{TokenId, Vocabulary};
use textgen_common::GenError;
use textgen_core::tokenizer::{self, DecodeOptions, EncodeOptions, Sizing};

const PLAIN: EncodeOptions = EncodeOptions { add_special: false, parse_special: false };

/// Reports sizes but always fails to fill, or returns a fixed raw code.
struct RawVocab {
    tokenize_raw: i32,
    detokenize_raw: i32,
}

impl Vocabulary for RawVocab {
    fn n_tokens(&self) -> i32 { 0 }
    fn is_end_of_generation(&self, _token: TokenId) -> bool { false }
    fn tokenize(&self, _text: &str, _buf: &mut [TokenId], _add: bool, _parse: bool) -> i32 { self.tokenize_raw }
    fn detokenize(&self, _tokens: &[TokenId], _buf: &mut [u8], _remove: bool, _unparse: bool) -> i32 { self.detokenize_raw }
}

#[test]
fn sizing_hides_sign_convention() {
    assert_eq!(Sizing::from_raw(-7), Some(Sizing::NeedsCapacity(7)));
    assert_eq!(Sizing::from_raw(3), Some(Sizing::Fits(3)));
    assert_eq!(Sizing::from_raw(i32::MIN), None);
    assert_eq!(Sizing::NeedsCapacity(7).required(), 7);
}

#[test]
fn round_trip_plain_text() {
    let vocab = MockVocab;
    for text in ["SELECT * FROM produkte;", "Größe über 10 €", "a"] {
        let tokens = tokenizer::encode(&vocab, text, PLAIN).expect("encode");
        let back = tokenizer::decode_output(&vocab, &tokens).expect("decode");
        assert_eq!(back, text);
    }
}

#[test]
fn round_trip_strips_leading_whitespace() {
    let vocab = MockVocab;
    let tokens = tokenizer::encode(&vocab, " \n\tSELECT 1", PLAIN).expect("encode");
    assert_eq!(tokenizer::decode_output(&vocab, &tokens).expect("decode"), "SELECT 1");
}

#[test]
fn encode_with_specials_adds_bos_and_parses_markers() {
    let vocab = MockVocab;
    let tokens = tokenizer::encode(&vocab, "<|start_header_id|>x<|eot_id|>", EncodeOptions::default()).expect("encode");
    assert_eq!(tokens, vec![BEGIN_OF_TEXT, START_HEADER, 'x' as TokenId, EOT]);
}

#[test]
fn sizing_call_reports_exact_fill_length() {
    let vocab = MockVocab;
    let text = "Zeig mir jeden Patienten";
    let raw = vocab.tokenize(text, &mut [], false, false);
    let needed = Sizing::from_raw(raw).expect("sizeable").required();
    let tokens = tokenizer::encode_with_capacity(&vocab, text, needed, PLAIN).expect("exact fit");
    assert_eq!(tokens.len(), needed);
    let err = tokenizer::encode_with_capacity(&vocab, text, needed - 1, PLAIN).unwrap_err();
    assert_eq!(err, GenError::EncodeFailed);
}

#[test]
fn empty_text_fails_to_encode() {
    let err = tokenizer::encode(&MockVocab, "", PLAIN).unwrap_err();
    assert_eq!(err, GenError::EncodeFailed);
}

#[test]
fn min_sentinel_is_overflow() {
    let vocab = RawVocab { tokenize_raw: i32::MIN, detokenize_raw: 0 };
    assert_eq!(tokenizer::encode(&vocab, "x", PLAIN).unwrap_err(), GenError::EncodeOverflow);
}

#[test]
fn positive_detokenize_sizing_is_rejected() {
    let vocab = RawVocab { tokenize_raw: 0, detokenize_raw: 5 };
    let err = tokenizer::decode(&vocab, &[1, 2], DecodeOptions::default()).unwrap_err();
    assert_eq!(err, GenError::DecodeSizingFailed(5));
}

#[test]
fn negative_detokenize_fill_fails() {
    // sizing asks for 4 bytes, the fill call then reports failure again
    let vocab = RawVocab { tokenize_raw: 0, detokenize_raw: -4 };
    let err = tokenizer::decode(&vocab, &[1, 2], DecodeOptions::default()).unwrap_err();
    assert_eq!(err, GenError::DecodeFailed);
}

#[test]
fn decode_of_nothing_is_empty() {
    assert_eq!(tokenizer::decode_output(&MockVocab, &[]).expect("decode"), "");
}

#[test]
fn strip_leading_handles_control_chars() {
    assert_eq!(tokenizer::strip_leading("\u{0}\r\n  SELECT"), "SELECT");
    assert_eq!(tokenizer::strip_leading("   "), "");
}
