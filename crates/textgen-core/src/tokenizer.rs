//! Text ⇄ token conversion over a [`Vocabulary`].
//!
//! The vocabulary calls report "buffer too small" by returning the negated
//! required length. Callers here never see that convention: a sizing call
//! with an empty buffer is turned into a [`Sizing`], an exact buffer is
//! allocated, and the fill call must then succeed.

use textgen_backend::{TokenId, Vocabulary};
use textgen_common::{GenError, Result};

/// Result of one raw tokenizer call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// The buffer was large enough; this many items were written.
    Fits(usize),
    /// Nothing was written; a buffer of this length is required.
    NeedsCapacity(usize),
}

impl Sizing {
    /// `None` for the `i32::MIN` sentinel, which has no representable size.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            i32::MIN => None,
            n if n >= 0 => Some(Sizing::Fits(n as usize)),
            n => Some(Sizing::NeedsCapacity(n.unsigned_abs() as usize)),
        }
    }

    pub fn required(self) -> usize {
        match self {
            Sizing::Fits(n) | Sizing::NeedsCapacity(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Add BOS/EOS tokens the model is configured to use.
    pub add_special: bool,
    /// Recognise special-token text (chat markers) as single tokens.
    pub parse_special: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self { Self { add_special: true, parse_special: true } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeOptions {
    pub remove_special: bool,
    pub unparse_special: bool,
}

pub fn encode(vocab: &dyn Vocabulary, text: &str, opts: EncodeOptions) -> Result<Vec<TokenId>> {
    let raw = vocab.tokenize(text, &mut [], opts.add_special, opts.parse_special);
    let sizing = Sizing::from_raw(raw).ok_or(GenError::EncodeOverflow)?;
    encode_with_capacity(vocab, text, sizing.required(), opts)
}

/// Fill step of [`encode`] with a caller-chosen buffer length. Anything short
/// of the length the sizing call reported fails with `EncodeFailed`.
pub fn encode_with_capacity(vocab: &dyn Vocabulary, text: &str, capacity: usize, opts: EncodeOptions) -> Result<Vec<TokenId>> {
    let mut tokens = vec![0; capacity];
    let raw = vocab.tokenize(text, &mut tokens, opts.add_special, opts.parse_special);
    match Sizing::from_raw(raw) {
        Some(Sizing::Fits(n)) if n > 0 => {
            tokens.truncate(n);
            Ok(tokens)
        }
        _ => Err(GenError::EncodeFailed),
    }
}

pub fn decode(vocab: &dyn Vocabulary, tokens: &[TokenId], opts: DecodeOptions) -> Result<String> {
    let raw = vocab.detokenize(tokens, &mut [], opts.remove_special, opts.unparse_special);
    let needed = match Sizing::from_raw(raw) {
        Some(Sizing::NeedsCapacity(n)) => n,
        Some(Sizing::Fits(0)) => 0,
        Some(Sizing::Fits(_)) => return Err(GenError::DecodeSizingFailed(raw)),
        None => return Err(GenError::DecodeFailed),
    };
    let mut buf = vec![0u8; needed];
    let written = vocab.detokenize(tokens, &mut buf, opts.remove_special, opts.unparse_special);
    if written < 0 {
        return Err(GenError::DecodeFailed);
    }
    buf.truncate(written as usize);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Generated text as presented to the user: decoded with default options
/// and stripped of leading whitespace and control characters.
pub fn decode_output(vocab: &dyn Vocabulary, tokens: &[TokenId]) -> Result<String> {
    let text = decode(vocab, tokens, DecodeOptions::default())?;
    Ok(strip_leading(&text).to_string())
}

pub fn strip_leading(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_whitespace() || c.is_control())
}
