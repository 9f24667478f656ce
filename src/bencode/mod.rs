//! Bencode codec: encode/decode of the four bencode value kinds with strict
//! dict-key ordering, byte-offset-tracked decode errors, and a 128 MiB cap
//! on individual strings.
mod decoder;
mod encoder;
mod value;

pub use decoder::Decoder;
pub use encoder::{encode, encode_to_vec};
pub use value::BencodeValue;

use thiserror::Error;

/// Hard cap on an individual bencode string's declared length.
pub const MAX_STRING_LEN: usize = 128 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("string length {len} exceeds the {max} byte cap")]
    StringTooLong { len: usize, max: usize },

    #[error("unexpected end of input at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("dictionary keys must be strings (offset {offset})")]
    DictKeyNotString { offset: usize },

    #[error("dictionary keys out of ascending order at offset {offset}: {previous:?} >= {found:?}")]
    DictKeyOrder {
        offset: usize,
        previous: Vec<u8>,
        found: Vec<u8>,
    },

    #[error("{0} bytes of unused trailing data after the top-level value")]
    TrailingData(usize),

    #[error("cannot encode value of type {0}")]
    CannotEncodeType(&'static str),

    #[error("type mismatch decoding field {field}: expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("missing required field {0}")]
    MissingField(&'static str),
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

/// Decode a single top-level bencoded value, erroring on trailing bytes.
pub fn decode(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    let mut dec = Decoder::new(bytes);
    let value = dec.decode_value()?;
    let rest = dec.remaining();
    if rest > 0 {
        return Err(BencodeError::TrailingData(rest));
    }
    Ok(value)
}

/// Decode a single top-level bencoded value, returning the number of bytes
/// consumed and tolerating trailing bytes (used for concatenated streams).
pub fn decode_prefix(bytes: &[u8]) -> BencodeResult<(BencodeValue, usize)> {
    let mut dec = Decoder::new(bytes);
    let value = dec.decode_value()?;
    Ok((value, dec.offset()))
}
