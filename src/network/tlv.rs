//! Tag-length-value encoding for peer lists
//!
//! A list is a plain concatenation of items, each laid out as
//! `[tag: u8][len: u32 BE][value]`. Only string items are defined.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Tag for a UTF-8 string item
pub const STRING_TAG: u8 = 0x01;

/// Tag byte plus length prefix
const ITEM_HEADER_LEN: usize = 5;

/// TLV decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("Truncated item at offset {0}")]
    Truncated(usize),
    #[error("Unexpected tag {tag:#04x} at offset {offset}")]
    UnexpectedTag { tag: u8, offset: usize },
    #[error("Invalid UTF-8 in item at offset {0}")]
    InvalidUtf8(usize),
}

/// Encode a list of strings, preserving order
pub fn encode_strings<S: AsRef<str>>(items: &[S]) -> Bytes {
    let size = items
        .iter()
        .map(|s| ITEM_HEADER_LEN + s.as_ref().len())
        .sum();
    let mut buf = BytesMut::with_capacity(size);
    for item in items {
        let item = item.as_ref().as_bytes();
        buf.put_u8(STRING_TAG);
        buf.put_u32(item.len() as u32);
        buf.put_slice(item);
    }
    buf.freeze()
}

/// Decode a list of strings produced by [`encode_strings`]
pub fn decode_strings(data: &[u8]) -> Result<Vec<String>, TlvError> {
    let mut items = Vec::new();
    let mut src = data;

    while src.has_remaining() {
        let offset = data.len() - src.remaining();
        if src.remaining() < ITEM_HEADER_LEN {
            return Err(TlvError::Truncated(offset));
        }

        let tag = src.get_u8();
        if tag != STRING_TAG {
            return Err(TlvError::UnexpectedTag { tag, offset });
        }

        let len = src.get_u32() as usize;
        if src.remaining() < len {
            return Err(TlvError::Truncated(offset));
        }

        let value = String::from_utf8(src[..len].to_vec())
            .map_err(|_| TlvError::InvalidUtf8(offset))?;
        src.advance(len);
        items.push(value);
    }

    Ok(items)
}
