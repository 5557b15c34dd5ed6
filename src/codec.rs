//! Record codec
//!
//! The backing store silently trims leading and trailing whitespace from
//! every record it stores. A record therefore always starts with a sentinel
//! byte, and gets a second sentinel at the end whenever the payload's last
//! byte could be trimmed (or could be mistaken for the trailing sentinel).
//!
//! ```text
//! payload "abc"   -> "1abc"
//! payload "abc "  -> "1abc 1"
//! payload "ab1"   -> "1ab11"
//! ```
//!
//! Two bytes of every record are reserved for the sentinels, so the usable
//! payload of a record is `max_record_size - 2` bytes.

use crate::error::{Error, Result};

/// Non-whitespace boundary byte.
pub const SENTINEL: u8 = b'1';

/// Bytes reserved per record for the sentinels.
pub const OVERHEAD: usize = 2;

/// Usable payload bytes in a record of `max_record_size` bytes.
pub fn effective_record_size(max_record_size: usize) -> usize {
    max_record_size.saturating_sub(OVERHEAD)
}

/// Whether the store might strip `byte` from the edge of a record.
///
/// Non-ASCII bytes are treated as trimmable since they can be part of a
/// multi-byte unicode space.
fn is_trimmable(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == 0x0B || !byte.is_ascii()
}

fn needs_trailer(payload: &[u8]) -> bool {
    match payload.last() {
        Some(&last) => last == SENTINEL || is_trimmable(last),
        None => false,
    }
}

/// Encode a payload into record content.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(payload.len() + OVERHEAD);
    content.push(SENTINEL);
    content.extend_from_slice(payload);
    if needs_trailer(payload) {
        content.push(SENTINEL);
    }
    content
}

/// Decode record content, stripping exactly the sentinels `encode` added.
pub fn decode(content: &[u8]) -> Result<&[u8]> {
    match content.split_first() {
        Some((&SENTINEL, rest)) => match rest.split_last() {
            Some((&SENTINEL, body)) => Ok(body),
            _ => Ok(rest),
        },
        Some((&first, _)) => Err(Error::MalformedRecord(format!(
            "expected leading sentinel, found byte {:#04x}",
            first
        ))),
        None => Err(Error::MalformedRecord("empty record".to_string())),
    }
}
