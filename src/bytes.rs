//! Helpers for moving between integers, bytes, and their printable forms.

use thiserror::Error;

/// Byte order accepted by [`pack`] and [`unpack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{value} does not fit in {width} bytes")]
pub struct WidthError {
    pub value: u64,
    pub width: usize,
}

/// Packs `value` into exactly `width` bytes.
///
/// Fails when `width` is smaller than the minimum number of bytes needed to
/// represent `value`.
pub fn pack(value: u64, width: usize, order: ByteOrder) -> Result<Vec<u8>, WidthError> {
    let needed = ((64 - value.leading_zeros() as usize) + 7) / 8;
    if width < needed.max(1) {
        return Err(WidthError { value, width });
    }

    let mut bytes: Vec<u8> = (0..width)
        .map(|i| {
            let shift = 8 * (width - 1 - i);
            if shift < 64 {
                (value >> shift) as u8
            } else {
                0
            }
        })
        .collect();

    if order == ByteOrder::Little {
        bytes.reverse();
    }

    Ok(bytes)
}

/// Unsigned base-256 interpretation of up to eight `bytes` in the given
/// order.
pub fn unpack(bytes: &[u8], order: ByteOrder) -> u64 {
    match order {
        ByteOrder::Big => bytes.iter().fold(0, |value, &b| value << 8 | b as u64),
        ByteOrder::Little => bytes.iter().rev().fold(0, |value, &b| value << 8 | b as u64),
    }
}

/// Uppercase hex rendition separated by spaces, e.g. `"A7 79 91"`.
pub fn hexify(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Character rendition of raw bytes, used for the ASCII strings the stick
/// firmware reports.
pub fn charify(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
