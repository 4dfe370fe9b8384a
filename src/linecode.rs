//! The 4b/6b line code used on the pump radio link.
//!
//! Every hex nibble expands to a 6-bit symbol, MSB first. An encoded packet
//! ends with the four-bit `0101` pad, and the whole bit stream must land on
//! a byte boundary. On the receive side an all-zero word marks the end of
//! the packet.

use crate::packets::PacketError;

/// Nibble value to 6-bit symbol.
pub const SYMBOLS: [u8; 16] = [
    0b010101, 0b110001, 0b110010, 0b100011, // 0 1 2 3
    0b110100, 0b100101, 0b100110, 0b010110, // 4 5 6 7
    0b011010, 0b011001, 0b101010, 0b001011, // 8 9 A B
    0b101100, 0b001101, 0b001110, 0b011100, // C D E F
];

/// End-of-packet word.
const EOP: u8 = 0b000000;

/// Pad appended after the last symbol.
const TRAILER: u8 = 0b0101;
const TRAILER_BITS: usize = 4;

const SYMBOL_BITS: usize = 6;

fn symbol_value(word: u8) -> Option<u8> {
    SYMBOLS.iter().position(|&s| s == word).map(|i| i as u8)
}

struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    filled: usize,
}

impl BitWriter {
    fn with_capacity(bytes: usize) -> Self {
        Self {
            out: Vec::with_capacity(bytes),
            acc: 0,
            filled: 0,
        }
    }

    fn push(&mut self, word: u8, len: usize) {
        self.acc = self.acc << len | word as u32;
        self.filled += len;
        while self.filled >= 8 {
            self.filled -= 8;
            self.out.push((self.acc >> self.filled) as u8);
            self.acc &= (1 << self.filled) - 1;
        }
    }
}

/// Expands `bytes` nibble-by-nibble into the symbol stream and appends the
/// trailing pad.
///
/// Fails when the resulting bit count is not a multiple of 8, which is the
/// case exactly when `bytes` has even length.
pub fn encode(bytes: &[u8]) -> Result<Vec<u8>, PacketError> {
    let total = bytes.len() * 2 * SYMBOL_BITS + TRAILER_BITS;
    if total % 8 != 0 {
        return Err(PacketError::MissingBits { bits: total });
    }

    let mut writer = BitWriter::with_capacity(total / 8);
    for &byte in bytes {
        writer.push(SYMBOLS[(byte >> 4) as usize], SYMBOL_BITS);
        writer.push(SYMBOLS[(byte & 0x0F) as usize], SYMBOL_BITS);
    }
    writer.push(TRAILER, TRAILER_BITS);

    Ok(writer.out)
}

/// Collapses a received symbol stream back into bytes.
///
/// Decoding stops at the end-of-packet word. A word that matches no symbol
/// is only legal as the final `0101` pad.
pub fn decode(bytes: &[u8]) -> Result<Vec<u8>, PacketError> {
    let total = bytes.len() * 8;
    let mut pos = 0;
    let mut nibbles = Vec::with_capacity(bytes.len());

    while pos < total {
        let len = (total - pos).min(SYMBOL_BITS);
        let word = read_bits(bytes, pos, len);
        pos += len;

        if len == SYMBOL_BITS {
            if word == EOP {
                break;
            }
            if let Some(nibble) = symbol_value(word) {
                nibbles.push(nibble);
                continue;
            }
        }
        if pos < total {
            return Err(PacketError::UnmatchedBits { word: bit_string(word, len) });
        }
        if len == TRAILER_BITS && word == TRAILER {
            break;
        }
        return Err(PacketError::BadEnding { word: bit_string(word, len) });
    }

    let mut out = Vec::with_capacity(nibbles.len() / 2);
    let mut pairs = nibbles.chunks_exact(2);
    for pair in &mut pairs {
        out.push(pair[0] << 4 | pair[1]);
    }
    if let [stray] = pairs.remainder() {
        return Err(PacketError::UnmatchedBits { word: bit_string(*stray, 4) });
    }

    Ok(out)
}

fn read_bits(bytes: &[u8], pos: usize, len: usize) -> u8 {
    let mut word = 0;
    for i in pos..pos + len {
        word = word << 1 | (bytes[i / 8] >> (7 - i % 8)) & 1;
    }
    word
}

fn bit_string(word: u8, len: usize) -> String {
    format!("{word:0len$b}")
}
