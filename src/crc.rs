use crc::{Algorithm, Crc};

/// CRC-8 appended to every pump packet.
///
/// Polynomial 0x9B, no reflection, zero init. The derived lookup table is
/// the 256-entry table published in the Carelink reverse-engineering notes;
/// it starts `[0, 155, 173, 54, 193, 90, 108, 247, ...]` and ends with
/// `123`.
pub const PUMP_CRC8: Crc<u8> = Crc::<u8>::new(&Algorithm {
    width: 8,
    poly: 0x9B,
    init: 0x00,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xEA,
    residue: 0x00,
});

/// Computes the CRC-8 of `bytes` the way the pump expects it.
pub fn crc8(bytes: &[u8]) -> u8 {
    PUMP_CRC8.checksum(bytes)
}

#[cfg(test)]
mod tests {
    use super::crc8;

    // The CRC of a single byte `b` is lookup-table entry `b`, so spot
    // checking single-byte inputs pins the table itself.
    #[test]
    fn matches_published_table() {
        let first_eight = [0, 155, 173, 54, 193, 90, 108, 247];
        for (byte, expected) in first_eight.into_iter().enumerate() {
            assert_eq!(crc8(&[byte as u8]), expected);
        }
        assert_eq!(crc8(&[0xFF]), 123);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc8(&[]), 0);
    }

    #[test]
    fn request_checksums() {
        assert_eq!(crc8(&[0xA7, 0x79, 0x91, 0x63, 0x70, 0x00]), 0x55);
        assert_eq!(crc8(&[0xA7, 0x79, 0x91, 0x63, 0x5D, 0x00]), 0xC6);
    }
}
