//! Assembly and parsing of the packets exchanged with the pump.
//!
//! A logical pump packet is `sentinel, serial, opcode, parameters, CRC-8`.
//! [`ToPumpPacket`] builds and line-codes requests; [`FromPumpPacket`]
//! strips the stick's metadata prefix off a received frame, decodes the
//! symbol stream, and verifies the checksum.

use std::fmt;

use thiserror::Error;

use crate::bytes::hexify;
use crate::crc::crc8;
use crate::linecode;

/// First byte of every pump packet (the RF message class).
pub const SENTINEL: u8 = 0xA7;

/// Opcode of a pump acknowledgement packet.
pub const ACK_CODE: u8 = 0x06;

/// Bytes the stick prepends to every received radio payload: a sequence
/// number and the raw RSSI reading.
pub(crate) const METADATA_LEN: usize = 2;

/// Sentinel + serial + opcode + CRC.
const MIN_PACKET_LEN: usize = 6;

/// Subtracted from the halved RSSI reading to obtain dBm.
const RSSI_OFFSET: i32 = 77;

/// Codec and framing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// A 6-bit word matched no symbol before the end of the stream.
    #[error("unmatched bits before end of packet (corrupted packet): {word}")]
    UnmatchedBits { word: String },

    /// The bits after the last symbol were not the `0101` pad.
    #[error("last bits do not correspond to expectation (0101): {word}")]
    BadEnding { word: String },

    /// The encoded stream would not land on a byte boundary.
    #[error("impossible to encode a number of bits which isn't a multiple of 8: {bits}")]
    MissingBits { bits: usize },

    #[error("bad CRC (corrupted packet): expected {expected:#04X}, got {found:#04X}")]
    BadCrc { expected: u8, found: u8 },

    #[error("not enough bytes received: expecting {expected}, received {found}")]
    NotEnoughBytes { expected: usize, found: usize },
}

/// A request packet bound for the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToPumpPacket {
    serial: [u8; 3],
    code: u8,
    parameters: Vec<u8>,
}

impl ToPumpPacket {
    pub fn new(serial: [u8; 3], code: u8, parameters: &[u8]) -> Self {
        Self {
            serial,
            code,
            parameters: parameters.to_vec(),
        }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn parameters(&self) -> &[u8] {
        &self.parameters
    }

    /// The logical packet: sentinel, serial, opcode, parameters, CRC-8 over
    /// everything before it.
    pub fn assemble(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MIN_PACKET_LEN + self.parameters.len());
        bytes.push(SENTINEL);
        bytes.extend_from_slice(&self.serial);
        bytes.push(self.code);
        bytes.extend_from_slice(&self.parameters);
        bytes.push(crc8(&bytes));
        bytes
    }

    /// The line-coded form handed to the radio.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        linecode::encode(&self.assemble())
    }
}

impl fmt::Display for ToPumpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hexify(&self.assemble()))
    }
}

/// A response packet received from the pump, together with the metadata the
/// stick prefixes to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromPumpPacket {
    sequence: u8,
    rssi: u8,
    bytes: Vec<u8>,
}

impl FromPumpPacket {
    /// Parses a transport frame: two metadata bytes followed by the encoded
    /// packet. Verifies length and checksum.
    pub fn parse(frame: &[u8]) -> Result<Self, PacketError> {
        if frame.len() < METADATA_LEN {
            return Err(PacketError::NotEnoughBytes {
                expected: METADATA_LEN,
                found: frame.len(),
            });
        }

        let bytes = linecode::decode(&frame[METADATA_LEN..])?;
        if bytes.len() < MIN_PACKET_LEN {
            return Err(PacketError::NotEnoughBytes {
                expected: MIN_PACKET_LEN,
                found: bytes.len(),
            });
        }

        let found = bytes[bytes.len() - 1];
        let expected = crc8(&bytes[..bytes.len() - 1]);
        if found != expected {
            return Err(PacketError::BadCrc { expected, found });
        }

        Ok(Self {
            sequence: frame[0],
            rssi: frame[1],
            bytes,
        })
    }

    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn rssi(&self) -> u8 {
        self.rssi
    }

    /// Received signal strength in dBm.
    pub fn rssi_dbm(&self) -> i32 {
        (self.rssi as i8 as i32).div_euclid(2) - RSSI_OFFSET
    }

    /// The decoded logical packet, CRC included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn serial(&self) -> [u8; 3] {
        [self.bytes[1], self.bytes[2], self.bytes[3]]
    }

    pub fn code(&self) -> u8 {
        self.bytes[4]
    }

    pub fn crc(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// Everything between the opcode and the CRC, untrimmed.
    pub fn body(&self) -> &[u8] {
        &self.bytes[5..self.bytes.len() - 1]
    }

    /// The command payload: the body with trailing zero bytes stripped.
    pub fn payload(&self) -> &[u8] {
        let body = self.body();
        let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        &body[..end]
    }

    /// Whether this is the pump's `{06, 00}` acknowledgement.
    pub fn is_ack(&self) -> bool {
        self.code() == ACK_CODE && self.body() == [0x00]
    }
}

impl fmt::Display for FromPumpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hexify(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERIAL: [u8; 3] = [0x79, 0x91, 0x63];

    fn frame(bytes: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x01, 0x9C];
        frame.extend_from_slice(bytes);
        frame
    }

    #[test]
    fn assembles_time_read_request() {
        let packet = ToPumpPacket::new(SERIAL, 0x70, &[0x00]);
        assert_eq!(packet.assemble(), [0xA7, 0x79, 0x91, 0x63, 0x70, 0x00, 0x55]);
        assert_eq!(
            packet.encode().unwrap(),
            vec![169, 101, 153, 103, 25, 163, 89, 85, 85, 150, 85]
        );
    }

    #[test]
    fn parses_model_read_response() {
        let packet = FromPumpPacket::parse(&frame(&[169, 101, 153, 103, 25, 163, 104, 213, 85, 177, 165])).unwrap();
        assert_eq!(packet.to_string(), "A7 79 91 63 8D 00 C8");
        assert_eq!(packet.serial(), SERIAL);
        assert_eq!(packet.code(), 0x8D);
        assert_eq!(packet.payload(), &[] as &[u8]);
        assert_eq!(packet.crc(), 0xC8);
        assert_eq!(packet.rssi(), 0x9C);
    }

    #[test]
    fn round_trips_button_press_request() {
        let mut parameters = vec![0u8; 65];
        parameters[0] = 0x01;
        let packet = ToPumpPacket::new(SERIAL, 0x5B, &parameters);

        let assembled = packet.assemble();
        assert_eq!(assembled.len(), 71);
        assert_eq!(assembled[assembled.len() - 1], 0x3D);

        let encoded = packet.encode().unwrap();
        assert_eq!(encoded.len(), 107);
        assert_eq!(&encoded[..10], &[169, 101, 153, 103, 25, 163, 148, 181, 113, 85]);
        assert_eq!(linecode::decode(&encoded).unwrap(), assembled);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut bytes = ToPumpPacket::new(SERIAL, 0x70, &[0x00]).assemble();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let encoded = linecode::encode(&bytes).unwrap();
        assert_eq!(
            FromPumpPacket::parse(&frame(&encoded)),
            Err(PacketError::BadCrc { expected: 0x55, found: 0x55 ^ 0xFF })
        );
    }

    #[test]
    fn rejects_short_packets() {
        assert_eq!(
            FromPumpPacket::parse(&[0x01]),
            Err(PacketError::NotEnoughBytes { expected: 2, found: 1 })
        );
        // A frame whose encoded part is only the end-of-packet marker.
        assert_eq!(
            FromPumpPacket::parse(&[0x01, 0x9C, 0x00]),
            Err(PacketError::NotEnoughBytes { expected: 6, found: 0 })
        );
    }

    #[test]
    fn trims_trailing_zeros_only() {
        let bytes = [0xA7, 0x79, 0x91, 0x63, 0x70, 0x07, 0x00, 0x2A, 0x00, 0x00];
        let mut with_crc = bytes.to_vec();
        with_crc.push(crc8(&with_crc));
        let encoded = linecode::encode(&with_crc).unwrap();

        let packet = FromPumpPacket::parse(&frame(&encoded)).unwrap();
        assert_eq!(packet.body(), &[0x07, 0x00, 0x2A, 0x00, 0x00]);
        assert_eq!(packet.payload(), &[0x07, 0x00, 0x2A]);
    }

    #[test]
    fn recognizes_acknowledgements() {
        let ack = ToPumpPacket::new(SERIAL, ACK_CODE, &[0x00]).assemble();
        let packet = FromPumpPacket::parse(&frame(&linecode::encode(&ack).unwrap())).unwrap();
        assert!(packet.is_ack());
        assert_eq!(packet.payload(), &[] as &[u8]);

        let not_ack = ToPumpPacket::new(SERIAL, ACK_CODE, &[0x01]).assemble();
        let packet = FromPumpPacket::parse(&frame(&linecode::encode(&not_ack).unwrap())).unwrap();
        assert!(!packet.is_ack());
    }
}
