//! A scripted stand-in for the USB stick, used by command and tuning
//! tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::crc::crc8;
use crate::linecode;
use crate::packets::SENTINEL;
use crate::stick::{ExchangeOptions, RadioErrorKind, Register, StickError, Transport};

/// Builds the transport frame of a pump reply: the two metadata bytes
/// (sequence, RSSI) followed by the line-coded packet.
///
/// `body` is everything between the opcode and the CRC; it must have odd
/// length so the encoded stream lands on a byte boundary.
pub(crate) fn pump_reply(serial: [u8; 3], code: u8, body: &[u8], rssi: u8) -> Vec<u8> {
    let mut logical = vec![SENTINEL];
    logical.extend_from_slice(&serial);
    logical.push(code);
    logical.extend_from_slice(body);
    logical.push(crc8(&logical));

    let mut frame = vec![0x01, rssi];
    frame.extend(linecode::encode(&logical).expect("reply body must have odd length"));
    frame
}

/// A transmitted pump request, decoded back to its logical bytes.
pub(crate) struct SentPacket(Vec<u8>);

impl SentPacket {
    pub fn code(&self) -> u8 {
        self.0[4]
    }

    pub fn parameters(&self) -> &[u8] {
        &self.0[5..self.0.len() - 1]
    }
}

/// Replays canned radio replies and records everything written to it.
pub(crate) struct MockStick {
    pub serial: [u8; 3],
    pub name: Vec<u8>,
    pub author: Vec<u8>,
    /// Replies for `radio_exchange`, oldest first.
    replies: VecDeque<Result<Vec<u8>, StickError>>,
    /// Encoded frames handed to `radio_exchange`, in order.
    sent: Vec<Vec<u8>>,
    /// Register writes, in order.
    pub register_writes: Vec<(Register, u8)>,
    registers: HashMap<u8, u8>,
    /// When set, register reads return the complement of the stored value.
    pub corrupt_readback: bool,
    pub led_flashes: usize,
}

impl MockStick {
    pub fn new() -> Self {
        Self {
            serial: [0x79, 0x91, 0x63],
            name: b"stick".to_vec(),
            author: b"nobody".to_vec(),
            replies: VecDeque::new(),
            sent: Vec::new(),
            register_writes: Vec::new(),
            registers: HashMap::new(),
            corrupt_readback: false,
            led_flashes: 0,
        }
    }

    pub fn push_reply(&mut self, frame: Vec<u8>) {
        self.replies.push_back(Ok(frame));
    }

    pub fn push_error(&mut self, error: StickError) {
        self.replies.push_back(Err(error));
    }

    /// Every transmitted request so far, decoded.
    pub fn sent_packets(&self) -> Vec<SentPacket> {
        self.sent
            .iter()
            .map(|frame| SentPacket(linecode::decode(frame).expect("sent frame decodes")))
            .collect()
    }
}

impl Transport for MockStick {
    fn pump_serial(&self) -> [u8; 3] {
        self.serial
    }

    fn read_name(&mut self) -> Result<Vec<u8>, StickError> {
        Ok(self.name.clone())
    }

    fn read_author(&mut self) -> Result<Vec<u8>, StickError> {
        Ok(self.author.clone())
    }

    fn read_register(&mut self, register: Register) -> Result<u8, StickError> {
        let value = self.registers.get(&register.address()).copied().unwrap_or(0);
        Ok(if self.corrupt_readback { !value } else { value })
    }

    fn write_register(&mut self, register: Register, value: u8) -> Result<(), StickError> {
        self.register_writes.push((register, value));
        self.registers.insert(register.address(), value);
        Ok(())
    }

    fn radio_receive(
        &mut self,
        _channel: u8,
        _timeout: Duration,
        tolerate: bool,
    ) -> Result<Vec<u8>, StickError> {
        match self.replies.pop_front() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(_)) if tolerate => Ok(Vec::new()),
            Some(Err(error)) => Err(error),
            None => Err(StickError::Radio(RadioErrorKind::Timeout)),
        }
    }

    fn radio_send(&mut self, data: &[u8], _channel: u8, _delay: Duration) -> Result<(), StickError> {
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn radio_exchange(
        &mut self,
        data: &[u8],
        options: &ExchangeOptions,
    ) -> Result<Vec<u8>, StickError> {
        self.sent.push(data.to_vec());
        match self.replies.pop_front() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(_)) if options.tolerate => Ok(Vec::new()),
            Some(Err(error)) => Err(error),
            None => Err(StickError::Radio(RadioErrorKind::Timeout)),
        }
    }

    fn flash_led(&mut self) -> Result<(), StickError> {
        self.led_flashes += 1;
        Ok(())
    }
}
