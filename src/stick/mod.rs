//! The CC1111 USB stick: device discovery, bulk framing, and the opcodes
//! its firmware understands.
//!
//! Outbound traffic is written one logical field at a time to the bulk OUT
//! endpoint. Inbound traffic is buffered from the bulk IN endpoint in
//! 64-byte chunks until the stick signals the end of the transfer with a
//! zero byte.

use std::fmt;
use std::time::Duration;

use log::{debug, trace, warn};
use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};
use thiserror::Error;

use crate::bytes::hexify;

pub mod registers;

pub use registers::Register;

/// USB vendor ID of the stick.
pub const STICK_USB_VID: u16 = 0x0451;
/// USB product ID of the stick.
pub const STICK_USB_PID: u16 = 0x16A7;

/// Largest bulk-IN transfer the stick produces at once.
const READ_CHUNK: usize = 64;

/// Endpoint deadline for replies that do not wait on the radio.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Slack added on top of the stick-side radio timeout, absorbing endpoint
/// scheduling jitter.
const USB_TIMEOUT_SLACK: Duration = Duration::from_millis(500);

/// Deadline for bulk-OUT writes.
const WRITE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Radio error sentinel: nothing heard within the radio timeout.
const RADIO_TIMEOUT: u8 = 0xAA;
/// Radio error sentinel: the radio produced no data.
const RADIO_NO_DATA: u8 = 0xBB;

/// Commands understood by the stick firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Opcode {
    ReadName = 0,
    ReadAuthor = 1,
    ReadRegister = 10,
    WriteRegister = 11,
    RadioReceive = 20,
    RadioSend = 21,
    RadioSendReceive = 22,
    FlashLed = 30,
}

/// The failure the stick reports on a radio-returning opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioErrorKind {
    Timeout,
    NoData,
}

impl fmt::Display for RadioErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioErrorKind::Timeout => write!(f, "timeout"),
            RadioErrorKind::NoData => write!(f, "no data"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StickError {
    /// The stick is not on the bus.
    #[error("no stick detected; is it plugged in?")]
    NoStick,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// The stick answered with fewer bytes than its protocol promises.
    #[error("truncated reply from the stick")]
    TruncatedReply,

    /// The stick reported a radio-level failure.
    #[error("radio error: {0}")]
    Radio(RadioErrorKind),

    /// A tuned register did not read back with the written value.
    #[error("register {register:?} mismatch: wrote {wrote:#04X}, read back {read:#04X}")]
    RegisterMismatch {
        register: Register,
        wrote: u8,
        read: u8,
    },

    /// A scan range that straddles or escapes the regional bands.
    #[error("bad frequencies to scan: {low} MHz to {high} MHz")]
    BadFrequencies { low: f64, high: f64 },
}

/// Knobs for the combined radio send/receive opcode.
#[derive(Debug, Clone)]
pub struct ExchangeOptions {
    pub channel_tx: u8,
    pub channel_rx: u8,
    /// Times the firmware repeats the transmission.
    pub repeat: u8,
    /// Delay between transmission repeats.
    pub delay: Duration,
    /// Firmware-side listen retries after the first radio timeout.
    pub retry: u8,
    /// Radio listen window per attempt.
    pub timeout: Duration,
    /// Swallow radio-level errors and hand back an empty payload.
    pub tolerate: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            channel_tx: 0,
            channel_rx: 0,
            repeat: 1,
            delay: Duration::ZERO,
            retry: 1,
            timeout: Duration::from_millis(500),
            tolerate: false,
        }
    }
}

/// The stick-side operations the command layer is written against.
///
/// [`Stick`] is the USB implementation; tests substitute a scripted fake.
pub trait Transport {
    /// Serial number of the paired pump.
    fn pump_serial(&self) -> [u8; 3];

    /// Opcode 0: the firmware name, as raw ASCII bytes.
    fn read_name(&mut self) -> Result<Vec<u8>, StickError>;

    /// Opcode 1: the firmware author, as raw ASCII bytes.
    fn read_author(&mut self) -> Result<Vec<u8>, StickError>;

    /// Opcode 10: one radio register.
    fn read_register(&mut self, register: Register) -> Result<u8, StickError>;

    /// Opcode 11. Fire-and-forget on the USB side; tuning reads back to
    /// verify.
    fn write_register(&mut self, register: Register, value: u8) -> Result<(), StickError>;

    /// Opcode 20: listen on `channel` for a single radio packet.
    fn radio_receive(
        &mut self,
        channel: u8,
        timeout: Duration,
        tolerate: bool,
    ) -> Result<Vec<u8>, StickError>;

    /// Opcode 21: transmit `data` on `channel`.
    fn radio_send(&mut self, data: &[u8], channel: u8, delay: Duration) -> Result<(), StickError>;

    /// Opcode 22: transmit `data` and wait for the pump's reply, with
    /// firmware-side retries.
    fn radio_exchange(
        &mut self,
        data: &[u8],
        options: &ExchangeOptions,
    ) -> Result<Vec<u8>, StickError>;

    /// Opcode 30.
    fn flash_led(&mut self) -> Result<(), StickError>;
}

/// An open CC1111 stick.
///
/// The transport exclusively owns the USB handle; commands borrow it for
/// the duration of a single run.
pub struct Stick {
    handle: DeviceHandle<GlobalContext>,
    endpoint_in: u8,
    endpoint_out: u8,
    pump_serial: [u8; 3],
}

impl Stick {
    /// Finds the stick on the bus, claims its interface, and caches the two
    /// bulk endpoints.
    pub fn open(pump_serial: [u8; 3]) -> Result<Self, StickError> {
        let mut handle = rusb::open_device_with_vid_pid(STICK_USB_VID, STICK_USB_PID)
            .ok_or(StickError::NoStick)?;

        // Not supported on every platform; harmless where it isn't.
        let _ = handle.set_auto_detach_kernel_driver(true);

        let config = handle.device().config_descriptor(0)?;
        handle.set_active_configuration(config.number())?;
        handle.claim_interface(0)?;

        let mut endpoint_in = None;
        let mut endpoint_out = None;
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        Direction::In => {
                            endpoint_in.get_or_insert(endpoint.address());
                        }
                        Direction::Out => {
                            endpoint_out.get_or_insert(endpoint.address());
                        }
                    }
                }
            }
        }
        let (Some(endpoint_in), Some(endpoint_out)) = (endpoint_in, endpoint_out) else {
            return Err(StickError::Usb(rusb::Error::NotFound));
        };

        debug!("found stick: bulk IN {endpoint_in:#04X}, bulk OUT {endpoint_out:#04X}");

        Ok(Self {
            handle,
            endpoint_in,
            endpoint_out,
            pump_serial,
        })
    }

    /// Changes the paired pump.
    pub fn set_pump_serial(&mut self, serial: [u8; 3]) {
        self.pump_serial = serial;
    }

    /// Writes one logical field to the OUT endpoint.
    fn write(&self, bytes: &[u8]) -> Result<(), StickError> {
        trace!("write: {}", hexify(bytes));
        let mut written = 0;
        while written < bytes.len() {
            written += self
                .handle
                .write_bulk(self.endpoint_out, &bytes[written..], WRITE_TIMEOUT)?;
        }
        Ok(())
    }

    /// Reads the IN endpoint until the stick terminates the transfer with a
    /// zero byte, which is stripped.
    fn read(&self, timeout: Duration) -> Result<Vec<u8>, StickError> {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let count = self.handle.read_bulk(self.endpoint_in, &mut chunk, timeout)?;
            bytes.extend_from_slice(&chunk[..count]);
            if bytes.last() == Some(&0) {
                bytes.pop();
                break;
            }
        }
        trace!("read: {}", hexify(&bytes));
        Ok(bytes)
    }

    /// Maps the firmware's single-byte error sentinels on a radio reply.
    fn check_radio(bytes: Vec<u8>, tolerate: bool) -> Result<Vec<u8>, StickError> {
        let kind = match bytes[..] {
            [RADIO_TIMEOUT] => Some(RadioErrorKind::Timeout),
            [RADIO_NO_DATA] => Some(RadioErrorKind::NoData),
            _ => None,
        };
        match kind {
            None => Ok(bytes),
            Some(kind) if tolerate => {
                warn!("tolerating radio error: {kind}");
                Ok(Vec::new())
            }
            Some(kind) => Err(StickError::Radio(kind)),
        }
    }
}

impl Transport for Stick {
    fn pump_serial(&self) -> [u8; 3] {
        self.pump_serial
    }

    fn read_name(&mut self) -> Result<Vec<u8>, StickError> {
        self.write(&[Opcode::ReadName as u8])?;
        self.read(DEFAULT_READ_TIMEOUT)
    }

    fn read_author(&mut self) -> Result<Vec<u8>, StickError> {
        self.write(&[Opcode::ReadAuthor as u8])?;
        self.read(DEFAULT_READ_TIMEOUT)
    }

    fn read_register(&mut self, register: Register) -> Result<u8, StickError> {
        self.write(&[Opcode::ReadRegister as u8])?;
        self.write(&[register.address()])?;
        let bytes = self.read(DEFAULT_READ_TIMEOUT)?;
        bytes.first().copied().ok_or(StickError::TruncatedReply)
    }

    fn write_register(&mut self, register: Register, value: u8) -> Result<(), StickError> {
        self.write(&[Opcode::WriteRegister as u8])?;
        self.write(&[register.address()])?;
        self.write(&[value])
    }

    fn radio_receive(
        &mut self,
        channel: u8,
        timeout: Duration,
        tolerate: bool,
    ) -> Result<Vec<u8>, StickError> {
        self.write(&[Opcode::RadioReceive as u8])?;
        self.write(&[channel])?;
        self.write(&timeout_bytes(timeout))?;
        let bytes = self.read(timeout + USB_TIMEOUT_SLACK)?;
        Self::check_radio(bytes, tolerate)
    }

    fn radio_send(&mut self, data: &[u8], channel: u8, delay: Duration) -> Result<(), StickError> {
        self.write(&[Opcode::RadioSend as u8])?;
        self.write(&[channel])?;
        self.write(&timeout_bytes(delay))?;
        self.write(data)?;
        self.write(&[0])
    }

    fn radio_exchange(
        &mut self,
        data: &[u8],
        options: &ExchangeOptions,
    ) -> Result<Vec<u8>, StickError> {
        self.write(&[Opcode::RadioSendReceive as u8])?;
        self.write(&[options.channel_tx])?;
        self.write(&[options.repeat])?;
        self.write(&timeout_bytes(options.delay))?;
        self.write(&[options.channel_rx])?;
        self.write(&timeout_bytes(options.timeout))?;
        self.write(&[options.retry])?;
        self.write(data)?;
        self.write(&[0])?;

        let deadline = options.timeout * (options.retry as u32 + 1) + USB_TIMEOUT_SLACK;
        let bytes = self.read(deadline)?;
        Self::check_radio(bytes, options.tolerate)
    }

    fn flash_led(&mut self) -> Result<(), StickError> {
        self.write(&[Opcode::FlashLed as u8])
    }
}

/// Milliseconds as the four big-endian bytes the firmware expects.
fn timeout_bytes(duration: Duration) -> [u8; 4] {
    (duration.as_millis().min(u32::MAX as u128) as u32).to_be_bytes()
}
