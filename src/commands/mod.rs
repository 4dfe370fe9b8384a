//! The pump and stick command set.
//!
//! A command goes through three phases: its parameters are encoded, bytes
//! move over the wire, and the reply is decoded into a typed response.
//! [`Command::execute`] performs all three and is written against the
//! [`Transport`] seam, so any transport implementation (the USB stick, or a
//! scripted fake in tests) can carry it.

use thiserror::Error;

use crate::packets::PacketError;
use crate::stick::{StickError, Transport};

pub mod pump;
pub mod reads;
pub mod sets;
pub mod stick;

/// Bolus delivery rate (s/U).
pub const BOLUS_RATE: f64 = 40.0;
/// Smallest bolus increment (U).
pub const BOLUS_STROKE: f64 = 0.1;
/// Smallest basal rate increment (U/h).
pub const BASAL_STROKE: f64 = 0.025;
/// Duration of one basal schedule block (minutes).
pub const BASAL_TIME_BLOCK: u32 = 30;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Stick(#[from] StickError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    /// A set command came back without the `{06, 00}` acknowledgement.
    #[error("unsuccessful radio command: opcode {code:#04X}, body {body:02X?}")]
    UnsuccessfulRadioCommand { code: u8, body: Vec<u8> },

    /// The pump never answered the wake-up prelude.
    #[error("no pump answered; is it within reach?")]
    NoPump,

    /// An out-of-range parameter, rejected at encode time.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// A structurally valid packet whose payload does not match the
    /// command's contract.
    #[error("malformed response payload: {0}")]
    MalformedResponse(String),
}

/// A runnable operation against the stick or the pump.
pub trait Command {
    type Output;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T)
        -> Result<Self::Output, CommandError>;
}
