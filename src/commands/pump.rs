//! Plumbing shared by every pump command: the radio round-trip, the
//! acknowledgement contract, and the prelude/core/postlude orchestration
//! for commands whose payload spans several packets.

use log::trace;

use crate::packets::{FromPumpPacket, ToPumpPacket, ACK_CODE};
use crate::stick::{ExchangeOptions, Transport};

use super::CommandError;

/// Opcode of the continuation read used as the big-command postlude. The
/// pump reuses it as the opcode of its acknowledgement packets.
pub(crate) const READ_MORE: u8 = ACK_CODE;

/// Opcode of the model read, the benign request the frequency scanner
/// probes with.
pub(crate) const READ_MODEL: u8 = 0x8D;

/// Parameter buffer of a command that carries no arguments.
pub(crate) const NO_ARGS: [u8; 1] = [0x00];

/// Length of the zero-filled region in a big command's parameter buffer.
const BIG_PARAMETER_TAIL: usize = 64;

/// Builds a big command's parameter buffer: a leading count byte followed
/// by a 64-byte zero-filled region with `tail` written at its head.
pub(crate) fn big_parameters(count: u8, tail: &[u8]) -> Vec<u8> {
    let mut parameters = vec![0u8; 1 + BIG_PARAMETER_TAIL];
    parameters[0] = count;
    parameters[1..1 + tail.len()].copy_from_slice(tail);
    parameters
}

/// One radio round-trip: build the request packet, line-code it, transmit,
/// and parse the reply.
pub(crate) fn exchange<T: Transport + ?Sized>(
    stick: &mut T,
    code: u8,
    parameters: &[u8],
) -> Result<FromPumpPacket, CommandError> {
    let request = ToPumpPacket::new(stick.pump_serial(), code, parameters);
    trace!("-> pump: {request}");
    let reply = stick.radio_exchange(&request.encode()?, &ExchangeOptions::default())?;
    let packet = FromPumpPacket::parse(&reply)?;
    trace!("<- pump: {packet}");
    Ok(packet)
}

/// Checks the `{06, 00}` acknowledgement contract of a set command.
pub(crate) fn expect_ack(packet: &FromPumpPacket) -> Result<(), CommandError> {
    if packet.is_ack() {
        Ok(())
    } else {
        Err(CommandError::UnsuccessfulRadioCommand {
            code: packet.code(),
            body: packet.body().to_vec(),
        })
    }
}

/// The packets produced by a big command, in arrival order.
pub(crate) struct BigResponse {
    pub core: FromPumpPacket,
    pub continuations: Vec<FromPumpPacket>,
}

impl BigResponse {
    /// The core payload with every continuation payload appended.
    pub fn assembled_payload(&self) -> Vec<u8> {
        let mut payload = self.core.payload().to_vec();
        for packet in &self.continuations {
            payload.extend_from_slice(packet.payload());
        }
        payload
    }

    /// The packet the acknowledgement contract is checked against.
    pub fn last(&self) -> &FromPumpPacket {
        self.continuations.last().unwrap_or(&self.core)
    }
}

/// A command whose logical operation spans several radio round-trips:
/// wake-up repetitions of the opcode with the default parameter, the core
/// request, then continuation reads.
pub(crate) struct BigCommand {
    code: u8,
    prelude_reps: usize,
    postlude_reps: usize,
}

impl BigCommand {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            prelude_reps: 1,
            postlude_reps: 0,
        }
    }

    pub fn with_postlude(code: u8, postlude_reps: usize) -> Self {
        Self {
            code,
            prelude_reps: 1,
            postlude_reps,
        }
    }

    /// Runs the full prelude/core/postlude sequence.
    pub fn run<T: Transport + ?Sized>(
        &self,
        stick: &mut T,
        parameters: &[u8],
    ) -> Result<BigResponse, CommandError> {
        for _ in 0..self.prelude_reps {
            exchange(stick, self.code, &NO_ARGS)?;
        }

        let core = exchange(stick, self.code, parameters)?;

        let mut continuations = Vec::with_capacity(self.postlude_reps);
        for _ in 0..self.postlude_reps {
            continuations.push(exchange(stick, READ_MORE, &NO_ARGS)?);
        }

        Ok(BigResponse { core, continuations })
    }

    /// Runs the sequence and stitches every payload together.
    pub fn run_assembled<T: Transport + ?Sized>(
        &self,
        stick: &mut T,
        parameters: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        Ok(self.run(stick, parameters)?.assembled_payload())
    }

    /// Runs the sequence and checks the final acknowledgement.
    pub fn run_set<T: Transport + ?Sized>(
        &self,
        stick: &mut T,
        parameters: &[u8],
    ) -> Result<(), CommandError> {
        expect_ack(self.run(stick, parameters)?.last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pump_reply, MockStick};

    #[test]
    fn big_parameter_layout() {
        let parameters = big_parameters(0x02, &[0x01, 0x0A]);
        assert_eq!(parameters.len(), 65);
        assert_eq!(&parameters[..3], &[0x02, 0x01, 0x0A]);
        assert!(parameters[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn orchestration_order_and_assembly() {
        let mut stick = MockStick::new();
        stick.push_reply(pump_reply(stick.serial, 0x92, &[0x00], 0x70)); // prelude
        stick.push_reply(pump_reply(stick.serial, 0x92, &[0x28, 0x00, 0x00], 0x70)); // core
        stick.push_reply(pump_reply(stick.serial, READ_MORE, &[0x30, 0x00, 0x01], 0x70));

        let assembled = BigCommand::with_postlude(0x92, 1)
            .run_assembled(&mut stick, &NO_ARGS)
            .unwrap();
        assert_eq!(assembled, vec![0x28, 0x30, 0x00, 0x01]);

        let sent = stick.sent_packets();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].code(), 0x92);
        assert_eq!(sent[1].code(), 0x92);
        assert_eq!(sent[2].code(), READ_MORE);
    }

    #[test]
    fn set_contract_checks_final_packet() {
        let mut stick = MockStick::new();
        stick.push_reply(pump_reply(stick.serial, ACK_CODE, &[0x00], 0x70));
        stick.push_reply(pump_reply(stick.serial, ACK_CODE, &[0x00], 0x70));
        BigCommand::new(0x5B).run_set(&mut stick, &NO_ARGS).unwrap();

        let mut stick = MockStick::new();
        stick.push_reply(pump_reply(stick.serial, ACK_CODE, &[0x00], 0x70));
        stick.push_reply(pump_reply(stick.serial, 0x5B, &[0x01], 0x70));
        let error = BigCommand::new(0x5B).run_set(&mut stick, &NO_ARGS).unwrap_err();
        assert!(matches!(
            error,
            CommandError::UnsuccessfulRadioCommand { code: 0x5B, .. }
        ));
    }
}
