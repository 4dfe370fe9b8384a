//! Commands that change pump state.
//!
//! Every one of these runs as a big command and expects the pump's
//! `{06, 00}` acknowledgement back; anything else fails with
//! [`CommandError::UnsuccessfulRadioCommand`].

use log::warn;

use crate::stick::{StickError, Transport};

use super::pump::{self, BigCommand};
use super::{Command, CommandError, BASAL_STROKE, BASAL_TIME_BLOCK, BOLUS_STROKE};

/// Wakes the pump's radio for a session of up to half an hour
/// (opcode 0x5D).
///
/// A sleeping pump ignores the first transmissions, so the wake-up prelude
/// is repeated until the pump acknowledges, tolerating radio silence and
/// garbled packets along the way.
#[derive(Debug, Clone, Copy)]
pub struct PowerPump {
    /// Requested RF session length, in minutes.
    pub minutes: u8,
}

impl PowerPump {
    const CODE: u8 = 0x5D;
    /// Wake-up attempts before giving the pump up for unreachable.
    pub const PRELUDE_REPS: usize = 50;
    const MAX_SESSION_MINUTES: u8 = 30;
}

impl Command for PowerPump {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        if self.minutes > Self::MAX_SESSION_MINUTES {
            return Err(CommandError::BadArgument(format!(
                "invalid RF session length: {} min",
                self.minutes
            )));
        }

        let mut awake = false;
        for attempt in 1..=Self::PRELUDE_REPS {
            match pump::exchange(stick, Self::CODE, &pump::NO_ARGS)
                .and_then(|packet| pump::expect_ack(&packet))
            {
                Ok(()) => {
                    awake = true;
                    break;
                }
                Err(CommandError::Stick(StickError::Radio(_)) | CommandError::Packet(_)) => {
                    warn!("pump did not answer wake-up attempt {attempt}");
                }
                Err(other) => return Err(other),
            }
        }
        if !awake {
            return Err(CommandError::NoPump);
        }

        let parameters = pump::big_parameters(0x02, &[0x01, self.minutes]);
        pump::expect_ack(&pump::exchange(stick, Self::CODE, &parameters)?)
    }
}

/// Buttons on the pump face, in the pump's own encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PumpButton {
    Easy = 0,
    Esc,
    Act,
    Up,
    Down,
}

/// Presses one of the pump's buttons (opcode 0x5B).
#[derive(Debug, Clone, Copy)]
pub struct PushPumpButton {
    pub button: PumpButton,
}

impl Command for PushPumpButton {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        let parameters = pump::big_parameters(0x01, &[self.button as u8]);
        BigCommand::new(0x5B).run_set(stick, &parameters)
    }
}

/// Suspends insulin delivery (opcode 0x4D, parameter 01).
#[derive(Debug, Clone, Copy)]
pub struct SuspendPump;

impl Command for SuspendPump {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        BigCommand::new(0x4D).run_set(stick, &pump::big_parameters(0x01, &[0x01]))
    }
}

/// Resumes insulin delivery (opcode 0x4D, parameter 00).
///
/// Suspend and resume share the opcode; only the parameter byte differs,
/// matching the pump's own semantics.
#[derive(Debug, Clone, Copy)]
pub struct ResumePump;

impl Command for ResumePump {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        BigCommand::new(0x4D).run_set(stick, &pump::big_parameters(0x01, &[0x00]))
    }
}

/// Delivers a bolus (opcode 0x42).
#[derive(Debug, Clone, Copy)]
pub struct DeliverPumpBolus {
    /// Insulin to deliver, in units. Must be a multiple of the 0.1 U
    /// stroke, up to 25 U.
    pub units: f64,
}

impl Command for DeliverPumpBolus {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        let strokes = self.units / BOLUS_STROKE;
        let rounded = strokes.round();
        if (strokes - rounded).abs() > 1e-6 || !(0.0..=250.0).contains(&rounded) {
            return Err(CommandError::BadArgument(format!(
                "invalid bolus: {} U",
                self.units
            )));
        }

        let parameters = pump::big_parameters(0x01, &[rounded as u8]);
        BigCommand::new(0x42).run_set(stick, &parameters)
    }
}

/// Units a temporary basal is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TempBasalUnits {
    UnitsPerHour = 0,
    Percent = 1,
}

/// Switches the pump between absolute and percentage temporary basals
/// (opcode 0x68).
#[derive(Debug, Clone, Copy)]
pub struct SetPumpTempBasalUnits {
    pub units: TempBasalUnits,
}

impl Command for SetPumpTempBasalUnits {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        BigCommand::new(0x68).run_set(stick, &pump::big_parameters(0x01, &[self.units as u8]))
    }
}

/// Converts a temporary-basal duration to the pump's half-hour block count.
fn duration_blocks(minutes: u32) -> Result<u8, CommandError> {
    if minutes % BASAL_TIME_BLOCK != 0 || minutes / BASAL_TIME_BLOCK > 48 {
        return Err(CommandError::BadArgument(format!(
            "invalid TB duration: {minutes} min"
        )));
    }
    Ok((minutes / BASAL_TIME_BLOCK) as u8)
}

/// Starts an absolute temporary basal (opcode 0x4C).
#[derive(Debug, Clone, Copy)]
pub struct SetPumpAbsoluteTempBasal {
    /// U/h, in 0.025 U/h strokes up to 35 U/h.
    pub rate: f64,
    /// Minutes, in whole half-hour blocks up to 24 h.
    pub duration: u32,
}

impl Command for SetPumpAbsoluteTempBasal {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        let strokes = (self.rate / BASAL_STROKE).round();
        if !(0.0..=1400.0).contains(&strokes) {
            return Err(CommandError::BadArgument(format!(
                "invalid TB rate: {} U/h",
                self.rate
            )));
        }
        let strokes = strokes as u16;
        let blocks = duration_blocks(self.duration)?;

        let rate_bytes = strokes.to_be_bytes();
        let parameters = pump::big_parameters(0x03, &[rate_bytes[0], rate_bytes[1], blocks]);
        BigCommand::new(0x4C).run_set(stick, &parameters)
    }
}

/// Starts a percentage temporary basal (opcode 0x69).
#[derive(Debug, Clone, Copy)]
pub struct SetPumpPercentageTempBasal {
    /// Percent of the programmed basal, up to 200.
    pub percent: u8,
    /// Minutes, in whole half-hour blocks up to 24 h.
    pub duration: u32,
}

impl Command for SetPumpPercentageTempBasal {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        if self.percent > 200 {
            return Err(CommandError::BadArgument(format!(
                "invalid TB rate: {} %",
                self.percent
            )));
        }
        let blocks = duration_blocks(self.duration)?;

        let parameters = pump::big_parameters(0x02, &[self.percent, blocks]);
        BigCommand::new(0x69).run_set(stick, &parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::ACK_CODE;
    use crate::stick::RadioErrorKind;
    use crate::testing::{pump_reply, MockStick};

    fn ack(stick: &MockStick) -> Vec<u8> {
        pump_reply(stick.serial, ACK_CODE, &[0x00], 0x70)
    }

    #[test]
    fn power_pump_retries_until_acknowledged() {
        let mut stick = MockStick::new();
        stick.push_error(StickError::Radio(RadioErrorKind::Timeout));
        stick.push_error(StickError::Radio(RadioErrorKind::NoData));
        stick.push_reply(ack(&stick)); // wake-up heard
        stick.push_reply(ack(&stick)); // session length accepted

        PowerPump { minutes: 10 }.execute(&mut stick).unwrap();
        assert_eq!(stick.sent_packets().len(), 4);

        let sent = stick.sent_packets();
        assert_eq!(sent[3].code(), 0x5D);
        assert_eq!(sent[3].parameters()[..3], [0x02, 0x01, 0x0A]);
    }

    #[test]
    fn power_pump_gives_up_after_fifty_attempts() {
        let mut stick = MockStick::new();
        for _ in 0..PowerPump::PRELUDE_REPS {
            stick.push_error(StickError::Radio(RadioErrorKind::Timeout));
        }
        assert!(matches!(
            PowerPump { minutes: 10 }.execute(&mut stick),
            Err(CommandError::NoPump)
        ));
        assert_eq!(stick.sent_packets().len(), PowerPump::PRELUDE_REPS);
    }

    #[test]
    fn power_pump_session_length_bounds() {
        let mut stick = MockStick::new();
        for minutes in [0u8, 30] {
            stick.push_reply(ack(&stick));
            stick.push_reply(ack(&stick));
            PowerPump { minutes }.execute(&mut stick).unwrap();
        }
        assert!(matches!(
            PowerPump { minutes: 31 }.execute(&mut stick),
            Err(CommandError::BadArgument(_))
        ));
    }

    #[test]
    fn button_press_parameters() {
        let mut stick = MockStick::new();
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        PushPumpButton { button: PumpButton::Easy }.execute(&mut stick).unwrap();

        let sent = stick.sent_packets();
        assert_eq!(sent[1].code(), 0x5B);
        assert_eq!(sent[1].parameters().len(), 65);
        assert_eq!(sent[1].parameters()[..2], [0x01, 0x00]);
    }

    #[test]
    fn suspend_and_resume_share_an_opcode() {
        let mut stick = MockStick::new();
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        SuspendPump.execute(&mut stick).unwrap();
        ResumePump.execute(&mut stick).unwrap();

        let sent = stick.sent_packets();
        assert_eq!(sent[1].code(), 0x4D);
        assert_eq!(sent[1].parameters()[..2], [0x01, 0x01]);
        assert_eq!(sent[3].code(), 0x4D);
        assert_eq!(sent[3].parameters()[..2], [0x01, 0x00]);
    }

    #[test]
    fn bolus_encoding_and_bounds() {
        let mut stick = MockStick::new();
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        DeliverPumpBolus { units: 2.3 }.execute(&mut stick).unwrap();
        assert_eq!(stick.sent_packets()[1].parameters()[..2], [0x01, 23]);

        for units in [25.1, -0.1, 0.55] {
            assert!(matches!(
                DeliverPumpBolus { units }.execute(&mut stick),
                Err(CommandError::BadArgument(_))
            ));
        }
    }

    #[test]
    fn absolute_temp_basal_encoding() {
        let mut stick = MockStick::new();
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        SetPumpAbsoluteTempBasal { rate: 10.0, duration: 60 }
            .execute(&mut stick)
            .unwrap();

        // 10 U/h is 400 strokes, packed big-endian; 60 min is 2 blocks.
        let sent = stick.sent_packets();
        assert_eq!(sent[1].code(), 0x4C);
        assert_eq!(sent[1].parameters()[..4], [0x03, 0x01, 0x90, 0x02]);

        assert!(matches!(
            SetPumpAbsoluteTempBasal { rate: 35.1, duration: 30 }.execute(&mut stick),
            Err(CommandError::BadArgument(_))
        ));
        assert!(matches!(
            SetPumpAbsoluteTempBasal { rate: 1.0, duration: 45 }.execute(&mut stick),
            Err(CommandError::BadArgument(_))
        ));
    }

    #[test]
    fn percentage_temp_basal_encoding() {
        let mut stick = MockStick::new();
        stick.push_reply(ack(&stick));
        stick.push_reply(ack(&stick));
        SetPumpPercentageTempBasal { percent: 150, duration: 90 }
            .execute(&mut stick)
            .unwrap();
        assert_eq!(stick.sent_packets()[1].parameters()[..3], [0x02, 150, 3]);

        assert!(matches!(
            SetPumpPercentageTempBasal { percent: 201, duration: 30 }.execute(&mut stick),
            Err(CommandError::BadArgument(_))
        ));
    }
}
