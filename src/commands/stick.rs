//! Commands that terminate at the stick itself.

use crate::bytes::charify;
use crate::stick::{Register, Transport};

use super::{Command, CommandError};

/// Reads the firmware's name string.
#[derive(Debug, Clone, Copy)]
pub struct ReadStickName;

impl Command for ReadStickName {
    type Output = String;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<String, CommandError> {
        Ok(charify(&stick.read_name()?))
    }
}

/// Reads the firmware's author string.
#[derive(Debug, Clone, Copy)]
pub struct ReadStickAuthor;

impl Command for ReadStickAuthor {
    type Output = String;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<String, CommandError> {
        Ok(charify(&stick.read_author()?))
    }
}

/// Reads one radio register.
#[derive(Debug, Clone, Copy)]
pub struct ReadRadioRegister {
    pub register: Register,
}

impl Command for ReadRadioRegister {
    type Output = u8;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<u8, CommandError> {
        Ok(stick.read_register(self.register)?)
    }
}

/// Writes one radio register. Fire-and-forget; tuning verifies by reading
/// back.
#[derive(Debug, Clone, Copy)]
pub struct WriteRadioRegister {
    pub register: Register,
    pub value: u8,
}

impl Command for WriteRadioRegister {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        Ok(stick.write_register(self.register, self.value)?)
    }
}

/// Blinks the stick's LED.
#[derive(Debug, Clone, Copy)]
pub struct FlashStickLed;

impl Command for FlashStickLed {
    type Output = ();

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<(), CommandError> {
        Ok(stick.flash_led()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockStick;

    #[test]
    fn decodes_firmware_strings() {
        let mut stick = MockStick::new();
        stick.name = b"CC1111 stick".to_vec();
        stick.author = b"keinechtername".to_vec();

        assert_eq!(ReadStickName.execute(&mut stick).unwrap(), "CC1111 stick");
        assert_eq!(ReadStickAuthor.execute(&mut stick).unwrap(), "keinechtername");
    }

    #[test]
    fn flashes_the_led() {
        let mut stick = MockStick::new();
        FlashStickLed.execute(&mut stick).unwrap();
        assert_eq!(stick.led_flashes, 1);
    }

    #[test]
    fn register_round_trip() {
        let mut stick = MockStick::new();
        WriteRadioRegister { register: Register::Channr, value: 0x02 }
            .execute(&mut stick)
            .unwrap();
        assert_eq!(
            ReadRadioRegister { register: Register::Channr }
                .execute(&mut stick)
                .unwrap(),
            0x02
        );
    }
}
