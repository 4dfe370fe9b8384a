//! Radio tuning: regional bands, synthesizer programming, and the
//! signal-strength scan.

use log::debug;

use crate::commands::{pump, CommandError};
use crate::stick::{Register, StickError, Transport};

/// Crystal reference frequency of the CC1111, in MHz.
pub const REFERENCE_MHZ: f64 = 24.0;

/// RSSI recorded for a sample that produced no valid pump response, in dBm.
const FAILED_SAMPLE_DBM: i32 = -99;

/// The 900-MHz bands MiniMed pumps transmit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    NorthAmerica,
    Worldwide,
}

impl Band {
    /// Inclusive frequency range of the band, in MHz.
    pub const fn range(self) -> (f64, f64) {
        match self {
            Band::NorthAmerica => (916.645, 916.775),
            Band::Worldwide => (868.150, 868.750),
        }
    }

    /// Factory-default pump frequency for the band, in MHz.
    pub const fn default_frequency(self) -> f64 {
        match self {
            Band::NorthAmerica => 916.660,
            Band::Worldwide => 868.330,
        }
    }

    pub fn contains(self, frequency: f64) -> bool {
        let (low, high) = self.range();
        frequency >= low && frequency <= high
    }

    /// The band containing both ends of a range, if any.
    fn containing(low: f64, high: f64) -> Option<Band> {
        [Band::NorthAmerica, Band::Worldwide]
            .into_iter()
            .find(|band| band.contains(low) && band.contains(high))
    }
}

/// The 24-bit synthesizer divider programmed across FREQ2..FREQ0.
fn divider(frequency: f64) -> u32 {
    (frequency * 65_536.0 / REFERENCE_MHZ).round() as u32
}

/// Programs the three frequency registers and verifies each by reading it
/// back.
pub fn tune<T: Transport + ?Sized>(stick: &mut T, frequency: f64) -> Result<(), StickError> {
    let value = divider(frequency);
    let bytes = [(value >> 16) as u8, (value >> 8) as u8, value as u8];

    debug!("tuning radio to {frequency} MHz ({value:#08X})");
    for (register, byte) in [Register::Freq2, Register::Freq1, Register::Freq0]
        .into_iter()
        .zip(bytes)
    {
        stick.write_register(register, byte)?;
        let read = stick.read_register(register)?;
        if read != byte {
            return Err(StickError::RegisterMismatch {
                register,
                wrote: byte,
                read,
            });
        }
    }
    Ok(())
}

/// Knobs for a frequency scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Range to sweep, in MHz. Defaults to the North American band; when
    /// given, both ends must lie in the same band.
    pub range: Option<(f64, f64)>,
    /// Number of evenly spaced frequencies to probe.
    pub steps: usize,
    /// Pump reads issued per frequency.
    pub samples: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            range: None,
            steps: 25,
            samples: 5,
        }
    }
}

/// Sweeps the range, measuring the mean signal strength per frequency with
/// benign model reads, and returns the frequency that hears the pump best.
///
/// Samples that fail with a radio error or a garbled packet count as
/// -99 dBm. The radio is left tuned to the last frequency probed.
pub fn scan<T: Transport + ?Sized>(
    stick: &mut T,
    options: &ScanOptions,
) -> Result<f64, CommandError> {
    if options.steps == 0 || options.samples == 0 {
        return Err(CommandError::BadArgument(
            "scan needs at least one step and one sample".into(),
        ));
    }

    let (low, high) = match options.range {
        None => Band::NorthAmerica.range(),
        Some((low, high)) => {
            if low > high || Band::containing(low, high).is_none() {
                return Err(StickError::BadFrequencies { low, high }.into());
            }
            (low, high)
        }
    };

    let frequencies = spread(low, high, options.steps);
    let mut means = Vec::with_capacity(frequencies.len());
    for &frequency in &frequencies {
        tune(stick, frequency)?;

        let mut total = 0;
        for _ in 0..options.samples {
            total += match sample(stick) {
                Ok(dbm) => dbm,
                Err(CommandError::Stick(StickError::Radio(_)) | CommandError::Packet(_)) => {
                    FAILED_SAMPLE_DBM
                }
                Err(other) => return Err(other),
            };
        }
        let mean = total as f64 / options.samples as f64;
        debug!("{frequency} MHz: mean RSSI {mean} dBm");
        means.push(mean);
    }

    Ok(best_frequency(&frequencies, &means))
}

/// One benign read: request the pump model and report the reply's RSSI.
fn sample<T: Transport + ?Sized>(stick: &mut T) -> Result<i32, CommandError> {
    Ok(pump::exchange(stick, pump::READ_MODEL, &[0x00])?.rssi_dbm())
}

/// `count` evenly spaced frequencies across `[low, high]`, inclusive,
/// rounded to the kHz.
fn spread(low: f64, high: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![round_khz(low)];
    }
    (0..count)
        .map(|i| round_khz(low + (high - low) * i as f64 / (count - 1) as f64))
        .collect()
}

fn round_khz(frequency: f64) -> f64 {
    (frequency * 1000.0).round() / 1000.0
}

/// The mean of the frequencies whose recorded RSSI ties for the maximum.
fn best_frequency(frequencies: &[f64], means: &[f64]) -> f64 {
    let best = means.iter().copied().fold(f64::MIN, f64::max);
    let winners: Vec<f64> = frequencies
        .iter()
        .zip(means)
        .filter(|&(_, &mean)| mean == best)
        .map(|(&frequency, _)| frequency)
        .collect();
    winners.iter().sum::<f64>() / winners.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pump_reply, MockStick};

    #[test]
    fn divider_splits_across_registers() {
        // 916.660 MHz * 2^16 / 24 MHz.
        let value = divider(Band::NorthAmerica.default_frequency());
        assert_eq!(value, 2_503_093);
        assert_eq!(
            [(value >> 16) as u8, (value >> 8) as u8, value as u8],
            [0x26, 0x31, 0xB5]
        );
    }

    #[test]
    fn tune_round_trips_through_registers() {
        let mut stick = MockStick::new();
        tune(&mut stick, 916.660).unwrap();
        assert_eq!(
            stick.register_writes,
            vec![
                (Register::Freq2, 0x26),
                (Register::Freq1, 0x31),
                (Register::Freq0, 0xB5),
            ]
        );
    }

    #[test]
    fn tune_detects_readback_mismatch() {
        let mut stick = MockStick::new();
        stick.corrupt_readback = true;
        assert!(matches!(
            tune(&mut stick, 916.660),
            Err(StickError::RegisterMismatch { register: Register::Freq2, .. })
        ));
    }

    #[test]
    fn spread_is_inclusive_and_rounded() {
        assert_eq!(spread(916.645, 916.775, 3), vec![916.645, 916.710, 916.775]);
        assert_eq!(spread(916.645, 916.775, 1), vec![916.645]);
    }

    #[test]
    fn best_frequency_averages_ties() {
        let frequencies = [916.645, 916.710, 916.775];
        assert_eq!(best_frequency(&frequencies, &[-99.0, -70.0, -99.0]), 916.710);
        assert_eq!(best_frequency(&frequencies, &[-70.0, -99.0, -70.0]), (916.645 + 916.775) / 2.0);
    }

    #[test]
    fn scan_rejects_straddling_ranges() {
        let mut stick = MockStick::new();
        let options = ScanOptions { range: Some((868.5, 916.7)), steps: 3, samples: 1 };
        assert!(matches!(
            scan(&mut stick, &options),
            Err(CommandError::Stick(StickError::BadFrequencies { .. }))
        ));
    }

    #[test]
    fn scan_picks_the_loudest_frequency() {
        let mut stick = MockStick::new();
        // One model-read reply per frequency; RSSI 0x30 reads as -53 dBm,
        // 0x60 as -29 dBm. The middle probe hears nothing.
        stick.push_reply(pump_reply(stick.serial, 0x8D, &[3, b'7', b'2', b'2', 0], 0x30));
        stick.push_error(StickError::Radio(crate::stick::RadioErrorKind::Timeout));
        stick.push_reply(pump_reply(stick.serial, 0x8D, &[3, b'7', b'2', b'2', 0], 0x60));

        let options = ScanOptions { range: Some((916.645, 916.775)), steps: 3, samples: 1 };
        let chosen = scan(&mut stick, &options).unwrap();
        assert_eq!(chosen, 916.775);

        // Three tunes, in sweep order.
        let tuned: Vec<u8> = stick
            .register_writes
            .iter()
            .filter(|(register, _)| *register == Register::Freq0)
            .map(|&(_, value)| value)
            .collect();
        assert_eq!(tuned, vec![0x8C, 0x3D, 0xEF]);
        assert_eq!(stick.sent_packets().len(), 3);
    }
}
