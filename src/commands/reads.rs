//! Commands that read pump state.
//!
//! Each command issues its opcode with the `00` parameter (unless noted)
//! and interprets the reply payload according to the pump's fixed layouts.

use std::fmt;

use crate::bytes::{charify, unpack, ByteOrder};
use crate::packets::PacketError;
use crate::stick::Transport;

use super::pump::{self, BigCommand};
use super::{Command, CommandError, BASAL_TIME_BLOCK, BOLUS_RATE, BOLUS_STROKE, BASAL_STROKE};

/// Wall-clock timestamp reported by the pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for PumpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStatus {
    pub normal: bool,
    pub bolusing: bool,
    pub suspended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpSettings {
    /// Duration of insulin action, as the raw byte the pump reports; the
    /// protocol does not document its unit.
    pub dia: u8,
    /// Largest allowed bolus (U).
    pub max_bolus: f64,
    /// Largest allowed basal rate (U/h).
    pub max_basal: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlucoseUnits {
    MgPerDl,
    MmolPerL,
}

impl fmt::Display for GlucoseUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlucoseUnits::MgPerDl => write!(f, "mg/dL"),
            GlucoseUnits::MmolPerL => write!(f, "mmol/L"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarbUnits {
    Grams,
    Exchanges,
}

impl fmt::Display for CarbUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarbUnits::Grams => write!(f, "g"),
            CarbUnits::Exchanges => write!(f, "exchange"),
        }
    }
}

/// One glucose target slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BgTarget {
    /// Start of the slot, `"HH:MM"`.
    pub time: String,
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgTargets {
    pub units: GlucoseUnits,
    pub targets: Vec<BgTarget>,
}

/// One sensitivity or carb factor slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    pub time: String,
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorSchedule {
    pub units: &'static str,
    pub factors: Vec<Factor>,
}

/// One basal rate slot.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalRate {
    pub time: String,
    /// U/h.
    pub rate: f64,
}

/// Formats schedule slot `index` as `"HH:MM"`.
fn block_time(index: u8) -> String {
    let minutes = index as u32 * BASAL_TIME_BLOCK;
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn short_payload(expected: usize, found: usize) -> CommandError {
    CommandError::Packet(PacketError::NotEnoughBytes { expected, found })
}

fn decode_time(payload: &[u8]) -> Result<PumpTime, CommandError> {
    match payload {
        &[hour, minute, second, year_high, year_low, month, day, ..] => Ok(PumpTime {
            year: unpack(&[year_high, year_low], ByteOrder::Big) as u16,
            month,
            day,
            hour,
            minute,
            second,
        }),
        _ => Err(short_payload(7, payload.len())),
    }
}

fn decode_model(payload: &[u8]) -> Result<u16, CommandError> {
    match payload {
        &[_, a, b, c, ..] => charify(&[a, b, c]).parse().map_err(|_| {
            CommandError::MalformedResponse(format!(
                "model digits are not numeric: {:?}",
                charify(&[a, b, c])
            ))
        }),
        _ => Err(short_payload(4, payload.len())),
    }
}

fn decode_firmware(payload: &[u8]) -> Result<String, CommandError> {
    if payload.len() < 11 {
        return Err(short_payload(11, payload.len()));
    }
    Ok(format!("{} {}", charify(&payload[0..8]), charify(&payload[8..11])))
}

fn decode_battery(payload: &[u8]) -> Result<f64, CommandError> {
    if payload.len() < 3 {
        return Err(short_payload(3, payload.len()));
    }
    Ok(unpack(&payload[1..3], ByteOrder::Big) as f64 / 100.0)
}

fn decode_reservoir(payload: &[u8]) -> Result<f64, CommandError> {
    if payload.len() < 2 {
        return Err(short_payload(2, payload.len()));
    }
    let units = unpack(&payload[0..2], ByteOrder::Big) as f64 * BOLUS_STROKE;
    Ok((units * 10.0).round() / 10.0)
}

fn decode_status(payload: &[u8]) -> Result<PumpStatus, CommandError> {
    match payload {
        &[normal, bolusing, suspended, ..] => Ok(PumpStatus {
            normal: normal == 3,
            bolusing: bolusing == 1,
            suspended: suspended == 1,
        }),
        _ => Err(short_payload(3, payload.len())),
    }
}

fn decode_settings(payload: &[u8]) -> Result<PumpSettings, CommandError> {
    if payload.len() < 18 {
        return Err(short_payload(18, payload.len()));
    }
    Ok(PumpSettings {
        dia: payload[17],
        max_bolus: payload[5] as f64 * BOLUS_STROKE,
        max_basal: unpack(&payload[6..8], ByteOrder::Big) as f64 * BASAL_STROKE,
    })
}

fn glucose_units(byte: u8) -> GlucoseUnits {
    if byte == 1 {
        GlucoseUnits::MgPerDl
    } else {
        GlucoseUnits::MmolPerL
    }
}

fn decode_bg_targets(payload: &[u8]) -> Result<BgTargets, CommandError> {
    let Some(&units_byte) = payload.first() else {
        return Err(short_payload(1, 0));
    };
    let units = glucose_units(units_byte);
    // mmol/L values come scaled by ten.
    let scale = match units {
        GlucoseUnits::MgPerDl => 1.0,
        GlucoseUnits::MmolPerL => 10.0,
    };

    let targets = payload[1..]
        .chunks_exact(3)
        .map(|entry| BgTarget {
            time: block_time(entry[0]),
            low: entry[1] as f64 / scale,
            high: entry[2] as f64 / scale,
        })
        .collect();

    Ok(BgTargets { units, targets })
}

fn decode_factors(
    payload: &[u8],
    units: [&'static str; 2],
) -> Result<FactorSchedule, CommandError> {
    let Some(&units_byte) = payload.first() else {
        return Err(short_payload(1, 0));
    };
    let scale = if units_byte == 1 { 1.0 } else { 10.0 };

    let factors = payload[1..]
        .chunks_exact(2)
        .map(|entry| Factor {
            // The slot index shares its byte with the factor's high bits.
            time: block_time(entry[0] % 64),
            factor: unpack(&[entry[0] / 64, entry[1]], ByteOrder::Big) as f64 / scale,
        })
        .collect();

    Ok(FactorSchedule {
        units: if units_byte == 1 { units[0] } else { units[1] },
        factors,
    })
}

fn decode_basal_schedule(payload: &[u8]) -> Vec<BasalRate> {
    let mut rates = Vec::new();
    for entry in payload.chunks_exact(3) {
        // An all-zero group ends the schedule.
        if entry.iter().all(|&b| b == 0) {
            break;
        }
        rates.push(BasalRate {
            time: block_time(entry[2]),
            rate: unpack(&entry[0..2], ByteOrder::Little) as f64 / BOLUS_RATE,
        });
    }
    rates
}

/// Reads the pump's wall clock (opcode 0x70).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpTime;

impl Command for ReadPumpTime {
    type Output = PumpTime;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<PumpTime, CommandError> {
        decode_time(pump::exchange(stick, 0x70, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the pump's model number (opcode 0x8D).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpModel;

impl Command for ReadPumpModel {
    type Output = u16;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<u16, CommandError> {
        decode_model(pump::exchange(stick, pump::READ_MODEL, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the firmware version string (opcode 0x74).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpFirmware;

impl Command for ReadPumpFirmware {
    type Output = String;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<String, CommandError> {
        decode_firmware(pump::exchange(stick, 0x74, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the battery voltage (opcode 0x72).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpBattery;

impl Command for ReadPumpBattery {
    type Output = f64;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<f64, CommandError> {
        decode_battery(pump::exchange(stick, 0x72, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the remaining reservoir volume in units (opcode 0x73).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpReservoir;

impl Command for ReadPumpReservoir {
    type Output = f64;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<f64, CommandError> {
        decode_reservoir(pump::exchange(stick, 0x73, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the pump's run state (opcode 0xCE).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpStatus;

impl Command for ReadPumpStatus {
    type Output = PumpStatus;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<PumpStatus, CommandError> {
        decode_status(pump::exchange(stick, 0xCE, &pump::NO_ARGS)?.payload())
    }
}

/// Reads bolus and basal limits plus the insulin action duration
/// (opcode 0xC0).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpSettings;

impl Command for ReadPumpSettings {
    type Output = PumpSettings;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<PumpSettings, CommandError> {
        decode_settings(pump::exchange(stick, 0xC0, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the configured glucose units (opcode 0x89).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpBgUnits;

impl Command for ReadPumpBgUnits {
    type Output = GlucoseUnits;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<GlucoseUnits, CommandError> {
        let packet = pump::exchange(stick, 0x89, &pump::NO_ARGS)?;
        match packet.payload() {
            &[byte, ..] => Ok(glucose_units(byte)),
            _ => Err(short_payload(1, 0)),
        }
    }
}

/// Reads the configured carb units (opcode 0x88).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpCarbUnits;

impl Command for ReadPumpCarbUnits {
    type Output = CarbUnits;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<CarbUnits, CommandError> {
        let packet = pump::exchange(stick, 0x88, &pump::NO_ARGS)?;
        match packet.payload() {
            &[1, ..] => Ok(CarbUnits::Grams),
            &[_, ..] => Ok(CarbUnits::Exchanges),
            _ => Err(short_payload(1, 0)),
        }
    }
}

/// Reads the glucose target schedule (opcode 0x9F).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpBgTargets;

impl Command for ReadPumpBgTargets {
    type Output = BgTargets;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<BgTargets, CommandError> {
        decode_bg_targets(pump::exchange(stick, 0x9F, &pump::NO_ARGS)?.payload())
    }
}

/// Reads the insulin sensitivity factor schedule (opcode 0x8B).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpIsf;

impl Command for ReadPumpIsf {
    type Output = FactorSchedule;

    fn execute<T: Transport + ?Sized>(
        &self,
        stick: &mut T,
    ) -> Result<FactorSchedule, CommandError> {
        decode_factors(
            pump::exchange(stick, 0x8B, &pump::NO_ARGS)?.payload(),
            ["mg/dL/U", "mmol/L/U"],
        )
    }
}

/// Reads the carb sensitivity factor schedule (opcode 0x8A).
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpCsf;

impl Command for ReadPumpCsf {
    type Output = FactorSchedule;

    fn execute<T: Transport + ?Sized>(
        &self,
        stick: &mut T,
    ) -> Result<FactorSchedule, CommandError> {
        decode_factors(
            pump::exchange(stick, 0x8A, &pump::NO_ARGS)?.payload(),
            ["g/U", "U/exchange"],
        )
    }
}

/// The three basal patterns the pump stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasalProfile {
    Standard,
    A,
    B,
}

impl BasalProfile {
    fn code(self) -> u8 {
        match self {
            BasalProfile::Standard => 0x92,
            BasalProfile::A => 0x93,
            BasalProfile::B => 0x94,
        }
    }
}

/// Reads one basal rate schedule. The schedule spans two packets, so this
/// is a big command with a single continuation read.
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpBasalProfile {
    pub profile: BasalProfile,
}

impl ReadPumpBasalProfile {
    const POSTLUDE_REPS: usize = 1;
}

impl Command for ReadPumpBasalProfile {
    type Output = Vec<BasalRate>;

    fn execute<T: Transport + ?Sized>(
        &self,
        stick: &mut T,
    ) -> Result<Vec<BasalRate>, CommandError> {
        let payload = BigCommand::with_postlude(self.profile.code(), Self::POSTLUDE_REPS)
            .run_assembled(stick, &pump::NO_ARGS)?;
        Ok(decode_basal_schedule(&payload))
    }
}

/// Reads one page of the pump's history (opcode 0x80). A page spans the
/// core response plus fourteen continuation reads.
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpHistoryPage {
    pub page: u8,
}

impl ReadPumpHistoryPage {
    pub const MAX_PAGE: u8 = 35;
    pub const POSTLUDE_REPS: usize = 14;
}

impl Command for ReadPumpHistoryPage {
    type Output = Vec<u8>;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<Vec<u8>, CommandError> {
        if self.page > Self::MAX_PAGE {
            return Err(CommandError::BadArgument(format!(
                "invalid history page number: {}",
                self.page
            )));
        }
        let parameters = pump::big_parameters(0x01, &[self.page]);
        BigCommand::with_postlude(0x80, Self::POSTLUDE_REPS).run_assembled(stick, &parameters)
    }
}

/// Reads the size of the pump's history (opcode 0x9D). Raw payload.
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpHistorySize;

impl Command for ReadPumpHistorySize {
    type Output = Vec<u8>;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<Vec<u8>, CommandError> {
        Ok(pump::exchange(stick, 0x9D, &pump::NO_ARGS)?.payload().to_vec())
    }
}

/// Reads the daily insulin totals (opcode 0x79). Raw payload.
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpDailyTotals;

impl Command for ReadPumpDailyTotals {
    type Output = Vec<u8>;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<Vec<u8>, CommandError> {
        Ok(pump::exchange(stick, 0x79, &pump::NO_ARGS)?.payload().to_vec())
    }
}

/// Reads the running temporary basal (opcode 0x98). Raw payload.
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpTempBasal;

impl Command for ReadPumpTempBasal {
    type Output = Vec<u8>;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<Vec<u8>, CommandError> {
        Ok(pump::exchange(stick, 0x98, &pump::NO_ARGS)?.payload().to_vec())
    }
}

/// The continuation read big commands use as their postlude (opcode 0x06).
/// Returns the raw payload.
#[derive(Debug, Clone, Copy)]
pub struct ReadPumpMore;

impl Command for ReadPumpMore {
    type Output = Vec<u8>;

    fn execute<T: Transport + ?Sized>(&self, stick: &mut T) -> Result<Vec<u8>, CommandError> {
        Ok(pump::exchange(stick, pump::READ_MORE, &pump::NO_ARGS)?
            .payload()
            .to_vec())
    }
}
