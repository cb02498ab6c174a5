use crate::{
    error::Result,
    registers::{double_word, RegisterBlock, ENERGY, PV_BATTERY, REAL_TIME_CLOCK},
};
use chrono::{NaiveDate, NaiveDateTime};
use uom::si::{
    electric_current::ampere,
    electric_potential::volt,
    energy::kilowatt_hour,
    f64::{ElectricCurrent, ElectricPotential, Energy, Power, ThermodynamicTemperature},
    power::watt,
    thermodynamic_temperature::degree_celsius,
};

/// Registers are fixed point with two decimals.
const SCALE: f64 = 100.;

/// Smallest PV voltage reported, in raw counts (0.01 V).
pub const MIN_PV_VOLTAGE_RAW: u16 = 1;

// offsets into PV_BATTERY
const PV_VOLTAGE: usize = 0x00;
const PV_POWER: usize = 0x02;
const BATTERY_VOLTAGE: usize = 0x04;
const BATTERY_CURRENT: usize = 0x05;
const LOAD_CURRENT: usize = 0x0D;
const LOAD_POWER: usize = 0x0E;
const BATTERY_TEMPERATURE: usize = 0x10;

// offsets into ENERGY
const GENERATED_TODAY: usize = 0x0C;
const GENERATED_TOTAL: usize = 0x12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub pv_voltage: ElectricPotential,
    pub pv_power: Power,
    pub pv_current: ElectricCurrent,
    pub battery_voltage: ElectricPotential,
    pub battery_current: ElectricCurrent,
    pub load_current: ElectricCurrent,
    pub load_power: Power,
    pub temperature: ThermodynamicTemperature,
    /// Generated today, as counted by the controller. `None` when it reads 0.
    pub yield_today: Option<Energy>,
    /// Generated since the counters were last cleared. `None` when it reads 0.
    pub yield_total: Option<Energy>,
}

fn scaled(raw: f64) -> f64 {
    raw / SCALE
}

fn volts(raw: u16) -> ElectricPotential {
    ElectricPotential::new::<volt>(scaled(f64::from(raw)))
}

fn amps(raw: u16) -> ElectricCurrent {
    ElectricCurrent::new::<ampere>(scaled(f64::from(raw)))
}

fn watts(raw: u32) -> Power {
    Power::new::<watt>(scaled(f64::from(raw)))
}

// `require` has already checked the length
fn pair(words: &[u16], low: usize) -> u32 {
    double_word(words, low).unwrap_or_default()
}

fn energy(raw: u32) -> Option<Energy> {
    if raw == 0 {
        None
    } else {
        Some(Energy::new::<kilowatt_hour>(scaled(f64::from(raw))))
    }
}

/// Decode the real-time block (0x3100) and the statistics block (0x3300).
pub fn decode(pv_battery: &RegisterBlock, statistics: &RegisterBlock) -> Result<TelemetrySnapshot> {
    let raw = pv_battery.require(PV_BATTERY.min_len)?;
    let stat = statistics.require(ENERGY.min_len)?;
    let pv_voltage = volts(raw[PV_VOLTAGE].max(MIN_PV_VOLTAGE_RAW));
    let pv_power = watts(pair(raw, PV_POWER));
    Ok(TelemetrySnapshot {
        pv_voltage,
        pv_power,
        pv_current: pv_power / pv_voltage,
        battery_voltage: volts(raw[BATTERY_VOLTAGE]),
        battery_current: amps(raw[BATTERY_CURRENT]),
        load_current: amps(raw[LOAD_CURRENT]),
        load_power: watts(pair(raw, LOAD_POWER)),
        // signed, the battery can be below freezing
        temperature: ThermodynamicTemperature::new::<degree_celsius>(scaled(f64::from(
            raw[BATTERY_TEMPERATURE] as i16,
        ))),
        yield_today: energy(pair(stat, GENERATED_TODAY)),
        yield_total: energy(pair(stat, GENERATED_TOTAL)),
    })
}

/// Decode the controller clock. Each register packs two fields, high byte
/// first: minute/second, day/hour, year/month, with the year counted from
/// 2000. Returns `None` if the clock holds an impossible date, which happens
/// on units whose clock was never set.
pub fn decode_clock(block: &RegisterBlock) -> Result<Option<NaiveDateTime>> {
    let raw = block.require(REAL_TIME_CLOCK.min_len)?;
    let split = |w: u16| (u32::from(w >> 8), u32::from(w & 0xFF));
    let (minute, second) = split(raw[0]);
    let (day, hour) = split(raw[1]);
    let (year, month) = split(raw[2]);
    Ok(NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second)))
}
