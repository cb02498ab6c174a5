//! Charge state and fault classification from the 0x3200 status block.
use crate::{
    error::Result,
    registers::{RegisterBlock, CHARGE_SETPOINTS, STATUS},
};
use std::fmt;
use uom::si::{electric_potential::volt, f64::ElectricPotential};

bitflags! {
    /// Register 0x3200.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct BatteryStatus: u16 {
        const VOLTAGE                   = 0x000F;
        const TEMPERATURE               = 0x00F0;
        const INNER_RESISTANCE_ABNORMAL = 0x0100;
        const RATED_VOLTAGE_MISMATCH    = 0x8000;
    }

    /// Register 0x3201.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ChargerStatus: u16 {
        const RUNNING                   = 0x0001;
        const FAULT                     = 0x0002;
        const CHARGING_STATE            = 0x000C;
        const PV_INPUT_SHORT            = 0x0010;
        const LOAD_MOSFET_SHORT         = 0x0080;
        const LOAD_SHORT                = 0x0100;
        const LOAD_OVER_CURRENT         = 0x0200;
        const INPUT_OVER_CURRENT        = 0x0400;
        const ANTI_REVERSE_MOSFET_SHORT = 0x0800;
        const ANTI_REVERSE_OR_CHARGING_MOSFET_SHORT = 0x1000;
        const CHARGING_MOSFET_SHORT     = 0x2000;
        const INPUT_VOLTAGE             = 0xC000;
    }

    /// Register 0x3202.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct DischargerStatus: u16 {
        const RUNNING = 0x0001;
        const FAULT   = 0x0002;
    }
}

// BatteryStatus::VOLTAGE values
const BATTERY_OVER_VOLTAGE: u16 = 1;
const BATTERY_UNDER_VOLTAGE: u16 = 2;
const BATTERY_LOW_VOLTAGE_DISCONNECT: u16 = 3;
const BATTERY_FAULT: u16 = 4;

// BatteryStatus::TEMPERATURE values
const BATTERY_OVER_TEMPERATURE: u16 = 1;

// ChargerStatus::INPUT_VOLTAGE values
const INPUT_HIGHER_VOLTAGE: u16 = 2;
const INPUT_VOLTAGE_ERROR: u16 = 3;

impl BatteryStatus {
    pub fn voltage(self) -> u16 {
        (self & BatteryStatus::VOLTAGE).bits()
    }

    pub fn temperature(self) -> u16 {
        (self & BatteryStatus::TEMPERATURE).bits() >> 4
    }
}

impl ChargerStatus {
    /// The 2 bit charging sub state, D3-D2.
    pub fn charging_state(self) -> u16 {
        (self & ChargerStatus::CHARGING_STATE).bits() >> 2
    }

    pub fn input_voltage(self) -> u16 {
        (self & ChargerStatus::INPUT_VOLTAGE).bits() >> 14
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargeState {
    Off,
    Bulk,
    Absorption,
    Float,
    Equalize,
}

impl From<u16> for ChargeState {
    /// Map the charging sub state field. Absorption is never reported by
    /// the controller, see [`classify`].
    fn from(i: u16) -> Self {
        match i {
            0b01 => ChargeState::Float,
            0b10 => ChargeState::Bulk,
            0b11 => ChargeState::Equalize,
            _ => ChargeState::Off,
        }
    }
}

impl ChargeState {
    pub const ALL: [ChargeState; 5] = [
        ChargeState::Off,
        ChargeState::Bulk,
        ChargeState::Absorption,
        ChargeState::Float,
        ChargeState::Equalize,
    ];

    /// Numeric state as published on the bus.
    pub fn code(self) -> u8 {
        match self {
            ChargeState::Off => 0,
            ChargeState::Bulk => 3,
            ChargeState::Absorption => 4,
            ChargeState::Float => 5,
            ChargeState::Equalize => 7,
        }
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChargeState::Off => "off",
            ChargeState::Bulk => "bulk",
            ChargeState::Absorption => "absorption",
            ChargeState::Float => "float",
            ChargeState::Equalize => "equalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    NoError,
    BatteryTemperatureHigh,
    BatteryVoltageHigh,
    ChargerOverCurrent,
    ChargerCurrentReversed,
    InputVoltageError,
    GenericFault,
}

impl ErrorCode {
    /// Numeric code as published on the bus.
    pub fn code(self) -> u8 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::BatteryTemperatureHigh => 1,
            ErrorCode::BatteryVoltageHigh => 2,
            ErrorCode::ChargerOverCurrent => 18,
            ErrorCode::ChargerCurrentReversed => 19,
            ErrorCode::InputVoltageError => 33,
            ErrorCode::GenericFault => 200,
        }
    }

    pub fn is_error(self) -> bool {
        self != ErrorCode::NoError
    }
}

pub type Predicate = fn(BatteryStatus, ChargerStatus) -> bool;

pub fn battery_voltage_fault(b: BatteryStatus, _: ChargerStatus) -> bool {
    matches!(
        b.voltage(),
        BATTERY_OVER_VOLTAGE | BATTERY_UNDER_VOLTAGE | BATTERY_LOW_VOLTAGE_DISCONNECT
    )
}

pub fn battery_fault(b: BatteryStatus, _: ChargerStatus) -> bool {
    b.voltage() == BATTERY_FAULT
}

pub fn battery_over_temperature(b: BatteryStatus, _: ChargerStatus) -> bool {
    b.temperature() == BATTERY_OVER_TEMPERATURE
}

pub fn input_over_voltage(_: BatteryStatus, c: ChargerStatus) -> bool {
    c.input_voltage() == INPUT_HIGHER_VOLTAGE
}

pub fn input_voltage_error(_: BatteryStatus, c: ChargerStatus) -> bool {
    c.input_voltage() == INPUT_VOLTAGE_ERROR
}

pub fn over_current(_: BatteryStatus, c: ChargerStatus) -> bool {
    c.intersects(
        ChargerStatus::CHARGING_MOSFET_SHORT
            | ChargerStatus::ANTI_REVERSE_OR_CHARGING_MOSFET_SHORT
            | ChargerStatus::ANTI_REVERSE_MOSFET_SHORT
            | ChargerStatus::INPUT_OVER_CURRENT
            | ChargerStatus::LOAD_OVER_CURRENT
            | ChargerStatus::LOAD_SHORT
            | ChargerStatus::LOAD_MOSFET_SHORT,
    )
}

pub fn pv_input_short(_: BatteryStatus, c: ChargerStatus) -> bool {
    c.contains(ChargerStatus::PV_INPUT_SHORT)
}

/// Fault predicates in precedence order, first match wins. Do not reorder
/// when adding bits.
pub const ERROR_PRECEDENCE: [(Predicate, ErrorCode); 7] = [
    (battery_voltage_fault, ErrorCode::BatteryVoltageHigh),
    (battery_fault, ErrorCode::GenericFault),
    (battery_over_temperature, ErrorCode::BatteryTemperatureHigh),
    (input_over_voltage, ErrorCode::BatteryVoltageHigh),
    (input_voltage_error, ErrorCode::InputVoltageError),
    (over_current, ErrorCode::ChargerOverCurrent),
    (pv_input_short, ErrorCode::ChargerCurrentReversed),
];

pub fn error_code(battery: BatteryStatus, charger: ChargerStatus) -> ErrorCode {
    ERROR_PRECEDENCE
        .iter()
        .find(|(applies, _)| applies(battery, charger))
        .map(|(_, code)| *code)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub state: ChargeState,
    pub error: ErrorCode,
}

pub fn classify(
    battery: BatteryStatus,
    charger: ChargerStatus,
    float_voltage: ElectricPotential,
    battery_voltage: ElectricPotential,
) -> Classification {
    let state = match ChargeState::from(charger.charging_state()) {
        ChargeState::Bulk if battery_voltage > float_voltage => ChargeState::Absorption,
        state => state,
    };
    Classification {
        state,
        error: error_code(battery, charger),
    }
}

/// The three status registers, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub battery: BatteryStatus,
    pub charger: ChargerStatus,
    pub discharger: DischargerStatus,
}

impl Status {
    pub fn load_on(&self) -> bool {
        self.discharger.contains(DischargerStatus::RUNNING)
    }
}

pub fn decode_status(block: &RegisterBlock) -> Result<Status> {
    let raw = block.require(STATUS.min_len)?;
    Ok(Status {
        battery: BatteryStatus::from_bits_retain(raw[0]),
        charger: ChargerStatus::from_bits_retain(raw[1]),
        discharger: DischargerStatus::from_bits_retain(raw[2]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChargeSetpoints {
    pub boost: ElectricPotential,
    pub float: ElectricPotential,
}

pub fn decode_setpoints(block: &RegisterBlock) -> Result<ChargeSetpoints> {
    let raw = block.require(CHARGE_SETPOINTS.min_len)?;
    Ok(ChargeSetpoints {
        boost: ElectricPotential::new::<volt>(f64::from(raw[0]) / 100.),
        float: ElectricPotential::new::<volt>(f64::from(raw[1]) / 100.),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f64) -> ElectricPotential {
        ElectricPotential::new::<volt>(x)
    }

    fn charger(bits: u16) -> ChargerStatus {
        ChargerStatus::from_bits_retain(bits)
    }

    fn battery(bits: u16) -> BatteryStatus {
        BatteryStatus::from_bits_retain(bits)
    }

    #[test]
    fn sub_state_mapping() {
        let cases = [
            (0b0000, ChargeState::Off),
            (0b0100, ChargeState::Float),
            (0b1000, ChargeState::Bulk),
            (0b1100, ChargeState::Equalize),
        ];
        for (bits, expected) in cases {
            let c = classify(battery(0), charger(bits | 0x0001), v(27.6), v(20.));
            assert_eq!(c.state, expected, "bits {:#06b}", bits);
        }
    }

    #[test]
    fn bulk_above_float_is_absorption() {
        let c = classify(battery(0), charger(0b1000), v(24.4), v(24.8));
        assert_eq!(c.state, ChargeState::Absorption);
        let c = classify(battery(0), charger(0b1000), v(24.4), v(24.4));
        assert_eq!(c.state, ChargeState::Bulk);
        let c = classify(battery(0), charger(0b0100), v(24.4), v(24.8));
        assert_eq!(c.state, ChargeState::Float);
    }

    #[test]
    fn voltage_fault_beats_over_current() {
        let code = error_code(battery(BATTERY_OVER_VOLTAGE), charger(0x0400));
        assert_eq!(code, ErrorCode::BatteryVoltageHigh);
    }

    #[test]
    fn precedence_walks_down() {
        let all_charger = charger(0xC000 | 0x2000 | 0x0010);
        assert_eq!(
            error_code(battery(BATTERY_FAULT | 0x0010), all_charger),
            ErrorCode::GenericFault
        );
        assert_eq!(error_code(battery(0x0010), all_charger), ErrorCode::BatteryTemperatureHigh);
        assert_eq!(error_code(battery(0), all_charger), ErrorCode::InputVoltageError);
        assert_eq!(
            error_code(battery(0), charger(0x8000 | 0x2000)),
            ErrorCode::BatteryVoltageHigh
        );
        assert_eq!(
            error_code(battery(0), charger(0x2000 | 0x0010)),
            ErrorCode::ChargerOverCurrent
        );
        assert_eq!(error_code(battery(0), charger(0x0010)), ErrorCode::ChargerCurrentReversed);
        assert_eq!(error_code(battery(0), charger(0x0001)), ErrorCode::NoError);
    }

    #[test]
    fn each_over_current_bit_counts() {
        for bit in [0x0080, 0x0100, 0x0200, 0x0400, 0x0800, 0x1000, 0x2000] {
            assert!(over_current(battery(0), charger(bit)), "bit {:#06x}", bit);
        }
        assert!(!over_current(battery(0), charger(0x0010)));
    }

    #[test]
    fn unmapped_bits_fall_through() {
        // low temperature, inner resistance, rated voltage mismatch, no power input
        let b = battery(0x0020 | 0x0100 | 0x8000);
        let c = charger(0x4000 | 0x0002);
        assert_eq!(error_code(b, c), ErrorCode::NoError);
        assert_eq!(classify(b, c, v(27.), v(25.)).state, ChargeState::Off);
    }

    #[test]
    fn status_block_decodes() {
        let block = RegisterBlock::new(STATUS.address, 3, vec![0x0001, 0x0009, 0x0001]);
        let status = decode_status(&block).unwrap();
        assert_eq!(status.battery.voltage(), BATTERY_OVER_VOLTAGE);
        assert_eq!(status.charger.charging_state(), 0b10);
        assert!(status.load_on());
    }

    #[test]
    fn setpoints_decode() {
        let block = RegisterBlock::new(CHARGE_SETPOINTS.address, 2, vec![2880, 2760]);
        let sp = decode_setpoints(&block).unwrap();
        assert_eq!(sp.boost.get::<volt>(), 28.8);
        assert_eq!(sp.float.get::<volt>(), 27.6);
    }
}
