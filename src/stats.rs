//! Daily and all-time statistics, kept in memory for the life of the process.
use crate::{
    status::{ChargeState, ErrorCode},
    telemetry::TelemetrySnapshot,
};
use chrono::{NaiveDate, NaiveDateTime};
use uom::si::{
    electric_potential::volt,
    f64::{ElectricCurrent, ElectricPotential, Energy, Power, Time},
    time::second,
};

/// Starting value of the daily minimum battery voltage, above any real pack.
pub const MIN_BATTERY_VOLTAGE_SENTINEL: f64 = 100.;

/// Days of history held: today and yesterday.
pub const MAX_DAYS_AVAILABLE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInState {
    pub off: Time,
    pub bulk: Time,
    pub absorption: Time,
    pub float: Time,
    pub equalize: Time,
}

impl Default for TimeInState {
    fn default() -> Self {
        let zero = Time::new::<second>(0.);
        TimeInState {
            off: zero,
            bulk: zero,
            absorption: zero,
            float: zero,
            equalize: zero,
        }
    }
}

impl TimeInState {
    pub fn get(&self, state: ChargeState) -> Time {
        match state {
            ChargeState::Off => self.off,
            ChargeState::Bulk => self.bulk,
            ChargeState::Absorption => self.absorption,
            ChargeState::Float => self.float,
            ChargeState::Equalize => self.equalize,
        }
    }

    fn bucket(&mut self, state: ChargeState) -> &mut Time {
        match state {
            ChargeState::Off => &mut self.off,
            ChargeState::Bulk => &mut self.bulk,
            ChargeState::Absorption => &mut self.absorption,
            ChargeState::Float => &mut self.float,
            ChargeState::Equalize => &mut self.equalize,
        }
    }

    pub fn add(&mut self, state: ChargeState, elapsed: Time) {
        *self.bucket(state) += elapsed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyStatistics {
    pub date: Option<NaiveDate>,
    pub energy_yield: Energy,
    pub max_power: Power,
    pub max_pv_voltage: ElectricPotential,
    pub min_battery_voltage: ElectricPotential,
    pub max_battery_voltage: ElectricPotential,
    pub max_battery_current: ElectricCurrent,
    pub time_in_state: TimeInState,
    pub last_error: ErrorCode,
}

impl DailyStatistics {
    pub fn new(date: Option<NaiveDate>) -> DailyStatistics {
        DailyStatistics {
            date,
            energy_yield: Energy::new::<uom::si::energy::kilowatt_hour>(0.),
            max_power: Power::new::<uom::si::power::watt>(0.),
            max_pv_voltage: ElectricPotential::new::<volt>(0.),
            min_battery_voltage: ElectricPotential::new::<volt>(MIN_BATTERY_VOLTAGE_SENTINEL),
            max_battery_voltage: ElectricPotential::new::<volt>(0.),
            max_battery_current: ElectricCurrent::new::<uom::si::electric_current::ampere>(0.),
            time_in_state: TimeInState::default(),
            last_error: ErrorCode::NoError,
        }
    }

    fn observe(&mut self, t: &TelemetrySnapshot, error: ErrorCode) {
        if let Some(y) = t.yield_today {
            self.energy_yield = y;
        }
        raise(&mut self.max_power, t.pv_power);
        raise(&mut self.max_pv_voltage, t.pv_voltage);
        lower(&mut self.min_battery_voltage, t.battery_voltage);
        raise(&mut self.max_battery_voltage, t.battery_voltage);
        raise(&mut self.max_battery_current, t.battery_current);
        if error.is_error() {
            self.last_error = error;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverallStatistics {
    pub max_pv_voltage: Option<ElectricPotential>,
    pub min_battery_voltage: Option<ElectricPotential>,
    pub max_battery_voltage: Option<ElectricPotential>,
    pub last_error: ErrorCode,
    pub days_available: u32,
}

impl Default for OverallStatistics {
    fn default() -> Self {
        OverallStatistics {
            max_pv_voltage: None,
            min_battery_voltage: None,
            max_battery_voltage: None,
            last_error: ErrorCode::NoError,
            days_available: 1,
        }
    }
}

impl OverallStatistics {
    fn observe(&mut self, t: &TelemetrySnapshot, error: ErrorCode) {
        fn update<T: PartialOrd + Copy>(cur: &mut Option<T>, v: T, better: fn(&T, &T) -> bool) {
            match cur {
                Some(c) if !better(&v, c) => (),
                _ => *cur = Some(v),
            }
        }
        update(&mut self.max_pv_voltage, t.pv_voltage, |v, c| v > c);
        update(&mut self.min_battery_voltage, t.battery_voltage, |v, c| v < c);
        update(&mut self.max_battery_voltage, t.battery_voltage, |v, c| v > c);
        if error.is_error() {
            self.last_error = error;
        }
    }
}

fn raise<T: PartialOrd + Copy>(cur: &mut T, v: T) {
    if v > *cur {
        *cur = v
    }
}

fn lower<T: PartialOrd + Copy>(cur: &mut T, v: T) {
    if v < *cur {
        *cur = v
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsAccumulator {
    overall: OverallStatistics,
    today: DailyStatistics,
    yesterday: Option<DailyStatistics>,
    last_tick: Option<NaiveDateTime>,
    state_at_start_of_interval: Option<ChargeState>,
    rollovers: u64,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        StatisticsAccumulator::new()
    }
}

impl StatisticsAccumulator {
    pub fn new() -> StatisticsAccumulator {
        StatisticsAccumulator {
            overall: OverallStatistics::default(),
            today: DailyStatistics::new(None),
            yesterday: None,
            last_tick: None,
            state_at_start_of_interval: None,
            rollovers: 0,
        }
    }

    pub fn overall(&self) -> &OverallStatistics {
        &self.overall
    }

    pub fn today(&self) -> &DailyStatistics {
        &self.today
    }

    pub fn yesterday(&self) -> Option<&DailyStatistics> {
        self.yesterday.as_ref()
    }

    /// Number of day rollovers since start.
    pub fn rollovers(&self) -> u64 {
        self.rollovers
    }

    /// Fold one successful poll into the statistics. `now` is the local time
    /// the reading belongs to, from the host or the controller clock.
    pub fn observe(
        &mut self,
        snapshot: &TelemetrySnapshot,
        state: ChargeState,
        error: ErrorCode,
        now: NaiveDateTime,
    ) {
        // the interval just elapsed belongs to the state held during it, and
        // to the day it started in
        if let (Some(last), Some(held)) = (self.last_tick, self.state_at_start_of_interval) {
            if let Ok(elapsed) = (now - last).to_std() {
                self.today
                    .time_in_state
                    .add(held, Time::new::<second>(elapsed.as_secs_f64()));
            }
        }
        self.roll_over(now.date());
        self.today.observe(snapshot, error);
        self.overall.observe(snapshot, error);
        self.last_tick = Some(now);
        self.state_at_start_of_interval = Some(state);
    }

    fn roll_over(&mut self, date: NaiveDate) {
        match self.today.date {
            None => self.today.date = Some(date),
            Some(current) if current == date => (),
            Some(current) => {
                let finished = std::mem::replace(&mut self.today, DailyStatistics::new(Some(date)));
                self.yesterday = Some(finished);
                self.overall.days_available = (self.overall.days_available + 1).min(MAX_DAYS_AVAILABLE);
                self.rollovers += 1;
                tracing::info!(%current, %date, "day rollover");
            }
        }
    }
}
