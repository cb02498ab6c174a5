//! The poll loop: owns the register client and the statistics, runs one tick
//! per timer firing and gives up after repeated failures.
use crate::{
    error::{Error, Result},
    registers::{
        read_layout, RegisterClient, RegisterKind, CHARGE_SETPOINTS, ENERGY, LOAD_MANUAL_CONTROL,
        PV_BATTERY, REAL_TIME_CLOCK, STATUS,
    },
    sink::{paths, Sink, Value, WriteHandler},
    stats::{DailyStatistics, StatisticsAccumulator},
    status::{self, ChargeState, Classification, ErrorCode, Status},
    telemetry::{self, TelemetrySnapshot},
};
use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uom::si::{
    electric_current::ampere, electric_potential::volt, energy::kilowatt_hour, power::watt,
    thermodynamic_temperature::degree_celsius, time::minute,
};

/// Consecutive failed ticks after which the scheduler gives up.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ClockSource {
    /// Local time of the host.
    Host,
    /// The controller's real time clock, falling back to the host when unset.
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
    FailureEscalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Published,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub product_name: String,
    pub product_id: u32,
    pub firmware_version: String,
    pub serial: String,
    pub device_instance: u32,
    pub connection: String,
    pub custom_name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            product_name: "Epever Tracer MPPT".to_owned(),
            product_id: 0xA076,
            firmware_version: "v1.0".to_owned(),
            serial: "WO20160415-008-0056".to_owned(),
            device_instance: 290,
            connection: "Modbus RTU".to_owned(),
            custom_name: "PV Charger".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub clock: ClockSource,
    pub identity: Identity,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            poll_interval: Duration::from_secs(1),
            clock: ClockSource::Host,
            identity: Identity::default(),
        }
    }
}

/// Controller writes requested through the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetLoad(bool),
}

/// Write handler installed on the sink. It only queues commands, the
/// scheduler executes them between ticks so register access stays serial.
#[derive(Debug)]
pub struct CommandQueue(mpsc::UnboundedSender<Command>);

impl WriteHandler for CommandQueue {
    fn on_write_request(&self, key: &str, value: &Value) -> bool {
        match key {
            paths::LOAD_STATE => match value.as_switch() {
                Some(on) => self.0.send(Command::SetLoad(on)).is_ok(),
                None => false,
            },
            paths::CUSTOM_NAME => matches!(value, Value::Text(_)),
            _ => false,
        }
    }
}

struct Reading {
    snapshot: TelemetrySnapshot,
    status: Status,
    classification: Classification,
    controller_time: Option<NaiveDateTime>,
}

pub struct PollScheduler<C, S> {
    client: C,
    sink: S,
    config: SchedulerConfig,
    stats: StatisticsAccumulator,
    state: SchedulerState,
    consecutive_failures: u32,
    write_failures: u64,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl<C: RegisterClient, S: Sink> PollScheduler<C, S> {
    pub fn new(client: C, mut sink: S, config: SchedulerConfig) -> PollScheduler<C, S> {
        let (tx, commands) = mpsc::unbounded_channel();
        sink.register_write_handler(Box::new(CommandQueue(tx)));
        publish_identity(&mut sink, &config.identity);
        let stats = StatisticsAccumulator::new();
        sink.publish(paths::ERROR_CODE, ErrorCode::NoError.code().into());
        publish_history(&mut sink, &stats);
        PollScheduler {
            client,
            sink,
            config,
            stats,
            state: SchedulerState::Idle,
            consecutive_failures: 0,
            write_failures: 0,
            commands,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    pub fn stats(&self) -> &StatisticsAccumulator {
        &self.stats
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Poll until failures escalate. Only returns with an error.
    pub async fn run(&mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Local::now().naive_local()).await?;
                }
                Some(command) = self.commands.recv() => self.apply_command(command).await,
            }
        }
    }

    /// Run one poll. A failed read or a short block skips the tick without
    /// touching statistics or the sink. The third failure in a row is fatal.
    pub async fn tick(&mut self, now: NaiveDateTime) -> Result<TickOutcome> {
        if self.state == SchedulerState::FailureEscalated {
            return Err(Error::FatalExhaustion {
                failures: self.consecutive_failures,
            });
        }
        self.state = SchedulerState::Ticking;
        match self.poll().await {
            Ok(reading) => {
                let at = match (self.config.clock, reading.controller_time) {
                    (ClockSource::Controller, None) => {
                        debug!("controller clock unset, using host time");
                        now
                    }
                    (_, t) => t.unwrap_or(now),
                };
                let Classification { state, error } = reading.classification;
                self.stats.observe(&reading.snapshot, state, error, at);
                self.publish(&reading);
                self.consecutive_failures = 0;
                self.state = SchedulerState::Idle;
                Ok(TickOutcome::Published)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(error = %e, failures = self.consecutive_failures, "poll failed, skipping tick");
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    self.state = SchedulerState::FailureEscalated;
                    error!(failures = self.consecutive_failures, "too many consecutive poll failures");
                    return Err(Error::FatalExhaustion {
                        failures: self.consecutive_failures,
                    });
                }
                self.state = SchedulerState::Idle;
                Ok(TickOutcome::Skipped)
            }
        }
    }

    /// Execute every queued command.
    pub async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_command(command).await
        }
    }

    /// Write failures are logged and counted apart from poll failures.
    pub async fn apply_command(&mut self, command: Command) {
        let result = match command {
            Command::SetLoad(on) => {
                self.client
                    .write_single(RegisterKind::Coil, LOAD_MANUAL_CONTROL, u16::from(on))
                    .await
            }
        };
        match result {
            Ok(()) => info!(?command, "command applied"),
            Err(e) => {
                self.write_failures += 1;
                warn!(?command, error = %e, "command failed");
            }
        }
    }

    async fn poll(&mut self) -> Result<Reading> {
        let pv_battery = read_layout(&mut self.client, PV_BATTERY).await?;
        let status_block = read_layout(&mut self.client, STATUS).await?;
        let energy = read_layout(&mut self.client, ENERGY).await?;
        let setpoints = read_layout(&mut self.client, CHARGE_SETPOINTS).await?;
        let controller_time = match self.config.clock {
            ClockSource::Host => None,
            ClockSource::Controller => {
                telemetry::decode_clock(&read_layout(&mut self.client, REAL_TIME_CLOCK).await?)?
            }
        };

        let snapshot = telemetry::decode(&pv_battery, &energy)?;
        let status = status::decode_status(&status_block)?;
        let setpoints = status::decode_setpoints(&setpoints)?;
        let classification = status::classify(
            status.battery,
            status.charger,
            setpoints.float,
            snapshot.battery_voltage,
        );
        Ok(Reading {
            snapshot,
            status,
            classification,
            controller_time,
        })
    }

    fn publish(&mut self, reading: &Reading) {
        let t = &reading.snapshot;
        let sink = &mut self.sink;
        sink.publish(paths::DC_VOLTAGE, t.battery_voltage.get::<volt>().into());
        sink.publish(paths::DC_CURRENT, t.battery_current.get::<ampere>().into());
        sink.publish(paths::DC_TEMPERATURE, t.temperature.get::<degree_celsius>().into());
        sink.publish(paths::PV_VOLTAGE, t.pv_voltage.get::<volt>().into());
        sink.publish(paths::PV_CURRENT, t.pv_current.get::<ampere>().into());
        sink.publish(paths::YIELD_POWER, t.pv_power.get::<watt>().round().into());
        if let Some(total) = t.yield_total {
            let kwh = total.get::<kilowatt_hour>();
            sink.publish(paths::YIELD_USER, kwh.into());
            sink.publish(paths::YIELD_SYSTEM, kwh.into());
        }
        sink.publish(paths::LOAD_STATE, reading.status.load_on().into());
        sink.publish(paths::LOAD_CURRENT, t.load_current.get::<ampere>().into());
        sink.publish(paths::STATE, reading.classification.state.code().into());
        sink.publish(paths::ERROR_CODE, reading.classification.error.code().into());

        publish_history(sink, &self.stats);
    }
}

fn publish_identity<S: Sink>(sink: &mut S, id: &Identity) {
    sink.publish(paths::MGMT_PROCESS_NAME, env!("CARGO_PKG_NAME").into());
    sink.publish(paths::MGMT_PROCESS_VERSION, env!("CARGO_PKG_VERSION").into());
    sink.publish(paths::MGMT_CONNECTION, id.connection.as_str().into());
    sink.publish(paths::DEVICE_INSTANCE, id.device_instance.into());
    sink.publish(paths::PRODUCT_ID, id.product_id.into());
    sink.publish(paths::PRODUCT_NAME, id.product_name.as_str().into());
    sink.publish(paths::FIRMWARE_VERSION, id.firmware_version.as_str().into());
    sink.publish(paths::SERIAL, id.serial.as_str().into());
    sink.publish(paths::CONNECTED, 1u8.into());
    // standalone, always connected, no BMS
    sink.publish(paths::LINK_NETWORK_MODE, 0u8.into());
    sink.publish(paths::LINK_NETWORK_STATUS, 4u8.into());
    sink.publish(paths::SETTINGS_BMS_PRESENT, 0u8.into());
    // a name set by the user outlives restarts of this service
    if sink.read_last(paths::CUSTOM_NAME).is_none() {
        sink.publish(paths::CUSTOM_NAME, id.custom_name.as_str().into());
    }
}

/// Overall and daily history. Before the first reading the overall extrema
/// carry the same start values as a fresh day.
fn publish_history<S: Sink + ?Sized>(sink: &mut S, stats: &StatisticsAccumulator) {
    let overall = stats.overall();
    let fresh = DailyStatistics::new(None);
    for (key, v, start) in [
        (paths::OVERALL_MAX_PV_VOLTAGE, overall.max_pv_voltage, fresh.max_pv_voltage),
        (paths::OVERALL_MIN_BATTERY_VOLTAGE, overall.min_battery_voltage, fresh.min_battery_voltage),
        (paths::OVERALL_MAX_BATTERY_VOLTAGE, overall.max_battery_voltage, fresh.max_battery_voltage),
    ] {
        sink.publish(key, v.unwrap_or(start).get::<volt>().into());
    }
    sink.publish(paths::OVERALL_DAYS_AVAILABLE, overall.days_available.into());
    sink.publish(paths::OVERALL_LAST_ERROR, overall.last_error.code().into());

    publish_daily(sink, 0, stats.today());
    if let Some(yesterday) = stats.yesterday() {
        publish_daily(sink, 1, yesterday);
    }
}

fn publish_daily<S: Sink + ?Sized>(sink: &mut S, day: u8, d: &DailyStatistics) {
    let p = |field: &str| paths::daily(day, field);
    sink.publish(&p("Yield"), d.energy_yield.get::<kilowatt_hour>().into());
    sink.publish(&p("MaxPower"), d.max_power.get::<watt>().into());
    sink.publish(&p("MaxPvVoltage"), d.max_pv_voltage.get::<volt>().into());
    sink.publish(&p("MinBatteryVoltage"), d.min_battery_voltage.get::<volt>().into());
    sink.publish(&p("MaxBatteryVoltage"), d.max_battery_voltage.get::<volt>().into());
    sink.publish(&p("MaxBatteryCurrent"), d.max_battery_current.get::<ampere>().into());
    for state in ChargeState::ALL {
        let field = match state {
            ChargeState::Off => "TimeInOff",
            ChargeState::Bulk => "TimeInBulk",
            ChargeState::Absorption => "TimeInAbsorption",
            ChargeState::Float => "TimeInFloat",
            ChargeState::Equalize => "TimeInEqualize",
        };
        sink.publish(&p(field), d.time_in_state.get(state).get::<minute>().into());
    }
    sink.publish(&p("LastError1"), d.last_error.code().into());
}
