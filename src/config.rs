//! Command line configuration of the service.
use crate::scheduler::{ClockSource, Identity, SchedulerConfig};
use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Publish EPEVER Tracer charge controller data")]
pub struct Args {
    /// Serial port the controller is attached to, e.g. /dev/ttyUSB0
    #[arg(env = "EPEVER_PORT")]
    pub port: String,

    /// Modbus slave address of the controller
    #[arg(long, env = "EPEVER_SLAVE", default_value_t = 1)]
    pub slave: u8,

    #[arg(long, env = "EPEVER_BAUD", default_value_t = 115_200)]
    pub baud: u32,

    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Timeout of a single register request
    #[arg(long, default_value_t = 200)]
    pub timeout_ms: u64,

    /// VRM device instance
    #[arg(long, default_value_t = 290)]
    pub device_instance: u32,

    #[arg(long, default_value = "PV Charger")]
    pub custom_name: String,

    /// Where the date used for daily statistics comes from
    #[arg(long, value_enum, default_value_t = ClockSource::Host)]
    pub clock: ClockSource,
}

impl Args {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            clock: self.clock,
            identity: Identity {
                device_instance: self.device_instance,
                connection: format!("Modbus RTU {}", self.port),
                custom_name: self.custom_name.clone(),
                ..Identity::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["epever-tracer", "/dev/ttyUSB0"]).unwrap();
        assert_eq!(args.slave, 1);
        assert_eq!(args.baud, 115_200);
        assert_eq!(args.timeout(), Duration::from_millis(200));
        let cfg = args.scheduler_config();
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.clock, ClockSource::Host);
        assert_eq!(cfg.identity.device_instance, 290);
        assert_eq!(cfg.identity.connection, "Modbus RTU /dev/ttyUSB0");
    }

    #[test]
    fn controller_clock() {
        let args = Args::try_parse_from([
            "epever-tracer",
            "/dev/ttyUSB1",
            "--slave",
            "3",
            "--clock",
            "controller",
        ])
        .unwrap();
        assert_eq!(args.slave, 3);
        assert_eq!(args.clock, ClockSource::Controller);
    }
}
