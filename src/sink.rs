//! The state bus the poller publishes to, and the paths it uses.
use std::collections::BTreeMap;

/// Bus paths, laid out like a Venus OS solar charger service.
pub mod paths {
    pub const MGMT_PROCESS_NAME: &str = "/Mgmt/ProcessName";
    pub const MGMT_PROCESS_VERSION: &str = "/Mgmt/ProcessVersion";
    pub const MGMT_CONNECTION: &str = "/Mgmt/Connection";
    pub const DEVICE_INSTANCE: &str = "/DeviceInstance";
    pub const PRODUCT_ID: &str = "/ProductId";
    pub const PRODUCT_NAME: &str = "/ProductName";
    pub const FIRMWARE_VERSION: &str = "/FirmwareVersion";
    pub const CONNECTED: &str = "/Connected";
    pub const SERIAL: &str = "/Serial";
    pub const CUSTOM_NAME: &str = "/CustomName";
    pub const LINK_NETWORK_MODE: &str = "/Link/NetworkMode";
    pub const LINK_NETWORK_STATUS: &str = "/Link/NetworkStatus";
    pub const SETTINGS_BMS_PRESENT: &str = "/Settings/BmsPresent";

    pub const DC_VOLTAGE: &str = "/Dc/0/Voltage";
    pub const DC_CURRENT: &str = "/Dc/0/Current";
    pub const DC_TEMPERATURE: &str = "/Dc/0/Temperature";
    pub const PV_VOLTAGE: &str = "/Pv/V";
    pub const PV_CURRENT: &str = "/Pv/I";
    pub const YIELD_POWER: &str = "/Yield/Power";
    pub const YIELD_USER: &str = "/Yield/User";
    pub const YIELD_SYSTEM: &str = "/Yield/System";
    pub const LOAD_STATE: &str = "/Load/State";
    pub const LOAD_CURRENT: &str = "/Load/I";
    pub const STATE: &str = "/State";
    pub const ERROR_CODE: &str = "/ErrorCode";

    pub const OVERALL_MAX_PV_VOLTAGE: &str = "/History/Overall/MaxPvVoltage";
    pub const OVERALL_MIN_BATTERY_VOLTAGE: &str = "/History/Overall/MinBatteryVoltage";
    pub const OVERALL_MAX_BATTERY_VOLTAGE: &str = "/History/Overall/MaxBatteryVoltage";
    pub const OVERALL_DAYS_AVAILABLE: &str = "/History/Overall/DaysAvailable";
    pub const OVERALL_LAST_ERROR: &str = "/History/Overall/LastError1";

    /// Path of a daily history field, day 0 is today and day 1 yesterday.
    pub fn daily(day: u8, field: &str) -> String {
        format!("/History/Daily/{}/{}", day, field)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Switch semantics: non-zero numbers are on.
    pub fn as_switch(&self) -> Option<bool> {
        match self {
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.),
            Value::Text(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Receives write requests arriving from the bus. Returning `false` rejects
/// the write and the bus keeps its old value.
pub trait WriteHandler: Send {
    fn on_write_request(&self, key: &str, value: &Value) -> bool;
}

pub trait Sink {
    /// Overwrite the last value of `key`.
    fn publish(&mut self, key: &str, value: Value);

    fn read_last(&self, key: &str) -> Option<Value>;

    /// Install the handler for inbound writes, replacing any previous one.
    fn register_write_handler(&mut self, handler: Box<dyn WriteHandler>);
}

/// A sink that keeps the last value of every path in memory.
#[derive(Default)]
pub struct MemorySink {
    values: BTreeMap<String, Value>,
    handler: Option<Box<dyn WriteHandler>>,
}

impl std::fmt::Debug for MemorySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySink")
            .field("values", &self.values)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl MemorySink {
    pub fn new() -> MemorySink {
        MemorySink::default()
    }

    /// Deliver a write coming from the bus side. The value is stored only if
    /// the registered handler accepts it.
    pub fn request_write(&mut self, key: &str, value: Value) -> bool {
        let accepted = match &self.handler {
            Some(h) => h.on_write_request(key, &value),
            None => false,
        };
        if accepted {
            self.values.insert(key.to_owned(), value);
        } else {
            tracing::debug!(key, "write request rejected");
        }
        accepted
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Sink for MemorySink {
    fn publish(&mut self, key: &str, value: Value) {
        tracing::trace!(key, ?value, "publish");
        self.values.insert(key.to_owned(), value);
    }

    fn read_last(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn register_write_handler(&mut self, handler: Box<dyn WriteHandler>) {
        self.handler = Some(handler);
    }
}
