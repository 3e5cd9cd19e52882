//! `ble-sensor-poller` library.
//!
//! Discovers Bluetooth LE environment sensors, then keeps a per-device cache
//! of their latest readings: advertisement-based sensors are refreshed during
//! each poll scan, connection-based sensors are read one at a time after it.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The engine lives in [`crate::engine`] where it can
//! be tested deterministically against a scripted [`radio::Radio`].

pub mod adapter;
pub mod app;
pub mod cache;
pub mod config;
pub mod device;
pub mod engine;
pub mod output;
pub mod profile;
pub mod radio;
pub mod reading;
pub mod registry;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use cache::DataCache;
pub use config::{Config, parse_duration, parse_nonzero_duration};
pub use device::{DeviceContext, DeviceId, MacAddress};
pub use engine::{Engine, EngineHandle, ReadError, ScanMode};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use profile::{DecodeError, DeviceProfile, ProfileSet, ReadMode};
pub use radio::{AdapterState, Peripheral, PeripheralState, Radio, RadioError};
pub use reading::{PartialReading, Reading};
