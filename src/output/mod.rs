//! Output formatters for cached device readings.
//!
//! This module provides a trait for formatting readings and an InfluxDB line
//! protocol implementation used by the command-line consumer.

pub mod influxdb;

use crate::device::DeviceContext;
use crate::reading::Reading;

/// Trait for formatting a device reading into an output line.
pub trait OutputFormatter: Send + Sync {
    /// Format the latest reading of `device`.
    ///
    /// Returns `None` when the reading carries nothing worth emitting.
    fn format(&self, device: &DeviceContext, reading: &Reading) -> Option<String>;
}
