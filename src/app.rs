//! Core application runner for `ble-sensor-poller`.
//!
//! This module is decoupled from CLI parsing, the BlueZ backend and process
//! exit codes so it can be tested deterministically with a scripted radio,
//! an in-memory output stream and a virtual clock.

use crate::cache::DataCache;
use crate::config::{Config, parse_duration, parse_nonzero_duration};
use crate::device::{DeviceContext, DeviceId};
use crate::engine::Engine;
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::profile::{AirthingsWave2, MiThermometer, ProfileError, ProfileSet};
use crate::radio::{Radio, RadioError};
use clap::Parser;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Configuration for the core run loop.
///
/// Durations accept a suffix: 500ms, 10s, 5m, 1h. Without suffix, the value
/// is interpreted as seconds.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// How long each scan window lasts; also the time budget of one device read.
    /// Values below 10s are raised to 10s.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub scan_time: Duration,

    /// Pause between poll cycles. Values below 5m are raised to 5m.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub refresh_time: Duration,

    /// Wait between checks of an unavailable adapter and between empty bootstrap scans.
    #[arg(long, default_value = "30s", value_parser = parse_nonzero_duration)]
    pub retry_after: Duration,

    /// Device profile to enable, in priority order. Repeat to enable several.
    #[arg(
        long = "profile",
        value_name = "PROFILE",
        default_values = [MiThermometer::NAME, AirthingsWave2::NAME]
    )]
    pub profiles: Vec<String>,

    /// How often cached readings are written to stdout.
    #[arg(long, default_value = "60s", value_parser = parse_nonzero_duration)]
    pub report_interval: Duration,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "ble_sensor")]
    pub influxdb_measurement: String,

    /// Verbose output, log every advertisement and read
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn config(&self) -> Config {
        Config::new(self.scan_time, self.refresh_time, self.retry_after)
    }

    pub fn profile_set(&self) -> Result<ProfileSet, ProfileError> {
        ProfileSet::from_names(&self.profiles)
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ProfileError),
    #[error("poll scheduler failed: {0}")]
    Scheduler(#[from] tokio::task::JoinError),
}

/// Write one line per cached reading of a known device.
fn write_snapshot(
    formatter: &dyn OutputFormatter,
    devices: &HashMap<DeviceId, DeviceContext>,
    cache: &DataCache,
    out: &mut dyn Write,
) -> io::Result<()> {
    for (id, reading) in cache.snapshot() {
        let Some(device) = devices.get(&id) else {
            debug!(device = %id, "no device context for cached reading");
            continue;
        };
        if let Some(line) = formatter.format(device, &reading) {
            writeln!(out, "{line}")?;
        }
    }
    out.flush()
}

/// Discover devices, run the poll scheduler, and report cached readings to
/// `out` every `report_interval` until `shutdown` resolves.
///
/// The engine is cleared on the way out, whether shutdown came during
/// discovery or while polling.
pub async fn run_with_io<R, F>(
    options: Options,
    radio: Arc<R>,
    out: &mut dyn Write,
    shutdown: F,
) -> Result<(), RunError>
where
    R: Radio + 'static,
    F: Future<Output = ()>,
{
    let profiles = options.profile_set()?;
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone());
    let mut engine = Engine::new(radio, profiles, options.config());
    tokio::pin!(shutdown);

    let discovered = tokio::select! {
        devices = engine.discover_devices() => devices,
        _ = &mut shutdown => None,
    };
    let Some(discovered) = discovered else {
        engine.clear().await;
        return Ok(());
    };

    let devices: HashMap<DeviceId, DeviceContext> = discovered
        .into_iter()
        .map(|device| (device.id.clone(), device))
        .collect();

    let (handle, task) = engine.start();
    let mut report = tokio::time::interval(options.report_interval);
    report.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = report.tick() => {
                if let Err(err) = write_snapshot(&formatter, &devices, handle.cache(), out) {
                    warn!(%err, "failed to write readings, shutting down");
                    break Err(RunError::from(err));
                }
            }
        }
    };

    handle.clear();
    task.await?;
    info!("stopped");
    result
}
