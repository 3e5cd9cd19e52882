//! Radio abstraction the engine drives.
//!
//! The engine never talks to a Bluetooth stack directly. A [`Radio`] reports
//! adapter power state through a watch channel and delivers discovery events
//! through an mpsc channel while discovery is active; each discovered device
//! comes with a [`Peripheral`] handle used later for connection-based reads.
//! This keeps the engine testable with a scripted radio and no hardware.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::device::{DeviceId, MacAddress};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Channel buffer size for discovery events.
pub const DISCOVERY_CHANNEL_BUFFER_SIZE: usize = 100;

/// Base UUID for 16-bit Bluetooth SIG assigned numbers.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;

/// Expand a 16-bit assigned number (e.g. `0xfe95`) into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Errors reported by a radio backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    /// Bluetooth stack or adapter error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// The connected device does not expose the requested characteristic
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    /// Discovery or connection attempted while the backend cannot serve it
    #[error("Radio unavailable: {0}")]
    Unavailable(String),
}

/// Physical radio lifecycle as reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Only a powered-on adapter may scan.
    pub fn is_ready(self) -> bool {
        self == AdapterState::PoweredOn
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdapterState::Unknown => "unknown",
            AdapterState::Resetting => "resetting",
            AdapterState::Unsupported => "unsupported",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::PoweredOff => "powered-off",
            AdapterState::PoweredOn => "powered-on",
        };
        f.write_str(name)
    }
}

/// Connection state of a single peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeripheralState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    /// The last connection attempt failed; the handle is considered stale
    Error,
}

impl fmt::Display for PeripheralState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeripheralState::Disconnected => "disconnected",
            PeripheralState::Connecting => "connecting",
            PeripheralState::Connected => "connected",
            PeripheralState::Disconnecting => "disconnecting",
            PeripheralState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One received advertisement, reduced to what profiles look at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advertisement {
    pub id: DeviceId,
    pub address: MacAddress,
    pub local_name: Option<String>,
    /// Service data keyed by full service UUID
    pub service_data: HashMap<Uuid, Vec<u8>>,
    /// Manufacturer data keyed by company identifier, without the identifier bytes
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

/// A discovery event: the advertisement plus the handle to reach the device.
#[derive(Debug, Clone)]
pub struct Discovery<P> {
    pub advertisement: Advertisement,
    pub peripheral: P,
}

/// Boxed future returned by radio operations.
pub type RadioFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RadioError>> + Send + 'a>>;

/// The adapter side of a Bluetooth stack.
pub trait Radio: Send + Sync {
    type Peripheral: Peripheral;

    /// Subscribe to adapter state changes; the current value is readable at once.
    fn adapter_state(&self) -> watch::Receiver<AdapterState>;

    /// Put the adapter into discovery mode.
    ///
    /// Every advertisement received until [`Radio::stop_discovery`] is
    /// delivered on the returned channel, in arrival order, duplicates included.
    fn start_discovery(&self) -> RadioFuture<'_, mpsc::Receiver<Discovery<Self::Peripheral>>>;

    /// Leave discovery mode. Stopping an idle adapter is not an error.
    fn stop_discovery(&self) -> RadioFuture<'_, ()>;
}

/// A remote device that can be connected to.
pub trait Peripheral: Clone + Send + Sync + 'static {
    fn id(&self) -> &DeviceId;

    fn state(&self) -> PeripheralState;

    fn connect(&self) -> RadioFuture<'_, ()>;

    /// Resolve the characteristic `uuid` on the connected device and read its value.
    fn read_characteristic(&self, uuid: Uuid) -> RadioFuture<'_, Vec<u8>>;

    fn disconnect(&self) -> RadioFuture<'_, ()>;
}
