//! Vendor device profiles.
//!
//! A profile is the only place that knows a vendor's advertisement layout and
//! payload format. The engine calls [`DeviceProfile::validate`] during
//! bootstrap scans, [`DeviceProfile::context`] once per newly found device,
//! and [`DeviceProfile::parse`] on every advertisement match or
//! characteristic read.

pub mod airthings;
pub mod mi;

use crate::device::DeviceContext;
use crate::radio::Advertisement;
use crate::reading::PartialReading;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use airthings::AirthingsWave2;
pub use mi::MiThermometer;

/// Error types for decoding vendor payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload version or header does not match what the profile understands
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Payload too short or otherwise malformed
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// How the engine obtains fresh data for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Decode service data from advertisements seen during poll scans
    Advertising,
    /// Connect and read a characteristic once per poll cycle
    Connecting,
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMode::Advertising => write!(f, "advertising"),
            ReadMode::Connecting => write!(f, "connecting"),
        }
    }
}

/// Capability bundle for one vendor device family.
pub trait DeviceProfile: Send + Sync {
    /// Stable profile name, recorded in each [`DeviceContext`]
    fn name(&self) -> &'static str;

    /// Service-data UUID (advertising) or characteristic UUID (connecting)
    fn uuid(&self) -> Uuid;

    fn read_mode(&self) -> ReadMode;

    /// Whether devices of this family should outlive a restart in the presentation layer.
    fn keep_cached(&self) -> bool {
        false
    }

    /// Does this advertisement come from a device of this family?
    fn validate(&self, advertisement: &Advertisement) -> bool;

    /// Build the context for a device that passed [`DeviceProfile::validate`].
    fn context(&self, advertisement: &Advertisement) -> DeviceContext;

    /// Decode a raw payload into whatever fields it carries.
    fn parse(&self, data: &[u8]) -> Result<PartialReading, DecodeError>;
}

/// Errors returned when building a profile set from names.
#[derive(Error, Debug, PartialEq)]
pub enum ProfileError {
    #[error("unknown device profile '{0}' (known: mi-thermometer, airthings-wave2)")]
    Unknown(String),
    #[error("device profile '{0}' listed twice")]
    Duplicate(String),
    #[error("no device profile configured")]
    Empty,
}

/// Profiles in evaluation order.
///
/// During bootstrap the first profile whose `validate` accepts an
/// advertisement claims the device.
#[derive(Clone, Default)]
pub struct ProfileSet {
    profiles: Vec<Arc<dyn DeviceProfile>>,
}

impl ProfileSet {
    pub fn new(profiles: Vec<Arc<dyn DeviceProfile>>) -> Self {
        Self { profiles }
    }

    /// Every built-in profile, in the default evaluation order.
    pub fn builtin() -> Self {
        Self::new(vec![Arc::new(MiThermometer), Arc::new(AirthingsWave2)])
    }

    /// Select built-in profiles by name, keeping the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ProfileError> {
        if names.is_empty() {
            return Err(ProfileError::Empty);
        }

        let builtin = Self::builtin();
        let mut selected = Self::default();
        for name in names {
            let name = name.as_ref();
            if selected.get(name).is_some() {
                return Err(ProfileError::Duplicate(name.to_string()));
            }
            let profile = builtin
                .get(name)
                .ok_or_else(|| ProfileError::Unknown(name.to_string()))?;
            selected.profiles.push(profile);
        }
        Ok(selected)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DeviceProfile>> {
        self.profiles.iter().find(|p| p.name() == name).cloned()
    }

    /// First profile accepting `advertisement`, in evaluation order.
    pub fn identify(&self, advertisement: &Advertisement) -> Option<&Arc<dyn DeviceProfile>> {
        self.profiles.iter().find(|p| p.validate(advertisement))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DeviceProfile>> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl fmt::Debug for ProfileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.profiles.iter().map(|p| p.name()))
            .finish()
    }
}

/// Bounds-checked little-endian reads shared by the decoders.
pub(crate) struct Payload<'a>(pub &'a [u8]);

impl Payload<'_> {
    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        self.0
            .get(offset..offset + N)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| {
                DecodeError::InvalidData(format!(
                    "payload of {} bytes too short for read at offset {offset}",
                    self.0.len()
                ))
            })
    }

    pub fn u8(&self, offset: usize) -> Result<u8, DecodeError> {
        self.bytes::<1>(offset).map(|[b]| b)
    }

    pub fn u16_le(&self, offset: usize) -> Result<u16, DecodeError> {
        self.bytes(offset).map(u16::from_le_bytes)
    }

    pub fn i16_le(&self, offset: usize) -> Result<i16, DecodeError> {
        self.bytes(offset).map(i16::from_le_bytes)
    }

    pub fn u32_le(&self, offset: usize) -> Result<u32, DecodeError> {
        self.bytes(offset).map(u32::from_le_bytes)
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}
