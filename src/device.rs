//! Device identity and the context a profile extracts at discovery time.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Radio-assigned device handle, stable for the lifetime of the process.
///
/// Primary key of the registry and the data cache. The BlueZ backend derives
/// it from the lowercase hex address without separators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A Bluetooth MAC address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Errors returned when parsing a MAC address string.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address: expected 6 parts, got {0}")]
    InvalidLength(usize),
    #[error("invalid MAC address: '{0}' is not a two-digit hex octet")]
    InvalidOctet(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(ParseMacError::InvalidLength(parts.len()));
        }

        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(&parts) {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidOctet(part.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidOctet(part.to_string()))?;
        }

        Ok(MacAddress(bytes))
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

/// Everything the engine and the presentation layer need to know about a
/// discovered device.
///
/// Built once by the owning profile when the device is first seen during a
/// bootstrap scan and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceContext {
    pub id: DeviceId,
    pub display_name: String,
    pub address: MacAddress,
    /// Vendor serial number, when the advertisement carries one
    pub serial: Option<String>,
    /// Name of the profile that claimed the device
    pub profile: String,
    /// Whether the presentation layer should keep the device across restarts
    pub keep_cached: bool,
}
