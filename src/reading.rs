//! Decoded sensor readings and the merge rule applied to the cache.

use std::time::SystemTime;

/// Fields a profile decoded from a single payload.
///
/// Any field may be absent: a Mi thermometer advertisement carries either a
/// battery level or a temperature/humidity pair, never both.
///
/// Units:
/// - Temperature in Celsius
/// - Humidity in percent (0-100)
/// - Battery in percent (0-100)
/// - Radon concentrations in Bq/m3
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PartialReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<u8>,
    /// Short-term (24h) radon average
    pub radon_short_term: Option<u16>,
    /// Long-term radon average
    pub radon_long_term: Option<u16>,
}

impl PartialReading {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The freshest value seen for every field of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub battery: Option<u8>,
    pub radon_short_term: Option<u16>,
    pub radon_long_term: Option<u16>,
    /// When the last partial was merged in
    pub last_update_at: SystemTime,
}

impl Reading {
    /// Merge `update` over `previous`.
    ///
    /// Fields present in `update` win; fields it lacks keep their previous
    /// value. The result is stamped with `at`.
    pub fn merge(previous: Option<&Reading>, update: &PartialReading, at: SystemTime) -> Reading {
        macro_rules! pick {
            ($field:ident) => {
                update.$field.or(previous.and_then(|p| p.$field))
            };
        }

        Reading {
            temperature: pick!(temperature),
            humidity: pick!(humidity),
            battery: pick!(battery),
            radon_short_term: pick!(radon_short_term),
            radon_long_term: pick!(radon_long_term),
            last_update_at: at,
        }
    }
}
