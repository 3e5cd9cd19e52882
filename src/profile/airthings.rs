//! Airthings Wave 2 radon monitors.
//!
//! The serial number is advertised in manufacturer data; current values are
//! only available by connecting and reading a vendor characteristic.
//! Format reference: <https://github.com/ztroop/wave-reader-utils/blob/master/docs/specs.md>

use super::{DecodeError, DeviceProfile, Payload, ReadMode};
use crate::device::DeviceContext;
use crate::radio::Advertisement;
use crate::reading::PartialReading;
use uuid::{Uuid, uuid};

/// Airthings AS Bluetooth company identifier.
pub const AIRTHINGS_COMPANY_ID: u16 = 0x0334;

/// "Current values" characteristic of the Wave 2.
pub const WAVE2_CURRENT_VALUES_UUID: Uuid = uuid!("b42e4dcc-ade7-11e4-89d3-123b93f75cba");

/// Version byte every current-values payload starts with.
const CURRENT_VALUES_VERSION: u8 = 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct AirthingsWave2;

impl AirthingsWave2 {
    pub const NAME: &'static str = "airthings-wave2";
}

/// Serial number carried in the manufacturer data, if this is an Airthings device.
pub fn parse_serial(advertisement: &Advertisement) -> Option<String> {
    let data = advertisement.manufacturer_data.get(&AIRTHINGS_COMPANY_ID)?;
    Payload(data).u32_le(0).ok().map(|sn| sn.to_string())
}

impl DeviceProfile for AirthingsWave2 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn uuid(&self) -> Uuid {
        WAVE2_CURRENT_VALUES_UUID
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Connecting
    }

    fn validate(&self, advertisement: &Advertisement) -> bool {
        parse_serial(advertisement).is_some()
    }

    fn context(&self, advertisement: &Advertisement) -> DeviceContext {
        DeviceContext {
            id: advertisement.id.clone(),
            display_name: advertisement
                .local_name
                .clone()
                .unwrap_or_else(|| "Airthings Wave2".to_string()),
            address: advertisement.address,
            serial: parse_serial(advertisement),
            profile: Self::NAME.to_string(),
            keep_cached: self.keep_cached(),
        }
    }

    fn parse(&self, data: &[u8]) -> Result<PartialReading, DecodeError> {
        let payload = Payload(data);
        let version = payload.u8(0)?;
        if version != CURRENT_VALUES_VERSION {
            return Err(DecodeError::UnsupportedFormat(format!(
                "incompatible current values version (expected {CURRENT_VALUES_VERSION}, got {version})"
            )));
        }

        Ok(PartialReading {
            humidity: Some(f64::from(payload.u8(1)?) / 2.0),
            radon_short_term: Some(payload.u16_le(4)?),
            radon_long_term: Some(payload.u16_le(6)?),
            temperature: Some(f64::from(payload.u16_le(8)?) / 100.0),
            battery: None,
        })
    }
}
