//! Xiaomi Mi thermometers broadcasting MiBeacon service data (UUID 0xFE95).
//!
//! Readings arrive in advertisements; the device is never connected to.

use super::{DecodeError, DeviceProfile, Payload, ReadMode};
use crate::device::DeviceContext;
use crate::radio::{Advertisement, uuid_from_u16};
use crate::reading::PartialReading;
use uuid::Uuid;

/// MiBeacon service data UUID.
pub const MI_SERVICE_UUID: Uuid = uuid_from_u16(0xfe95);

const FRAME_HAS_MAC: u16 = 1 << 4;
const FRAME_HAS_CAPABILITIES: u16 = 1 << 5;
const FRAME_HAS_EVENT: u16 = 1 << 6;

const EVENT_TEMPERATURE: u16 = 0x1004;
const EVENT_HUMIDITY: u16 = 0x1006;
const EVENT_BATTERY: u16 = 0x100a;
const EVENT_TEMPERATURE_AND_HUMIDITY: u16 = 0x100d;

#[derive(Debug, Default, Clone, Copy)]
pub struct MiThermometer;

impl MiThermometer {
    pub const NAME: &'static str = "mi-thermometer";
}

/// Offset of the event object, or `None` when the frame carries no event.
fn event_offset(frame_control: u16) -> Option<usize> {
    if frame_control & FRAME_HAS_EVENT == 0 {
        return None;
    }
    let mut offset = if frame_control & FRAME_HAS_MAC != 0 {
        11
    } else {
        5
    };
    if frame_control & FRAME_HAS_CAPABILITIES != 0 {
        offset += 1;
    }
    Some(offset)
}

fn tenths(raw: i32) -> f64 {
    f64::from(raw) / 10.0
}

impl DeviceProfile for MiThermometer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn uuid(&self) -> Uuid {
        MI_SERVICE_UUID
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Advertising
    }

    fn keep_cached(&self) -> bool {
        true
    }

    fn validate(&self, advertisement: &Advertisement) -> bool {
        advertisement.service_data.contains_key(&MI_SERVICE_UUID)
    }

    fn context(&self, advertisement: &Advertisement) -> DeviceContext {
        DeviceContext {
            id: advertisement.id.clone(),
            display_name: advertisement
                .local_name
                .clone()
                .unwrap_or_else(|| "Mi Thermometer".to_string()),
            address: advertisement.address,
            serial: None,
            profile: Self::NAME.to_string(),
            keep_cached: self.keep_cached(),
        }
    }

    fn parse(&self, data: &[u8]) -> Result<PartialReading, DecodeError> {
        let payload = Payload(data);
        let offset = event_offset(payload.u16_le(0)?)
            .ok_or_else(|| DecodeError::InvalidData(format!("no event: {}", payload.hex())))?;

        // event type (2 bytes), length (1 byte), then the value
        let value = offset + 3;
        match payload.u16_le(offset)? {
            EVENT_BATTERY => Ok(PartialReading {
                battery: Some(payload.u8(value)?),
                ..Default::default()
            }),
            EVENT_TEMPERATURE_AND_HUMIDITY => Ok(PartialReading {
                temperature: Some(tenths(payload.i16_le(value)?.into())),
                humidity: Some(tenths(payload.u16_le(value + 2)?.into())),
                ..Default::default()
            }),
            EVENT_TEMPERATURE => Ok(PartialReading {
                temperature: Some(tenths(payload.i16_le(value)?.into())),
                ..Default::default()
            }),
            EVENT_HUMIDITY => Ok(PartialReading {
                humidity: Some(tenths(payload.u16_le(value)?.into())),
                ..Default::default()
            }),
            other => Err(DecodeError::UnsupportedFormat(format!(
                "unknown MiBeacon event type {other}: {}",
                payload.hex()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MI_BATTERY_FRAME, MI_CLIMATE_FRAME, mi_advertisement};

    #[test]
    fn test_parse_temperature_and_humidity() {
        let reading = MiThermometer.parse(&MI_CLIMATE_FRAME).unwrap();
        assert_eq!(reading.temperature, Some(22.0));
        assert_eq!(reading.humidity, Some(38.2));
        assert_eq!(reading.battery, None);
    }

    #[test]
    fn test_parse_battery() {
        let reading = MiThermometer.parse(&MI_BATTERY_FRAME).unwrap();
        assert_eq!(reading.battery, Some(93));
        assert_eq!(reading.temperature, None);
    }

    #[test]
    fn test_parse_negative_temperature_without_mac() {
        // frame control 0x2040: event only, no MAC
        let frame = [
            0x40, 0x20, 0x5b, 0x05, 0x07, 0x04, 0x10, 0x02, 0x9c, 0xff,
        ];
        let reading = MiThermometer.parse(&frame).unwrap();
        assert_eq!(reading.temperature, Some(-10.0));
    }

    #[test]
    fn test_parse_capabilities_shift_event() {
        // has MAC and capabilities: event starts at 12
        let frame = [
            0x70, 0x20, 0x5b, 0x05, 0x07, 0x01, 0x02, 0x03, 0x38, 0xc1, 0xa4, 0x08, 0x06, 0x10,
            0x02, 0xf4, 0x01,
        ];
        let reading = MiThermometer.parse(&frame).unwrap();
        assert_eq!(reading.humidity, Some(50.0));
    }

    #[test]
    fn test_parse_frame_without_event() {
        let frame = [0x30, 0x20, 0x5b, 0x05, 0x07];
        assert!(matches!(
            MiThermometer.parse(&frame),
            Err(DecodeError::InvalidData(msg)) if msg.starts_with("no event")
        ));
    }

    #[test]
    fn test_parse_unknown_event_and_truncation() {
        let mut unknown = MI_BATTERY_FRAME;
        unknown[11] = 0x99;
        assert!(matches!(
            MiThermometer.parse(&unknown),
            Err(DecodeError::UnsupportedFormat(_))
        ));

        assert!(MiThermometer.parse(&MI_CLIMATE_FRAME[..15]).is_err());
        assert!(MiThermometer.parse(&[]).is_err());
    }

    #[test]
    fn test_validate_and_context() {
        let mut ad = mi_advertisement("a4c138000001");
        assert!(MiThermometer.validate(&ad));

        let context = MiThermometer.context(&ad);
        assert_eq!(context.display_name, "Mi Thermometer");
        assert_eq!(context.profile, "mi-thermometer");
        assert!(context.keep_cached);
        assert_eq!(context.keep_cached, MiThermometer.keep_cached());
        assert_eq!(context.serial, None);

        ad.local_name = Some("LYWSD03MMC".to_string());
        assert_eq!(MiThermometer.context(&ad).display_name, "LYWSD03MMC");

        ad.service_data.clear();
        assert!(!MiThermometer.validate(&ad));
    }
}
