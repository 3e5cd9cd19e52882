//! InfluxDB line protocol output formatter.

use crate::device::DeviceContext;
use crate::output::OutputFormatter;
use crate::reading::Reading;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in a tag key or value.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    // pre-epoch timestamps are left for the server to assign
    if let Some(since_epoch) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
    {
        write!(fmt, " {}", since_epoch.as_nanos())?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// One line per device, tagged with the device address, display name,
/// profile and (when known) serial number. The point is stamped with the
/// time of the last merged update.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, device: &DeviceContext) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("mac".to_string(), device.address.to_string());
        tags.insert("name".to_string(), device.display_name.clone());
        tags.insert("profile".to_string(), device.profile.clone());
        if let Some(serial) = &device.serial {
            tags.insert("serial".to_string(), serial.clone());
        }
        tags
    }

    /// Only fields that have values are included.
    fn field_set(&self, r: &Reading) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();

        macro_rules! add {
            ($name:literal, $variant:ident, $val:expr) => {
                if let Some(v) = $val {
                    fields.insert($name.into(), FieldValue::$variant(v));
                }
            };
        }

        add!("temperature", Float, r.temperature);
        add!("humidity", Float, r.humidity);
        add!("battery", Integer, r.battery.map(i64::from));
        add!("radon_short_term", Integer, r.radon_short_term.map(i64::from));
        add!("radon_long_term", Integer, r.radon_long_term.map(i64::from));

        fields
    }

    fn to_data_point(&self, device: &DeviceContext, reading: &Reading) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(device),
            field_set: self.field_set(reading),
            timestamp: Some(reading.last_update_at),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, device: &DeviceContext, reading: &Reading) -> Option<String> {
        let point = self.to_data_point(device, reading);
        // a line without fields is rejected by InfluxDB
        if point.field_set.is_empty() {
            return None;
        }
        Some(point.to_string())
    }
}
