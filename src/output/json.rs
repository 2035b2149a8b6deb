//! JSON lines output formatter.
//!
//! Emits one self-describing JSON object per reading, with the timestamp
//! rendered as local wall-clock time at second resolution.

use crate::output::OutputFormatter;
use crate::reading::Reading;
use serde_json::json;
use std::time::SystemTime;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem};

const TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS` in the local timezone.
///
/// Falls back to UTC when the local offset cannot be determined (e.g. in
/// multi-threaded processes where reading the environment is unsound).
fn format_timestamp(timestamp: SystemTime) -> String {
    let utc = OffsetDateTime::from(timestamp);
    let datetime = match UtcOffset::current_local_offset() {
        Ok(offset) => utc.to_offset(offset),
        Err(_) => utc,
    };
    datetime
        .format(&TIME_FORMAT)
        .expect("datetime formatting cannot fail for a fixed format")
}

/// Formatter producing one JSON object per reading.
///
/// Field names follow the meter's established record layout: `address`,
/// `time`, `temperature`, `temperature_scale`, `humidity`, `battery`,
/// `signal_strength`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl JsonFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl OutputFormatter for JsonFormatter {
    fn format(&self, reading: &Reading) -> String {
        json!({
            "address": reading.mac.to_string(),
            "time": format_timestamp(reading.timestamp),
            "temperature": reading.temperature,
            "temperature_scale": reading.scale.symbol(),
            "humidity": reading.humidity,
            "battery": reading.battery,
            "signal_strength": reading.rssi,
        })
        .to_string()
    }
}
