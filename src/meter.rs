//! SwitchBot Meter advertisement filter and payload decoder.
//!
//! The meter broadcasts its current readings inside the 16-bit service data
//! of every advertisement, so no connection or pairing is needed. This
//! module recognizes a meter among arbitrary nearby advertisers and unpacks
//! the 8-byte payload into a [`Reading`].
//!
//! Format documented in the vendor's open API:
//! <https://github.com/OpenWonderLabs/python-host/wiki/Meter-BLE-open-API>

use crate::advertisement::AdvertisementRecord;
use crate::reading::{Reading, TemperatureScale};
use std::time::SystemTime;

/// 128-bit communication service UUID advertised by SwitchBot devices.
pub const METER_SERVICE_UUID: &str = "cba20d00-224d-11e6-9fb8-0002a5d5c51b";

/// Model discriminator at service data byte 2 for the Meter family (ASCII 'T').
pub const METER_MODEL_ID: u8 = 0x54;

/// Meter service data is always exactly 8 bytes.
pub const METER_SERVICE_DATA_LEN: usize = 8;

/// Check whether an advertisement comes from a SwitchBot Meter.
///
/// A record matches iff the first advertised service UUID is the SwitchBot
/// service (case-insensitive), the 16-bit service data is present with
/// exactly 8 bytes, and its model byte identifies the Meter family.
///
/// Non-matching records are the common case during a shared scan window
/// and are simply dropped by the caller; a mismatch is never an error.
pub fn matches(record: &AdvertisementRecord) -> bool {
    record
        .service_uuids
        .first()
        .is_some_and(|uuid| uuid.eq_ignore_ascii_case(METER_SERVICE_UUID))
        && record.service_data.as_deref().is_some_and(|data| {
            data.len() == METER_SERVICE_DATA_LEN && data[2] == METER_MODEL_ID
        })
}

/// Decode the service data of a matched advertisement into a [`Reading`].
///
/// Payload layout (byte indexes into the 8-byte service data):
/// - byte 4: battery percent in the low 7 bits
/// - byte 5: temperature tenths digit in the low 4 bits
/// - byte 6: temperature integer magnitude in the low 7 bits; the high bit
///   is the sign flag, with **set meaning positive** (the meter's wire
///   protocol reverses the conventional sign-bit meaning)
/// - byte 7: humidity percent in the low 7 bits; high bit set selects
///   Fahrenheit, in which case the conversion `t * 1.8 + 32` is applied
///
/// Temperatures are rounded to one decimal place on both unit branches,
/// half away from zero. Physically nonsensical bit combinations still
/// decode to numeric values; the decoder never faults.
///
/// Returns `None` only when the service data is missing or not exactly
/// 8 bytes, which cannot happen for records that passed [`matches`].
pub fn decode(record: &AdvertisementRecord) -> Option<Reading> {
    let data: &[u8] = record.service_data.as_deref()?;
    if data.len() != METER_SERVICE_DATA_LEN {
        return None;
    }

    let battery = data[4] & 0x7F;
    let humidity = data[7] & 0x7F;

    let magnitude = f64::from(data[6] & 0x7F) + f64::from(data[5] & 0x0F) / 10.0;
    // Reversed sign flag: a clear high bit means the reading is negative.
    let celsius = if data[6] & 0x80 != 0 {
        magnitude
    } else {
        -magnitude
    };

    let (scale, temperature) = if data[7] & 0x80 != 0 {
        (TemperatureScale::Fahrenheit, round1(celsius * 1.8 + 32.0))
    } else {
        (TemperatureScale::Celsius, round1(celsius))
    };

    Some(Reading {
        mac: record.mac,
        timestamp: SystemTime::now(),
        temperature,
        scale,
        humidity,
        battery,
        rssi: record.rssi,
    })
}

/// Round to one decimal place, half away from zero.
#[inline]
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
