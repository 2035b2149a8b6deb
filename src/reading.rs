//! Decoded SwitchBot Meter reading.

use crate::mac_address::MacAddress;
use std::fmt;

/// Temperature unit selected by the meter's display setting.
///
/// The unit is carried in the advertisement itself (high bit of the
/// humidity byte), so readings arrive already converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureScale {
    Celsius,
    Fahrenheit,
}

impl TemperatureScale {
    /// Single-letter unit symbol used in output records ("C" / "F").
    pub fn symbol(self) -> &'static str {
        match self {
            TemperatureScale::Celsius => "C",
            TemperatureScale::Fahrenheit => "F",
        }
    }
}

impl fmt::Display for TemperatureScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A single decoded reading from a SwitchBot Meter.
///
/// Produced once per advertisement that passes the meter filter, handed to
/// the output layer and never retained. Humidity and battery are nominally
/// 0-100 percent but the wire fields are 7 bits wide; values up to 127 are
/// passed through unchanged rather than rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// MAC address of the meter (copied from the matched advertisement)
    pub mac: MacAddress,
    /// Time the advertisement was decoded
    pub timestamp: std::time::SystemTime,
    /// Temperature with one decimal place, in the unit given by `scale`
    pub temperature: f64,
    /// Unit of `temperature`
    pub scale: TemperatureScale,
    /// Relative humidity in percent
    pub humidity: u8,
    /// Battery level in percent
    pub battery: u8,
    /// Signal strength at observation time (copied from the advertisement)
    pub rssi: i16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_symbols() {
        assert_eq!(TemperatureScale::Celsius.symbol(), "C");
        assert_eq!(TemperatureScale::Fahrenheit.symbol(), "F");
        assert_eq!(format!("{}", TemperatureScale::Celsius), "C");
        assert_eq!(format!("{}", TemperatureScale::Fahrenheit), "F");
    }
}
