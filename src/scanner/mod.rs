//! BLE scanner abstraction for capturing advertisements.
//!
//! This module provides a trait-free dispatch over the compiled-in capture
//! backends. Backends deliver raw [`AdvertisementRecord`] values through a
//! bounded channel; device filtering and payload decoding happen in the
//! consumer, so a backend never needs to know what a meter looks like.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::AdvertisementRecord;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors produced while turning raw capture bytes into advertisement records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Advertising report shorter than its own length fields claim
    #[error("truncated advertising report: {0}")]
    TruncatedReport(String),
    /// Advertising data that cannot be parsed into AD structures
    #[error("malformed advertising data: {0}")]
    MalformedData(String),
}

/// Convenience alias for captured records or capture errors.
pub type RecordResult = Result<AdvertisementRecord, CaptureError>;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Capture/parse error
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// AD structure type for 16-bit service data (0x16).
#[cfg(any(feature = "bluer", feature = "hci"))]
pub const SERVICE_DATA_16B_AD_TYPE: u8 = 0x16;

/// 16-bit identifier of the SwitchBot service data entry.
#[cfg(feature = "hci")]
pub const METER_SERVICE_DATA_ID: u16 = 0x0d00;

/// Little-endian bytes of [`METER_SERVICE_DATA_ID`] as they appear on the
/// wire, used for advertisement pattern matching.
#[cfg(feature = "bluer")]
pub const METER_SERVICE_DATA_ID_BYTES: [u8; 2] = [0x00, 0x0d];

/// Channel buffer size for captured records.
pub const RECORD_CHANNEL_BUFFER_SIZE: usize = 100;

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Start capturing advertisements using the specified backend.
///
/// This is the main entry point for creating a scanner. It dispatches to the
/// appropriate backend implementation based on the `backend` parameter.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `window` - Optional scan window; the channel closes once it elapses.
///   `None` scans until interrupted.
/// * `verbose` - If true, capture errors are sent as Err values; otherwise
///   they're silently dropped.
///
/// # Returns
/// A receiver for advertisement records (or capture errors if verbose).
pub async fn start_scan(
    backend: Backend,
    window: Option<Duration>,
    verbose: bool,
) -> Result<mpsc::Receiver<RecordResult>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(window, verbose).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(window, verbose).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::TruncatedReport("report too short".to_string());
        assert_eq!(
            format!("{}", err),
            "truncated advertising report: report too short"
        );

        let err2 = CaptureError::MalformedData("bad AD length".to_string());
        assert_eq!(format!("{}", err2), "malformed advertising data: bad AD length");
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Capture(CaptureError::TruncatedReport("short".to_string()));
        assert_eq!(
            format!("{}", err),
            "Capture error: truncated advertising report: short"
        );
        let err2 = ScanError::Bluetooth("adapter gone".to_string());
        assert_eq!(format!("{}", err2), "Bluetooth error: adapter gone");
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("bluer").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("bluez").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("hci").unwrap(), Backend::Hci);
        assert_eq!(Backend::from_str("raw").unwrap(), Backend::Hci);
        assert!(Backend::from_str("invalid").is_err());
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }
}
