//! Raw BLE advertisement records as delivered by the scan backends.

use crate::mac_address::MacAddress;

/// One observed BLE advertisement, before any device filtering.
///
/// Backends produce a fresh record per observation and never mutate it
/// afterwards. The same device re-advertising during a scan window yields
/// multiple records; deduplication (if any) happens downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementRecord {
    /// MAC address of the advertising device
    pub mac: MacAddress,
    /// Advertised 128-bit service UUID strings, in advertisement order
    /// (may be empty when the device advertises none)
    pub service_uuids: Vec<String>,
    /// Raw bytes of the 16-bit service data entry, if one was advertised.
    /// Opaque to everything except the payload decoder.
    pub service_data: Option<Vec<u8>>,
    /// Signal strength at observation time
    pub rssi: i16,
}
