use crate::advertisement::AdvertisementRecord;
use crate::mac_address::MacAddress;
use crate::meter::METER_SERVICE_UUID;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xC9, 0x4A, 0x00, 0xDD, 0xEE, 0x01]);

/// Build an advertisement shaped like a SwitchBot Meter broadcast with the
/// given 8-byte service data.
///
/// Tests can override individual fields to produce non-matching variants.
pub fn meter_advertisement(service_data: [u8; 8]) -> AdvertisementRecord {
    AdvertisementRecord {
        mac: TEST_MAC,
        service_uuids: vec![METER_SERVICE_UUID.to_string()],
        service_data: Some(service_data.to_vec()),
        rssi: -67,
    }
}
