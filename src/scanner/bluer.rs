//! BlueZ D-Bus backend for advertisement capture.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    CaptureError, METER_SERVICE_DATA_ID_BYTES, RECORD_CHANNEL_BUFFER_SIZE, RecordResult,
    SERVICE_DATA_16B_AD_TYPE, ScanError,
};
use crate::advertisement::AdvertisementRecord;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, Address, Session, Uuid};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// The SwitchBot 16-bit service data identifier expanded to the 128-bit
/// form under which BlueZ keys service data entries.
const METER_SERVICE_DATA_UUID: Uuid = Uuid::from_u128(0x00000d00_0000_1000_8000_00805f9b34fb);

/// Lower 96 bits shared by every UUID derived from the Bluetooth base UUID.
const BLUETOOTH_BASE_SUFFIX: u128 = 0x0000_1000_8000_0080_5F9B_34FB;

/// Whether a UUID is an expansion of a 16/32-bit SIG-assigned identifier.
///
/// BlueZ reports such services alongside vendor ones; only full 128-bit
/// vendor UUIDs participate in device matching.
fn is_sig_base(uuid: &Uuid) -> bool {
    uuid.as_u128() & ((1u128 << 96) - 1) == BLUETOOTH_BASE_SUFFIX
}

/// Re-attach the little-endian 16-bit service identifier that BlueZ strips
/// from service data entries, restoring the on-air AD payload layout the
/// meter's 8-byte format is defined against.
fn restore_service_data_prefix(data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(METER_SERVICE_DATA_ID_BYTES.len() + data.len());
    bytes.extend_from_slice(&METER_SERVICE_DATA_ID_BYTES);
    bytes.extend_from_slice(data);
    bytes
}

/// Start capturing advertisements using the BlueZ D-Bus backend.
///
/// This function initializes the Bluetooth adapter and registers a passive
/// advertisement monitor matching on the 16-bit service data prefix.
/// Captured records are sent through the returned channel. Runs until the
/// scan window elapses, or indefinitely when no window is given.
///
/// # Arguments
/// * `window` - Optional scan window; the channel closes once it elapses.
/// * `verbose` - If true, capture errors are sent as Err values; otherwise they're silently dropped.
///
/// # Returns
/// A receiver for advertisement records (or capture errors if verbose).
pub async fn start_scan(
    window: Option<Duration>,
    verbose: bool,
) -> Result<mpsc::Receiver<RecordResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let (tx, rx) = mpsc::channel(RECORD_CHANNEL_BUFFER_SIZE);

    // Narrow monitor wakeups to advertisements carrying the meter's 16-bit
    // service data entry; exact device matching still happens downstream.
    let pattern = Pattern {
        data_type: SERVICE_DATA_16B_AD_TYPE,
        start_position: 0,
        content: METER_SERVICE_DATA_ID_BYTES.to_vec(),
    };

    let monitor_manager = adapter.monitor().await?;
    let mut monitor_handle = monitor_manager
        .register(Monitor {
            patterns: Some(vec![pattern]),
            ..Default::default()
        })
        .await?;

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep all Bluetooth state alive by moving it into this task
        let _session = session;
        let _monitor_manager = monitor_manager;

        let events = async {
            while let Some(event) = monitor_handle.next().await {
                if let MonitorEvent::DeviceFound(device_id) = event
                    && let Err(e) = process_device(&adapter, device_id.device, &tx).await
                {
                    log::debug!("dropping device event: {e}");
                    if verbose {
                        let _ = tx
                            .send(Err(CaptureError::MalformedData(e.to_string())))
                            .await;
                    }
                }
            }
        };

        match window {
            Some(limit) => {
                if tokio::time::timeout(limit, events).await.is_err() {
                    log::debug!("scan window of {limit:?} elapsed, stopping");
                }
            }
            None => events.await,
        }
    });

    Ok(rx)
}

/// Build an advertisement record from a discovered device's properties.
async fn process_device(
    adapter: &Adapter,
    address: Address,
    tx: &mpsc::Sender<RecordResult>,
) -> Result<(), ScanError> {
    let device = adapter.device(address)?;

    let mut service_uuids: Vec<String> = device
        .uuids()
        .await?
        .unwrap_or_default()
        .into_iter()
        .filter(|uuid| !is_sig_base(uuid))
        .map(|uuid| uuid.to_string())
        .collect();
    // BlueZ hands UUIDs back as an unordered set, so advertisement order
    // is lost; lexical order stands in for it. Safe because SIG-base UUIDs
    // are filtered out above and a meter advertises a single vendor UUID,
    // leaving the first entry unaffected.
    service_uuids.sort_unstable();

    let service_data = device
        .service_data()
        .await?
        .and_then(|mut entries| entries.remove(&METER_SERVICE_DATA_UUID))
        .map(|data| restore_service_data_prefix(&data));

    let rssi = device.rssi().await?.unwrap_or_default();

    let record = AdvertisementRecord {
        mac: address.into(),
        service_uuids,
        service_data,
        rssi,
    };
    let _ = tx.send(Ok(record)).await;

    Ok(())
}
