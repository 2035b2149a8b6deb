//! Raw HCI socket backend for advertisement capture.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{
    CaptureError, METER_SERVICE_DATA_ID, RECORD_CHANNEL_BUFFER_SIZE, RecordResult,
    SERVICE_DATA_16B_AD_TYPE, ScanError,
};
use crate::advertisement::AdvertisementRecord;
use crate::mac_address::MacAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

// AD structure types carried in advertising data
const AD_TYPE_INCOMPLETE_128B_SERVICES: u8 = 0x06;
const AD_TYPE_COMPLETE_128B_SERVICES: u8 = 0x07;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
#[repr(C, packed)]
struct LeSetScanParametersCmd {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

/// LE Set Scan Enable command
#[repr(C, packed)]
struct LeSetScanEnableCmd {
    enable: u8,
    filter_dup: u8,
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(0x01); // HCI command packet type
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // Create a raw Bluetooth HCI socket using libc directly
    // since nix doesn't support BTPROTO_HCI
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Enable or disable LE scanning
fn le_scan_enable(fd: &OwnedFd, enable: u8) -> Result<(), ScanError> {
    let cmd = LeSetScanEnableCmd {
        enable,
        filter_dup: 0x00, // Don't filter duplicates
    };

    let cmd_bytes = unsafe {
        std::slice::from_raw_parts(
            &cmd as *const LeSetScanEnableCmd as *const u8,
            mem::size_of::<LeSetScanEnableCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, cmd_bytes);
    send_hci_command(fd, &packet)
}

/// Configure LE scanning parameters and start scanning
fn configure_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    // Set scan parameters: passive scan, 10ms interval, 10ms window
    let params = LeSetScanParametersCmd {
        scan_type: LE_SCAN_PASSIVE,
        interval: 0x0010, // 10ms in 0.625ms units
        window: 0x0010,   // 10ms in 0.625ms units
        own_address_type: LE_PUBLIC_ADDRESS,
        filter_policy: FILTER_POLICY_ACCEPT_ALL,
    };

    let params_bytes = unsafe {
        std::slice::from_raw_parts(
            &params as *const LeSetScanParametersCmd as *const u8,
            mem::size_of::<LeSetScanParametersCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, params_bytes);
    send_hci_command(fd, &packet)?;

    le_scan_enable(fd, 0x01)
}

/// Render a little-endian 16-byte UUID as its canonical lowercase string.
fn format_uuid_128(le: &[u8]) -> String {
    debug_assert_eq!(le.len(), 16);
    let mut be = [0u8; 16];
    be.copy_from_slice(le);
    be.reverse();
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        be[0],
        be[1],
        be[2],
        be[3],
        be[4],
        be[5],
        be[6],
        be[7],
        be[8],
        be[9],
        be[10],
        be[11],
        be[12],
        be[13],
        be[14],
        be[15]
    )
}

/// Parse an LE advertising report into an advertisement record.
///
/// Extracts the device address, the advertised 128-bit service UUIDs (in
/// advertisement order), the 16-bit service data entry matching the meter's
/// service identifier, and the trailing RSSI byte. Reports too short to
/// carry these fields yield a capture error in verbose mode and are dropped
/// otherwise.
fn parse_advertising_report(packet: &[u8], verbose: bool) -> Option<RecordResult> {
    let truncated = |what: &str| {
        if verbose {
            Some(Err(CaptureError::TruncatedReport(what.to_string())))
        } else {
            None
        }
    };

    // Minimum size for an advertising report
    if packet.len() < 12 {
        return truncated("packet shorter than report header");
    }

    // Skip HCI header (1 byte packet type + 1 byte event code + 1 byte param len + 1 byte subevent)
    let report = &packet[4..];

    // Number of reports; we process the first one per packet
    let num_reports = report[0] as usize;
    if num_reports == 0 {
        return None;
    }

    // Skip: num_reports(1) + event_type(1) + addr_type(1)
    if report.len() < 10 {
        return truncated("report shorter than its address fields");
    }

    // Extract address (6 bytes, in reverse order)
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    addr.reverse(); // HCI uses little-endian address

    let data_len = report[9] as usize;
    // Advertising data plus the trailing RSSI byte must fit
    if report.len() < 10 + data_len + 1 {
        return truncated("report shorter than its declared data length");
    }

    let ad_data = &report[10..10 + data_len];
    let rssi = i16::from(report[10 + data_len] as i8);

    let mut service_uuids = Vec::new();
    let mut service_data = None;

    // Walk AD structures: [len][type][payload; len-1]
    let mut offset = 0;
    while offset + 2 <= ad_data.len() {
        let len = ad_data[offset] as usize;
        if len == 0 || offset + 1 + len > ad_data.len() {
            break;
        }

        let ad_type = ad_data[offset + 1];
        let payload = &ad_data[offset + 2..offset + 1 + len];

        match ad_type {
            AD_TYPE_INCOMPLETE_128B_SERVICES | AD_TYPE_COMPLETE_128B_SERVICES => {
                for chunk in payload.chunks_exact(16) {
                    service_uuids.push(format_uuid_128(chunk));
                }
            }
            t if t == SERVICE_DATA_16B_AD_TYPE && payload.len() >= 2 => {
                // Payload starts with the 16-bit service identifier
                // (little-endian). The record keeps the whole AD payload,
                // identifier included: the meter's 8-byte layout counts
                // those two bytes.
                let id = u16::from_le_bytes([payload[0], payload[1]]);
                if id == METER_SERVICE_DATA_ID {
                    service_data = Some(payload.to_vec());
                }
            }
            _ => {}
        }

        offset += 1 + len;
    }

    Some(Ok(AdvertisementRecord {
        mac: MacAddress(addr),
        service_uuids,
        service_data,
        rssi,
    }))
}

/// Read HCI events from the socket and forward parsed advertisement records.
async fn read_events(async_fd: &AsyncFd<OwnedFd>, tx: &mpsc::Sender<RecordResult>, verbose: bool) {
    let mut buf = [0u8; 258]; // Max HCI event size

    loop {
        // Wait for the socket to be readable
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(_) => break,
        };

        // Drain all available packets before waiting again
        loop {
            let n = match guard.try_io(|inner| {
                let ret = unsafe {
                    libc::read(
                        inner.as_raw_fd(),
                        buf.as_mut_ptr() as *mut c_void,
                        buf.len(),
                    )
                };
                if ret < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(ret as usize)
                }
            }) {
                Ok(Ok(n)) if n > 0 => n,
                Ok(Ok(_)) => break,  // EOF or empty read
                Ok(Err(_)) => break, // Read error
                Err(_) => break,     // WouldBlock - no more data
            };

            // Only LE advertising reports are interesting
            if n >= 4
                && buf[0] == HCI_EVENT_PKT
                && buf[1] == EVT_LE_META_EVENT
                && buf[3] == EVT_LE_ADVERTISING_REPORT
                && let Some(result) = parse_advertising_report(&buf[..n], verbose)
            {
                let _ = tx.send(result).await;
            }
        }
    }
}

/// Start capturing advertisements using raw HCI sockets.
///
/// This function opens a raw HCI socket, configures LE scanning, and
/// forwards every observed advertising report as an advertisement record.
/// Scanning stops when the window elapses; without a window it runs until
/// interrupted.
///
/// # Arguments
/// * `window` - Optional scan window; the channel closes once it elapses.
/// * `verbose` - If true, capture errors are sent as Err values; otherwise they're silently dropped.
///
/// # Returns
/// A receiver for advertisement records (or capture errors if verbose).
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(
    window: Option<Duration>,
    verbose: bool,
) -> Result<mpsc::Receiver<RecordResult>, ScanError> {
    // Open and configure HCI socket for receiving events
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, 0)?; // Bind to hci0 to receive advertising events
    set_hci_filter(&fd)?;

    // We need a separate socket for sending commands (bound to specific device)
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, 0)?; // Bind to hci0
    configure_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel(RECORD_CHANNEL_BUFFER_SIZE);

    // Wrap in AsyncFd for async I/O
    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    // Spawn a task to read and process HCI events
    tokio::spawn(async move {
        match window {
            Some(limit) => {
                if tokio::time::timeout(limit, read_events(&async_fd, &tx, verbose))
                    .await
                    .is_err()
                {
                    log::debug!("scan window of {limit:?} elapsed, stopping");
                }
            }
            None => read_events(&async_fd, &tx, verbose).await,
        }

        // Tell the controller to stop before dropping the sockets
        if let Err(e) = le_scan_enable(&cmd_fd, 0x00) {
            log::warn!("failed to disable LE scan: {e}");
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter;

    /// LE bytes of the SwitchBot service UUID cba20d00-224d-11e6-9fb8-0002a5d5c51b
    const METER_UUID_LE: [u8; 16] = [
        0x1B, 0xC5, 0xD5, 0xA5, 0x02, 0x00, 0xB8, 0x9F, 0xE6, 0x11, 0x4D, 0x22, 0x00, 0x0D, 0xA2,
        0xCB,
    ];

    /// Build a full HCI advertising-report packet for one device.
    ///
    /// The service data entry carries the on-air layout: 2-byte identifier
    /// followed by the meter's 6 data bytes.
    fn meter_report(meter_data: &[u8; 6], rssi: i8) -> Vec<u8> {
        let mut ad_data = Vec::new();
        // Complete 128-bit service UUID list
        ad_data.push(17);
        ad_data.push(AD_TYPE_COMPLETE_128B_SERVICES);
        ad_data.extend_from_slice(&METER_UUID_LE);
        // 16-bit service data entry
        ad_data.push((3 + meter_data.len()) as u8);
        ad_data.push(SERVICE_DATA_16B_AD_TYPE);
        ad_data.extend_from_slice(&METER_SERVICE_DATA_ID.to_le_bytes());
        ad_data.extend_from_slice(meter_data);

        let mut packet = vec![
            HCI_EVENT_PKT,
            EVT_LE_META_EVENT,
            (ad_data.len() + 12) as u8, // param length
            EVT_LE_ADVERTISING_REPORT,
            0x01, // one report
            0x00, // ADV_IND
            0x00, // public address
            // C9:4A:00:DD:EE:01 in HCI little-endian order
            0x01,
            0xEE,
            0xDD,
            0x00,
            0x4A,
            0xC9,
        ];
        packet.push(ad_data.len() as u8);
        packet.extend_from_slice(&ad_data);
        packet.push(rssi as u8);
        packet
    }

    #[test]
    fn test_hci_filter_setup() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);

        // HCI_EVENT_PKT (0x04) sets bit 4 in type_mask
        assert_eq!(filter.type_mask, 1 << HCI_EVENT_PKT);
        // EVT_LE_META_EVENT (0x3E = 62) sets bit 30 in event_mask[1]
        assert_eq!(filter.event_mask[1], 1 << (EVT_LE_META_EVENT % 32));
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);

        assert_eq!(packet[0], 0x01); // Command packet type
        assert_eq!(packet.len(), 6); // Header + 2 params
    }

    #[test]
    fn test_format_uuid_128() {
        assert_eq!(
            format_uuid_128(&METER_UUID_LE),
            "cba20d00-224d-11e6-9fb8-0002a5d5c51b"
        );
    }

    #[test]
    fn test_parse_meter_advertising_report() {
        let data = [0x54, 0x00, 0x32, 0x05, 0x96, 0x25];
        let packet = meter_report(&data, -67);

        let record = parse_advertising_report(&packet, false).unwrap().unwrap();
        assert_eq!(record.mac, MacAddress([0xC9, 0x4A, 0x00, 0xDD, 0xEE, 0x01]));
        assert_eq!(
            record.service_uuids,
            vec!["cba20d00-224d-11e6-9fb8-0002a5d5c51b".to_string()]
        );
        // The identifier bytes stay in the payload; the 8-byte layout
        // counts them, with the model byte landing at index 2
        assert_eq!(
            record.service_data.as_deref(),
            Some(&[0x00, 0x0D, 0x54, 0x00, 0x32, 0x05, 0x96, 0x25][..])
        );
        assert_eq!(record.rssi, -67);

        // A parsed meter report must pass the device filter as-is
        assert!(meter::matches(&record));

        let reading = meter::decode(&record).unwrap();
        assert_eq!(reading.temperature, 22.5);
        assert_eq!(reading.humidity, 37);
        assert_eq!(reading.battery, 50);
    }

    #[test]
    fn test_parse_report_without_meter_service_data() {
        // Same shape but a foreign 16-bit service identifier
        let data = [0x54, 0x00, 0x32, 0x05, 0x96, 0x25];
        let mut packet = meter_report(&data, -40);
        // Rewrite the service data identifier bytes in place
        let id_offset = packet.len() - data.len() - 2 - 1;
        packet[id_offset] = 0x3D;
        packet[id_offset + 1] = 0xFD;

        let record = parse_advertising_report(&packet, false).unwrap().unwrap();
        assert_eq!(record.service_data, None);
        assert!(!meter::matches(&record));
    }

    #[test]
    fn test_parse_truncated_report() {
        let packet = [HCI_EVENT_PKT, EVT_LE_META_EVENT, 0x02, EVT_LE_ADVERTISING_REPORT, 0x01];

        // Silently dropped unless verbose
        assert_eq!(parse_advertising_report(&packet, false), None);
        assert!(matches!(
            parse_advertising_report(&packet, true),
            Some(Err(CaptureError::TruncatedReport(_)))
        ));
    }

    #[test]
    fn test_parse_empty_report_count() {
        let mut packet = vec![0u8; 12];
        packet[0] = HCI_EVENT_PKT;
        packet[1] = EVT_LE_META_EVENT;
        packet[3] = EVT_LE_ADVERTISING_REPORT;
        // num_reports = 0 is dropped even in verbose mode
        assert_eq!(parse_advertising_report(&packet, true), None);
    }
}
