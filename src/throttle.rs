//! Per-device rate limiting for emitted readings.
//!
//! Meters re-advertise every few seconds while their data changes slowly;
//! throttling caps output to at most one reading per device per interval.

use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits the rate of emitted readings per device.
///
/// Each device is tracked independently; the first reading for a device is
/// always allowed, and a suppressed reading does not reset the timer.
#[derive(Debug)]
pub struct Throttle {
    /// Minimum time between emitted readings for each device
    interval: Duration,
    /// Last emit time per MAC address
    last_seen: HashMap<MacAddress, Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_seen: HashMap::new(),
        }
    }

    /// Check whether a reading from `mac` should be emitted now.
    ///
    /// Returns `true` if the interval has passed since the last emitted
    /// reading for this device (or this is its first). On `true` the
    /// device's timer is reset.
    pub fn should_emit(&mut self, mac: MacAddress) -> bool {
        let now = Instant::now();

        match self.last_seen.get(&mac) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_seen.insert(mac, now);
                true
            }
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports `ms`, `s`, `m` and `h` suffixes; a bare number is seconds.
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    }

    if let Some(num) = src.strip_suffix('h') {
        let hours: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid hours: {}", num))?;
        return Ok(Duration::from_secs(hours * 3600));
    }

    if let Some(num) = src.strip_suffix('m') {
        let minutes: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid minutes: {}", num))?;
        return Ok(Duration::from_secs(minutes * 60));
    }

    if let Some(num) = src.strip_suffix('s') {
        let secs: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid seconds: {}", num))?;
        return Ok(Duration::from_secs(secs));
    }

    // No suffix, treat as seconds
    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC_A: MacAddress = MacAddress([0xC9, 0x4A, 0x00, 0xDD, 0xEE, 0x01]);
    const MAC_B: MacAddress = MacAddress([0xC9, 0x4A, 0x00, 0xDD, 0xEE, 0x02]);

    #[test]
    fn test_first_event_allowed() {
        let mut throttle = Throttle::new(Duration::from_secs(1));
        assert!(throttle.should_emit(MAC_A));
    }

    #[test]
    fn test_immediate_second_event_blocked() {
        let mut throttle = Throttle::new(Duration::from_secs(1));
        assert!(throttle.should_emit(MAC_A));
        assert!(!throttle.should_emit(MAC_A));
    }

    #[test]
    fn test_devices_tracked_independently() {
        let mut throttle = Throttle::new(Duration::from_secs(1));
        assert!(throttle.should_emit(MAC_A));
        assert!(throttle.should_emit(MAC_B));
        assert!(!throttle.should_emit(MAC_A));
        assert!(!throttle.should_emit(MAC_B));
    }

    #[test]
    fn test_zero_interval_never_blocks() {
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.should_emit(MAC_A));
        assert!(throttle.should_emit(MAC_A));
    }

    #[test]
    fn test_allowed_again_after_interval() {
        let mut throttle = Throttle::new(Duration::from_millis(10));
        assert!(throttle.should_emit(MAC_A));
        assert!(!throttle.should_emit(MAC_A));

        std::thread::sleep(Duration::from_millis(15));
        assert!(throttle.should_emit(MAC_A));
    }

    #[test]
    fn test_blocked_event_does_not_reset_timer() {
        let mut throttle = Throttle::new(Duration::from_millis(30));

        assert!(throttle.should_emit(MAC_A)); // t=0, timer starts

        std::thread::sleep(Duration::from_millis(10));
        assert!(!throttle.should_emit(MAC_A)); // blocked, timer untouched

        std::thread::sleep(Duration::from_millis(25));
        // past the 30ms interval measured from t=0
        assert!(throttle.should_emit(MAC_A));
    }

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_bare_number_is_seconds() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_whitespace() {
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3 s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
    }
}
