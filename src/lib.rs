//! `switchbot-listener` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The core “business logic” lives in [`crate::app`] where it can be tested
//! deterministically with injected scanner + injected output streams.

pub mod advertisement;
pub mod app;
pub mod mac_address;
pub mod meter;
pub mod output;
pub mod reading;
pub mod scanner;
pub mod throttle;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::AdvertisementRecord;
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::json::JsonFormatter;
pub use reading::{Reading, TemperatureScale};
pub use scanner::{Backend, CaptureError, RecordResult, ScanError};
pub use throttle::{Throttle, parse_duration};
