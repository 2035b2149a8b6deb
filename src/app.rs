//! Core application runner (business logic) for `switchbot-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::meter;
use crate::output::OutputFormatter;
use crate::output::json::JsonFormatter;
use crate::reading::Reading;
use crate::scanner::{Backend, RecordResult, ScanError};
use crate::throttle::Throttle;
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Stop scanning after this long.
    /// Accepts duration with suffix: 10s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    /// Omit to scan until interrupted.
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub duration: Option<Duration>,

    /// Throttle readings per meter to at most one per interval.
    /// Accepts the same duration syntax as --duration.
    #[arg(long, value_parser = crate::throttle::parse_duration)]
    pub throttle: Option<Duration>,

    /// Verbose output, print capture errors for unparseable advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        window: Option<Duration>,
        verbose: bool,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RecordResult>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        window: Option<Duration>,
        verbose: bool,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<RecordResult>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend, window, verbose).await })
    }
}

fn write_reading(
    formatter: &dyn OutputFormatter,
    reading: &Reading,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(reading);
    writeln!(out, "{line}")
}

/// Run the core processing loop, writing formatted readings to `out` and
/// verbose errors to `err`.
///
/// Each received advertisement is checked against the meter filter; records
/// that match are decoded, optionally throttled per device, and written as
/// one line to `out`. Capture errors are written to `err` only when
/// `options.verbose` is true. The loop ends when the scan window elapses
/// (the scanner closes the channel) or the scanner shuts down.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = JsonFormatter::new();

    // Create throttle if interval is specified
    let mut throttle = options.throttle.map(Throttle::new);

    let mut records = scanner
        .start_scan(options.backend, options.duration, options.verbose)
        .await?;

    while let Some(result) = records.recv().await {
        match result {
            Ok(record) => {
                if !meter::matches(&record) {
                    continue;
                }
                // The filter guarantees 8 bytes of service data, so decode
                // cannot come back empty here.
                let Some(reading) = meter::decode(&record) else {
                    continue;
                };

                let should_emit = throttle
                    .as_mut()
                    .is_none_or(|t: &mut Throttle| t.should_emit(reading.mac));

                if should_emit {
                    write_reading(&formatter, &reading, out)?;
                }
            }
            Err(capture_err) => {
                if options.verbose {
                    writeln!(err, "{capture_err}")?;
                }
            }
        }
    }

    Ok(())
}
