//! Structured logging for techdata
//!
//! The library only emits `tracing` events; host programs install a
//! subscriber with [`init`] (or [`try_init`] when one may already exist).
//!
//! # Log Format Conventions
//!
//! - `operation`: The step being performed (e.g., "clone", "reconcile", "lookup")
//! - `status`: The result status ("success", "reused", "invalidated", "miss", "ambiguous", "error")
//! - `fingerprint`: Short digest of the effective configuration
//! - `year` / `technology` / `parameter`: Query coordinates
//!
//! # Examples
//!
//! ```rust
//! use tracing::info;
//!
//! info!(
//!     operation = "reconcile",
//!     status = "reused",
//!     fingerprint = "3f2a9c0d51e4b7a8",
//!     "outputs match the previous configuration"
//! );
//! ```

use std::{fmt as std_fmt, io};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{
    fmt::{self, format::Writer},
    prelude::*,
    EnvFilter,
};

/// Custom formatter that shows "techdata" instead of the full module path
struct TechDataFormatter {
    with_ansi: bool,
}

impl<S, N> FormatEvent<S, N> for TechDataFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std_fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{} ",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z")
        )?;

        if self.with_ansi {
            let level_style = match *meta.level() {
                tracing::Level::ERROR => "\x1b[31m",
                tracing::Level::WARN => "\x1b[33m",
                tracing::Level::INFO => "\x1b[32m",
                tracing::Level::DEBUG => "\x1b[34m",
                tracing::Level::TRACE => "\x1b[35m",
            };
            write!(writer, "{}{:5}(techdata)\x1b[0m: ", level_style, meta.level())?;
        } else {
            write!(writer, "{:5}(techdata): ", meta.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, colored
    Pretty,
    /// Same layout without colors (for CI)
    Compact,
    /// JSON lines (for log aggregation systems)
    Json,
}

impl LogFormat {
    /// Parse from environment variable (TECHDATA_LOG_FORMAT)
    pub fn from_env() -> Self {
        Self::parse(
            std::env::var("TECHDATA_LOG_FORMAT").ok().as_deref(),
            std::env::var("CI").is_ok(),
        )
    }

    fn parse(value: Option<&str>, ci: bool) -> Self {
        match value.unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            _ if ci => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "debug", "techdata=trace"), default "info"
/// - `TECHDATA_LOG_FORMAT`: Set format ("pretty", "compact", "json")
/// - `CI`: If set, defaults to compact format
///
/// # Panics
///
/// Panics if a global subscriber has already been installed; use
/// [`try_init`] in that case.
pub fn init() {
    if let Err(e) = try_init() {
        panic!("failed to install tracing subscriber: {}", e);
    }
}

/// Like [`init`], but returns an error instead of panicking when a global
/// subscriber is already set.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match LogFormat::from_env() {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(TechDataFormatter { with_ansi: true })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .event_format(TechDataFormatter { with_ansi: false })
                    .with_writer(io::stderr),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false)
                    .with_writer(io::stderr)
                    .json(),
            )
            .try_init(),
    }
}

/// Operation names for consistent logging
pub mod operations {
    pub const CLONE: &str = "clone";
    pub const PULL: &str = "pull";
    pub const RECONCILE: &str = "reconcile";
    pub const WORKFLOW: &str = "workflow";
    pub const LOAD: &str = "load";
    pub const LOOKUP: &str = "lookup";
}

/// Status values for consistent logging
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const REUSED: &str = "reused";
    pub const INVALIDATED: &str = "invalidated";
    pub const UNVERIFIED: &str = "unverified";
    pub const MISS: &str = "miss";
    pub const AMBIGUOUS: &str = "ambiguous";
    pub const ERROR: &str = "error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(Some("json"), false), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("JSON"), true), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("compact"), false), LogFormat::Compact);
        assert_eq!(LogFormat::parse(None, false), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None, true), LogFormat::Compact);
        assert_eq!(LogFormat::parse(Some("bogus"), false), LogFormat::Pretty);
    }

    #[test]
    fn test_try_init_twice_is_error() {
        // Another test may have installed a subscriber already
        let _ = try_init();
        assert!(try_init().is_err());
    }
}
