//! Tracing initialization.
//!
//! Every binary in the workspace goes through here so log formatting and
//! filtering look the same no matter which tool emitted them.

use crate::ColorWhen;
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize the global tracing subscriber.
///
/// - `RUST_LOG` wins when set; otherwise `default_filter` applies
///   (falls back to [`DEFAULT_FILTER`] when `None`).
/// - ANSI color on stderr follows `color`.
///
/// # Errors
///
/// Returns error if a global subscriber is already installed or the
/// default filter does not parse.
pub fn init_tracing(color: ColorWhen, default_filter: Option<&str>) -> Result<()> {
    // ---
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter.unwrap_or(DEFAULT_FILTER))?,
    };

    fmt()
        .with_env_filter(env_filter)
        .with_ansi(color.should_color_stderr())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}
