//! Structured logging utilities for Casket components.
//!
//! The library crates log through `tracing` directly; the macros here tag
//! application-level events with a component field for filtering.
//!
//! # Usage
//!
//! ```ignore
//! use casket_config::log_cli_info;
//!
//! log_cli_info!("stored", id = 42);
//! ```

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "CLI", $($key = $value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_cli_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "CLI", $($key = $value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_constants() {
        assert_eq!(Component::CLI, "CLI");
    }
}
