//! Tracing subscriber setup for the binary.

use crate::error::{AppResult, DaqError};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` when set, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> AppResult<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| {
            DaqError::Configuration(format!("Invalid log filter '{}': {}", default_level, e))
        })
}

/// Install the global fmt subscriber.
pub fn init(default_level: &str) -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level)?)
        .with_target(false)
        .try_init()
        .map_err(|e| {
            DaqError::Configuration(format!("Failed to install tracing subscriber: {}", e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_from_level() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(env_filter("debug").unwrap().to_string(), "debug");
        }
    }
}
