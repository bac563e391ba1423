//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that occur while talking to bench instruments.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidChannel`**: A channel index outside `1..=channels`, or a voltage/current
//!   channel pair that refers to the same input. Always detected before any bus I/O.
//! - **`Instrument`**: A communication fault reported by the instrument link. Never retried
//!   by the measurement or control code, always surfaced to the caller.
//! - **`InvalidResponse`**: The instrument answered, but the reply could not be parsed.
//! - **`MeasurementTimeout`**: The phase measurement kept returning the "invalid" marker
//!   until the retry budget ran out. Fatal to the current experiment run.
//! - **`ActuationRange`**: A requested generator amplitude is outside the safety bound. The
//!   power-feedback driver substitutes a known-safe fallback amplitude instead of failing.
//! - **`FrequencyRange`**: A requested generator frequency is not finite and positive.
//!   Checked before any bus I/O, like `ActuationRange`.
//! - **`Config`** / **`Configuration`**: Loading errors from `figment` and semantic
//!   validation errors in the loaded settings.
//! - **`Io`**, **`Csv`**, **`Serialization`**: Persistence of experiment results.
//! - **`FeatureNotEnabled`**: Functionality that was not compiled in (e.g. VISA support).
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error types with `?`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Invalid channel {channel}: {reason}")]
    InvalidChannel { channel: u8, reason: String },

    #[error("Unparseable response to '{command}': {response:?}")]
    InvalidResponse { command: String, response: String },

    #[error("Phase measurement failed after {attempts} invalid readings, verify connections")]
    MeasurementTimeout { attempts: u32 },

    #[error("Amplitude {requested} V outside the allowed range 0..={limit} V")]
    ActuationRange { requested: f64, limit: f64 },

    #[error("Frequency {requested} Hz must be finite and positive")]
    FrequencyRange { requested: f64 },

    #[error("No known {0} is connected")]
    DeviceNotFound(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    pub(crate) fn channel_out_of_range(channel: u8, channels: u8) -> Self {
        DaqError::InvalidChannel {
            channel,
            reason: format!("valid channels are 1..={}", channels),
        }
    }
}
