//! Run metadata.
//!
//! A [`RunMetadata`] records what was run, on which instruments, with which parameters. It
//! is written as a JSON comment block at the top of every result file so a CSV can be
//! interpreted without the configuration that produced it.

use crate::error::{AppResult, DaqError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Experiment kind, e.g. `power_feedback`.
    pub experiment: String,
    pub description: String,
    /// Resource string or identification per instrument role.
    pub instruments: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub software_version: String,
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self {
            experiment: String::new(),
            description: String::new(),
            instruments: BTreeMap::new(),
            parameters: BTreeMap::new(),
            started_at: Utc::now(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RunMetadata {
    pub fn builder(experiment: &str) -> MetadataBuilder {
        MetadataBuilder::new().experiment(experiment)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.experiment.is_empty() {
            return Err(DaqError::Configuration(
                "Experiment name cannot be empty.".to_string(),
            ));
        }
        Ok(())
    }
}

/// When a run started and which instruments it used.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunContext {
    pub started_at: DateTime<Utc>,
    /// Resource string per instrument role.
    pub instruments: BTreeMap<String, String>,
}

impl RunContext {
    /// Stamp the start of a run on the given oscilloscope and generator.
    pub fn start(oscilloscope: &str, generator: &str) -> Self {
        let mut instruments = BTreeMap::new();
        instruments.insert("oscilloscope".to_string(), oscilloscope.to_string());
        instruments.insert("generator".to_string(), generator.to_string());
        Self {
            started_at: Utc::now(),
            instruments,
        }
    }
}

/// Builder for [`RunMetadata`].
#[derive(Default)]
pub struct MetadataBuilder {
    inner: RunMetadata,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn experiment(mut self, name: &str) -> Self {
        self.inner.experiment = name.to_string();
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.inner.description = description.to_string();
        self
    }

    pub fn instrument(mut self, role: &str, identity: &str) -> Self {
        self.inner
            .instruments
            .insert(role.to_string(), identity.to_string());
        self
    }

    /// Any serializable value; values that fail to serialize are stored as `null`.
    pub fn parameter<T: Serialize>(mut self, key: &str, value: T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.inner.parameters.insert(key.to_string(), value);
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.inner.started_at = started_at;
        self
    }

    /// Start time and instruments of `context`.
    pub fn context(self, context: &RunContext) -> Self {
        let builder = self.started_at(context.started_at);
        context
            .instruments
            .iter()
            .fold(builder, |builder, (role, resource)| builder.instrument(role, resource))
    }

    pub fn build(self) -> RunMetadata {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let metadata = RunMetadata::builder("power_feedback")
            .description("2 W setpoint")
            .instrument("oscilloscope", "SIM::SCOPE::INSTR")
            .parameter("setpoint", 2.0)
            .parameter("channels", [1, 2])
            .build();
        assert_eq!(metadata.experiment, "power_feedback");
        assert_eq!(metadata.parameters["setpoint"], serde_json::json!(2.0));
        assert_eq!(metadata.parameters["channels"], serde_json::json!([1, 2]));
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_context_fills_instruments_and_start() {
        let context = RunContext::start("SIM::SCOPE::INSTR", "SIM::GENERATOR::INSTR");
        let metadata = RunMetadata::builder("resonance_sweep")
            .context(&context)
            .build();
        assert_eq!(metadata.started_at, context.started_at);
        assert_eq!(metadata.instruments["oscilloscope"], "SIM::SCOPE::INSTR");
        assert_eq!(metadata.instruments["generator"], "SIM::GENERATOR::INSTR");
    }

    #[test]
    fn test_empty_name_invalid() {
        assert!(RunMetadata::default().validate().is_err());
    }
}
