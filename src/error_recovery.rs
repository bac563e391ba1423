//! Bounded retry for flaky instrument readings.
//
// Some oscilloscope firmwares answer a phase query with a placeholder instead of a number
// while the trigger has not settled. The measurement code debounces that with a bounded
// retry so the control loop never hangs on a disconnected probe.

use crate::error::DaqError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Defines a policy for retrying an invalid reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The maximum number of invalid readings tolerated before giving up.
    pub max_attempts: u32,
    /// The delay between retry attempts.
    #[serde(with = "millis")]
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_delay,
        }
    }
}

/// Counts consecutive invalid readings against a [`RetryPolicy`].
///
/// A budget of `n` tolerates `n - 1` invalid readings: the `n`-th one fails with
/// [`DaqError::MeasurementTimeout`]. A valid reading resets the count.
#[derive(Clone, Debug)]
pub struct RetryBudget {
    policy: RetryPolicy,
    consecutive_invalid: u32,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_invalid: 0,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn consecutive_invalid(&self) -> u32 {
        self.consecutive_invalid
    }

    /// Records an invalid reading. Sleeps the backoff delay and returns `Ok` while the budget
    /// allows another attempt.
    pub fn record_invalid(&mut self) -> Result<(), DaqError> {
        self.consecutive_invalid += 1;
        if self.consecutive_invalid >= self.policy.max_attempts {
            let attempts = self.consecutive_invalid;
            self.consecutive_invalid = 0;
            return Err(DaqError::MeasurementTimeout { attempts });
        }
        if !self.policy.backoff_delay.is_zero() {
            std::thread::sleep(self.policy.backoff_delay);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.consecutive_invalid = 0;
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
