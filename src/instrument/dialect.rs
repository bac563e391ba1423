//! Oscilloscope command dialects.
//!
//! The dialect is chosen once, from the `*IDN?` reply, when the oscilloscope is connected
//! and then held for the whole session. Only the commands needed for power measurement are
//! covered.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Keysight reports an unavailable measurement as this overflow value.
const KEYSIGHT_OVERFLOW: f64 = 9.9e37;
/// Siglent answers a measurement that has not settled with this placeholder.
const SIGLENT_PLACEHOLDER: &str = "****";

/// Outcome of a phase query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseReading {
    Valid(f64),
    /// The instrument returned its "no value" marker.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeDialect {
    /// `MEASURE:<ITEM>? CHAN<n>` style SCPI, plain numeric replies.
    Keysight,
    /// `C<n>:PARAMETER_VALUE? <ITEM>` style, replies echo the header and carry units.
    Siglent,
}

impl ScopeDialect {
    /// Pick the dialect from an identification string.
    pub fn from_identity(idn: &str) -> Option<Self> {
        let idn = idn.to_ascii_lowercase();
        if idn.contains("siglent") {
            Some(Self::Siglent)
        } else if idn.contains("keysight") || idn.contains("agilent") {
            Some(Self::Keysight)
        } else {
            None
        }
    }

    pub fn rms_query(self, channel: u8) -> String {
        match self {
            Self::Keysight => format!("MEASURE:VRMS? CHAN{}", channel),
            Self::Siglent => format!(":C{}:PARAMETER_VALUE? RMS", channel),
        }
    }

    pub fn vpp_query(self, channel: u8) -> String {
        match self {
            Self::Keysight => format!("MEASURE:VPP? CHAN{}", channel),
            Self::Siglent => format!(":C{}:PARAMETER_VALUE? PKPK", channel),
        }
    }

    pub fn frequency_query(self, channel: u8) -> String {
        match self {
            Self::Keysight => format!("MEASURE:FREQUENCY? CHAN{}", channel),
            Self::Siglent => format!(":C{}:PARAMETER_VALUE? FREQ", channel),
        }
    }

    pub fn phase_query(self, channel_a: u8, channel_b: u8) -> String {
        match self {
            Self::Keysight => format!("MEASURE:PHASE? CHAN{},CHAN{}", channel_a, channel_b),
            Self::Siglent => format!("C{}-C{}:MEAD? PHA", channel_a, channel_b),
        }
    }

    /// Parse a scalar measurement reply. Placeholder and overflow values are errors.
    pub fn parse_value(self, command: &str, response: &str) -> AppResult<f64> {
        match self.parse_reading(command, response)? {
            PhaseReading::Valid(value) => Ok(value),
            PhaseReading::Invalid => Err(invalid_response(command, response)),
        }
    }

    /// Parse a phase reply, mapping the dialect's "no value" marker to
    /// [`PhaseReading::Invalid`].
    pub fn parse_phase(self, command: &str, response: &str) -> AppResult<PhaseReading> {
        self.parse_reading(command, response)
    }

    fn parse_reading(self, command: &str, response: &str) -> AppResult<PhaseReading> {
        let field = match self {
            Self::Keysight => response.trim(),
            // "C1-C2:MEAD PHA,-12.50degree" / "C1:PAVA RMS,1.23E+00V"
            Self::Siglent => {
                let (_, value) = response
                    .rsplit_once(',')
                    .ok_or_else(|| invalid_response(command, response))?;
                strip_units(value)
            }
        };

        if field == SIGLENT_PLACEHOLDER {
            return Ok(PhaseReading::Invalid);
        }
        let value: f64 = field
            .parse()
            .map_err(|_| invalid_response(command, response))?;
        // `f64::from_str` accepts "NaN" and "inf"; neither is a reading.
        if !value.is_finite() || value.abs() >= KEYSIGHT_OVERFLOW {
            return Ok(PhaseReading::Invalid);
        }
        Ok(PhaseReading::Valid(value))
    }
}

impl fmt::Display for ScopeDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keysight => write!(f, "Keysight"),
            Self::Siglent => write!(f, "Siglent"),
        }
    }
}

fn strip_units(value: &str) -> &str {
    value
        .trim_matches(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .trim_end_matches(|c: char| c.is_ascii_alphabetic())
        .trim_end()
}

fn invalid_response(command: &str, response: &str) -> DaqError {
    DaqError::InvalidResponse {
        command: command.to_string(),
        response: response.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_from_identity() {
        assert_eq!(
            ScopeDialect::from_identity("Siglent Technologies,SDS1104X-E,SDS1MKGX802538,8.2"),
            Some(ScopeDialect::Siglent)
        );
        assert_eq!(
            ScopeDialect::from_identity("KEYSIGHT TECHNOLOGIES,DSOX1204G,CN1234,2.1"),
            Some(ScopeDialect::Keysight)
        );
        assert_eq!(ScopeDialect::from_identity("Rigol,DS1054Z,1,1"), None);
    }

    #[test]
    fn commands_per_dialect() {
        assert_eq!(ScopeDialect::Keysight.rms_query(2), "MEASURE:VRMS? CHAN2");
        assert_eq!(ScopeDialect::Siglent.rms_query(2), ":C2:PARAMETER_VALUE? RMS");
        assert_eq!(
            ScopeDialect::Keysight.phase_query(1, 2),
            "MEASURE:PHASE? CHAN1,CHAN2"
        );
        assert_eq!(ScopeDialect::Siglent.phase_query(1, 2), "C1-C2:MEAD? PHA");
    }

    #[test]
    fn keysight_values() {
        let d = ScopeDialect::Keysight;
        assert_eq!(d.parse_value("q", "1.25E+00\n").unwrap(), 1.25);
        assert_eq!(d.parse_phase("q", "-12.5").unwrap(), PhaseReading::Valid(-12.5));
        assert_eq!(d.parse_phase("q", "9.9E+37").unwrap(), PhaseReading::Invalid);
        assert!(matches!(
            d.parse_value("q", "9.9E+37"),
            Err(DaqError::InvalidResponse { .. })
        ));
        assert!(d.parse_value("q", "garbage").is_err());
    }

    #[test]
    fn non_finite_replies_are_not_readings() {
        let d = ScopeDialect::Keysight;
        for reply in ["NaN", "nan", "inf", "-infinity"] {
            assert!(matches!(
                d.parse_value("MEASURE:VRMS? CHAN1", reply),
                Err(DaqError::InvalidResponse { .. })
            ));
            assert_eq!(d.parse_phase("q", reply).unwrap(), PhaseReading::Invalid);
        }
        // Unit stripping leaves nothing of a Siglent "NaN".
        assert!(ScopeDialect::Siglent.parse_phase("q", "C1-C2:MEAD PHA,NaN").is_err());
    }

    #[test]
    fn siglent_values() {
        let d = ScopeDialect::Siglent;
        assert_eq!(d.parse_value("q", "C1:PAVA RMS,1.23E+00V\n").unwrap(), 1.23);
        assert_eq!(d.parse_value("q", "C1:PAVA FREQ,3.80E+04Hz").unwrap(), 38000.0);
        assert_eq!(
            d.parse_phase("q", "C1-C2:MEAD PHA,-12.50degree").unwrap(),
            PhaseReading::Valid(-12.5)
        );
        assert_eq!(
            d.parse_phase("q", "C1-C2:MEAD PHA,****").unwrap(),
            PhaseReading::Invalid
        );
        assert!(d.parse_value("q", "no separator").is_err());
    }
}
