//! Matching connected VISA resources against the instruments known to the bench.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

pub use crate::instrument::visa::list_resources;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Oscilloscope,
    Generator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oscilloscope => write!(f, "oscilloscope"),
            Self::Generator => write!(f, "generator"),
        }
    }
}

/// An instrument the bench knows how to drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownDevice {
    pub name: String,
    pub kind: DeviceKind,
    /// Resource strings under which the instrument may show up.
    pub aliases: Vec<String>,
    pub channels: u8,
}

impl KnownDevice {
    pub fn matches(&self, resource: &str) -> bool {
        self.aliases.iter().any(|alias| alias == resource.trim())
    }
}

/// The Siglent oscilloscope and generator of the transducer bench.
pub fn default_known_devices() -> Vec<KnownDevice> {
    vec![
        KnownDevice {
            name: "Siglent SDS1000X-E".to_string(),
            kind: DeviceKind::Oscilloscope,
            aliases: vec!["USB0::0xF4EC::0xEE3A::SDS1MKGX802538::0::INSTR".to_string()],
            channels: 2,
        },
        KnownDevice {
            name: "Siglent SDG1000X".to_string(),
            kind: DeviceKind::Generator,
            aliases: vec!["USB0::0xF4EC::0xEE38::SDG1XDDC801175::0::INSTR".to_string()],
            channels: 2,
        },
    ]
}

/// First connected resource that is a known device of `kind`.
///
/// Resources are checked in the order they were enumerated.
pub fn find_known<'a>(
    resources: &[String],
    known: &'a [KnownDevice],
    kind: DeviceKind,
) -> Option<(&'a KnownDevice, String)> {
    for resource in resources {
        if let Some(device) = known
            .iter()
            .find(|device| device.kind == kind && device.matches(resource))
        {
            debug!(resource = %resource, device = %device.name, "Matched known {}", kind);
            return Some((device, resource.clone()));
        }
    }
    None
}

/// Enumerate the bus and pick the known device of `kind`.
pub fn auto_detect(known: &[KnownDevice], kind: DeviceKind) -> AppResult<(KnownDevice, String)> {
    let resources = list_resources()?;
    info!(count = resources.len(), "Enumerated VISA resources");
    find_known(&resources, known, kind)
        .map(|(device, resource)| (device.clone(), resource))
        .ok_or_else(|| DaqError::DeviceNotFound(kind.to_string()))
}
