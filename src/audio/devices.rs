//! Audio device enumeration

use super::backend::AudioBackend;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Input device (microphone, line in)
    Capture,

    /// Output device (speakers, headphones)
    Playback,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Capture => write!(f, "capture"),
            DeviceKind::Playback => write!(f, "playback"),
        }
    }
}

/// Audio device information
///
/// `(kind, index)` identifies the device only until the next enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Display name
    pub name: String,

    /// Position in the enumeration this device came from
    pub index: usize,

    /// Whether the backend reports this as the default for its kind
    pub is_default: bool,

    /// Device direction
    pub kind: DeviceKind,
}

/// Snapshot of the devices a backend offers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCatalog {
    pub capture: Vec<Device>,
    pub playback: Vec<Device>,
}

impl DeviceCatalog {
    /// List available devices.
    ///
    /// A kind the backend cannot enumerate comes back empty instead of failing.
    pub fn enumerate(backend: &dyn AudioBackend) -> Self {
        Self {
            capture: list_kind(backend, DeviceKind::Capture),
            playback: list_kind(backend, DeviceKind::Playback),
        }
    }

    pub fn devices(&self, kind: DeviceKind) -> &[Device] {
        match kind {
            DeviceKind::Capture => &self.capture,
            DeviceKind::Playback => &self.playback,
        }
    }

    /// The flagged default device, if the backend reported one.
    /// Index 0 is never assumed.
    pub fn default_device(&self, kind: DeviceKind) -> Option<&Device> {
        self.devices(kind).iter().find(|d| d.is_default)
    }

    /// Whether `device` still refers to the same entry in this snapshot
    pub fn contains(&self, device: &Device) -> bool {
        self.devices(device.kind)
            .get(device.index)
            .map(|d| d.name == device.name)
            .unwrap_or(false)
    }
}

fn list_kind(backend: &dyn AudioBackend, kind: DeviceKind) -> Vec<Device> {
    let infos = match backend.devices(kind) {
        Ok(infos) => infos,
        Err(e) => {
            log::warn!("Failed to enumerate {} devices: {}", kind, e);
            return Vec::new();
        }
    };

    // At most one default per kind, even if the backend flags several
    let mut default_seen = false;
    infos
        .into_iter()
        .enumerate()
        .map(|(index, info)| {
            let is_default = info.is_default && !default_seen;
            default_seen |= is_default;
            Device {
                name: info.name,
                index,
                is_default,
                kind,
            }
        })
        .collect()
}
