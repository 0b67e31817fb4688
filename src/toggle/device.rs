//! Device identities and the device layer contracts
//!
//! The daemon never interprets device identifiers; they are opaque tokens
//! handed out by the device directory.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque audio output device identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An output device as listed by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub display_name: String,
}

/// Both devices of a pair are the same
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device pair needs two different devices, got '{0}' twice")]
pub struct SameDevice(pub DeviceId);

/// The two devices a toggle alternates between
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDevicePair")]
pub struct DevicePair {
    device_a: DeviceId,
    device_b: DeviceId,
}

#[derive(Deserialize)]
struct RawDevicePair {
    device_a: DeviceId,
    device_b: DeviceId,
}

impl TryFrom<RawDevicePair> for DevicePair {
    type Error = SameDevice;

    fn try_from(raw: RawDevicePair) -> Result<Self, Self::Error> {
        Self::new(raw.device_a, raw.device_b)
    }
}

impl DevicePair {
    pub fn new(device_a: DeviceId, device_b: DeviceId) -> Result<Self, SameDevice> {
        if device_a == device_b {
            return Err(SameDevice(device_a));
        }
        Ok(Self { device_a, device_b })
    }

    pub fn device_a(&self) -> &DeviceId {
        &self.device_a
    }

    pub fn device_b(&self) -> &DeviceId {
        &self.device_b
    }
}

/// Errors from the device layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("audio device not found: '{0}'")]
    DeviceNotFound(DeviceId),

    #[error("failed to activate '{device}': {message}")]
    ActivationFailed { device: DeviceId, message: String },

    #[error("failed to query audio devices: {0}")]
    QueryFailed(String),
}

/// Raw result of asking the OS to change the default device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActivationError {
    /// The device already is the default; callers treat this as success
    #[error("device is already the default")]
    AlreadyDefault,

    #[error("no such device: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// Lists output devices and reports the current default
pub trait DeviceDirectory: Send + Sync {
    fn list_output_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// The default output device right now. Never cached by callers.
    fn current_default(&self) -> Result<DeviceId, DeviceError>;
}

/// Changes the default output device. May block on the OS.
pub trait DeviceActivator: Send + Sync {
    fn set_default(&self, device: &DeviceId) -> Result<(), ActivationError>;
}
