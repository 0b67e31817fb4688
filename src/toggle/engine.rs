//! Toggle decision and device switching
//!
//! The engine keeps no notion of the current device. Every decision
//! re-queries the directory, so a failed switch or a change made outside
//! the daemon cannot desynchronise later toggles.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::device::{
    ActivationError, DeviceActivator, DeviceDirectory, DeviceError, DeviceId, DeviceInfo,
    DevicePair,
};

/// Pick the device to activate next.
///
/// A is the way back from anything that is not A: B, an unknown device,
/// or no answer from the directory.
pub fn decide_target(pair: &DevicePair, current: Option<&DeviceId>) -> DeviceId {
    match current {
        Some(current) if current == pair.device_a() => pair.device_b().clone(),
        _ => pair.device_a().clone(),
    }
}

pub struct ToggleEngine {
    directory: Arc<dyn DeviceDirectory>,
    activator: Arc<dyn DeviceActivator>,
}

impl ToggleEngine {
    pub fn new(directory: Arc<dyn DeviceDirectory>, activator: Arc<dyn DeviceActivator>) -> Self {
        Self {
            directory,
            activator,
        }
    }

    /// Make `target` the default output. Succeeds if it already is.
    pub fn switch(&self, target: &DeviceId) -> Result<(), DeviceError> {
        match self.activator.set_default(target) {
            Ok(()) => {
                info!(device = %target, "default output switched");
                Ok(())
            }
            Err(ActivationError::AlreadyDefault) => {
                debug!(device = %target, "device already default");
                Ok(())
            }
            Err(ActivationError::NotFound(message)) => {
                warn!(device = %target, %message, "device not found");
                Err(DeviceError::DeviceNotFound(target.clone()))
            }
            Err(ActivationError::Failed(message)) => {
                warn!(device = %target, %message, "device activation failed");
                Err(DeviceError::ActivationFailed {
                    device: target.clone(),
                    message,
                })
            }
        }
    }

    /// Switch to whichever device of the pair is not active now
    pub fn toggle(&self, pair: &DevicePair) -> Result<DeviceId, DeviceError> {
        let current = match self.directory.current_default() {
            Ok(current) => Some(current),
            Err(e) => {
                warn!(%e, "could not read current device, falling back to first of pair");
                None
            }
        };

        let target = decide_target(pair, current.as_ref());
        debug!(current = ?current, target = %target, "toggle decided");
        self.switch(&target)?;
        Ok(target)
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        self.directory.list_output_devices()
    }

    pub fn current(&self) -> Result<DeviceId, DeviceError> {
        self.directory.current_default()
    }
}
