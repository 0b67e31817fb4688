//! Device toggling
//!
//! Decides which device of the configured pair to activate and drives the
//! device layer to make it the default output.

mod device;
mod engine;
mod pactl;

use serde::{Deserialize, Serialize};

pub use device::{DeviceError, DeviceId, DeviceInfo, DevicePair, SameDevice};
pub use engine::ToggleEngine;
pub use pactl::PactlBackend;

#[cfg(test)]
pub(crate) use engine::tests::FakeDevices;

/// What a hotkey does when pressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HotkeyAction {
    /// Flip between the two devices of the configured pair
    Toggle,
    /// Always switch to one device
    SwitchTo { device: DeviceId },
}

impl std::fmt::Display for HotkeyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotkeyAction::Toggle => write!(f, "toggle"),
            HotkeyAction::SwitchTo { device } => write!(f, "switch to {}", device),
        }
    }
}
