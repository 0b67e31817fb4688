//! Events broadcast by the daemon
//!
//! Every user-visible change (capture progress, bindings, device switches)
//! is published on a broadcast channel and pushed to subscribed IPC clients.

use serde::{Deserialize, Serialize};

use crate::toggle::{DeviceId, HotkeyAction};

/// Events emitted as the daemon changes state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwitcherEvent {
    /// A hotkey capture began listening
    CaptureStarted,

    /// A capture produced a hotkey
    CaptureCompleted { hotkey: String },

    /// A capture ended without a hotkey
    CaptureFailed {
        /// Stable error code, e.g. `capture_timed_out`
        code: String,
    },

    /// A hotkey was bound (or rebound) to an action
    HotkeyBound { hotkey: String, action: HotkeyAction },

    HotkeyUnbound { hotkey: String },

    /// The default output device was changed
    DeviceSwitched { device: DeviceId },

    /// Changing the default output device failed
    SwitchFailed { code: String, message: String },

    DevicePairChanged { device_a: DeviceId, device_b: DeviceId },
}

impl std::fmt::Display for SwitcherEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitcherEvent::CaptureStarted => write!(f, "CAPTURE_STARTED"),
            SwitcherEvent::CaptureCompleted { hotkey } => {
                write!(f, "CAPTURE_COMPLETED ({})", hotkey)
            }
            SwitcherEvent::CaptureFailed { code } => write!(f, "CAPTURE_FAILED ({})", code),
            SwitcherEvent::HotkeyBound { hotkey, action } => {
                write!(f, "HOTKEY_BOUND ({} -> {})", hotkey, action)
            }
            SwitcherEvent::HotkeyUnbound { hotkey } => write!(f, "HOTKEY_UNBOUND ({})", hotkey),
            SwitcherEvent::DeviceSwitched { device } => write!(f, "DEVICE_SWITCHED ({})", device),
            SwitcherEvent::SwitchFailed { code, .. } => write!(f, "SWITCH_FAILED ({})", code),
            SwitcherEvent::DevicePairChanged { device_a, device_b } => {
                write!(f, "DEVICE_PAIR_CHANGED ({} <-> {})", device_a, device_b)
            }
        }
    }
}
