//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::SwitcherEvent;
use crate::toggle::{DeviceId, DeviceInfo, DevicePair, HotkeyAction};

/// Requests from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// List output devices, queried fresh
    ListDevices,

    /// Switch to the other device of the pair
    Toggle,

    /// Switch to one device immediately
    SwitchTo { device: DeviceId },

    /// Record a hotkey. With `apply` set, bind it to that action on completion.
    StartCapture {
        #[serde(default)]
        apply: Option<HotkeyAction>,
    },

    CancelCapture,

    /// Bind the most recently captured hotkey
    ApplyCaptured { action: HotkeyAction },

    Bind { hotkey: String, action: HotkeyAction },

    Unbind { hotkey: String },

    SetDevicePair { device_a: DeviceId, device_b: DeviceId },

    /// Subscribe to event notifications
    Subscribe,
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    Devices {
        devices: Vec<DeviceInfo>,
        current: Option<DeviceId>,
    },

    /// The default output is now `device`
    Switched { device: DeviceId },

    /// Capture is listening; the result arrives as an event
    CaptureStarted,

    CaptureCancelled { was_active: bool },

    Bound {
        hotkey: String,
        action: HotkeyAction,
        /// Action the hotkey was bound to before, if any
        replaced: Option<HotkeyAction>,
    },

    Unbound { hotkey: String, was_bound: bool },

    DevicePairSet { device_pair: DevicePair },

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: SwitcherEvent },
}

/// A live hotkey binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingInfo {
    pub hotkey: String,
    pub action: HotkeyAction,
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Whether live key input is available
    pub key_listener_active: bool,

    pub capture_active: bool,

    pub last_captured: Option<String>,

    pub device_pair: Option<DevicePair>,

    pub bindings: Vec<BindingInfo>,
}
