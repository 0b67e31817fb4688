//! Key name normalisation
//!
//! Platform listeners report keys under their own names (`KEY_LEFTCTRL`,
//! `left windows`, `Control`). Everything past the listener works on one
//! lowercase canonical token per physical key, and on the fixed modifier set.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The fixed set of modifier keys.
///
/// Variant order is alphabetical so that sorting modifiers yields the same
/// order as sorting their canonical tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    Alt,
    Ctrl,
    /// Windows / Command / Super
    Meta,
    Shift,
}

impl Modifier {
    /// Canonical token for this modifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Modifier::Alt => "alt",
            Modifier::Ctrl => "ctrl",
            Modifier::Meta => "meta",
            Modifier::Shift => "shift",
        }
    }

    /// Look up a modifier by its canonical token
    pub fn from_canonical(name: &str) -> Option<Self> {
        match name {
            "alt" => Some(Modifier::Alt),
            "ctrl" => Some(Modifier::Ctrl),
            "meta" => Some(Modifier::Meta),
            "shift" => Some(Modifier::Shift),
            _ => None,
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a key is one of the modifiers or an ordinary key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Modifier(Modifier),
    Regular,
}

/// Map a raw key name onto its canonical token.
///
/// Lowercases and folds left/right variants and platform aliases together.
/// Names without an alias come back lowercased and otherwise unchanged.
pub fn canonicalize(name: &str) -> String {
    let lowered = name.trim().to_lowercase();

    // A bare space or plus would collide with separators, give them names
    if lowered.is_empty() && !name.is_empty() {
        return "space".to_string();
    }

    let canonical = match lowered.as_str() {
        "ctrl" | "control" | "lctrl" | "rctrl" | "leftctrl" | "rightctrl" | "left ctrl"
        | "right ctrl" | "ctrl_l" | "ctrl_r" | "control_l" | "control_r" | "lcontrol"
        | "rcontrol" => "ctrl",

        "shift" | "lshift" | "rshift" | "leftshift" | "rightshift" | "left shift"
        | "right shift" | "shift_l" | "shift_r" => "shift",

        "alt" | "option" | "opt" | "lalt" | "ralt" | "leftalt" | "rightalt" | "left alt"
        | "right alt" | "alt gr" | "altgr" | "alt_l" | "alt_r" | "left option"
        | "right option" => "alt",

        "meta" | "windows" | "win" | "super" | "cmd" | "command" | "lmeta" | "rmeta"
        | "leftmeta" | "rightmeta" | "left windows" | "right windows" | "lwin" | "rwin"
        | "super_l" | "super_r" | "meta_l" | "meta_r" | "left cmd" | "right cmd"
        | "left command" | "right command" => "meta",

        "return" => "enter",
        "esc" => "escape",
        "del" => "delete",
        "ins" => "insert",
        "spacebar" => "space",
        "+" => "plus",
        "pgup" | "page up" => "pageup",
        "pgdn" | "page down" => "pagedown",
        "caps lock" => "capslock",
        "grave" | "backtick" | "`" => "grave",
        _ => return lowered,
    };

    canonical.to_string()
}

/// Classify a key name as modifier or regular key
pub fn classify(name: &str) -> KeyKind {
    match Modifier::from_canonical(&canonicalize(name)) {
        Some(modifier) => KeyKind::Modifier(modifier),
        None => KeyKind::Regular,
    }
}

/// A single raw key transition reported by a key listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key name as reported; normalised by consumers
    pub key: String,
    pub is_down: bool,
    pub timestamp: Instant,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>, is_down: bool) -> Self {
        Self {
            key: key.into(),
            is_down,
            timestamp: Instant::now(),
        }
    }

    #[cfg(test)]
    pub fn down(key: impl Into<String>) -> Self {
        Self::new(key, true)
    }

    #[cfg(test)]
    pub fn up(key: impl Into<String>) -> Self {
        Self::new(key, false)
    }
}
