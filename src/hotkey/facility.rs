//! Key-listening facility
//!
//! The facility is the one place raw key events enter the daemon. Capture
//! sessions install raw hooks on it; the registry installs combos on it.
//! `KeyDispatcher` is the in-process implementation fed by the platform
//! listener thread.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use super::identifier::HotkeyId;
use super::keys::{canonicalize, classify, KeyEvent, KeyKind};

/// Handler receiving every raw key event while installed
pub type KeyHandler = Arc<dyn Fn(&KeyEvent) + Send + Sync>;

/// Callback fired when a registered combination is pressed
pub type ComboCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle for a registered combination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComboId(u64);

impl fmt::Display for ComboId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "combo#{}", self.0)
    }
}

/// Errors reported by the key-listening facility
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacilityError {
    #[error("combination '{0}' is reserved by the system")]
    Rejected(HotkeyId),

    #[error("combination '{0}' is already registered")]
    Duplicate(HotkeyId),

    #[error("no registered combination {0}")]
    UnknownCombo(ComboId),
}

/// Global key-listening facility
///
/// Implementations deliver events and callbacks on their own thread, so
/// everything handed to them must be `Send + Sync`.
pub trait KeyListeningFacility: Send + Sync {
    /// Install a handler that sees every raw key event
    fn hook(&self, handler: KeyHandler);

    /// Remove every installed raw handler
    fn unhook_all(&self);

    /// Register a callback for a key combination
    fn register_combo(
        &self,
        hotkey: &HotkeyId,
        callback: ComboCallback,
    ) -> Result<ComboId, FacilityError>;

    /// Remove a previously registered combination
    fn unregister_combo(&self, id: ComboId) -> Result<(), FacilityError>;
}

/// Combinations the desktop keeps for itself
fn default_reserved() -> Vec<HotkeyId> {
    ["alt+ctrl+delete", "meta+l"]
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect()
}

struct Combo {
    hotkey: HotkeyId,
    callback: ComboCallback,
}

#[derive(Default)]
struct DispatcherState {
    hooks: Vec<KeyHandler>,
    combos: HashMap<ComboId, Combo>,
    /// Canonical names of keys currently held down
    held: HashSet<String>,
    next_id: u64,
}

/// In-process key-listening facility
///
/// Tracks held keys from the raw event stream and fires a combo when a
/// key-down makes the held set exactly match it.
pub struct KeyDispatcher {
    state: Mutex<DispatcherState>,
    reserved: Vec<HotkeyId>,
}

impl KeyDispatcher {
    pub fn new() -> Self {
        Self::with_reserved(default_reserved())
    }

    /// Create a dispatcher refusing the given combinations
    pub fn with_reserved(reserved: Vec<HotkeyId>) -> Self {
        Self {
            state: Mutex::new(DispatcherState::default()),
            reserved,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed one raw key event from a platform listener.
    ///
    /// Hooks and combo callbacks run after the internal lock is released, so
    /// they may call back into the dispatcher.
    pub fn dispatch(&self, event: KeyEvent) {
        let key = canonicalize(&event.key);
        if key.is_empty() {
            return;
        }

        let (hooks, fired) = {
            let mut state = self.lock();

            let newly_down = if event.is_down {
                state.held.insert(key.clone())
            } else {
                state.held.remove(&key);
                false
            };

            let hooks = state.hooks.clone();

            // A capture is recording; combos stay quiet
            let fired: Vec<ComboCallback> = if newly_down && hooks.is_empty() {
                let pressed = pressed_combo(&state.held, &key);
                state
                    .combos
                    .values()
                    .filter(|combo| Some(&combo.hotkey) == pressed.as_ref())
                    .map(|combo| {
                        debug!(hotkey = %combo.hotkey, "combination pressed");
                        Arc::clone(&combo.callback)
                    })
                    .collect()
            } else {
                Vec::new()
            };

            (hooks, fired)
        };

        trace!(
            key = %key,
            down = event.is_down,
            lag_us = event.timestamp.elapsed().as_micros() as u64,
            "key event"
        );

        for hook in &hooks {
            hook(&event);
        }
        for callback in fired {
            callback();
        }
    }

    /// Number of registered combinations
    #[cfg(test)]
    pub fn combo_count(&self) -> usize {
        self.lock().combos.len()
    }

    /// Number of installed raw hooks
    #[cfg(test)]
    pub fn hook_count(&self) -> usize {
        self.lock().hooks.len()
    }
}

impl Default for KeyDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// The combination formed by the held keys when `key` was just pressed.
///
/// The just-pressed key is the regular key if it is one; if it is a modifier
/// the combination only counts when no regular key is held.
fn pressed_combo(held: &HashSet<String>, key: &str) -> Option<HotkeyId> {
    let mut modifiers = Vec::new();
    let mut regulars = 0usize;
    for name in held {
        match classify(name) {
            KeyKind::Modifier(m) => modifiers.push(m),
            KeyKind::Regular => regulars += 1,
        }
    }

    match classify(key) {
        KeyKind::Regular if regulars == 1 => HotkeyId::new(modifiers, Some(key)),
        KeyKind::Modifier(_) if regulars == 0 => HotkeyId::new(modifiers, None),
        _ => None,
    }
}

impl KeyListeningFacility for KeyDispatcher {
    fn hook(&self, handler: KeyHandler) {
        self.lock().hooks.push(handler);
    }

    fn unhook_all(&self) {
        self.lock().hooks.clear();
    }

    fn register_combo(
        &self,
        hotkey: &HotkeyId,
        callback: ComboCallback,
    ) -> Result<ComboId, FacilityError> {
        if self.reserved.contains(hotkey) {
            return Err(FacilityError::Rejected(hotkey.clone()));
        }

        let mut state = self.lock();
        if state.combos.values().any(|combo| &combo.hotkey == hotkey) {
            return Err(FacilityError::Duplicate(hotkey.clone()));
        }

        state.next_id += 1;
        let id = ComboId(state.next_id);
        state.combos.insert(
            id,
            Combo {
                hotkey: hotkey.clone(),
                callback,
            },
        );
        debug!(%id, hotkey = %hotkey, "combination registered");
        Ok(id)
    }

    fn unregister_combo(&self, id: ComboId) -> Result<(), FacilityError> {
        match self.lock().combos.remove(&id) {
            Some(combo) => {
                debug!(%id, hotkey = %combo.hotkey, "combination unregistered");
                Ok(())
            }
            None => Err(FacilityError::UnknownCombo(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, ComboCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let cb: ComboCallback = Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, cb)
    }

    fn press(d: &KeyDispatcher, keys: &[&str]) {
        for key in keys {
            d.dispatch(KeyEvent::down(*key));
        }
        for key in keys.iter().rev() {
            d.dispatch(KeyEvent::up(*key));
        }
    }

    #[test]
    fn test_combo_fires_on_exact_match() {
        let d = KeyDispatcher::new();
        let (count, cb) = counter();
        d.register_combo(&"ctrl+shift+a".parse().unwrap(), cb).unwrap();

        press(&d, &["leftctrl", "leftshift", "a"]);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Missing modifier and extra modifier do not match
        press(&d, &["ctrl", "a"]);
        press(&d, &["ctrl", "shift", "alt", "a"]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_modifier_only_combo() {
        let d = KeyDispatcher::new();
        let (count, cb) = counter();
        d.register_combo(&"alt+ctrl".parse().unwrap(), cb).unwrap();

        press(&d, &["alt", "ctrl"]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_key_repeat_does_not_refire() {
        let d = KeyDispatcher::new();
        let (count, cb) = counter();
        d.register_combo(&"f9".parse().unwrap(), cb).unwrap();

        d.dispatch(KeyEvent::down("f9"));
        d.dispatch(KeyEvent::down("f9"));
        d.dispatch(KeyEvent::up("f9"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_and_reserved_rejected() {
        let d = KeyDispatcher::new();
        let (_, cb) = counter();
        let id: HotkeyId = "ctrl+f1".parse().unwrap();
        d.register_combo(&id, cb.clone()).unwrap();
        assert_eq!(
            d.register_combo(&id, cb.clone()),
            Err(FacilityError::Duplicate(id.clone()))
        );

        let reserved: HotkeyId = "ctrl+alt+delete".parse().unwrap();
        assert_eq!(
            d.register_combo(&reserved, cb),
            Err(FacilityError::Rejected(reserved.clone()))
        );
    }

    #[test]
    fn test_unregister() {
        let d = KeyDispatcher::new();
        let (count, cb) = counter();
        let combo = d.register_combo(&"ctrl+m".parse().unwrap(), cb).unwrap();
        d.unregister_combo(combo).unwrap();
        assert_eq!(d.combo_count(), 0);
        assert_eq!(
            d.unregister_combo(combo),
            Err(FacilityError::UnknownCombo(combo))
        );

        press(&d, &["ctrl", "m"]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_hooks_see_events_and_suppress_combos() {
        let d = KeyDispatcher::new();
        let (count, cb) = counter();
        d.register_combo(&"ctrl+m".parse().unwrap(), cb).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        d.hook(Arc::new(move |event: &KeyEvent| {
            sink.lock().unwrap().push((event.key.clone(), event.is_down));
        }));

        press(&d, &["ctrl", "m"]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(seen.lock().unwrap().len(), 4);

        d.unhook_all();
        assert_eq!(d.hook_count(), 0);
        press(&d, &["ctrl", "m"]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
