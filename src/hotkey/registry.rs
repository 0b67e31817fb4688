//! Hotkey registry
//!
//! Owns the mapping from hotkey to bound action and keeps it in step with
//! the combos installed on the key-listening facility. At most one binding
//! exists per hotkey; binding an already-bound hotkey replaces it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::facility::{ComboCallback, ComboId, FacilityError, KeyListeningFacility};
use super::identifier::HotkeyId;

/// Receives the action of a binding whose hotkey was pressed.
///
/// Runs on the facility's thread and must return quickly.
pub type ActionSink<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Errors from binding hotkeys
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid hotkey '{hotkey}': {reason}")]
    InvalidIdentifier { hotkey: String, reason: String },

    #[error("invalid action for hotkey '{hotkey}': {reason}")]
    InvalidAction { hotkey: String, reason: String },

    #[error("failed to register hotkey '{hotkey}': {source}")]
    RegistrationFailed {
        hotkey: HotkeyId,
        #[source]
        source: FacilityError,
    },
}

/// Result of a successful bind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome<A> {
    /// The hotkey was not bound before
    Installed,
    /// An existing binding was replaced
    Replaced { previous: A },
}

/// A persisted binding that could not be restored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildFailure {
    pub hotkey: String,
    pub error: RegistryError,
}

/// Summary of restoring persisted bindings at startup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RebuildReport {
    pub bound: Vec<HotkeyId>,
    pub failed: Vec<RebuildFailure>,
}

/// Parse hotkey text, reporting failures as a registry error
pub fn parse_identifier(hotkey: &str) -> Result<HotkeyId, RegistryError> {
    hotkey.parse().map_err(|e: super::IdentifierError| RegistryError::InvalidIdentifier {
        hotkey: hotkey.to_string(),
        reason: e.to_string(),
    })
}

struct Binding<A> {
    action: A,
    combo: ComboId,
}

/// Registry of live hotkey bindings
pub struct HotkeyRegistry<A> {
    facility: Arc<dyn KeyListeningFacility>,
    sink: ActionSink<A>,
    bindings: Mutex<HashMap<HotkeyId, Binding<A>>>,
}

impl<A> HotkeyRegistry<A>
where
    A: Clone + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(facility: Arc<dyn KeyListeningFacility>, sink: ActionSink<A>) -> Self {
        Self {
            facility,
            sink,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HotkeyId, Binding<A>>> {
        self.bindings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn callback_for(&self, action: A) -> ComboCallback {
        let sink = Arc::clone(&self.sink);
        Arc::new(move || sink(&action))
    }

    /// Bind a hotkey to an action, replacing any existing binding.
    ///
    /// The old combo is removed from the facility before the new one is
    /// installed. If installing fails the previous binding is restored, so the
    /// map and the facility never disagree.
    pub fn bind(&self, hotkey: &HotkeyId, action: A) -> Result<BindOutcome<A>, RegistryError> {
        let mut bindings = self.lock();

        let previous = match bindings.remove(hotkey) {
            Some(old) => match self.facility.unregister_combo(old.combo) {
                Ok(()) | Err(FacilityError::UnknownCombo(_)) => Some(old),
                Err(source) => {
                    bindings.insert(hotkey.clone(), old);
                    return Err(RegistryError::RegistrationFailed {
                        hotkey: hotkey.clone(),
                        source,
                    });
                }
            },
            None => None,
        };

        match self
            .facility
            .register_combo(hotkey, self.callback_for(action.clone()))
        {
            Ok(combo) => {
                bindings.insert(hotkey.clone(), Binding { action: action.clone(), combo });
                match previous {
                    Some(old) => {
                        info!(hotkey = %hotkey, previous = ?old.action, ?action, "hotkey rebound");
                        Ok(BindOutcome::Replaced { previous: old.action })
                    }
                    None => {
                        info!(hotkey = %hotkey, ?action, "hotkey bound");
                        Ok(BindOutcome::Installed)
                    }
                }
            }
            Err(source) => {
                warn!(hotkey = %hotkey, %source, "hotkey registration failed");
                if let Some(old) = previous {
                    match self
                        .facility
                        .register_combo(hotkey, self.callback_for(old.action.clone()))
                    {
                        Ok(combo) => {
                            debug!(hotkey = %hotkey, "previous binding restored");
                            bindings.insert(hotkey.clone(), Binding { action: old.action, combo });
                        }
                        Err(e) => {
                            warn!(hotkey = %hotkey, %e, "previous binding could not be restored");
                        }
                    }
                }
                Err(RegistryError::RegistrationFailed {
                    hotkey: hotkey.clone(),
                    source,
                })
            }
        }
    }

    /// Remove a binding. Returns false when the hotkey was not bound.
    pub fn unbind(&self, hotkey: &HotkeyId) -> bool {
        let Some(old) = self.lock().remove(hotkey) else {
            return false;
        };

        if let Err(e) = self.facility.unregister_combo(old.combo) {
            warn!(hotkey = %hotkey, %e, "facility did not hold the combination");
        }
        info!(hotkey = %hotkey, action = ?old.action, "hotkey unbound");
        true
    }

    /// Restore persisted bindings, continuing past individual failures.
    ///
    /// Each action arrives still decoded or not; an undecodable action fails
    /// only its own binding.
    pub fn rebuild_from<I, E>(&self, persisted: I) -> RebuildReport
    where
        I: IntoIterator<Item = (String, Result<A, E>)>,
        E: fmt::Display,
    {
        let mut report = RebuildReport::default();

        for (hotkey, action) in persisted {
            let bound = action
                .map_err(|e| RegistryError::InvalidAction {
                    hotkey: hotkey.clone(),
                    reason: e.to_string(),
                })
                .and_then(|action| {
                    let id = parse_identifier(&hotkey)?;
                    self.bind(&id, action)?;
                    Ok(id)
                });

            match bound {
                Ok(id) => report.bound.push(id),
                Err(error) => {
                    warn!(%hotkey, %error, "skipping persisted hotkey");
                    report.failed.push(RebuildFailure { hotkey, error });
                }
            }
        }

        info!(
            bound = report.bound.len(),
            failed = report.failed.len(),
            "persisted hotkeys restored"
        );
        report
    }

    /// Action bound to a hotkey, if any
    #[cfg(test)]
    fn action_for(&self, hotkey: &HotkeyId) -> Option<A> {
        self.lock().get(hotkey).map(|b| b.action.clone())
    }

    /// Snapshot of all bindings, ordered by hotkey
    pub fn bindings(&self) -> Vec<(HotkeyId, A)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, b)| (id.clone(), b.action.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Remove every binding from the facility
    pub fn clear(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (hotkey, binding) in drained {
            if let Err(e) = self.facility.unregister_combo(binding.combo) {
                warn!(hotkey = %hotkey, %e, "failed to unregister hotkey");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::facility::KeyHandler;
    use crate::hotkey::{KeyDispatcher, KeyEvent};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Dispatcher wrapper whose registrations can be made to fail on command
    struct FlakyFacility {
        inner: Arc<KeyDispatcher>,
        combos: Mutex<HashMap<ComboId, HotkeyId>>,
        fail_next_register: AtomicUsize,
        fail_unregister: AtomicBool,
    }

    impl FlakyFacility {
        fn new(inner: Arc<KeyDispatcher>) -> Self {
            Self {
                inner,
                combos: Mutex::new(HashMap::new()),
                fail_next_register: AtomicUsize::new(0),
                fail_unregister: AtomicBool::new(false),
            }
        }
    }

    impl KeyListeningFacility for FlakyFacility {
        fn hook(&self, handler: KeyHandler) {
            self.inner.hook(handler);
        }

        fn unhook_all(&self) {
            self.inner.unhook_all();
        }

        fn register_combo(
            &self,
            hotkey: &HotkeyId,
            callback: ComboCallback,
        ) -> Result<ComboId, FacilityError> {
            let failing = self
                .fail_next_register
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(FacilityError::Rejected(hotkey.clone()));
            }
            let combo = self.inner.register_combo(hotkey, callback)?;
            self.combos.lock().unwrap().insert(combo, hotkey.clone());
            Ok(combo)
        }

        fn unregister_combo(&self, id: ComboId) -> Result<(), FacilityError> {
            if self.fail_unregister.load(Ordering::SeqCst) {
                let hotkey = self.combos.lock().unwrap().get(&id).cloned();
                return Err(match hotkey {
                    Some(hotkey) => FacilityError::Rejected(hotkey),
                    None => FacilityError::UnknownCombo(id),
                });
            }
            self.combos.lock().unwrap().remove(&id);
            self.inner.unregister_combo(id)
        }
    }

    fn flaky_registry() -> (
        Arc<KeyDispatcher>,
        Arc<FlakyFacility>,
        HotkeyRegistry<&'static str>,
        Fired,
    ) {
        let dispatcher = Arc::new(KeyDispatcher::new());
        let flaky = Arc::new(FlakyFacility::new(Arc::clone(&dispatcher)));
        let fired: Fired = Arc::new(Mutex::new(Vec::new()));
        let sink_fired = Arc::clone(&fired);
        let sink: ActionSink<&'static str> = Arc::new(move |action: &&'static str| {
            sink_fired.lock().unwrap().push(*action);
        });
        let facility: Arc<dyn KeyListeningFacility> = flaky.clone();
        (dispatcher, flaky, HotkeyRegistry::new(facility, sink), fired)
    }

    type Fired = Arc<Mutex<Vec<&'static str>>>;

    fn registry() -> (Arc<KeyDispatcher>, HotkeyRegistry<&'static str>, Fired) {
        let dispatcher = Arc::new(KeyDispatcher::new());
        let fired: Fired = Arc::new(Mutex::new(Vec::new()));
        let sink_fired = Arc::clone(&fired);
        let sink: ActionSink<&'static str> = Arc::new(move |action: &&'static str| {
            sink_fired.lock().unwrap().push(*action);
        });
        let facility: Arc<dyn KeyListeningFacility> = dispatcher.clone();
        (dispatcher, HotkeyRegistry::new(facility, sink), fired)
    }

    fn press(d: &KeyDispatcher, keys: &[&str]) {
        for key in keys {
            d.dispatch(KeyEvent::down(*key));
        }
        for key in keys.iter().rev() {
            d.dispatch(KeyEvent::up(*key));
        }
    }

    fn id(s: &str) -> HotkeyId {
        s.parse().unwrap()
    }

    #[test]
    fn test_bind_and_fire() {
        let (d, reg, fired) = registry();
        assert_eq!(reg.bind(&id("ctrl+f9"), "toggle"), Ok(BindOutcome::Installed));

        press(&d, &["ctrl", "f9"]);
        assert_eq!(*fired.lock().unwrap(), vec!["toggle"]);
    }

    #[test]
    fn test_rebind_replaces_without_double_firing() {
        let (d, reg, fired) = registry();
        reg.bind(&id("ctrl+f9"), "first").unwrap();
        assert_eq!(
            reg.bind(&id("ctrl+f9"), "second"),
            Ok(BindOutcome::Replaced { previous: "first" })
        );

        assert_eq!(d.combo_count(), 1);
        assert_eq!(reg.bindings().len(), 1);

        press(&d, &["ctrl", "f9"]);
        assert_eq!(*fired.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_parse_identifier_invalid() {
        assert!(matches!(
            parse_identifier(""),
            Err(RegistryError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            parse_identifier("ctrl+a+b"),
            Err(RegistryError::InvalidIdentifier { .. })
        ));
        assert_eq!(parse_identifier("Shift+F2"), Ok(id("shift+f2")));
    }

    #[test]
    fn test_rejected_registration_leaves_no_entry() {
        let (d, reg, _) = registry();
        let err = reg.bind(&id("meta+l"), "lock").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RegistrationFailed {
                source: FacilityError::Rejected(_),
                ..
            }
        ));
        assert!(reg.action_for(&id("meta+l")).is_none());
        assert_eq!(d.combo_count(), 0);
    }

    #[test]
    fn test_unbind() {
        let (d, reg, fired) = registry();
        reg.bind(&id("alt+m"), "mute").unwrap();
        assert!(reg.unbind(&id("alt+m")));
        assert!(!reg.unbind(&id("alt+m")));
        assert_eq!(d.combo_count(), 0);

        press(&d, &["alt", "m"]);
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_rebuild_continues_past_failures() {
        let (d, reg, _) = registry();
        let report = reg.rebuild_from(vec![
            ("ctrl+shift+a".to_string(), Ok("toggle")),
            ("ctrl++".to_string(), Ok("broken")),
            ("ctrl+f10".to_string(), Err("missing field `device`")),
            ("ctrl+f11".to_string(), Ok("mute")),
        ]);

        assert_eq!(report.bound, vec![id("ctrl+shift+a"), id("ctrl+f11")]);
        assert_eq!(report.failed.len(), 2);
        assert_eq!(report.failed[0].hotkey, "ctrl++");
        assert!(matches!(
            report.failed[1].error,
            RegistryError::InvalidAction { .. }
        ));
        assert_eq!(d.combo_count(), 2);
    }

    #[test]
    fn test_failed_rebind_restores_previous() {
        let (d, flaky, reg, fired) = flaky_registry();
        reg.bind(&id("ctrl+f9"), "first").unwrap();

        flaky.fail_next_register.store(1, Ordering::SeqCst);
        let err = reg.bind(&id("ctrl+f9"), "second").unwrap_err();
        assert!(matches!(err, RegistryError::RegistrationFailed { .. }));

        assert_eq!(reg.action_for(&id("ctrl+f9")), Some("first"));
        assert_eq!(d.combo_count(), 1);
        press(&d, &["ctrl", "f9"]);
        assert_eq!(*fired.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_failed_restore_drops_binding() {
        let (d, flaky, reg, fired) = flaky_registry();
        reg.bind(&id("ctrl+f9"), "first").unwrap();

        flaky.fail_next_register.store(2, Ordering::SeqCst);
        assert!(reg.bind(&id("ctrl+f9"), "second").is_err());

        assert_eq!(reg.action_for(&id("ctrl+f9")), None);
        assert_eq!(d.combo_count(), 0);
        press(&d, &["ctrl", "f9"]);
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_failed_unregister_keeps_old_binding() {
        let (d, flaky, reg, fired) = flaky_registry();
        reg.bind(&id("alt+m"), "first").unwrap();

        flaky.fail_unregister.store(true, Ordering::SeqCst);
        let err = reg.bind(&id("alt+m"), "second").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RegistrationFailed {
                source: FacilityError::Rejected(_),
                ..
            }
        ));

        assert_eq!(reg.action_for(&id("alt+m")), Some("first"));
        assert_eq!(d.combo_count(), 1);
        press(&d, &["alt", "m"]);
        assert_eq!(*fired.lock().unwrap(), vec!["first"]);

        // Once the facility recovers the rebind goes through
        flaky.fail_unregister.store(false, Ordering::SeqCst);
        assert_eq!(
            reg.bind(&id("alt+m"), "second"),
            Ok(BindOutcome::Replaced { previous: "first" })
        );
        assert_eq!(d.combo_count(), 1);
    }

    #[test]
    fn test_clear() {
        let (d, reg, _) = registry();
        reg.bind(&id("f1"), "a").unwrap();
        reg.bind(&id("f2"), "b").unwrap();
        reg.clear();
        assert!(reg.bindings().is_empty());
        assert_eq!(d.combo_count(), 0);
    }
}
