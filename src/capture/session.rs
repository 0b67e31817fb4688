//! Capture session state
//!
//! A session collects key-downs until the user stops pressing new keys for
//! the quiet interval, or until the absolute timeout. All timing is passed
//! in by the caller, which keeps the transitions deterministic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::hotkey::keys::{canonicalize, classify, KeyKind};
use crate::hotkey::{HotkeyId, KeyEvent};

/// Timing of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    /// No new key for this long ends the capture
    pub quiet_interval: Duration,
    /// Hard limit on the whole session
    pub timeout: Duration,
    /// How often the driver polls the session
    pub tick: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            quiet_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
            tick: Duration::from_millis(100),
        }
    }
}

/// How a capture session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(HotkeyId),
    Cancelled,
    /// Timeout with nothing pressed
    TimedOut,
    /// Keys were seen but none formed a usable hotkey
    Empty,
}

/// One in-progress capture
#[derive(Debug)]
pub struct CaptureSession {
    started_at: Instant,
    /// When a key not already held was last pressed
    last_new_key_at: Option<Instant>,
    /// Canonical key name -> sequence number of its latest key-down
    held: HashMap<String, u64>,
    seq: u64,
    cancel_requested: bool,
}

impl CaptureSession {
    pub fn new(now: Instant) -> Self {
        Self {
            started_at: now,
            last_new_key_at: None,
            held: HashMap::new(),
            seq: 0,
            cancel_requested: false,
        }
    }

    /// Record a key event. Releases are ignored; every key pressed during the
    /// session is part of the result.
    pub fn on_key(&mut self, event: &KeyEvent, now: Instant) {
        if !event.is_down || self.cancel_requested {
            return;
        }

        let key = canonicalize(&event.key);
        if key.is_empty() {
            return;
        }

        self.seq += 1;
        // Autorepeat refreshes recency but does not restart the quiet interval
        if self.held.insert(key.clone(), self.seq).is_none() {
            self.last_new_key_at = Some(now);
            debug!(key = %key, "capture saw key");
        }
    }

    /// Request cancellation; observed on the next poll
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
    }

    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Check whether the session has finished as of `now`
    pub fn poll(&self, now: Instant, settings: &CaptureSettings) -> Option<CaptureOutcome> {
        if self.cancel_requested {
            return Some(CaptureOutcome::Cancelled);
        }

        if let Some(last) = self.last_new_key_at {
            if now.saturating_duration_since(last) >= settings.quiet_interval {
                return Some(self.settle());
            }
        }

        if now.saturating_duration_since(self.started_at) >= settings.timeout {
            if self.held.is_empty() {
                return Some(CaptureOutcome::TimedOut);
            }
            return Some(self.settle());
        }

        None
    }

    /// Sorted modifiers plus the most recently pressed regular key
    fn settle(&self) -> CaptureOutcome {
        let mut modifiers = Vec::new();
        let mut regular: Option<(&str, u64)> = None;

        for (key, &seq) in &self.held {
            match classify(key) {
                KeyKind::Modifier(m) => modifiers.push(m),
                KeyKind::Regular => {
                    if regular.map_or(true, |(_, best)| seq > best) {
                        regular = Some((key, seq));
                    }
                }
            }
        }

        match HotkeyId::new(modifiers, regular.map(|(key, _)| key)) {
            Some(id) => CaptureOutcome::Captured(id),
            None => CaptureOutcome::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn session_with(keys: &[&str], start: Instant) -> CaptureSession {
        let mut s = CaptureSession::new(start);
        for (i, key) in keys.iter().enumerate() {
            s.on_key(&KeyEvent::down(*key), start + ms(10 * i as u64));
        }
        s
    }

    fn settle_now(s: &CaptureSession, start: Instant) -> CaptureOutcome {
        s.poll(start + ms(10_000), &CaptureSettings::default())
            .expect("session should settle")
    }

    #[test]
    fn test_ctrl_shift_a_after_quiet_interval() {
        let start = Instant::now();
        let s = session_with(&["ctrl", "shift", "a"], start);
        let settings = CaptureSettings::default();

        // Last key at +20ms; still listening at +400ms
        assert_eq!(s.poll(start + ms(400), &settings), None);
        assert_eq!(
            s.poll(start + ms(620), &settings),
            Some(CaptureOutcome::Captured("ctrl+shift+a".parse().unwrap()))
        );
    }

    #[test]
    fn test_order_independent() {
        let start = Instant::now();
        let orders: [[&str; 3]; 6] = [
            ["ctrl", "shift", "a"],
            ["ctrl", "a", "shift"],
            ["shift", "ctrl", "a"],
            ["shift", "a", "ctrl"],
            ["a", "ctrl", "shift"],
            ["a", "shift", "ctrl"],
        ];
        for order in orders {
            let s = session_with(&order, start);
            match settle_now(&s, start) {
                CaptureOutcome::Captured(id) => assert_eq!(id.to_string(), "ctrl+shift+a"),
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }

    #[test]
    fn test_modifiers_only_sorted_and_deduplicated() {
        let start = Instant::now();
        let s = session_with(&["shift", "control", "leftshift", "alt"], start);
        assert_eq!(
            settle_now(&s, start),
            CaptureOutcome::Captured("alt+ctrl+shift".parse().unwrap())
        );
    }

    #[test]
    fn test_most_recent_regular_key_wins() {
        let start = Instant::now();
        let s = session_with(&["ctrl", "a", "b"], start);
        assert_eq!(
            settle_now(&s, start),
            CaptureOutcome::Captured("ctrl+b".parse().unwrap())
        );

        // Repeating an earlier key makes it the most recent again
        let s = session_with(&["ctrl", "a", "b", "a"], start);
        assert_eq!(
            settle_now(&s, start),
            CaptureOutcome::Captured("ctrl+a".parse().unwrap())
        );
    }

    #[test]
    fn test_autorepeat_does_not_extend_quiet_interval() {
        let start = Instant::now();
        let mut s = CaptureSession::new(start);
        s.on_key(&KeyEvent::down("f9"), start);
        s.on_key(&KeyEvent::down("f9"), start + ms(300));
        s.on_key(&KeyEvent::down("f9"), start + ms(450));

        assert_eq!(
            s.poll(start + ms(500), &CaptureSettings::default()),
            Some(CaptureOutcome::Captured("f9".parse().unwrap()))
        );
    }

    #[test]
    fn test_key_up_ignored() {
        let start = Instant::now();
        let mut s = CaptureSession::new(start);
        s.on_key(&KeyEvent::up("a"), start);
        assert_eq!(s.held_count(), 0);
        assert_eq!(
            s.poll(start + ms(1000), &CaptureSettings::default()),
            None
        );
    }

    #[test]
    fn test_timeout_without_keys() {
        let start = Instant::now();
        let s = CaptureSession::new(start);
        let settings = CaptureSettings::default();
        assert_eq!(s.poll(start + ms(4900), &settings), None);
        assert_eq!(s.poll(start + ms(5000), &settings), Some(CaptureOutcome::TimedOut));
    }

    #[test]
    fn test_timeout_settles_held_keys() {
        let start = Instant::now();
        let mut s = CaptureSession::new(start);
        let settings = CaptureSettings {
            quiet_interval: ms(10_000),
            ..CaptureSettings::default()
        };
        s.on_key(&KeyEvent::down("meta"), start + ms(4000));
        assert_eq!(
            s.poll(start + ms(5000), &settings),
            Some(CaptureOutcome::Captured("meta".parse().unwrap()))
        );
    }

    #[test]
    fn test_cancel_wins() {
        let start = Instant::now();
        let mut s = session_with(&["ctrl", "a"], start);
        s.cancel();
        s.on_key(&KeyEvent::down("b"), start + ms(100));
        assert_eq!(s.held_count(), 2);
        assert_eq!(settle_now(&s, start), CaptureOutcome::Cancelled);
    }
}
