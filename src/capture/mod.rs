//! Hotkey capture
//!
//! Turns a live stream of key events into one canonical hotkey. Only one
//! capture may run at a time. A session moves through:
//! - Idle: no capture running
//! - Listening: raw hook installed, collecting key-downs
//! - Settled / Cancelled / TimedOut: result handed to the caller, back to Idle

mod session;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::hotkey::{HotkeyId, KeyEvent, KeyListeningFacility};

use session::{CaptureOutcome, CaptureSession};
pub use session::CaptureSettings;

/// Errors ending a capture without a hotkey
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("a hotkey capture is already in progress")]
    AlreadyInProgress,

    #[error("hotkey capture was cancelled")]
    Cancelled,

    #[error("no key was pressed before the capture timed out")]
    TimedOut,

    #[error("captured keys did not form a hotkey")]
    Empty,
}

type SessionSlot = Arc<Mutex<Option<CaptureSession>>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<CaptureSession>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Session clock; follows tokio's clock so paused-time tests are exact
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Process-wide hotkey capture service
pub struct HotkeyCapture {
    facility: Arc<dyn KeyListeningFacility>,
    settings: CaptureSettings,
    session: SessionSlot,
}

impl HotkeyCapture {
    pub fn new(facility: Arc<dyn KeyListeningFacility>, settings: CaptureSettings) -> Self {
        Self {
            facility,
            settings,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin listening. Fails fast if a capture is already running.
    pub fn start(&self) -> Result<PendingCapture, CaptureError> {
        {
            let mut slot = lock(&self.session);
            if slot.is_some() {
                return Err(CaptureError::AlreadyInProgress);
            }
            *slot = Some(CaptureSession::new(now()));
        }

        let session = Arc::clone(&self.session);
        self.facility.hook(Arc::new(move |event: &KeyEvent| {
            if let Some(active) = lock(&session).as_mut() {
                active.on_key(event, now());
            }
        }));

        info!(
            quiet_ms = self.settings.quiet_interval.as_millis() as u64,
            timeout_ms = self.settings.timeout.as_millis() as u64,
            "hotkey capture started"
        );

        Ok(PendingCapture {
            facility: Arc::clone(&self.facility),
            session: Arc::clone(&self.session),
            settings: self.settings,
            finished: false,
        })
    }

    /// Cancel the running capture. Returns false when none is running.
    pub fn cancel(&self) -> bool {
        match lock(&self.session).as_mut() {
            Some(active) => {
                active.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.session).is_some()
    }
}

/// A running capture. Dropping it abandons the capture and returns the
/// service to Idle.
pub struct PendingCapture {
    facility: Arc<dyn KeyListeningFacility>,
    session: SessionSlot,
    settings: CaptureSettings,
    finished: bool,
}

impl PendingCapture {
    /// Poll the session on every tick until it settles
    pub async fn wait(mut self) -> Result<HotkeyId, CaptureError> {
        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            ticker.tick().await;

            let polled = match lock(&self.session).as_ref() {
                Some(active) => active.poll(now(), &self.settings),
                None => Some(CaptureOutcome::Cancelled),
            };
            if let Some(outcome) = polled {
                break outcome;
            }
        };

        self.finish();

        match outcome {
            CaptureOutcome::Captured(hotkey) => {
                info!(hotkey = %hotkey, "hotkey captured");
                Ok(hotkey)
            }
            CaptureOutcome::Cancelled => {
                info!("hotkey capture cancelled");
                Err(CaptureError::Cancelled)
            }
            CaptureOutcome::TimedOut => {
                info!("hotkey capture timed out");
                Err(CaptureError::TimedOut)
            }
            CaptureOutcome::Empty => Err(CaptureError::Empty),
        }
    }

    /// Remove the raw hook, then return to Idle. Runs once.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.facility.unhook_all();
        if lock(&self.session).take().is_some() {
            debug!("capture session closed");
        }
    }
}

impl Drop for PendingCapture {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::KeyDispatcher;
    use std::time::Duration;

    fn capture() -> (Arc<KeyDispatcher>, HotkeyCapture) {
        let dispatcher = Arc::new(KeyDispatcher::new());
        let capture = HotkeyCapture::new(dispatcher.clone(), CaptureSettings::default());
        (dispatcher, capture)
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_to_ctrl_shift_a() {
        let (d, capture) = capture();
        let pending = capture.start().unwrap();
        let started = tokio::time::Instant::now();

        d.dispatch(KeyEvent::down("Control"));
        d.dispatch(KeyEvent::down("shift"));
        tokio::time::advance(Duration::from_millis(50)).await;
        d.dispatch(KeyEvent::down("a"));

        let hotkey = pending.wait().await.unwrap();
        assert_eq!(hotkey.to_string(), "ctrl+shift+a");

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550));
        assert!(elapsed <= Duration::from_millis(700));

        assert!(!capture.is_active());
        assert_eq!(d.hook_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_keys() {
        let (d, capture) = capture();
        let started = tokio::time::Instant::now();

        let pending = capture.start().unwrap();
        assert_eq!(pending.wait().await, Err(CaptureError::TimedOut));
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(!capture.is_active());
        assert_eq!(d.hook_count(), 0);
        assert_eq!(d.combo_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_fails_fast() {
        let (_, capture) = capture();
        let _pending = capture.start().unwrap();
        assert!(matches!(capture.start(), Err(CaptureError::AlreadyInProgress)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (d, capture) = capture();
        let pending = capture.start().unwrap();
        d.dispatch(KeyEvent::down("ctrl"));
        assert!(capture.cancel());

        assert_eq!(pending.wait().await, Err(CaptureError::Cancelled));
        assert!(!capture.cancel());
        assert!(!capture.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_returns_to_idle() {
        let (d, capture) = capture();
        let pending = capture.start().unwrap();
        assert_eq!(d.hook_count(), 1);
        drop(pending);

        assert!(!capture.is_active());
        assert_eq!(d.hook_count(), 0);
        assert!(capture.start().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_does_not_fire_bound_combo() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let (d, capture) = capture();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        d.register_combo(
            &"ctrl+m".parse().unwrap(),
            Arc::new(move || flag.store(true, Ordering::SeqCst)),
        )
        .unwrap();

        let pending = capture.start().unwrap();
        d.dispatch(KeyEvent::down("ctrl"));
        d.dispatch(KeyEvent::down("m"));
        assert_eq!(pending.wait().await.unwrap().to_string(), "ctrl+m");
        assert!(!fired.load(Ordering::SeqCst));
    }
}
