//! Platform key listeners
//!
//! Each listener runs on a dedicated thread, reads raw key transitions from
//! the OS and feeds them into the [`KeyDispatcher`].
//!
//! - Linux: evdev, reading `/dev/input/event*` (user must be in `input`)
//! - macOS: a listen-only CGEventTap (needs Accessibility permission)

#[cfg(target_os = "linux")]
mod evdev;
#[cfg(target_os = "macos")]
mod macos;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{error, info};

use super::facility::KeyDispatcher;

/// Errors that can occur starting a key listener
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("key listener is already running")]
    AlreadyRunning,

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    #[error("no key listener is available on this platform")]
    NotSupported,

    #[cfg(target_os = "linux")]
    #[error("cannot open input device '{0}'. Is the user in the 'input' group?")]
    DeviceAccess(String),

    #[cfg(target_os = "linux")]
    #[error("no keyboard device found in /dev/input/")]
    NoKeyboard,

    #[cfg(target_os = "macos")]
    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

/// Owns the platform listener thread
pub struct KeyListener {
    dispatcher: Arc<KeyDispatcher>,
    running: Arc<AtomicBool>,
}

impl KeyListener {
    pub fn new(dispatcher: Arc<KeyDispatcher>) -> Self {
        Self {
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the listener thread. Runs until `stop()` is called.
    pub fn start(&self) -> Result<(), ListenerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }

        let result = self.spawn_platform();
        if result.is_err() {
            self.running.store(false, Ordering::SeqCst);
        }
        result
    }

    #[cfg(target_os = "linux")]
    fn spawn_platform(&self) -> Result<(), ListenerError> {
        let devices = evdev::find_keyboards()?;
        self.spawn_thread(move |dispatcher, running| {
            evdev::run_event_loop(devices, dispatcher, running)
        })
    }

    #[cfg(target_os = "macos")]
    fn spawn_platform(&self) -> Result<(), ListenerError> {
        self.spawn_thread(macos::run_event_loop)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn spawn_platform(&self) -> Result<(), ListenerError> {
        Err(ListenerError::NotSupported)
    }

    #[cfg_attr(
        not(any(target_os = "linux", target_os = "macos")),
        allow(dead_code)
    )]
    fn spawn_thread<F>(&self, body: F) -> Result<(), ListenerError>
    where
        F: FnOnce(Arc<KeyDispatcher>, Arc<AtomicBool>) -> Result<(), ListenerError>
            + Send
            + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("key-listener".to_string())
            .spawn(move || {
                info!("key listener thread started");

                if let Err(e) = body(dispatcher, Arc::clone(&running)) {
                    error!(?e, "key listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("key listener thread stopped");
            })
            .map_err(|e| ListenerError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// Ask the listener thread to exit on its next poll
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_creation() {
        let listener = KeyListener::new(Arc::new(KeyDispatcher::new()));
        assert!(!listener.is_running());
        listener.stop();
        assert!(!listener.is_running());
    }
}
