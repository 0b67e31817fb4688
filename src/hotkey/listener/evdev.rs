//! evdev key listener
//!
//! Reads key transitions from every keyboard under `/dev/input` at the
//! kernel level, so it works the same under X11 and any Wayland compositor.

use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use evdev::{Device, InputEventKind, Key};
use tracing::{debug, error, trace, warn};

use super::ListenerError;
use crate::hotkey::{KeyDispatcher, KeyEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Find all keyboard input devices
pub(super) fn find_keyboards() -> Result<Vec<PathBuf>, ListenerError> {
    let mut keyboards = Vec::new();

    let input_dir = std::fs::read_dir("/dev/input")
        .map_err(|e| ListenerError::DeviceAccess(format!("/dev/input: {}", e)))?;

    for entry in input_dir {
        let entry = entry.map_err(|e| ListenerError::DeviceAccess(e.to_string()))?;
        let path = entry.path();

        let is_event_device = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);
        if !is_event_device {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                // Anything with letters and Enter counts as a keyboard
                let is_keyboard = device
                    .supported_keys()
                    .map(|keys| {
                        keys.contains(Key::KEY_A)
                            && keys.contains(Key::KEY_Z)
                            && keys.contains(Key::KEY_ENTER)
                    })
                    .unwrap_or(false);

                if is_keyboard {
                    debug!(?path, name = device.name().unwrap_or("unknown"), "found keyboard");
                    keyboards.push(path);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(ListenerError::DeviceAccess(path.display().to_string()));
            }
            Err(e) => {
                trace!(?path, %e, "skipping input device");
            }
        }
    }

    if keyboards.is_empty() {
        return Err(ListenerError::NoKeyboard);
    }
    Ok(keyboards)
}

/// evdev names keys `KEY_LEFTCTRL`; the normaliser takes it from `leftctrl`
fn key_name(key: Key) -> Option<String> {
    let name = format!("{:?}", key);
    let stripped = name.strip_prefix("KEY_")?;
    Some(stripped.to_lowercase())
}

/// Poll all keyboards until `running` is cleared
pub(super) fn run_event_loop(
    device_paths: Vec<PathBuf>,
    dispatcher: Arc<KeyDispatcher>,
    running: Arc<AtomicBool>,
) -> Result<(), ListenerError> {
    let mut devices: Vec<Device> = device_paths
        .iter()
        .filter_map(|path| match Device::open(path) {
            Ok(device) => {
                // Non-blocking so one idle keyboard cannot stall the others
                let fd = device.as_raw_fd();
                unsafe {
                    let flags = libc::fcntl(fd, libc::F_GETFL);
                    if flags != -1 {
                        libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
                    }
                }
                Some(device)
            }
            Err(e) => {
                warn!(?path, %e, "failed to open keyboard");
                None
            }
        })
        .collect();

    if devices.is_empty() {
        error!("no keyboard devices could be opened");
        return Err(ListenerError::NoKeyboard);
    }

    debug!(count = devices.len(), "listening on keyboards");

    while running.load(Ordering::SeqCst) {
        for device in &mut devices {
            let Ok(events) = device.fetch_events() else {
                continue;
            };
            for event in events {
                let InputEventKind::Key(key) = event.kind() else {
                    continue;
                };
                // Mouse buttons come through as BTN_* and are not hotkey material
                let Some(name) = key_name(key) else {
                    continue;
                };
                // 0 = release, 1 = press, 2 = autorepeat
                dispatcher.dispatch(KeyEvent::new(name, event.value() != 0));
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    Ok(())
}
