//! macOS key listener using CGEventTap
//!
//! Monitors KeyDown, KeyUp and FlagsChanged system-wide. Runs its own
//! CFRunLoop on the listener thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventType, EventField,
};
use tracing::{debug, error, info, warn};

use super::ListenerError;
use crate::hotkey::{KeyDispatcher, KeyEvent};

/// Which modifier keys the last FlagsChanged event reported as held
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ModifierFlags {
    control: bool,
    option: bool,
    command: bool,
    shift: bool,
}

impl ModifierFlags {
    fn from_flags(flags: CGEventFlags) -> Self {
        Self {
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
        }
    }

    /// Modifier transitions between two flag snapshots
    fn changes(&self, next: &Self) -> Vec<(&'static str, bool)> {
        [
            ("ctrl", self.control, next.control),
            ("alt", self.option, next.option),
            ("meta", self.command, next.command),
            ("shift", self.shift, next.shift),
        ]
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(name, _, after)| (name, after))
        .collect()
    }
}

enum RawEvent {
    Key { keycode: i64, is_down: bool },
    Flags(CGEventFlags),
}

/// Virtual key code to key name, using the same names as evdev
fn keycode_name(keycode: i64) -> String {
    let name = match keycode {
        0x00 => "a",
        0x01 => "s",
        0x02 => "d",
        0x03 => "f",
        0x04 => "h",
        0x05 => "g",
        0x06 => "z",
        0x07 => "x",
        0x08 => "c",
        0x09 => "v",
        0x0B => "b",
        0x0C => "q",
        0x0D => "w",
        0x0E => "e",
        0x0F => "r",
        0x10 => "y",
        0x11 => "t",
        0x12 => "1",
        0x13 => "2",
        0x14 => "3",
        0x15 => "4",
        0x16 => "6",
        0x17 => "5",
        0x18 => "equal",
        0x19 => "9",
        0x1A => "7",
        0x1B => "minus",
        0x1C => "8",
        0x1D => "0",
        0x1E => "rightbrace",
        0x1F => "o",
        0x20 => "u",
        0x21 => "leftbrace",
        0x22 => "i",
        0x23 => "p",
        0x24 => "enter",
        0x25 => "l",
        0x26 => "j",
        0x27 => "apostrophe",
        0x28 => "k",
        0x29 => "semicolon",
        0x2A => "backslash",
        0x2B => "comma",
        0x2C => "slash",
        0x2D => "n",
        0x2E => "m",
        0x2F => "dot",
        0x30 => "tab",
        0x31 => "space",
        0x32 => "grave",
        0x33 => "backspace",
        0x35 => "escape",
        0x60 => "f5",
        0x61 => "f6",
        0x62 => "f7",
        0x63 => "f3",
        0x64 => "f8",
        0x65 => "f9",
        0x67 => "f11",
        0x69 => "f13",
        0x6B => "f14",
        0x6D => "f10",
        0x6F => "f12",
        0x71 => "f15",
        0x72 => "insert",
        0x73 => "home",
        0x74 => "pageup",
        0x75 => "delete",
        0x76 => "f4",
        0x77 => "end",
        0x78 => "f2",
        0x79 => "pagedown",
        0x7A => "f1",
        0x7B => "left",
        0x7C => "right",
        0x7D => "down",
        0x7E => "up",
        other => return format!("keycode{}", other),
    };
    name.to_string()
}

/// Run the CFRunLoop with the event tap until `running` is cleared
pub(super) fn run_event_loop(
    dispatcher: Arc<KeyDispatcher>,
    running: Arc<AtomicBool>,
) -> Result<(), ListenerError> {
    let mut last_flags = ModifierFlags::default();

    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<RawEvent>();

    // Tap callback must be fast and non-blocking
    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        match event_type {
            CGEventType::KeyDown | CGEventType::KeyUp => {
                let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
                let is_down = matches!(event_type, CGEventType::KeyDown);
                let _ = callback_tx.send(RawEvent::Key { keycode, is_down });
            }
            CGEventType::FlagsChanged => {
                let _ = callback_tx.send(RawEvent::Flags(event.get_flags()));
            }
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled, will re-enable");
            }
            _ => {}
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    )
    .map_err(|_| {
        error!("failed to create event tap - is Accessibility permission granted?");
        ListenerError::EventTapCreation
    })?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| ListenerError::EventTapCreation)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        while let Ok(raw) = callback_rx.try_recv() {
            match raw {
                RawEvent::Key { keycode, is_down } => {
                    dispatcher.dispatch(KeyEvent::new(keycode_name(keycode), is_down));
                }
                RawEvent::Flags(flags) => {
                    let next = ModifierFlags::from_flags(flags);
                    for (name, is_down) in last_flags.changes(&next) {
                        debug!(modifier = name, is_down, "modifier changed");
                        dispatcher.dispatch(KeyEvent::new(name, is_down));
                    }
                    last_flags = next;
                }
            }
        }
    }

    Ok(())
}
