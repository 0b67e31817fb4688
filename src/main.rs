//! audio-switcher-daemon: Background daemon that flips the default audio
//! output between two devices on a global hotkey
//!
//! The daemon runs as a user service and provides:
//! - Global key input via evdev (Linux) or CGEventTap (macOS)
//! - Hotkey recording with a quiet-interval settle rule
//! - A hotkey registry bound to toggle / switch-to actions
//! - Default output switching through `pactl`
//! - IPC server for UI and script communication

mod capture;
mod config;
mod controller;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod toggle;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, SwitcherConfig};
use crate::controller::{action_channel, Controller};
use crate::events::SwitcherEvent;
use crate::hotkey::{KeyDispatcher, KeyListener};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::toggle::{PactlBackend, ToggleEngine};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "audio-switcher-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs().context("failed to create data directory")?;
    info!(?config.socket_path, ?config.store_path, "configuration loaded");

    let store = config.store();
    let settings = match store.load() {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            info!("no saved settings, starting fresh");
            SwitcherConfig::default()
        }
        Err(e) => {
            error!(%e, path = ?store.path(), "saved settings unreadable, starting from defaults");
            // Move the file aside so the next save cannot overwrite it
            if let Err(e) = store.quarantine() {
                error!(%e, "failed to move unreadable settings aside");
            }
            SwitcherConfig::default()
        }
    };

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Key input: platform listener -> dispatcher -> registry / capture
    let dispatcher = Arc::new(KeyDispatcher::new());
    let key_listener = KeyListener::new(Arc::clone(&dispatcher));
    let listener_active = match key_listener.start() {
        Ok(()) => {
            info!("key listener started");
            true
        }
        Err(e) => {
            error!(%e, "failed to start key listener");
            warn!("continuing without live key input");
            false
        }
    };

    let backend = Arc::new(PactlBackend::new());
    let engine = Arc::new(ToggleEngine::new(backend.clone(), backend));

    // Registry callbacks only enqueue; the action worker does the switching
    let (sink, action_rx) = action_channel(32);
    let (event_tx, _event_rx) = broadcast::channel::<SwitcherEvent>(64);

    let controller = Arc::new(Controller::new(
        dispatcher,
        engine,
        store,
        settings,
        sink,
        event_tx,
    ));
    controller.set_listener_active(listener_active);

    let report = controller.restore_bindings();
    for failure in &report.failed {
        warn!(hotkey = %failure.hotkey, error = %failure.error, "persisted hotkey not restored");
    }

    let server = Server::new(&config.socket_path, Arc::clone(&controller))?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = controller.run_actions(action_rx) => {
            info!("action worker exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    key_listener.stop();
    controller.shutdown();
    server.shutdown().await;

    info!("audio-switcher-daemon stopped");

    Ok(())
}
