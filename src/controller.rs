//! Switcher controller
//!
//! Owns the capture service, the hotkey registry and the toggle engine and
//! exposes the operations the IPC server offers. Device calls block on the
//! OS, so they run on tokio's blocking pool rather than on the key listener
//! thread or the IPC reactor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{CaptureError, HotkeyCapture};
use crate::config::{ConfigError, ConfigStore, PersistedBinding, SwitcherConfig};
use crate::events::SwitcherEvent;
use crate::hotkey::{
    parse_identifier, ActionSink, BindOutcome, HotkeyId, HotkeyRegistry, KeyListeningFacility,
    RebuildReport, RegistryError,
};
use crate::ipc::{BindingInfo, DaemonStatus};
use crate::toggle::{DeviceError, DeviceId, DeviceInfo, DevicePair, HotkeyAction, ToggleEngine};

/// Errors surfaced to IPC clients
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no device pair configured")]
    NoDevicePair,

    #[error("no captured hotkey to apply")]
    NothingCaptured,

    #[error("device task failed: {0}")]
    Task(String),
}

impl ControlError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Capture(CaptureError::AlreadyInProgress) => "capture_already_in_progress",
            ControlError::Capture(CaptureError::Cancelled) => "capture_cancelled",
            ControlError::Capture(CaptureError::TimedOut) => "capture_timed_out",
            ControlError::Capture(CaptureError::Empty) => "capture_empty",
            ControlError::Registry(RegistryError::InvalidIdentifier { .. }) => "invalid_identifier",
            ControlError::Registry(RegistryError::InvalidAction { .. }) => "invalid_action",
            ControlError::Registry(RegistryError::RegistrationFailed { .. }) => {
                "registration_failed"
            }
            ControlError::Device(DeviceError::DeviceNotFound(_)) => "device_not_found",
            ControlError::Device(DeviceError::ActivationFailed { .. }) => "activation_failed",
            ControlError::Device(DeviceError::QueryFailed(_)) => "device_query_failed",
            ControlError::Config(ConfigError::SameDevice(_)) => "same_device",
            ControlError::Config(_) => "config_error",
            ControlError::NoDevicePair => "no_device_pair",
            ControlError::NothingCaptured => "nothing_captured",
            ControlError::Task(_) => "internal_error",
        }
    }
}

/// Sink for registry callbacks plus the receiving end for the action worker.
///
/// The sink only enqueues; a full queue drops the press.
pub fn action_channel(capacity: usize) -> (ActionSink<HotkeyAction>, mpsc::Receiver<HotkeyAction>) {
    let (tx, rx) = mpsc::channel(capacity);
    let sink: ActionSink<HotkeyAction> = Arc::new(move |action: &HotkeyAction| {
        if let Err(e) = tx.try_send(action.clone()) {
            warn!(%e, "dropping hotkey press");
        }
    });
    (sink, rx)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Controller {
    /// Serialises mutations so the registry and the saved settings change together
    ops: Mutex<()>,
    capture: HotkeyCapture,
    registry: HotkeyRegistry<HotkeyAction>,
    engine: Arc<ToggleEngine>,
    store: ConfigStore,
    settings: Mutex<SwitcherConfig>,
    last_captured: Mutex<Option<HotkeyId>>,
    event_tx: broadcast::Sender<SwitcherEvent>,
    started_at: Instant,
    listener_active: AtomicBool,
}

impl Controller {
    pub fn new(
        facility: Arc<dyn KeyListeningFacility>,
        engine: Arc<ToggleEngine>,
        store: ConfigStore,
        settings: SwitcherConfig,
        sink: ActionSink<HotkeyAction>,
        event_tx: broadcast::Sender<SwitcherEvent>,
    ) -> Self {
        Self {
            ops: Mutex::new(()),
            capture: HotkeyCapture::new(Arc::clone(&facility), settings.capture.into()),
            registry: HotkeyRegistry::new(facility, sink),
            engine,
            store,
            settings: Mutex::new(settings),
            last_captured: Mutex::new(None),
            event_tx,
            started_at: Instant::now(),
            listener_active: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SwitcherEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: SwitcherEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }

    pub fn set_listener_active(&self, active: bool) {
        self.listener_active.store(active, Ordering::SeqCst);
    }

    /// Bind every persisted hotkey. Failures are reported, never fatal.
    ///
    /// Entries that fail stay in the settings file untouched.
    pub fn restore_bindings(&self) -> RebuildReport {
        let _ops = lock(&self.ops);
        let persisted: Vec<_> = lock(&self.settings)
            .hotkeys
            .iter()
            .map(|b| (b.hotkey.clone(), b.action()))
            .collect();

        self.registry.rebuild_from(persisted)
    }

    /// Write the current settings. Callers hold the operation lock.
    fn persist(&self) {
        let snapshot = lock(&self.settings).clone();
        if let Err(e) = self.store.save(&snapshot) {
            warn!(%e, path = ?self.store.path(), "failed to save settings");
        }
    }

    async fn run_device_task<T, F>(&self, task: F) -> Result<T, ControlError>
    where
        T: Send + 'static,
        F: FnOnce(&ToggleEngine) -> Result<T, DeviceError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || task(&engine))
            .await
            .map_err(|e| ControlError::Task(e.to_string()))?
            .map_err(ControlError::from)
    }

    fn report_switch(&self, result: &Result<DeviceId, ControlError>) {
        match result {
            Ok(device) => self.emit(SwitcherEvent::DeviceSwitched {
                device: device.clone(),
            }),
            Err(e) => self.emit(SwitcherEvent::SwitchFailed {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Switch to the other device of the configured pair
    pub async fn toggle(&self) -> Result<DeviceId, ControlError> {
        let pair = lock(&self.settings)
            .device_pair
            .clone()
            .ok_or(ControlError::NoDevicePair)?;

        let result = self.run_device_task(move |engine| engine.toggle(&pair)).await;
        self.report_switch(&result);
        result
    }

    /// Make one device the default output
    pub async fn switch_to(&self, device: DeviceId) -> Result<DeviceId, ControlError> {
        let result = self
            .run_device_task(move |engine| engine.switch(&device).map(|()| device))
            .await;
        self.report_switch(&result);
        result
    }

    /// List output devices and the current default, queried fresh
    pub async fn list_devices(&self) -> Result<(Vec<DeviceInfo>, Option<DeviceId>), ControlError> {
        self.run_device_task(|engine| {
            let devices = engine.list_devices()?;
            let current = engine.current().ok();
            Ok((devices, current))
        })
        .await
    }

    /// Start a capture in the background.
    ///
    /// With `apply` set, the captured hotkey is bound to that action as soon
    /// as the capture settles. Either way it is remembered for `apply_captured`.
    pub fn start_capture(
        self: &Arc<Self>,
        apply: Option<HotkeyAction>,
    ) -> Result<JoinHandle<Result<HotkeyId, ControlError>>, ControlError> {
        let pending = self.capture.start()?;
        self.emit(SwitcherEvent::CaptureStarted);

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let hotkey = match pending.wait().await {
                Ok(hotkey) => hotkey,
                Err(e) => {
                    let e = ControlError::from(e);
                    this.emit(SwitcherEvent::CaptureFailed {
                        code: e.code().to_string(),
                    });
                    return Err(e);
                }
            };

            *lock(&this.last_captured) = Some(hotkey.clone());
            this.emit(SwitcherEvent::CaptureCompleted {
                hotkey: hotkey.to_string(),
            });

            if let Some(action) = apply {
                this.bind(&hotkey, action)?;
            }
            Ok(hotkey)
        }))
    }

    pub fn cancel_capture(&self) -> bool {
        self.capture.cancel()
    }

    /// Bind the most recently captured hotkey
    pub fn apply_captured(
        &self,
        action: HotkeyAction,
    ) -> Result<(HotkeyId, BindOutcome<HotkeyAction>), ControlError> {
        let hotkey = lock(&self.last_captured)
            .clone()
            .ok_or(ControlError::NothingCaptured)?;
        let outcome = self.bind(&hotkey, action)?;
        Ok((hotkey, outcome))
    }

    /// Bind a hotkey and persist it
    pub fn bind(
        &self,
        hotkey: &HotkeyId,
        action: HotkeyAction,
    ) -> Result<BindOutcome<HotkeyAction>, ControlError> {
        let _ops = lock(&self.ops);
        let persisted = PersistedBinding::new(hotkey.to_string(), &action)?;
        let outcome = self.registry.bind(hotkey, action.clone())?;

        {
            let mut settings = lock(&self.settings);
            settings.hotkeys.retain(|b| !same_hotkey(&b.hotkey, hotkey));
            settings.hotkeys.push(persisted);
        }
        self.persist();

        self.emit(SwitcherEvent::HotkeyBound {
            hotkey: hotkey.to_string(),
            action,
        });
        Ok(outcome)
    }

    /// Parse and bind a hotkey given as text
    pub fn bind_str(
        &self,
        hotkey: &str,
        action: HotkeyAction,
    ) -> Result<(HotkeyId, BindOutcome<HotkeyAction>), ControlError> {
        let hotkey = parse_identifier(hotkey)?;
        let outcome = self.bind(&hotkey, action)?;
        Ok((hotkey, outcome))
    }

    /// Remove a binding. Returns false if the hotkey was not bound.
    pub fn unbind_str(&self, hotkey: &str) -> Result<bool, ControlError> {
        let hotkey = parse_identifier(hotkey)?;
        let _ops = lock(&self.ops);
        let removed = self.registry.unbind(&hotkey);

        let forgotten = {
            let mut settings = lock(&self.settings);
            let before = settings.hotkeys.len();
            settings.hotkeys.retain(|b| !same_hotkey(&b.hotkey, &hotkey));
            settings.hotkeys.len() != before
        };

        if removed || forgotten {
            self.persist();
            self.emit(SwitcherEvent::HotkeyUnbound {
                hotkey: hotkey.to_string(),
            });
        }
        Ok(removed)
    }

    /// Configure the two devices the toggle alternates between
    pub fn set_device_pair(
        &self,
        device_a: DeviceId,
        device_b: DeviceId,
    ) -> Result<DevicePair, ControlError> {
        let pair = DevicePair::new(device_a, device_b).map_err(ConfigError::from)?;
        {
            let _ops = lock(&self.ops);
            lock(&self.settings).device_pair = Some(pair.clone());
            self.persist();
        }

        info!(device_a = %pair.device_a(), device_b = %pair.device_b(), "device pair set");
        self.emit(SwitcherEvent::DevicePairChanged {
            device_a: pair.device_a().clone(),
            device_b: pair.device_b().clone(),
        });
        Ok(pair)
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            key_listener_active: self.listener_active.load(Ordering::SeqCst),
            capture_active: self.capture.is_active(),
            last_captured: lock(&self.last_captured).as_ref().map(|h| h.to_string()),
            device_pair: lock(&self.settings).device_pair.clone(),
            bindings: self
                .registry
                .bindings()
                .into_iter()
                .map(|(hotkey, action)| BindingInfo {
                    hotkey: hotkey.to_string(),
                    action,
                })
                .collect(),
        }
    }

    /// Execute actions from pressed hotkeys until the channel closes
    pub async fn run_actions(&self, mut action_rx: mpsc::Receiver<HotkeyAction>) {
        info!("action worker started");

        while let Some(action) = action_rx.recv().await {
            debug!(%action, "hotkey action");
            let result = match action {
                HotkeyAction::Toggle => self.toggle().await,
                HotkeyAction::SwitchTo { device } => self.switch_to(device).await,
            };
            if let Err(e) = result {
                warn!(code = e.code(), %e, "hotkey action failed");
            }
        }

        info!("action worker stopped");
    }

    /// Remove every live binding from the key-listening facility
    pub fn shutdown(&self) {
        self.capture.cancel();
        self.registry.clear();
    }
}

fn same_hotkey(persisted: &str, hotkey: &HotkeyId) -> bool {
    persisted.parse::<HotkeyId>().map_or(false, |p| &p == hotkey)
}
