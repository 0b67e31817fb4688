//! Unix domain socket server for IPC
//!
//! Provides request-response communication and pushes switcher events to
//! subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::{ControlError, Controller};
use crate::events::SwitcherEvent;
use crate::hotkey::BindOutcome;
use crate::toggle::HotkeyAction;

use super::protocol::{Notification, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    controller: Arc<Controller>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, controller: Arc<Controller>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            controller,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let controller = Arc::clone(&self.controller);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, controller) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, controller: Arc<Controller>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task; a partially read frame must not
        // be dropped when an event wins the select below.
        let (request_tx, mut request_rx) = mpsc::channel(8);
        let _read_task = AbortOnDrop(tokio::spawn(Self::read_requests(reader, request_tx)));

        let mut events: Option<broadcast::Receiver<SwitcherEvent>> = None;

        loop {
            tokio::select! {
                request = request_rx.recv() => {
                    let Some(request) = request else {
                        debug!("client disconnected");
                        break Ok(());
                    };
                    debug!(?request, "received request");

                    let (response, subscribe) = Self::process_request(request, &controller).await;
                    if subscribe && events.is_none() {
                        events = Some(controller.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            let note = Notification::Event { event };
                            if let Err(e) = Self::send_message(&mut writer, &note).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged behind events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        }
    }

    async fn read_requests(mut reader: OwnedReadHalf, request_tx: mpsc::Sender<Request>) {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return,
                Err(e) => {
                    warn!(?e, "client read error");
                    return;
                }
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return;
            }

            let mut msg_buf = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut msg_buf).await {
                warn!(?e, "client read error");
                return;
            }

            let request: Request = match serde_json::from_slice(&msg_buf) {
                Ok(request) => request,
                Err(e) => {
                    warn!(%e, "failed to parse request, disconnecting");
                    return;
                }
            };

            if request_tx.send(request).await.is_err() {
                return;
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, controller: &Arc<Controller>) -> (Response, bool) {
        let response = match request {
            Request::Ping => Ok(Response::Pong),

            Request::GetStatus => Ok(Response::Status(controller.status())),

            Request::ListDevices => controller
                .list_devices()
                .await
                .map(|(devices, current)| Response::Devices { devices, current }),

            Request::Toggle => controller
                .toggle()
                .await
                .map(|device| Response::Switched { device }),

            Request::SwitchTo { device } => controller
                .switch_to(device)
                .await
                .map(|device| Response::Switched { device }),

            Request::StartCapture { apply } => controller
                .start_capture(apply)
                .map(|_handle| Response::CaptureStarted),

            Request::CancelCapture => Ok(Response::CaptureCancelled {
                was_active: controller.cancel_capture(),
            }),

            Request::ApplyCaptured { action } => controller
                .apply_captured(action.clone())
                .map(|(hotkey, outcome)| bound(hotkey.to_string(), action, outcome)),

            Request::Bind { hotkey, action } => controller
                .bind_str(&hotkey, action.clone())
                .map(|(hotkey, outcome)| bound(hotkey.to_string(), action, outcome)),

            Request::Unbind { hotkey } => {
                controller
                    .unbind_str(&hotkey)
                    .map(|was_bound| Response::Unbound { hotkey, was_bound })
            }

            Request::SetDevicePair { device_a, device_b } => controller
                .set_device_pair(device_a, device_b)
                .map(|device_pair| Response::DevicePairSet { device_pair }),

            Request::Subscribe => return (Response::Subscribed, true),
        };

        (response.unwrap_or_else(error_response), false)
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Wait for the next event, or forever if the client is not subscribed
/// Aborts the wrapped task when dropped, including when the owning future
/// is cancelled
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<SwitcherEvent>>,
) -> Result<SwitcherEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn bound(hotkey: String, action: HotkeyAction, outcome: BindOutcome<HotkeyAction>) -> Response {
    let replaced = match outcome {
        BindOutcome::Installed => None,
        BindOutcome::Replaced { previous } => Some(previous),
    };
    Response::Bound {
        hotkey,
        action,
        replaced,
    }
}

fn error_response(e: ControlError) -> Response {
    debug!(code = e.code(), %e, "request failed");
    Response::Error {
        code: e.code().to_string(),
        message: e.to_string(),
    }
}
