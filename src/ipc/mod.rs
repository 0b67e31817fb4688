//! IPC module for client-daemon communication

mod protocol;
mod server;

pub use protocol::{BindingInfo, DaemonStatus};
pub use server::Server;
