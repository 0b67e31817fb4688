//! Hotkey module: key normalisation, identifiers, the key-listening
//! facility, platform listeners and the binding registry.

mod facility;
mod identifier;
pub mod keys;
mod listener;
mod registry;

pub use facility::{KeyDispatcher, KeyListeningFacility};
pub use identifier::{HotkeyId, IdentifierError};
pub use keys::KeyEvent;
pub use listener::KeyListener;
pub use registry::{
    parse_identifier, ActionSink, BindOutcome, HotkeyRegistry, RebuildReport, RegistryError,
};
