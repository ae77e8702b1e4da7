//! Interprocess message channel: framing, correlation, endpoints.

pub mod frame;
pub mod legacy;
pub mod server;
pub mod transport;

#[cfg(target_os = "windows")]
pub mod pipe;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use frame::{Frame, MessageType, HEADER_LEN};
pub use server::{serve_connection, serve_legacy_connection, SessionStats, TranslationProvider};
pub use transport::{Transport, HOOK_REQUEST_TIMEOUT, ORCHESTRATOR_REQUEST_TIMEOUT};

/// Channel identity for binary-framed clients.
pub const CHANNEL_NAME: &str = r"\\.\pipe\GameStringerTranslator";

/// Channel identity for legacy JSON clients.
pub const LEGACY_CHANNEL_NAME: &str = r"\\.\pipe\GameStringerUETranslator";
