//! Error taxonomy for the bridge.
//!
//! Only [`BridgeError::Framing`] on the upstream channel ends the process.
//! Transport and application errors degrade to "disconnected" and surface to
//! the extension through the `connected` flag of the next status reply.

use anime_presence_protocol::FrameError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected to the chat daemon")]
    NotConnected,

    #[error("No client ID configured")]
    MissingClientId,

    #[error("Failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Daemon closed the connection (code {code:?}): {message}")]
    Closed { code: Option<i64>, message: String },

    #[error("Daemon frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("No daemon endpoint accepted the handshake after {attempts} attempts")]
    NoEndpoint { attempts: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Upstream framing error: {0}")]
    Framing(#[source] FrameError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to process update: {0}")]
    Application(String),
}

/// Convenience type alias for Results using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;
