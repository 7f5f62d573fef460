//! Wire types and framing shared by the presence bridge and its tests.
//!
//! Two framings live here:
//!
//! - [`frame`]: the browser's native-messaging channel (u32 LE length + JSON)
//! - [`ipc`]: the chat daemon's local socket (u32 LE opcode + u32 LE length + JSON)
//!
//! Message schemas for both sides are kept next to their framing so the
//! bridge and the fake daemons used in tests cannot drift apart.

pub mod activity;
pub mod frame;
pub mod ipc;
pub mod messages;

pub use activity::{Activity, Assets, Button, Timestamps, ACTIVITY_TYPE_WATCHING};
pub use frame::{read_frame, write_frame, MAX_INBOUND_FRAME_BYTES, MAX_OUTBOUND_FRAME_BYTES};
pub use ipc::{
    read_ipc_frame, write_ipc_frame, Command, Handshake, IpcFrame, Opcode, SetActivityArgs,
    HANDSHAKE_VERSION, MAX_IPC_FRAME_BYTES,
};
pub use messages::{InboundMessage, OutboundMessage, PlaybackUpdate, SettingsPatch, VideoState};

use thiserror::Error;

/// Errors raised while encoding or decoding a frame on either channel.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u32),
}
