//! Framing and command schema for the chat daemon's local IPC socket.
//!
//! Every frame is `opcode: u32 LE`, `length: u32 LE`, then `length` bytes of
//! UTF-8 JSON.

use crate::activity::Activity;
use crate::frame::read_exact_or_eof;
use crate::FrameError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{ErrorKind, Read, Write};

pub const HANDSHAKE_VERSION: u32 = 1;
pub const MAX_IPC_FRAME_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Handshake,
    Frame,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn code(self) -> u32 {
        match self {
            Opcode::Handshake => 0,
            Opcode::Frame => 1,
            Opcode::Close => 2,
            Opcode::Ping => 3,
            Opcode::Pong => 4,
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IpcFrame {
    pub opcode: Opcode,
    pub payload: Value,
}

impl IpcFrame {
    /// True for the `DISPATCH`/`READY` frame the daemon sends after a good handshake.
    pub fn is_ready(&self) -> bool {
        self.payload.get("cmd").and_then(Value::as_str) == Some("DISPATCH")
            && self.payload.get("evt").and_then(Value::as_str) == Some("READY")
    }

    /// `(code, message)` carried by a CLOSE frame, when present.
    pub fn close_reason(&self) -> (Option<i64>, Option<String>) {
        let code = self.payload.get("code").and_then(Value::as_i64);
        let message = self
            .payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        (code, message)
    }
}

/// Opcode 0 body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Handshake {
    pub v: u32,
    pub client_id: String,
}

impl Handshake {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            v: HANDSHAKE_VERSION,
            client_id: client_id.into(),
        }
    }
}

/// Opcode 1 body for `SET_ACTIVITY`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    pub cmd: String,
    pub args: SetActivityArgs,
    pub nonce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetActivityArgs {
    pub pid: u32,
    /// `None` serializes as `null`, which clears the presence.
    pub activity: Option<Activity>,
}

impl Command {
    pub fn set_activity(pid: u32, activity: Option<Activity>, nonce: impl Into<String>) -> Self {
        Self {
            cmd: "SET_ACTIVITY".to_string(),
            args: SetActivityArgs { pid, activity },
            nonce: nonce.into(),
        }
    }
}

pub fn write_ipc_frame<W: Write + ?Sized, T: Serialize + ?Sized>(
    writer: &mut W,
    opcode: Opcode,
    payload: &T,
) -> Result<(), FrameError> {
    let body = serde_json::to_vec(payload)?;
    if body.len() > MAX_IPC_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len: body.len(),
            max: MAX_IPC_FRAME_BYTES,
        });
    }

    let mut frame = Vec::with_capacity(body.len() + 8);
    frame.extend_from_slice(&opcode.code().to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);

    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one daemon frame. Unlike the upstream channel, a short read here is
/// an error: the daemon hanging up mid-request is a transport failure.
pub fn read_ipc_frame<R: Read + ?Sized>(reader: &mut R) -> Result<IpcFrame, FrameError> {
    let mut header = [0u8; 8];
    if !read_exact_or_eof(reader, &mut header)? {
        return Err(unexpected_eof("daemon closed the connection"));
    }

    let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let opcode = Opcode::try_from(opcode)?;

    if len > MAX_IPC_FRAME_BYTES {
        return Err(FrameError::TooLarge {
            len,
            max: MAX_IPC_FRAME_BYTES,
        });
    }

    let mut body = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut body)? {
        return Err(unexpected_eof("daemon frame body truncated"));
    }

    let payload = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };

    Ok(IpcFrame { opcode, payload })
}

fn unexpected_eof(message: &str) -> FrameError {
    FrameError::Io(std::io::Error::new(ErrorKind::UnexpectedEof, message))
}
