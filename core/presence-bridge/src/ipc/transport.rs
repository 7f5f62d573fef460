//! Connection state machine and request/response exchange with the daemon.
//!
//! ```text
//! Disconnected ──reconnect()──▶ Connecting ──handshake ok──▶ Connected
//!      ▲                            │                            │
//!      └──── every candidate failed ┘      any I/O error/close() ┘
//! ```
//!
//! The link is half-duplex: one command is written and its reply is read
//! before anything else happens. Reply nonces are not matched against the
//! request; the daemon answers in order on a single stream.

use super::locator::SocketLocator;
use super::stream::{Connector, IpcStream, PlatformConnector};
use crate::error::TransportError;
use anime_presence_protocol::{
    read_ipc_frame, write_ipc_frame, Activity, Command, Handshake, IpcFrame, Opcode,
};
use chrono::Utc;
use rand::RngCore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct IpcTransport {
    client_id: String,
    locator: SocketLocator,
    connector: Box<dyn Connector>,
    state: ConnectionState,
    stream: Option<Box<dyn IpcStream>>,
    endpoint: Option<PathBuf>,
    pid: u32,
}

impl IpcTransport {
    pub fn new(client_id: impl Into<String>, locator: SocketLocator) -> Self {
        Self::with_connector(client_id, locator, Box::new(PlatformConnector))
    }

    pub fn with_connector(
        client_id: impl Into<String>,
        locator: SocketLocator,
        connector: Box<dyn Connector>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            locator,
            connector,
            state: ConnectionState::Disconnected,
            stream: None,
            endpoint: None,
            pid: std::process::id(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Adopts a new client id. An open connection belongs to the old id, so
    /// it is closed.
    pub fn set_client_id(&mut self, client_id: impl Into<String>) {
        let client_id = client_id.into();
        if client_id != self.client_id {
            self.close();
            self.client_id = client_id;
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Path of the endpoint that accepted the handshake.
    pub fn endpoint(&self) -> Option<&Path> {
        self.endpoint.as_deref()
    }

    /// Single reconnect entry point: no-op when connected, `false` without a
    /// client id, otherwise one full probe of every candidate.
    pub fn ensure_connected(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        if self.client_id.is_empty() {
            debug!("Skipping daemon connection (no client id)");
            return false;
        }

        match self.reconnect() {
            Ok(_) => {
                if let Some(path) = self.endpoint() {
                    info!(path = %path.display(), "Connected to Discord");
                }
                true
            }
            Err(err) => {
                warn!(error = %err, "Discord not running");
                false
            }
        }
    }

    /// Drops any existing connection and probes candidates in order until
    /// one completes the handshake.
    pub fn reconnect(&mut self) -> Result<PathBuf, TransportError> {
        self.close();
        if self.client_id.is_empty() {
            return Err(TransportError::MissingClientId);
        }

        self.state = ConnectionState::Connecting;
        let mut attempts = 0;
        for (index, path) in self.locator.candidates() {
            attempts += 1;
            match self.open_endpoint(&path) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.endpoint = Some(path.clone());
                    self.state = ConnectionState::Connected;
                    return Ok(path);
                }
                Err(err) => {
                    trace!(
                        index,
                        path = %path.display(),
                        error = %err,
                        "Daemon endpoint unavailable"
                    );
                }
            }
        }

        self.state = ConnectionState::Disconnected;
        Err(TransportError::NoEndpoint { attempts })
    }

    fn open_endpoint(&self, path: &Path) -> Result<Box<dyn IpcStream>, TransportError> {
        let mut stream =
            self.connector
                .connect(path)
                .map_err(|source| TransportError::Connect {
                    path: path.to_path_buf(),
                    source,
                })?;

        match handshake(stream.as_mut(), &self.client_id) {
            Ok(()) => Ok(stream),
            Err(err) => {
                if let TransportError::Closed { code, message } = &err {
                    warn!(
                        path = %path.display(),
                        code = ?code,
                        message = %message,
                        "Daemon rejected handshake"
                    );
                }
                let _ = stream.close();
                Err(err)
            }
        }
    }

    pub fn set_activity(&mut self, activity: Activity) -> Result<Value, TransportError> {
        self.send_command(Some(activity))
    }

    pub fn clear_activity(&mut self) -> Result<Value, TransportError> {
        self.send_command(None)
    }

    /// Writes one `SET_ACTIVITY` and blocks for its reply. Any failure closes
    /// the connection; retrying is the caller's decision.
    fn send_command(&mut self, activity: Option<Activity>) -> Result<Value, TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let Some(stream) = self.stream.as_mut() else {
            self.state = ConnectionState::Disconnected;
            return Err(TransportError::NotConnected);
        };

        let nonce = make_nonce();
        let command = Command::set_activity(self.pid, activity, nonce.clone());
        let result = write_ipc_frame(stream.as_mut(), Opcode::Frame, &command)
            .map_err(TransportError::from)
            .and_then(|()| read_reply(stream.as_mut()));

        match result {
            Ok(reply) => {
                trace!(
                    nonce = %nonce,
                    reply_nonce = ?reply.payload.get("nonce"),
                    "Daemon acknowledged command"
                );
                Ok(reply.payload)
            }
            Err(err) => {
                debug!(error = %err, "Daemon exchange failed; marking disconnected");
                self.close();
                Err(err)
            }
        }
    }

    /// Releases the stream. Safe to call repeatedly; close errors are ignored.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.close() {
                trace!(error = %err, "Ignoring error while closing daemon stream");
            }
            debug!("Daemon connection closed");
        }
        self.endpoint = None;
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for IpcTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn handshake(stream: &mut dyn IpcStream, client_id: &str) -> Result<(), TransportError> {
    write_ipc_frame(stream, Opcode::Handshake, &Handshake::new(client_id))?;
    let reply = read_reply(stream)?;
    if reply.is_ready() {
        Ok(())
    } else {
        Err(TransportError::Handshake(format!(
            "expected DISPATCH/READY, got {}",
            reply.payload
        )))
    }
}

/// Reads until a frame that answers the outstanding request. PINGs are
/// answered in place; CLOSE ends the exchange.
fn read_reply(stream: &mut dyn IpcStream) -> Result<IpcFrame, TransportError> {
    loop {
        let frame = read_ipc_frame(stream)?;
        match frame.opcode {
            Opcode::Ping => {
                trace!("Answering daemon ping");
                write_ipc_frame(stream, Opcode::Pong, &frame.payload)?;
            }
            Opcode::Close => {
                let (code, message) = frame.close_reason();
                return Err(TransportError::Closed {
                    code,
                    message: message.unwrap_or_else(|| "no reason given".to_string()),
                });
            }
            _ => return Ok(frame),
        }
    }
}

fn make_nonce() -> String {
    let mut random = rand::thread_rng();
    format!(
        "{}-{:x}",
        Utc::now().timestamp_millis(),
        random.next_u64()
    )
}
