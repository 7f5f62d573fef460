//! In-memory daemon and clock for state-machine and router tests.

use crate::clock::Clock;
use crate::ipc::{Connector, IpcStream, IpcTransport, SocketLocator};
use anime_presence_protocol::{read_ipc_frame, write_ipc_frame, IpcFrame, Opcode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MockState {
    offline: bool,
    reject_handshakes: bool,
    fail_writes: bool,
    connect_attempts: usize,
    handshakes: Vec<Value>,
    commands: Vec<Value>,
}

/// Fake chat daemon. Every clone shares the same recorded traffic.
#[derive(Clone, Default)]
pub struct MockDaemon {
    inner: Arc<Mutex<MockState>>,
}

impl MockDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline() -> Self {
        let daemon = Self::default();
        daemon.set_online(false);
        daemon
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap()
    }

    pub fn transport(&self, client_id: &str) -> IpcTransport {
        IpcTransport::with_connector(
            client_id,
            SocketLocator::from_dir("/nonexistent/mock-daemon"),
            Box::new(self.clone()),
        )
    }

    pub fn set_online(&self, online: bool) {
        self.lock().offline = !online;
    }

    pub fn reject_handshakes(&self, reject: bool) {
        self.lock().reject_handshakes = reject;
    }

    /// Simulates the daemon going away under an open connection.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    pub fn handshakes(&self) -> Vec<Value> {
        self.lock().handshakes.clone()
    }

    pub fn commands(&self) -> Vec<Value> {
        self.lock().commands.clone()
    }

    /// `args.activity` of every command, `null` for clears.
    pub fn activities(&self) -> Vec<Value> {
        self.commands()
            .into_iter()
            .map(|command| command["args"]["activity"].clone())
            .collect()
    }

    fn respond(&self, frame: IpcFrame) -> Option<(Opcode, Value)> {
        let mut state = self.lock();
        match frame.opcode {
            Opcode::Handshake => {
                state.handshakes.push(frame.payload);
                if state.reject_handshakes {
                    Some((Opcode::Frame, json!({"cmd": "DISPATCH", "evt": "ERROR"})))
                } else {
                    Some((
                        Opcode::Frame,
                        json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1}}),
                    ))
                }
            }
            Opcode::Frame => {
                let reply = json!({
                    "cmd": frame.payload["cmd"].clone(),
                    "evt": null,
                    "nonce": frame.payload["nonce"].clone(),
                    "data": frame.payload["args"]["activity"].clone(),
                });
                state.commands.push(frame.payload);
                Some((Opcode::Frame, reply))
            }
            _ => None,
        }
    }
}

impl Connector for MockDaemon {
    fn connect(&self, _path: &Path) -> io::Result<Box<dyn IpcStream>> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.offline {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock daemon offline",
            ));
        }
        Ok(Box::new(MockStream {
            daemon: self.clone(),
            written: Vec::new(),
            pending: VecDeque::new(),
        }))
    }
}

struct MockStream {
    daemon: MockDaemon,
    written: Vec<u8>,
    pending: VecDeque<u8>,
}

impl MockStream {
    fn process_frames(&mut self) -> io::Result<()> {
        while self.written.len() >= 8 {
            let len = u32::from_le_bytes([
                self.written[4],
                self.written[5],
                self.written[6],
                self.written[7],
            ]) as usize;
            if self.written.len() < 8 + len {
                break;
            }

            let bytes: Vec<u8> = self.written.drain(..8 + len).collect();
            let frame = read_ipc_frame(&mut bytes.as_slice())
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;

            if let Some((opcode, payload)) = self.daemon.respond(frame) {
                let mut reply = Vec::new();
                write_ipc_frame(&mut reply, opcode, &payload)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
                self.pending.extend(reply);
            }
        }
        Ok(())
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.daemon.lock().fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock daemon gone"));
        }
        self.written.extend_from_slice(buf);
        self.process_frames()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl IpcStream for MockStream {
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn at(epoch_secs: i64) -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.timestamp_opt(epoch_secs, 0).unwrap())),
        }
    }

    pub fn advance_millis(&self, millis: i64) {
        let mut now = self.now.lock().unwrap();
        *now = *now + Duration::milliseconds(millis);
    }

    pub fn timestamp(&self) -> i64 {
        self.now.lock().unwrap().timestamp()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
