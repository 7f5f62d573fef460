//! Byte-stream backends for the daemon link.
//!
//! The transport only needs read/write/close. Unix clients listen on a
//! stream socket; Windows clients expose a named pipe opened like a file.

use std::io::{self, Read, Write};
use std::path::Path;

pub trait IpcStream: Read + Write + Send {
    /// Releases the handle. Callers ignore the result.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens a stream to one candidate path.
pub trait Connector: Send {
    fn connect(&self, path: &Path) -> io::Result<Box<dyn IpcStream>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformConnector;

#[cfg(unix)]
impl IpcStream for std::os::unix::net::UnixStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(windows)]
impl IpcStream for fs_err::File {
    fn close(&mut self) -> io::Result<()> {
        // The pipe handle is released on drop.
        self.flush()
    }
}

impl Connector for PlatformConnector {
    #[cfg(unix)]
    fn connect(&self, path: &Path) -> io::Result<Box<dyn IpcStream>> {
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    fn connect(&self, path: &Path) -> io::Result<Box<dyn IpcStream>> {
        let pipe = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Box::new(pipe))
    }

    #[cfg(not(any(unix, windows)))]
    fn connect(&self, path: &Path) -> io::Result<Box<dyn IpcStream>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no IPC backend for {}", path.display()),
        ))
    }
}
