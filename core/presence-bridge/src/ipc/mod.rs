//! Link to the chat daemon's local IPC endpoint.

mod locator;
mod stream;
mod transport;

pub use locator::SocketLocator;
pub use transport::IpcTransport;

#[cfg(test)]
pub use locator::PIPE_INDEX_COUNT;
#[cfg(test)]
pub use stream::{Connector, IpcStream};
