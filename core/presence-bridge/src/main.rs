//! anime-presence-bridge: native-messaging host that mirrors anime playback
//! from the browser extension into the local chat daemon's rich presence.
//!
//! The browser launches this binary and talks to it over stdin/stdout using
//! length-prefixed JSON frames. Each update is turned into an activity
//! payload and pushed to the daemon over its local IPC socket or pipe.
//!
//! ## Exit codes
//!
//! - `0`: the extension closed the channel
//! - `1`: replies could no longer be written to stdout

mod clock;
mod config;
mod error;
mod formatter;
mod ipc;
mod logging;
mod presence;
mod router;
#[cfg(test)]
mod test_support;

use clap::Parser;
use clock::SystemClock;
use config::BridgeConfig;
use ipc::IpcTransport;
use presence::PresenceStateMachine;
use router::MessageRouter;
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "anime-presence-bridge")]
#[command(about = "Native messaging host for anime rich presence")]
#[command(version)]
struct Cli {
    /// Origin of the calling extension (passed by the browser)
    #[arg(value_name = "ORIGIN")]
    caller: Vec<String>,

    /// Parent window handle (passed by some browsers on Windows)
    #[arg(long, hide = true)]
    parent_window: Option<String>,

    /// Application id used in the daemon handshake
    #[arg(long)]
    client_id: Option<String>,

    /// Directory holding the daemon's discord-ipc-N sockets
    #[arg(long, value_name = "DIR")]
    ipc_dir: Option<PathBuf>,

    /// Directory for the rolling log file
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let config = BridgeConfig::resolve(cli.client_id, cli.ipc_dir, cli.log_dir);
    let logging_guard = logging::init(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        has_client_id = config.client_id.is_some(),
        "Bridge starting"
    );
    tracing::debug!(
        caller = ?cli.caller,
        parent_window = ?cli.parent_window,
        "Launched by browser"
    );

    let settings = config.initial_settings();
    let transport = IpcTransport::new(settings.client_id.clone(), config.socket_locator());
    let presence = PresenceStateMachine::new(transport, Box::new(SystemClock));
    let mut router = MessageRouter::new(settings, presence);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let code = match router.run(stdin.lock(), stdout.lock()) {
        Ok(()) => {
            tracing::info!("Bridge exiting");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "Bridge failed");
            1
        }
    };

    drop(router);
    drop(logging_guard);
    std::process::exit(code);
}
