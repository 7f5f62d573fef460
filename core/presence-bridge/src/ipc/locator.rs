//! Rendezvous paths for the daemon socket / named pipe.

use std::path::{Path, PathBuf};

pub const PIPE_PREFIX: &str = "discord-ipc-";

/// Instances are numbered `0..PIPE_INDEX_COUNT`; the first one that completes
/// a handshake wins.
pub const PIPE_INDEX_COUNT: usize = 10;

#[cfg(not(windows))]
const RUNTIME_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Sandboxed client installs (Flatpak, Snap) put their socket one level down.
#[cfg(not(windows))]
const SANDBOX_SUBDIRS: [&str; 2] = ["app/com.discordapp.Discord", "snap.discord"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketLocator {
    roots: Vec<PathBuf>,
}

impl SocketLocator {
    /// Probe only `dir` (used for overrides and tests).
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            roots: vec![dir.as_ref().to_path_buf()],
        }
    }

    #[cfg(not(windows))]
    pub fn platform_default() -> Self {
        let base = runtime_base(|key| std::env::var(key).ok());
        Self::with_sandbox_roots(base)
    }

    #[cfg(windows)]
    pub fn platform_default() -> Self {
        Self {
            roots: vec![PathBuf::from(r"\\.\pipe\")],
        }
    }

    #[cfg(not(windows))]
    fn with_sandbox_roots(base: PathBuf) -> Self {
        let mut roots = vec![base.clone()];
        roots.extend(SANDBOX_SUBDIRS.iter().map(|sub| base.join(sub)));
        Self { roots }
    }

    /// Every `(index, path)` to try, lowest index first.
    pub fn candidates(&self) -> Vec<(usize, PathBuf)> {
        (0..PIPE_INDEX_COUNT)
            .flat_map(|index| {
                self.roots
                    .iter()
                    .map(move |root| (index, root.join(format!("{}{}", PIPE_PREFIX, index))))
            })
            .collect()
    }
}

#[cfg(not(windows))]
fn runtime_base<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    RUNTIME_DIR_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}
