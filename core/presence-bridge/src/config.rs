//! Process configuration and the extension-controlled presence settings.
//!
//! `BridgeConfig` is resolved once at startup from flags and environment.
//! `Settings` is owned by the router and changed only by merging patches
//! that arrive from the extension.

use crate::ipc::SocketLocator;
use anime_presence_protocol::SettingsPatch;
use std::env;
use std::path::PathBuf;

pub const CLIENT_ID_ENV: &str = "ANIME_PRESENCE_CLIENT_ID";
pub const IPC_DIR_ENV: &str = "ANIME_PRESENCE_IPC_DIR";
pub const LOG_DIR_ENV: &str = "ANIME_PRESENCE_LOG_DIR";
pub const DEBUG_LOG_ENV: &str = "ANIME_PRESENCE_DEBUG_LOG";

pub const DEFAULT_IDLE_STATUS: &str = "Browsing Anime";
const APP_DIR: &str = "anime-presence";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub show_progress_bar: bool,
    pub show_play_state: bool,
    pub idle_status: String,
    pub client_id: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_progress_bar: true,
            show_play_state: true,
            idle_status: DEFAULT_IDLE_STATUS.to_string(),
            client_id: String::new(),
        }
    }
}

impl Settings {
    pub fn has_client_id(&self) -> bool {
        !self.client_id.is_empty()
    }

    /// Applies every key present in `patch`. Returns the new client id when
    /// the patch changed it. An empty client id in a patch is ignored.
    pub fn merge(&mut self, patch: &SettingsPatch) -> Option<String> {
        if let Some(value) = patch.show_progress_bar {
            self.show_progress_bar = value;
        }
        if let Some(value) = patch.show_play_state {
            self.show_play_state = value;
        }
        if let Some(value) = &patch.idle_status {
            self.idle_status = value.clone();
        }

        let candidate = patch
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;
        if candidate == self.client_id {
            return None;
        }
        self.client_id = candidate.to_string();
        Some(self.client_id.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfig {
    pub client_id: Option<String>,
    pub ipc_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub debug_log: bool,
}

impl BridgeConfig {
    /// Flags take precedence over the environment.
    pub fn resolve(
        client_id: Option<String>,
        ipc_dir: Option<PathBuf>,
        log_dir: Option<PathBuf>,
    ) -> Self {
        Self::from_lookup(client_id, ipc_dir, log_dir, |key| env::var(key).ok())
    }

    fn from_lookup<F>(
        client_id: Option<String>,
        ipc_dir: Option<PathBuf>,
        log_dir: Option<PathBuf>,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |value: String| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        };

        Self {
            client_id: client_id
                .and_then(non_empty)
                .or_else(|| lookup(CLIENT_ID_ENV).and_then(non_empty)),
            ipc_dir: ipc_dir.or_else(|| lookup(IPC_DIR_ENV).and_then(non_empty).map(PathBuf::from)),
            log_dir: log_dir.or_else(|| lookup(LOG_DIR_ENV).and_then(non_empty).map(PathBuf::from)),
            debug_log: lookup(DEBUG_LOG_ENV)
                .map(|value| is_truthy(&value))
                .unwrap_or(false),
        }
    }

    pub fn initial_settings(&self) -> Settings {
        Settings {
            client_id: self.client_id.clone().unwrap_or_default(),
            ..Settings::default()
        }
    }

    pub fn socket_locator(&self) -> SocketLocator {
        match &self.ipc_dir {
            Some(dir) => SocketLocator::from_dir(dir),
            None => SocketLocator::platform_default(),
        }
    }

    /// Explicit log directory, else `<data_local_dir>/anime-presence/logs`.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|dir| dir.join(APP_DIR).join("logs")))
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn merge_applies_only_present_keys() {
        let mut settings = Settings::default();
        let changed = settings.merge(&SettingsPatch {
            show_progress_bar: Some(false),
            idle_status: Some("Picking a show".to_string()),
            ..SettingsPatch::default()
        });

        assert_eq!(changed, None);
        assert!(!settings.show_progress_bar);
        assert!(settings.show_play_state);
        assert_eq!(settings.idle_status, "Picking a show");
        assert!(!settings.has_client_id());
    }

    #[test]
    fn merge_reports_client_id_change_once() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            client_id: Some("abc123".to_string()),
            ..SettingsPatch::default()
        };

        assert_eq!(settings.merge(&patch), Some("abc123".to_string()));
        assert_eq!(settings.merge(&patch), None);
        assert_eq!(settings.client_id, "abc123");
    }

    #[test]
    fn merge_ignores_blank_client_id() {
        let mut settings = Settings {
            client_id: "abc123".to_string(),
            ..Settings::default()
        };
        let changed = settings.merge(&SettingsPatch {
            client_id: Some("  ".to_string()),
            ..SettingsPatch::default()
        });

        assert_eq!(changed, None);
        assert_eq!(settings.client_id, "abc123");
    }

    #[test]
    fn flags_win_over_environment() {
        let config = BridgeConfig::from_lookup(
            Some("from-flag".to_string()),
            None,
            None,
            lookup_from(&[(CLIENT_ID_ENV, "from-env"), (IPC_DIR_ENV, "/run/test")]),
        );

        assert_eq!(config.client_id.as_deref(), Some("from-flag"));
        assert_eq!(config.ipc_dir, Some(PathBuf::from("/run/test")));
        assert_eq!(config.initial_settings().client_id, "from-flag");
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = BridgeConfig::from_lookup(
            Some(" ".to_string()),
            None,
            None,
            lookup_from(&[(CLIENT_ID_ENV, ""), (DEBUG_LOG_ENV, "yes")]),
        );

        assert_eq!(config.client_id, None);
        assert!(config.debug_log);
        assert!(!config.initial_settings().has_client_id());
    }

    #[test]
    fn explicit_log_dir_is_used() {
        let config = BridgeConfig {
            log_dir: Some(PathBuf::from("/var/tmp/presence")),
            ..BridgeConfig::default()
        };
        assert_eq!(config.log_dir(), Some(PathBuf::from("/var/tmp/presence")));
    }
}
