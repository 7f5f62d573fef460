//! Messages exchanged with the browser extension over the upstream channel.
//!
//! The extension is loosely typed: fields may be missing, `null`, empty, or
//! (for `episodeNumber`) a number instead of a string. Parsing normalizes all
//! of that here so the bridge only sees `Option<String>` and plain numbers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_PAGE_STATE: &str = "browsing";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AnimeState(PlaybackUpdate),
    SettingsUpdate {
        #[serde(default, deserialize_with = "null_as_default")]
        settings: SettingsPatch,
    },
    SetClientId {
        #[serde(rename = "clientId", default)]
        client_id: String,
    },
    Ping,
    Disconnect,
    /// Zero-length frame, or an object with no `type`.
    #[serde(skip_deserializing)]
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("type").is_none() {
            return Ok(InboundMessage::Heartbeat);
        }
        serde_json::from_value(value)
    }
}

/// Replies written back to the extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Status {
        connected: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Pong,
}

impl OutboundMessage {
    pub fn status(connected: bool) -> Self {
        OutboundMessage::Status {
            connected,
            error: None,
        }
    }

    pub fn status_with_error(connected: bool, error: impl Into<String>) -> Self {
        OutboundMessage::Status {
            connected,
            error: Some(error.into()),
        }
    }
}

/// Partial settings; absent keys leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_progress_bar: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_play_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackUpdate {
    pub page_state: String,
    #[serde(deserialize_with = "non_empty_string")]
    pub anime: Option<String>,
    #[serde(deserialize_with = "non_empty_string")]
    pub episode_title: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub episode_number: Option<String>,
    #[serde(deserialize_with = "non_empty_string")]
    pub episode_url: Option<String>,
    #[serde(deserialize_with = "non_empty_string")]
    pub thumbnail: Option<String>,
    #[serde(deserialize_with = "non_empty_string")]
    pub season_title: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub video: VideoState,
    pub settings: Option<SettingsPatch>,
}

impl Default for PlaybackUpdate {
    fn default() -> Self {
        Self {
            page_state: DEFAULT_PAGE_STATE.to_string(),
            anime: None,
            episode_title: None,
            episode_number: None,
            episode_url: None,
            thumbnail: None,
            season_title: None,
            video: VideoState::default(),
            settings: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoState {
    #[serde(deserialize_with = "null_as_default")]
    pub playing: bool,
    #[serde(deserialize_with = "paused_or_default")]
    pub paused: bool,
    /// Seconds; zero when unknown.
    #[serde(deserialize_with = "seconds")]
    pub duration: f64,
    /// Seconds into the episode.
    #[serde(deserialize_with = "seconds")]
    pub current_time: f64,
}

impl Default for VideoState {
    fn default() -> Self {
        Self {
            playing: false,
            paused: true,
            duration: 0.0,
            current_time: 0.0,
        }
    }
}

impl VideoState {
    pub fn is_playing(&self) -> bool {
        self.playing && !self.paused
    }

    /// Percentage watched in `[0, 100]`, or `None` without a duration.
    pub fn progress_percent(&self) -> Option<f64> {
        if self.duration > 0.0 {
            Some((self.current_time / self.duration * 100.0).clamp(0.0, 100.0))
        } else {
            None
        }
    }
}

fn non_empty_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Some(Value::Number(n)) => Some(match n.as_u64() {
            Some(whole) => whole.to_string(),
            None => n.to_string(),
        }),
        _ => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn paused_or_default<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    })
}
