//! Presence state machine.
//!
//! Decides what the daemon should show for each playback update and when to
//! push it.
//!
//! ## States
//!
//! ```text
//! pageState == "watching" + anime → Watching(session)
//! pageState starts "browsing"     → Browsing   (session dropped)
//! pageState == "searching"        → Searching  (session dropped)
//! pageState == "disconnected"     → Disconnected (presence cleared)
//! ```
//!
//! Pushes are debounced: at most one per [`DEBOUNCE_WINDOW_MS`]. An update
//! inside the window is a successful no-op and does not change state.

use crate::clock::Clock;
use crate::config::Settings;
use crate::error::Result;
use crate::formatter::{self, MAX_FIELD_UNITS, MAX_URL_UNITS};
use crate::ipc::IpcTransport;
use anime_presence_protocol::{
    Activity, Assets, Button, PlaybackUpdate, ACTIVITY_TYPE_WATCHING,
};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, trace, warn};

pub const DEBOUNCE_WINDOW_MS: i64 = 2_000;

const LOGO_ASSET: &str = "logo";
const BRAND_TEXT: &str = "Anime Discord Presence";
const SITE_URL: &str = "https://www.crunchyroll.com";
const WATCH_BUTTON: &str = "Watch Now";
const VISIT_BUTTON: &str = "Visit Crunchyroll";

/// One contiguous stretch of watching the same title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub anime: String,
    /// Epoch seconds of the first update for this title.
    pub started_at: i64,
    /// Last non-empty season title seen in this session.
    pub season: Option<String>,
}

impl Session {
    fn new(anime: &str, started_at: i64) -> Self {
        Self {
            anime: anime.to_string(),
            started_at,
            season: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceState {
    Disconnected,
    Browsing,
    Searching,
    Watching(Session),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Pushed,
    Cleared,
    Debounced,
    Ignored,
    /// No daemon connection; the update was dropped.
    Offline,
}

enum Page<'a> {
    Watching(&'a str),
    Browsing(&'a str),
    Searching,
    Disconnected,
    Unrecognized,
}

fn classify(update: &PlaybackUpdate) -> Page<'_> {
    let page_state = update.page_state.as_str();
    match (page_state, update.anime.as_deref()) {
        ("watching", Some(anime)) => Page::Watching(anime),
        ("searching", _) => Page::Searching,
        ("disconnected", _) => Page::Disconnected,
        (page, _) if page.starts_with("browsing") => Page::Browsing(page),
        _ => Page::Unrecognized,
    }
}

pub struct PresenceStateMachine {
    transport: IpcTransport,
    clock: Box<dyn Clock>,
    state: PresenceState,
    last_push: Option<DateTime<Utc>>,
}

impl PresenceStateMachine {
    pub fn new(transport: IpcTransport, clock: Box<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            state: PresenceState::Disconnected,
            last_push: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    #[cfg(test)]
    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            PresenceState::Watching(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn ensure_connected(&mut self) -> bool {
        self.transport.ensure_connected()
    }

    /// Applies one update. Transport failures are returned after the
    /// connection has already been marked disconnected.
    pub fn handle_update(
        &mut self,
        update: &PlaybackUpdate,
        settings: &Settings,
    ) -> Result<UpdateOutcome> {
        if !self.transport.ensure_connected() {
            debug!(page_state = %update.page_state, "Dropping update (daemon offline)");
            return Ok(UpdateOutcome::Offline);
        }

        let now = self.clock.now();
        if let Some(last) = self.last_push {
            if now - last < Duration::milliseconds(DEBOUNCE_WINDOW_MS) {
                trace!(page_state = %update.page_state, "Update debounced");
                return Ok(UpdateOutcome::Debounced);
            }
        }

        let page = classify(update);
        if let Page::Unrecognized = page {
            debug!(
                page_state = %update.page_state,
                has_anime = update.anime.is_some(),
                "Ignoring unrecognized page state"
            );
            return Ok(UpdateOutcome::Ignored);
        }

        self.last_push = Some(now);

        match page {
            Page::Watching(anime) => {
                let session = self.enter_watching(anime, update.season_title.as_deref(), now);
                let activity = watching_activity(&session, update, settings, now.timestamp());
                self.transport.set_activity(activity)?;
                Ok(UpdateOutcome::Pushed)
            }
            Page::Browsing(page) => {
                self.leave_watching(PresenceState::Browsing);
                self.transport.set_activity(browsing_activity(page, settings))?;
                Ok(UpdateOutcome::Pushed)
            }
            Page::Searching => {
                self.leave_watching(PresenceState::Searching);
                self.transport.set_activity(searching_activity())?;
                Ok(UpdateOutcome::Pushed)
            }
            Page::Disconnected => {
                self.leave_watching(PresenceState::Disconnected);
                self.transport.clear_activity()?;
                Ok(UpdateOutcome::Cleared)
            }
            Page::Unrecognized => Ok(UpdateOutcome::Ignored),
        }
    }

    /// Keeps the session when the title is unchanged, otherwise starts a
    /// new one at `now`. Returns a snapshot with the season cache applied.
    fn enter_watching(&mut self, anime: &str, season: Option<&str>, now: DateTime<Utc>) -> Session {
        let previous = std::mem::replace(&mut self.state, PresenceState::Disconnected);
        let mut session = match previous {
            PresenceState::Watching(session) if session.anime == anime => session,
            _ => {
                info!(anime = %anime, "Now watching");
                Session::new(anime, now.timestamp())
            }
        };

        if let Some(season) = season {
            session.season = Some(season.to_string());
        }

        self.state = PresenceState::Watching(session.clone());
        session
    }

    fn leave_watching(&mut self, next: PresenceState) {
        if let PresenceState::Watching(session) = &self.state {
            info!(
                anime = %session.anime,
                watched_secs = self.clock.now().timestamp() - session.started_at,
                "Stopped watching"
            );
        }
        self.state = next;
    }

    /// Clears the daemon presence and the session; the connection stays open.
    pub fn clear(&mut self) {
        self.leave_watching(PresenceState::Disconnected);
        if self.transport.is_connected() {
            if let Err(err) = self.transport.clear_activity() {
                warn!(error = %err, "Failed to clear presence");
            }
        }
    }

    /// Tears down presence and connection, then reconnects under `client_id`.
    pub fn switch_client(&mut self, client_id: &str) -> bool {
        debug!(from = %self.transport.client_id(), to = %client_id, "Switching client id");
        self.clear();
        self.transport.close();
        self.last_push = None;
        self.transport.set_client_id(client_id);
        self.transport.ensure_connected()
    }

    /// Forces the next update to start from a fresh connection.
    pub fn mark_failed(&mut self) {
        self.transport.close();
    }

    /// Best-effort clear and close before the process exits.
    pub fn shutdown(&mut self) {
        self.clear();
        self.transport.close();
    }
}

fn watching_activity(
    session: &Session,
    update: &PlaybackUpdate,
    settings: &Settings,
    now: i64,
) -> Activity {
    let season = session.season.as_deref();
    let episode = update.episode_number.as_deref();

    let label = formatter::episode_label(season, episode);
    let cleaned = update
        .episode_title
        .as_deref()
        .map(|title| formatter::clean_episode_title(title, episode));

    let (small_image, small_text) = match formatter::playback_indicator(
        &update.video,
        settings.show_play_state,
        settings.show_progress_bar,
    ) {
        Some((image, text)) => (Some(image), Some(text)),
        None => (None, None),
    };

    let url = update.episode_url.as_deref().unwrap_or(SITE_URL);

    Activity {
        kind: ACTIVITY_TYPE_WATCHING,
        details: formatter::truncate_units(&session.anime, MAX_FIELD_UNITS),
        state: formatter::display_state(label.as_deref(), cleaned.as_deref(), &session.anime),
        timestamps: formatter::playback_timestamps(now, &update.video),
        assets: Assets {
            large_image: update
                .thumbnail
                .clone()
                .unwrap_or_else(|| LOGO_ASSET.to_string()),
            large_text: formatter::large_text(season, episode, &session.anime),
            small_image,
            small_text,
        },
        buttons: vec![Button::new(
            WATCH_BUTTON,
            formatter::truncate_units(url, MAX_URL_UNITS),
        )],
    }
}

fn browsing_activity(page: &str, settings: &Settings) -> Activity {
    Activity {
        kind: ACTIVITY_TYPE_WATCHING,
        details: formatter::truncate_units(&settings.idle_status, MAX_FIELD_UNITS),
        state: formatter::browse_state(page).to_string(),
        timestamps: None,
        assets: brand_assets(),
        buttons: vec![Button::new(VISIT_BUTTON, SITE_URL)],
    }
}

fn searching_activity() -> Activity {
    Activity {
        kind: ACTIVITY_TYPE_WATCHING,
        details: "Searching".to_string(),
        state: "Looking for anime".to_string(),
        timestamps: None,
        assets: brand_assets(),
        buttons: Vec::new(),
    }
}

fn brand_assets() -> Assets {
    Assets {
        large_image: LOGO_ASSET.to_string(),
        large_text: BRAND_TEXT.to_string(),
        small_image: None,
        small_text: None,
    }
}
