//! Pure helpers that turn raw playback fields into presence strings.
//!
//! Nothing here touches the transport or the clock; callers pass `now` in.

use anime_presence_protocol::{Timestamps, VideoState};
use once_cell::sync::Lazy;
use regex::Regex;

/// Daemon limit for text fields, in UTF-16 code units.
pub const MAX_FIELD_UNITS: usize = 128;
pub const MAX_URL_UNITS: usize = 512;
pub const PROGRESS_BAR_CELLS: usize = 12;

const FILLED: char = '━';
const BOUNDARY: char = '●';
const TRACK: char = '─';

const PLAYING_ICON: char = '▶';
const PAUSED_ICON: char = '⏸';

pub const WATCHING_FALLBACK: &str = "Watching";

/// Longest believable episode position or length, in seconds.
pub const MAX_PLAYBACK_SECS: f64 = 24.0 * 60.0 * 60.0;

static RE_FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static RE_EPISODE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(?:episode|ep\.?|e)\s*(\d+)\s*[-–]\s*(.*)$").unwrap()
});

/// Renders `percent` (clamped to `[0, 100]`) as `cells` glyphs: filled
/// cells, one boundary glyph, then track. 100% is all filled.
pub fn progress_bar(percent: f64, cells: usize) -> String {
    if cells == 0 {
        return String::new();
    }
    let percent = if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    };

    let filled = ((percent / 100.0) * cells as f64).floor() as usize;
    if filled >= cells {
        return FILLED.to_string().repeat(cells);
    }

    let mut bar = String::with_capacity(cells * 3);
    bar.extend(std::iter::repeat(FILLED).take(filled));
    bar.push(BOUNDARY);
    bar.extend(std::iter::repeat(TRACK).take(cells - filled - 1));
    bar
}

/// Cuts `text` to at most `max_units` UTF-16 code units, never inside a
/// surrogate pair.
pub fn truncate_units(text: &str, max_units: usize) -> String {
    let mut used = 0;
    for (index, ch) in text.char_indices() {
        let units = ch.len_utf16();
        if used + units > max_units {
            return text[..index].to_string();
        }
        used += units;
    }
    text.to_string()
}

/// `m:ss` below an hour, `h:mm:ss` above.
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// First run of digits in a season title ("Season 2" -> "2").
pub fn season_number(season: &str) -> Option<&str> {
    RE_FIRST_NUMBER.find(season).map(|m| m.as_str())
}

/// `S<season>:E<episode>`, `Episode <NN>`, or nothing.
pub fn episode_label(season: Option<&str>, episode: Option<&str>) -> Option<String> {
    let episode = episode?;
    match season.and_then(season_number) {
        Some(season) => Some(format!("S{}:E{}", season, episode)),
        None => Some(format!("Episode {:0>2}", episode)),
    }
}

/// Drops a leading "Episode N -" / "E N –" when N is the known episode.
pub fn clean_episode_title(title: &str, episode: Option<&str>) -> String {
    let Some(episode) = episode else {
        return title.to_string();
    };
    let Some(captures) = RE_EPISODE_PREFIX.captures(title) else {
        return title.to_string();
    };

    let prefix_number = &captures[1];
    if !same_episode(prefix_number, episode) {
        return title.to_string();
    }

    let rest = captures[2].trim();
    if rest.is_empty() {
        title.to_string()
    } else {
        rest.to_string()
    }
}

fn same_episode(left: &str, right: &str) -> bool {
    match (left.parse::<u64>(), right.trim().parse::<u64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => left == right.trim(),
    }
}

/// The `state` line for a watching activity.
pub fn display_state(label: Option<&str>, cleaned_title: Option<&str>, anime: &str) -> String {
    let title = cleaned_title.filter(|title| !title.is_empty() && *title != anime);
    let text = match (label, title) {
        (Some(label), Some(title)) => format!("{} - {}", label, title),
        (Some(label), None) => label.to_string(),
        (None, Some(title)) => title.to_string(),
        (None, None) => WATCHING_FALLBACK.to_string(),
    };
    truncate_units(&text, MAX_FIELD_UNITS)
}

/// Hover text on the large image.
pub fn large_text(season: Option<&str>, episode: Option<&str>, anime: &str) -> String {
    let text = match (season, episode) {
        (Some(season), Some(episode)) => format!("{}, Episode {}", season, episode),
        (None, Some(episode)) => format!("Episode {}", episode),
        _ => anime.to_string(),
    };
    truncate_units(&text, MAX_FIELD_UNITS)
}

/// `start = now - currentTime`, `end = start + duration`; omitted without a
/// duration, or when either value is longer than [`MAX_PLAYBACK_SECS`].
pub fn playback_timestamps(now: i64, video: &VideoState) -> Option<Timestamps> {
    if video.duration <= 0.0 || video.duration > MAX_PLAYBACK_SECS {
        return None;
    }
    if !(0.0..=MAX_PLAYBACK_SECS).contains(&video.current_time) {
        return None;
    }
    let start = now.checked_sub(video.current_time.floor() as i64)?;
    let end = start.checked_add(video.duration.floor() as i64)?;
    Some(Timestamps { start, end })
}

/// Small-image key and hover text describing play state and position.
pub fn playback_indicator(
    video: &VideoState,
    show_play_state: bool,
    show_progress_bar: bool,
) -> Option<(String, String)> {
    let playing = video.is_playing();
    let image = if playing { "play" } else { "pause" }.to_string();
    let icon = if playing { PLAYING_ICON } else { PAUSED_ICON };

    if show_progress_bar {
        if let Some(percent) = video.progress_percent() {
            let bar = progress_bar(percent, PROGRESS_BAR_CELLS);
            let line = format!(
                "{} {} {}",
                format_clock(video.current_time),
                bar,
                format_clock(video.duration)
            );
            let text = if show_play_state {
                format!("{} {}", icon, line)
            } else {
                line
            };
            return Some((image, truncate_units(&text, MAX_FIELD_UNITS)));
        }
    }

    if show_play_state {
        let text = if playing { "Playing" } else { "Paused" };
        return Some((image, text.to_string()));
    }

    None
}

/// `state` line for the browsing sub-pages.
pub fn browse_state(page_state: &str) -> &'static str {
    match page_state {
        "browsing_series" => "Viewing a series",
        "browsing_home" => "On the home page",
        "browsing_history" => "Checking watch history",
        "browsing_watchlist" => "Browsing watchlist",
        "browsing_calendar" => "Checking release calendar",
        "browsing" => "Exploring",
        _ => "Looking around",
    }
}
