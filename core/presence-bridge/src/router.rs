//! Upstream message loop.
//!
//! Reads one frame from the extension, handles it to completion (including
//! any blocking daemon round trip), writes at most one reply, then reads the
//! next. Ends cleanly when the extension closes the channel.

use crate::config::Settings;
use crate::error::{BridgeError, Result};
use crate::presence::PresenceStateMachine;
use anime_presence_protocol::{
    read_frame, write_frame, InboundMessage, OutboundMessage, PlaybackUpdate, SettingsPatch,
};
use serde_json::Value;
use std::io::{Read, Write};
use tracing::{debug, error, info, warn};

pub const NO_CLIENT_ID: &str = "No client ID configured";
pub const DAEMON_NOT_RUNNING: &str = "Discord not running";

pub struct MessageRouter {
    settings: Settings,
    presence: PresenceStateMachine,
}

impl MessageRouter {
    pub fn new(settings: Settings, presence: PresenceStateMachine) -> Self {
        Self { settings, presence }
    }

    #[cfg(test)]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[cfg(test)]
    pub fn presence(&self) -> &PresenceStateMachine {
        &self.presence
    }

    /// Runs until end of stream. Only a failed reply write is an error; the
    /// daemon connection is released either way.
    pub fn run<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<()>
    where
        R: Read,
        W: Write,
    {
        let result = self.serve(&mut reader, &mut writer);
        self.shutdown();
        result
    }

    fn serve<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<()>
    where
        R: Read,
        W: Write,
    {
        let startup = self.startup_status();
        reply(writer, &startup)?;

        loop {
            let value = match read_frame(reader) {
                Ok(Some(value)) => value,
                Ok(None) => {
                    info!("Extension closed the channel");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "Unreadable upstream frame; ending session");
                    return Ok(());
                }
            };

            if let Some(message) = self.handle_value(value) {
                reply(writer, &message)?;
            }
        }
    }

    /// One connection attempt before the first frame is read.
    pub fn startup_status(&mut self) -> OutboundMessage {
        if !self.settings.has_client_id() {
            info!("Waiting for a client id from the extension");
            return OutboundMessage::status_with_error(false, NO_CLIENT_ID);
        }
        if self.presence.ensure_connected() {
            OutboundMessage::status(true)
        } else {
            OutboundMessage::status_with_error(false, DAEMON_NOT_RUNNING)
        }
    }

    /// Parses and dispatches one frame body. Returns the reply, if any.
    pub fn handle_value(&mut self, value: Value) -> Option<OutboundMessage> {
        let is_anime_state = value.get("type").and_then(Value::as_str) == Some("anime_state");
        match InboundMessage::from_value(value) {
            Ok(message) => self.handle_message(message),
            Err(err) if is_anime_state => {
                let err = BridgeError::Application(err.to_string());
                error!(error = %err, "Discarding playback update");
                self.presence.mark_failed();
                Some(self.status())
            }
            Err(err) => {
                warn!(error = %err, "Ignoring malformed message");
                None
            }
        }
    }

    pub fn handle_message(&mut self, message: InboundMessage) -> Option<OutboundMessage> {
        match message {
            InboundMessage::AnimeState(update) => {
                self.handle_update(update);
                Some(self.status())
            }
            InboundMessage::SettingsUpdate { settings } => {
                self.apply_settings(&settings);
                Some(self.status())
            }
            InboundMessage::SetClientId { client_id } => {
                let patch = SettingsPatch {
                    client_id: Some(client_id),
                    ..SettingsPatch::default()
                };
                self.apply_settings(&patch).then(|| self.status())
            }
            InboundMessage::Ping => {
                if self.settings.has_client_id() && !self.presence.is_connected() {
                    self.presence.ensure_connected();
                    Some(self.status())
                } else {
                    Some(OutboundMessage::Pong)
                }
            }
            InboundMessage::Disconnect => {
                info!("Extension requested presence clear");
                self.presence.clear();
                None
            }
            InboundMessage::Heartbeat => {
                debug!("Heartbeat");
                None
            }
            InboundMessage::Unknown => {
                debug!("Ignoring message with unknown type");
                None
            }
        }
    }

    fn handle_update(&mut self, mut update: PlaybackUpdate) {
        if let Some(patch) = update.settings.take() {
            self.apply_settings(&patch);
        }

        match self.presence.handle_update(&update, &self.settings) {
            Ok(outcome) => debug!(page_state = %update.page_state, ?outcome, "Update handled"),
            Err(err) => warn!(error = %err, "Presence update failed"),
        }
    }

    /// Merges `patch`; switches the daemon client when the id changed.
    /// Returns whether a switch happened.
    pub fn apply_settings(&mut self, patch: &SettingsPatch) -> bool {
        match self.settings.merge(patch) {
            Some(client_id) => {
                info!(client_id = %client_id, "Client id changed; reconnecting");
                self.presence.switch_client(&client_id);
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> OutboundMessage {
        OutboundMessage::status(self.presence.is_connected())
    }

    pub fn shutdown(&mut self) {
        self.presence.shutdown();
    }
}

fn reply<W: Write>(writer: &mut W, message: &OutboundMessage) -> Result<()> {
    write_frame(writer, message).map_err(BridgeError::Framing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ManualClock, MockDaemon};
    use serde_json::json;
    use std::io::Cursor;

    const T0: i64 = 1_760_000_000;

    fn router(daemon: &MockDaemon, clock: &ManualClock, client_id: &str) -> MessageRouter {
        let settings = Settings {
            client_id: client_id.to_string(),
            ..Settings::default()
        };
        let presence =
            PresenceStateMachine::new(daemon.transport(client_id), Box::new(clock.clone()));
        MessageRouter::new(settings, presence)
    }

    fn frames(messages: &[Value]) -> Vec<u8> {
        let mut buf = Vec::new();
        for message in messages {
            write_frame(&mut buf, message).unwrap();
        }
        buf
    }

    fn replies(mut bytes: &[u8]) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(value) = read_frame(&mut bytes).unwrap() {
            out.push(value);
        }
        out
    }

    fn watching_update() -> Value {
        json!({
            "type": "anime_state",
            "pageState": "watching",
            "anime": "Frieren",
            "episodeNumber": "5",
            "episodeTitle": "Episode 5 - Phantoms of the Dead",
            "video": {"playing": true, "paused": false, "duration": 1400, "currentTime": 10}
        })
    }

    #[test]
    fn settings_then_playback_connects_with_new_client_id() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "");

        let input = frames(&[
            json!({"type": "settings_update", "settings": {"clientId": "abc123"}}),
            watching_update(),
        ]);
        let mut output = Vec::new();
        router.run(Cursor::new(input), &mut output).unwrap();

        let replies = replies(&output);
        assert_eq!(
            replies,
            vec![
                json!({"type": "status", "connected": false, "error": "No client ID configured"}),
                json!({"type": "status", "connected": true}),
                json!({"type": "status", "connected": true}),
            ]
        );

        let handshakes = daemon.handshakes();
        assert_eq!(handshakes.len(), 1);
        assert_eq!(handshakes[0], json!({"v": 1, "client_id": "abc123"}));

        let activity = &daemon.activities()[0];
        assert!(!activity["state"].as_str().unwrap().is_empty());
        let start = activity["timestamps"]["start"].as_i64().unwrap();
        assert_eq!(start, T0 - 10);
        assert_eq!(activity["timestamps"]["end"].as_i64().unwrap(), start + 1400);
    }

    #[test]
    fn startup_reports_daemon_not_running() {
        let daemon = MockDaemon::offline();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        assert_eq!(
            router.startup_status(),
            OutboundMessage::status_with_error(false, DAEMON_NOT_RUNNING)
        );

        daemon.set_online(true);
        assert_eq!(router.startup_status(), OutboundMessage::status(true));
    }

    #[test]
    fn rejected_handshake_reports_daemon_not_running() {
        let daemon = MockDaemon::new();
        daemon.reject_handshakes(true);
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        assert_eq!(
            router.startup_status(),
            OutboundMessage::status_with_error(false, DAEMON_NOT_RUNNING)
        );
        assert_eq!(daemon.handshakes().len(), crate::ipc::PIPE_INDEX_COUNT);
    }

    #[test]
    fn ping_reconnects_only_when_disconnected() {
        let daemon = MockDaemon::offline();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        let reply = router.handle_value(json!({"type": "ping"}));
        assert_eq!(reply, Some(OutboundMessage::status(false)));

        daemon.set_online(true);
        let reply = router.handle_value(json!({"type": "ping"}));
        assert_eq!(reply, Some(OutboundMessage::status(true)));

        let reply = router.handle_value(json!({"type": "ping"}));
        assert_eq!(reply, Some(OutboundMessage::Pong));
    }

    #[test]
    fn ping_without_client_id_is_a_plain_pong() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "");

        assert_eq!(
            router.handle_value(json!({"type": "ping"})),
            Some(OutboundMessage::Pong)
        );
        assert_eq!(daemon.connect_attempts(), 0);
    }

    #[test]
    fn settings_update_with_null_patch_still_replies() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        let reply = router.handle_value(json!({"type": "settings_update", "settings": null}));

        assert_eq!(reply, Some(OutboundMessage::status(false)));
        let expected = Settings {
            client_id: "abc123".to_string(),
            ..Settings::default()
        };
        assert_eq!(router.settings(), &expected);
    }

    #[test]
    fn set_client_id_replies_only_on_change() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        let same = router.handle_value(json!({"type": "set_client_id", "clientId": "abc123"}));
        assert_eq!(same, None);

        let changed = router.handle_value(json!({"type": "set_client_id", "clientId": "def456"}));
        assert_eq!(changed, Some(OutboundMessage::status(true)));
        assert_eq!(router.settings().client_id, "def456");
        assert_eq!(daemon.handshakes().last().unwrap()["client_id"], "def456");
    }

    #[test]
    fn disconnect_clears_without_reply_and_keeps_connection() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        router.handle_value(watching_update());
        let reply = router.handle_value(json!({"type": "disconnect"}));

        assert_eq!(reply, None);
        assert_eq!(daemon.activities().last(), Some(&Value::Null));
        assert!(router.presence().is_connected());
        assert!(router.presence().session().is_none());
    }

    #[test]
    fn heartbeat_and_unknown_types_get_no_reply() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        assert_eq!(router.handle_value(json!({})), None);
        assert_eq!(router.handle_value(json!({"type": "telemetry"})), None);
        assert!(daemon.commands().is_empty());
    }

    #[test]
    fn embedded_settings_apply_before_the_update() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        let mut update = watching_update();
        update["settings"] = json!({"showPlayState": false, "showProgressBar": false});
        let reply = router.handle_value(update);

        assert_eq!(reply, Some(OutboundMessage::status(true)));
        assert!(!router.settings().show_play_state);
        assert!(daemon.activities()[0]["assets"].get("small_text").is_none());
    }

    #[test]
    fn unparseable_playback_update_marks_disconnected() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");
        assert!(router.presence.ensure_connected());

        let reply = router.handle_value(json!({"type": "anime_state", "pageState": 42}));

        assert_eq!(reply, Some(OutboundMessage::status(false)));
        assert!(!router.presence().is_connected());
    }

    #[test]
    fn malformed_frame_ends_session_and_releases_daemon() {
        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        let mut input = frames(&[watching_update()]);
        input.extend_from_slice(&3u32.to_le_bytes());
        input.extend_from_slice(b"{{{");
        let mut output = Vec::new();
        router.run(Cursor::new(input), &mut output).unwrap();

        assert_eq!(replies(&output).len(), 2);
        assert!(!router.presence().is_connected());
        assert_eq!(daemon.activities().last(), Some(&Value::Null));
    }

    #[test]
    fn failed_reply_write_is_a_framing_error() {
        struct BrokenWriter;

        impl Write for BrokenWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let daemon = MockDaemon::new();
        let clock = ManualClock::at(T0);
        let mut router = router(&daemon, &clock, "abc123");

        let err = router
            .run(Cursor::new(Vec::new()), BrokenWriter)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Framing(_)));
        assert!(!router.presence().is_connected());
    }
}
