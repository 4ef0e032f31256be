/// Display-ready game state with change tracking.
///
/// Every setter is compare-and-set: writing the current value is a no-op,
/// anything else updates the field and marks the state dirty. [`GameState::activity`]
/// is the only reader that acknowledges a change; it clears the dirty flag.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::console_rules::{NOT_QUEUED, UNSELECTED_CLASS};
use crate::custom_maps::CustomMapResolver;
use crate::gamemodes::{GamemodeTable, MapClassification, UNKNOWN_GAMEMODE_CODE};
use crate::log_scanner::LogSnapshot;

pub const IN_MENUS_LINE: &str = "In menus";
pub const MENU_IMAGE: &str = "main_menu";
pub const QUEUE_IMAGE: &str = "in_queue";
pub const LOGO_IMAGE: &str = "tf2_logo";
pub const DEFAULT_LINE: &str = "Team Fortress 2";
pub const UNKNOWN_SERVER: &str = "Unknown server";

/// What a line of the activity shows while on a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    ServerName,
    PlayerCount,
    TimeOnMap,
    Class,
    Map,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySettings {
    pub top_line: LineSource,
    pub bottom_line: LineSource,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            top_line: LineSource::Map,
            bottom_line: LineSource::Class,
        }
    }
}

impl DisplaySettings {
    fn shows(&self, source: LineSource) -> bool {
        self.top_line == source || self.bottom_line == source
    }
}

/// The snapshot handed to the presence publisher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub top_line: String,
    pub bottom_line: String,
    pub large_image: String,
    pub small_image: String,
}

pub struct GameState {
    in_menus: bool,
    map: String,
    /// Friendly map name, e.g. "Badwater Basin".
    map_name: String,
    /// "Map: <name>" label, with " (hosting)" appended on a listen server.
    map_display: String,
    player_class: String,
    queued_state: String,
    hosting: bool,
    server_name: String,
    player_count: (u32, u32),
    gamemode_code: String,
    gamemode_display: String,
    is_custom_map: bool,
    map_has_art: bool,
    session_start_time: DateTime<Utc>,
    map_entered_time: DateTime<Utc>,
    dirty: bool,

    display: DisplaySettings,
    table: GamemodeTable,
    resolver: Option<CustomMapResolver>,
}

impl GameState {
    pub fn new(
        table: GamemodeTable,
        resolver: Option<CustomMapResolver>,
        display: DisplaySettings,
    ) -> Self {
        let now = Utc::now();
        Self {
            in_menus: true,
            map: String::new(),
            map_name: String::new(),
            map_display: String::new(),
            player_class: UNSELECTED_CLASS.to_string(),
            queued_state: NOT_QUEUED.to_string(),
            hosting: false,
            server_name: String::new(),
            player_count: (0, 0),
            gamemode_code: String::new(),
            gamemode_display: String::new(),
            is_custom_map: false,
            map_has_art: false,
            session_start_time: now,
            map_entered_time: now,
            // Nothing has been published yet.
            dirty: true,
            display,
            table,
            resolver,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn in_menus(&self) -> bool {
        self.in_menus
    }

    pub fn map(&self) -> &str {
        &self.map
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    #[cfg(test)]
    pub fn map_display(&self) -> &str {
        &self.map_display
    }

    pub fn player_class(&self) -> &str {
        &self.player_class
    }

    pub fn queued_state(&self) -> &str {
        &self.queued_state
    }

    pub fn hosting(&self) -> bool {
        self.hosting
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn player_count(&self) -> (u32, u32) {
        self.player_count
    }

    pub fn gamemode_code(&self) -> &str {
        &self.gamemode_code
    }

    pub fn gamemode_display(&self) -> &str {
        &self.gamemode_display
    }

    pub fn is_custom_map(&self) -> bool {
        self.is_custom_map
    }

    pub fn session_start_time(&self) -> DateTime<Utc> {
        self.session_start_time
    }

    /// Starts a new play session, e.g. after the game was (re)launched.
    pub fn start_session(&mut self) {
        self.session_start_time = Utc::now();
        self.dirty = true;
    }

    pub fn set_display(&mut self, display: DisplaySettings) {
        if self.display != display {
            self.display = display;
            self.dirty = true;
        }
    }

    pub fn set_resolver(&mut self, resolver: Option<CustomMapResolver>) {
        self.resolver = resolver;
    }

    pub fn resolver_mut(&mut self) -> Option<&mut CustomMapResolver> {
        self.resolver.as_mut()
    }

    /// Entering menus clears every map-scoped field in one step.
    pub fn set_in_menus(&mut self, in_menus: bool) {
        if self.in_menus == in_menus {
            return;
        }
        self.in_menus = in_menus;
        if in_menus {
            self.map.clear();
            self.map_name.clear();
            self.map_display.clear();
            self.player_class = UNSELECTED_CLASS.to_string();
            self.hosting = false;
            self.server_name.clear();
            self.player_count = (0, 0);
            self.gamemode_code.clear();
            self.gamemode_display.clear();
            self.is_custom_map = false;
            self.map_has_art = false;
            tracing::debug!(target: "game_state", "Entered menus");
        }
        self.dirty = true;
    }

    pub fn set_hosting(&mut self, hosting: bool) {
        if self.hosting == hosting {
            return;
        }
        self.hosting = hosting;
        if !self.map.is_empty() {
            self.relabel_map();
        }
        self.dirty = true;
    }

    /// Changes the map, resolving its gamemode and rebuilding the map label
    /// with the current hosting flag.
    pub fn set_map(&mut self, map: &str) {
        if self.map == map {
            return;
        }
        self.map = map.to_string();
        self.map_entered_time = Utc::now();
        self.dirty = true;

        if map.is_empty() {
            self.map_name.clear();
            self.map_display.clear();
            self.gamemode_code.clear();
            self.gamemode_display.clear();
            self.is_custom_map = false;
            self.map_has_art = false;
            return;
        }

        let classification = self.classify(map);
        tracing::info!(
            target: "game_state",
            "Map changed to {map} ({}, custom: {})",
            classification.gamemode_code,
            classification.is_custom
        );
        self.map_name = classification.display_name;
        self.gamemode_code = classification.gamemode_code;
        self.gamemode_display = classification.gamemode_display;
        self.is_custom_map = classification.is_custom;
        self.map_has_art = classification.has_art;
        self.relabel_map();
    }

    pub fn set_class(&mut self, class: &str) {
        if self.player_class != class {
            self.player_class = class.to_string();
            self.dirty = true;
        }
    }

    pub fn set_queued_state(&mut self, queued_state: &str) {
        if self.queued_state != queued_state {
            self.queued_state = queued_state.to_string();
            self.dirty = true;
        }
    }

    pub fn set_server_name(&mut self, server_name: &str) {
        if self.server_name != server_name {
            self.server_name = server_name.to_string();
            self.dirty = true;
        }
    }

    pub fn set_player_count(&mut self, current: u32, max: u32) {
        if self.player_count != (current, max) {
            self.player_count = (current, max);
            self.dirty = true;
        }
    }

    /// Applies one log scan. The order matters: the hosting flag must be
    /// settled before the map label is built.
    pub fn apply(&mut self, log: &LogSnapshot) {
        self.set_in_menus(log.in_menus());
        self.set_hosting(log.hosting);
        self.set_map(&log.map);
        self.set_class(&log.class);
        self.set_queued_state(&log.queued_state);
        self.set_server_name(&log.server_name);
        self.set_player_count(log.player_count.0, log.player_count.1);
    }

    /// Builds the activity snapshot and acknowledges the current state.
    pub fn activity(&mut self) -> Activity {
        let activity = if self.in_menus {
            let queued = self.queued_state != NOT_QUEUED;
            Activity {
                top_line: IN_MENUS_LINE.to_string(),
                bottom_line: non_empty("queued state", &self.queued_state, NOT_QUEUED),
                large_image: if queued { QUEUE_IMAGE } else { MENU_IMAGE }.to_string(),
                small_image: LOGO_IMAGE.to_string(),
            }
        } else {
            let large_image = if self.is_custom_map || !self.map_has_art {
                non_empty("gamemode code", &self.gamemode_code, UNKNOWN_GAMEMODE_CODE)
            } else {
                self.map.clone()
            };
            let small_image = if self.player_class == UNSELECTED_CLASS {
                LOGO_IMAGE.to_string()
            } else {
                non_empty("class", &self.player_class.to_lowercase(), LOGO_IMAGE)
            };
            Activity {
                top_line: non_empty("top line", &self.line(self.display.top_line), DEFAULT_LINE),
                bottom_line: non_empty(
                    "bottom line",
                    &self.line(self.display.bottom_line),
                    DEFAULT_LINE,
                ),
                large_image,
                small_image,
            }
        };

        // Elapsed time keeps changing without any event.
        self.dirty = self.display.shows(LineSource::TimeOnMap);
        activity
    }

    fn line(&self, source: LineSource) -> String {
        match source {
            LineSource::ServerName if self.hosting => "Hosting a server".to_string(),
            LineSource::ServerName => {
                format!("Server: {}", non_empty("server name", &self.server_name, UNKNOWN_SERVER))
            }
            LineSource::PlayerCount => {
                format!("Players: {}/{}", self.player_count.0, self.player_count.1)
            }
            LineSource::TimeOnMap => {
                let elapsed = Utc::now().signed_duration_since(self.map_entered_time);
                format!("Time on map: {}", format_elapsed(elapsed.num_seconds().max(0)))
            }
            LineSource::Class => format!("Class: {}", self.player_class),
            LineSource::Map => self.map_display.clone(),
        }
    }

    fn classify(&mut self, map: &str) -> MapClassification {
        let classification = self.table.resolve(map);
        if !classification.is_unknown() {
            return classification;
        }
        match self.resolver.as_mut() {
            Some(resolver) => resolver.resolve(map),
            None => classification,
        }
    }

    fn relabel_map(&mut self) {
        let name = if self.map_name.is_empty() {
            &self.map
        } else {
            &self.map_name
        };
        self.map_display = if self.hosting {
            format!("Map: {name} (hosting)")
        } else {
            format!("Map: {name}")
        };
    }
}

fn non_empty(field: &str, value: &str, default: &str) -> String {
    if value.trim().is_empty() {
        tracing::warn!(target: "game_state", "Empty {field}, showing {default:?} instead");
        default.to_string()
    } else {
        value.to_string()
    }
}

fn format_elapsed(secs: i64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console_rules::RawEvent;
    use crate::custom_maps::{ClassificationClient, FetchError};
    use crate::map_cache::MemoryCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn state() -> GameState {
        GameState::new(GamemodeTable::builtin(), None, DisplaySettings::default())
    }

    fn on_map(map: &str, class: &str) -> LogSnapshot {
        LogSnapshot {
            map: map.to_string(),
            class: class.to_string(),
            ..LogSnapshot::default()
        }
    }

    // ── setters / dirty flag ──────────────────────────────────────────────────

    #[test]
    fn new_state_is_dirty_in_menus() {
        let s = state();
        assert!(s.is_dirty());
        assert!(s.in_menus());
        assert_eq!(s.player_class(), UNSELECTED_CLASS);
        assert_eq!(s.queued_state(), NOT_QUEUED);
    }

    #[test]
    fn setting_the_same_value_stays_clean() {
        let mut s = state();
        s.activity();
        s.set_class(UNSELECTED_CLASS);
        s.set_queued_state(NOT_QUEUED);
        s.set_player_count(0, 0);
        s.set_in_menus(true);
        assert!(!s.is_dirty());

        s.set_server_name("Somewhere");
        assert!(s.is_dirty());
    }

    #[test]
    fn activity_clears_dirty_flag() {
        let mut s = state();
        s.apply(&on_map("pl_badwater", "Pyro"));
        assert!(s.is_dirty());
        s.activity();
        assert!(!s.is_dirty());
        s.apply(&on_map("pl_badwater", "Pyro"));
        assert!(!s.is_dirty());
    }

    #[test]
    fn time_on_map_keeps_state_dirty() {
        let mut s = GameState::new(
            GamemodeTable::builtin(),
            None,
            DisplaySettings {
                top_line: LineSource::Map,
                bottom_line: LineSource::TimeOnMap,
            },
        );
        s.apply(&on_map("pl_badwater", "Pyro"));
        let a = s.activity();
        assert!(a.bottom_line.starts_with("Time on map: 0:0"));
        assert!(s.is_dirty());
    }

    // ── apply ─────────────────────────────────────────────────────────────────

    #[test]
    fn badwater_pyro() {
        let mut s = state();
        s.apply(&on_map("pl_badwater", "Pyro"));
        assert_eq!(s.map(), "pl_badwater");
        assert_eq!(s.player_class(), "Pyro");
        assert_eq!(s.gamemode_code(), "payload");
        assert_eq!(s.gamemode_display(), "Payload");
        assert_eq!(s.map_display(), "Map: Badwater Basin");
        assert!(!s.is_custom_map());
    }

    #[test]
    fn hosting_label_uses_flag_applied_in_same_tick() {
        let mut s = state();
        let mut log = on_map("cp_well", "Scout");
        log.hosting = true;
        s.apply(&log);
        assert_eq!(s.map_display(), "Map: Well (hosting)");

        log.hosting = false;
        s.apply(&log);
        assert_eq!(s.map_display(), "Map: Well");
    }

    #[test]
    fn entering_menus_resets_everything_at_once() {
        let mut s = state();
        let mut log = on_map("koth_viaduct", "Medic");
        log.hosting = true;
        log.server_name = "My Server".to_string();
        log.player_count = (10, 24);
        s.apply(&log);
        s.activity();

        s.apply(&LogSnapshot::default());
        assert!(s.in_menus());
        assert_eq!(s.map(), "");
        assert_eq!(s.player_class(), UNSELECTED_CLASS);
        assert!(!s.hosting());
        assert_eq!(s.server_name(), "");
        assert_eq!(s.player_count(), (0, 0));
        assert!(!s.is_custom_map());
        assert!(s.is_dirty());
    }

    #[test]
    fn menus_reset_after_any_event_sequence() {
        let sequences: Vec<Vec<RawEvent>> = vec![
            vec![RawEvent::MapChanged("pl_upward".into()), RawEvent::Disconnected],
            vec![
                RawEvent::MapChanged("cp_mystery".into()),
                RawEvent::ClassSelected("Spy".into()),
                RawEvent::HostingStarted,
                RawEvent::PlayerCountReported(3, 12),
                RawEvent::Disconnected,
            ],
            vec![
                RawEvent::ServerNameReported("x".into()),
                RawEvent::EnteredQueue("Casual".into()),
                RawEvent::Disconnected,
            ],
        ];

        for events in sequences {
            let mut s = state();
            let mut log = LogSnapshot::default();
            for event in &events {
                match event {
                    RawEvent::MapChanged(m) => log = on_map(m, UNSELECTED_CLASS),
                    RawEvent::ClassSelected(c) => log.class = c.clone(),
                    RawEvent::HostingStarted => log.hosting = true,
                    RawEvent::PlayerCountReported(c, m) => log.player_count = (*c, *m),
                    RawEvent::ServerNameReported(n) => log.server_name = n.clone(),
                    RawEvent::EnteredQueue(q) => log.queued_state = q.clone(),
                    RawEvent::Disconnected => log = LogSnapshot::default(),
                    _ => {}
                }
                s.apply(&log);
            }
            assert_eq!(s.map(), "");
            assert_eq!(s.player_class(), UNSELECTED_CLASS);
            assert!(!s.hosting());
            assert_eq!(s.server_name(), "");
            assert_eq!(s.player_count(), (0, 0));
        }
    }

    // ── activity ──────────────────────────────────────────────────────────────

    #[test]
    fn menu_activity() {
        let mut s = state();
        let a = s.activity();
        assert_eq!(
            a,
            Activity {
                top_line: IN_MENUS_LINE.to_string(),
                bottom_line: NOT_QUEUED.to_string(),
                large_image: MENU_IMAGE.to_string(),
                small_image: LOGO_IMAGE.to_string(),
            }
        );

        s.set_queued_state("Queued for Casual");
        let a = s.activity();
        assert_eq!(a.bottom_line, "Queued for Casual");
        assert_eq!(a.large_image, QUEUE_IMAGE);
    }

    #[test]
    fn official_map_activity_uses_map_and_class_images() {
        let mut s = state();
        s.apply(&on_map("pl_badwater", "Pyro"));
        let a = s.activity();
        assert_eq!(a.top_line, "Map: Badwater Basin");
        assert_eq!(a.bottom_line, "Class: Pyro");
        assert_eq!(a.large_image, "pl_badwater");
        assert_eq!(a.small_image, "pyro");
    }

    #[test]
    fn custom_map_activity_uses_gamemode_image() {
        let mut s = state();
        s.apply(&on_map("koth_community_b2", UNSELECTED_CLASS));
        let a = s.activity();
        assert_eq!(a.large_image, "koth");
        assert_eq!(a.small_image, LOGO_IMAGE);
        assert_eq!(a.top_line, "Map: koth_community_b2");
    }

    #[test]
    fn official_map_without_art_uses_gamemode_image() {
        let mut s = state();
        s.apply(&on_map("koth_viaduct_event", "Heavy"));
        assert_eq!(s.activity().large_image, "koth");
    }

    #[test]
    fn unknown_map_uses_unknown_image() {
        let mut s = state();
        s.apply(&on_map("cp_unknownmap_final", "Spy"));
        assert_eq!(s.gamemode_code(), UNKNOWN_GAMEMODE_CODE);
        assert_eq!(s.activity().large_image, UNKNOWN_GAMEMODE_CODE);
    }

    #[test]
    fn empty_server_name_is_substituted() {
        let mut s = GameState::new(
            GamemodeTable::builtin(),
            None,
            DisplaySettings {
                top_line: LineSource::ServerName,
                bottom_line: LineSource::PlayerCount,
            },
        );
        let mut log = on_map("pl_badwater", "Pyro");
        log.player_count = (5, 24);
        s.apply(&log);
        let a = s.activity();
        assert_eq!(a.top_line, format!("Server: {UNKNOWN_SERVER}"));
        assert_eq!(a.bottom_line, "Players: 5/24");
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(0), "0:00");
        assert_eq!(format_elapsed(75), "1:15");
        assert_eq!(format_elapsed(3_725), "1:02:05");
    }

    // ── remote resolution ─────────────────────────────────────────────────────

    struct CountingClient(Arc<AtomicUsize>);

    impl ClassificationClient for CountingClient {
        fn fetch_gamemodes(&self, _map_id: &str) -> Result<Vec<String>, FetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["attack-defend".to_string()])
        }
    }

    #[test]
    fn resolver_only_consulted_when_heuristics_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = CustomMapResolver::new(
            Box::new(MemoryCacheStore::new()),
            Box::new(CountingClient(Arc::clone(&calls))),
            24,
        );
        let mut s = GameState::new(GamemodeTable::builtin(), Some(resolver), DisplaySettings::default());

        s.apply(&on_map("pl_badwater", "Pyro"));
        s.apply(&on_map("koth_community_b2", "Pyro"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        s.apply(&on_map("cp_mystery_rc1", "Pyro"));
        assert_eq!(s.gamemode_code(), "attack-defend");
        assert!(s.is_custom_map());

        s.apply(&on_map("pl_badwater", "Pyro"));
        s.apply(&on_map("cp_mystery_rc1", "Pyro"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
