/// One polling cycle: processes → console log → game state → publisher.
///
/// The tracker is the only mutator of [`GameState`] and runs on a single
/// thread; the tokio side only decides *when* a tick happens.
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::console_rules::NOT_QUEUED;
use crate::custom_maps::{CustomMapResolver, TeamworkClient};
use crate::game_state::GameState;
use crate::gamemodes::GamemodeTable;
use crate::log_scanner::{LogScanner, ScanError};
use crate::map_cache::{JsonFileCacheStore, MapCacheStore, MemoryCacheStore};
use crate::paths;
use crate::process_monitor::{ProcessScanner, ProcessStatus, ProcessTable};
use crate::status::{PresencePublisher, TrackerState};
use crate::steam;

pub const LOG_MISSING_HELP: &str =
    "Team Fortress 2's console log was not found. Add -condebug to the game's launch options and restart it.";
pub const INSTALL_UNKNOWN_HELP: &str =
    "Could not locate the Team Fortress 2 install directory. Set [log] path in config.toml.";

/// Builds the remote classifier from `config`, or `None` when remote lookup
/// is disabled, there is no API key, or the HTTP client cannot be created.
pub fn build_resolver(config: &Config, cache_path: &Path) -> Option<CustomMapResolver> {
    let api_key = config.api_key()?;
    let client = match TeamworkClient::new(api_key, config.request_timeout()) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(target: "tracker", "Remote map classification disabled: {e}");
            return None;
        }
    };
    let parent = cache_path.parent().map(std::fs::create_dir_all);
    let store: Box<dyn MapCacheStore> = if let Some(Err(e)) = parent {
        tracing::warn!(target: "tracker", "Custom map classifications will not persist: {e}");
        Box::new(MemoryCacheStore::new())
    } else {
        let store = JsonFileCacheStore::open(cache_path);
        tracing::debug!(
            target: "tracker",
            "Custom map cache {} holds {} entries",
            store.path().display(),
            store.len()
        );
        Box::new(store)
    };
    Some(CustomMapResolver::new(
        store,
        Box::new(client),
        config.cache_ttl_hours(),
    ))
}

pub struct Tracker<T: ProcessTable, P: PresencePublisher> {
    processes: ProcessScanner<T>,
    log: LogScanner,
    state: GameState,
    publisher: P,
    config: Config,
    cache_path: PathBuf,
    steam_root: Option<PathBuf>,
    steam_usernames: Vec<String>,
    game_running: bool,
    force_log_scan: bool,
    last_state: Option<TrackerState>,
}

impl<T: ProcessTable, P: PresencePublisher> Tracker<T, P> {
    pub fn new(table: T, publisher: P, config: Config, cache_path: PathBuf) -> Self {
        let resolver = build_resolver(&config, &cache_path);
        let gamemodes = GamemodeTable::builtin();
        tracing::debug!(
            target: "tracker",
            "Loaded {} official maps, remote lookup {}",
            gamemodes.len(),
            if resolver.is_some() { "enabled" } else { "disabled" }
        );
        let state = GameState::new(gamemodes, resolver, config.display_settings());
        Self {
            processes: ProcessScanner::new(table),
            log: LogScanner::new(),
            state,
            publisher,
            config,
            cache_path,
            steam_root: None,
            steam_usernames: Vec::new(),
            game_running: false,
            force_log_scan: true,
            last_state: None,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Swaps in a reloaded config. The next log scan is forced so display
    /// settings that affect parsing take effect immediately.
    pub fn apply_config(&mut self, config: Config) {
        if config == self.config {
            return;
        }
        self.state.set_display(config.display_settings());

        let (old, new) = (&self.config.custom_maps, &config.custom_maps);
        let ttl_only = old.remote_lookup == new.remote_lookup
            && old.api_key == new.api_key
            && old.request_timeout_secs == new.request_timeout_secs;
        if old != new {
            let ttl = config.cache_ttl_hours();
            let updated = ttl_only
                && self
                    .state
                    .resolver_mut()
                    .map(|resolver| resolver.set_ttl_hours(ttl))
                    .is_some();
            if !updated {
                self.state
                    .set_resolver(build_resolver(&config, &self.cache_path));
            }
        }
        self.config = config;
        self.force_log_scan = true;
        tracing::info!(target: "tracker", "Applied reloaded config");
    }

    pub fn tick(&mut self) -> TrackerState {
        let state = self.run_tick();
        if self.last_state != Some(state) {
            tracing::info!(target: "tracker", "State: {state:?}");
        }
        self.last_state = Some(state);
        state
    }

    /// Clears the published presence before the daemon exits.
    pub fn shutdown(&mut self) {
        self.publisher.clear(TrackerState::WaitingForGame, None);
    }

    fn run_tick(&mut self) -> TrackerState {
        let snapshot = self.processes.scan();
        let game = snapshot.game();

        if !game.running {
            if self.game_running {
                self.state.set_in_menus(true);
                self.state.set_queued_state(NOT_QUEUED);
            }
            self.game_running = false;
            self.force_log_scan = true;
            self.publisher.clear(TrackerState::WaitingForGame, None);
            return TrackerState::WaitingForGame;
        }
        if !self.game_running {
            self.game_running = true;
            self.state.start_session();
        }

        self.refresh_steam_usernames(snapshot.platform());

        let Some(log_path) = self.log_path(game) else {
            self.publisher
                .clear(TrackerState::LogMissing, Some(INSTALL_UNKNOWN_HELP.to_string()));
            return TrackerState::LogMissing;
        };

        let usernames = self.usernames();
        let settings = self.config.log_settings();
        match self
            .log
            .scan(&log_path, &usernames, game.start_time, &settings, self.force_log_scan)
        {
            Ok(log) => {
                self.force_log_scan = false;
                self.state.apply(&log);
                if self.state.is_dirty() {
                    let (players, max_players) = self.state.player_count();
                    tracing::debug!(
                        target: "tracker",
                        in_menus = self.state.in_menus(),
                        map = self.state.map(),
                        map_name = self.state.map_name(),
                        gamemode = self.state.gamemode_code(),
                        gamemode_name = self.state.gamemode_display(),
                        custom = self.state.is_custom_map(),
                        class = self.state.player_class(),
                        queued = self.state.queued_state(),
                        hosting = self.state.hosting(),
                        server = self.state.server_name(),
                        players,
                        max_players,
                        "Game state changed"
                    );
                }
            }
            Err(ScanError::LogMissing(path)) => {
                tracing::warn!(target: "tracker", "Console log missing at {}", path.display());
                self.force_log_scan = true;
                self.publisher
                    .clear(TrackerState::LogMissing, Some(LOG_MISSING_HELP.to_string()));
                return TrackerState::LogMissing;
            }
        }

        if !snapshot.presence_consumer().running {
            self.publisher.clear(TrackerState::WaitingForConsumer, None);
            return TrackerState::WaitingForConsumer;
        }

        // A consumer that just (re)appeared needs the current activity even if nothing changed.
        if self.state.is_dirty() || self.last_state != Some(TrackerState::Active) {
            let activity = self.state.activity();
            tracing::debug!(target: "tracker", "Publishing {activity:?}");
            self.publisher
                .publish(&activity, self.state.session_start_time());
        }
        TrackerState::Active
    }

    fn log_path(&self, game: &ProcessStatus) -> Option<PathBuf> {
        if let Some(path) = &self.config.log.path {
            return Some(path.clone());
        }
        game.path.as_deref().and_then(paths::console_log_from_game_exe)
    }

    fn refresh_steam_usernames(&mut self, platform: &ProcessStatus) {
        let root = platform.path.as_deref().and_then(paths::steam_root_from_exe);
        if root.is_none() || root == self.steam_root {
            return;
        }
        if let Some(root) = &root {
            self.steam_usernames = steam::read_usernames(root);
            tracing::debug!(
                target: "tracker",
                "Known usernames from Steam: {:?}",
                self.steam_usernames
            );
        }
        self.steam_root = root;
    }

    fn usernames(&self) -> Vec<String> {
        let mut names = self.config.log.usernames.clone();
        for name in &self.steam_usernames {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_state::Activity;
    use crate::process_monitor::ProcessInfo;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeTable {
        processes: HashMap<u32, ProcessInfo>,
    }

    impl FakeTable {
        fn add(&mut self, pid: u32, name: &str, exe: Option<PathBuf>) {
            self.processes.insert(
                pid,
                ProcessInfo {
                    pid,
                    name: name.to_string(),
                    exe,
                    start_time: None,
                },
            );
        }
    }

    impl ProcessTable for FakeTable {
        fn enumerate(&mut self) -> Vec<ProcessInfo> {
            self.processes.values().cloned().collect()
        }

        fn lookup(&mut self, pid: u32) -> Option<ProcessInfo> {
            self.processes.get(&pid).cloned()
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: Vec<Activity>,
        cleared: Vec<(TrackerState, Option<String>)>,
    }

    impl PresencePublisher for RecordingPublisher {
        fn publish(&mut self, activity: &Activity, _session_start: DateTime<Utc>) {
            self.published.push(activity.clone());
        }

        fn clear(&mut self, state: TrackerState, message: Option<String>) {
            self.cleared.push((state, message));
        }
    }

    fn offline_config() -> Config {
        let mut config = Config::default();
        config.custom_maps.remote_lookup = false;
        config
    }

    /// A game install in a temp dir, with the game and Steam running.
    fn setup(consumer: bool) -> (tempfile::TempDir, Tracker<FakeTable, RecordingPublisher>) {
        let dir = tempfile::tempdir().unwrap();
        let game_dir = dir.path().join("Team Fortress 2");
        std::fs::create_dir_all(game_dir.join("tf")).unwrap();

        let mut table = FakeTable::default();
        table.add(10, "tf_linux64", Some(game_dir.join("tf_linux64")));
        table.add(20, "steam", None);
        if consumer {
            table.add(30, "Discord", None);
        }

        let cache = dir.path().join("custom_maps.json");
        let tracker = Tracker::new(table, RecordingPublisher::default(), offline_config(), cache);
        (dir, tracker)
    }

    fn write_console(dir: &tempfile::TempDir, content: &str) {
        let path = dir.path().join("Team Fortress 2").join("tf").join("console.log");
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn no_game_waits_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = Tracker::new(
            FakeTable::default(),
            RecordingPublisher::default(),
            offline_config(),
            dir.path().join("custom_maps.json"),
        );
        assert_eq!(tracker.tick(), TrackerState::WaitingForGame);
        assert_eq!(tracker.publisher().cleared, vec![(TrackerState::WaitingForGame, None)]);
        assert!(tracker.publisher().published.is_empty());
    }

    #[test]
    fn missing_console_log_asks_for_condebug() {
        let (_dir, mut tracker) = setup(true);
        assert_eq!(tracker.tick(), TrackerState::LogMissing);
        let (state, message) = tracker.publisher().cleared.last().unwrap();
        assert_eq!(*state, TrackerState::LogMissing);
        assert_eq!(message.as_deref(), Some(LOG_MISSING_HELP));
    }

    #[test]
    fn publishes_activity_from_console_log() {
        let (dir, mut tracker) = setup(true);
        write_console(&dir, "Map: pl_badwater\nPyro selected\n");

        assert_eq!(tracker.tick(), TrackerState::Active);
        let published = &tracker.publisher().published;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].top_line, "Map: Badwater Basin");
        assert_eq!(published[0].small_image, "pyro");
        assert_eq!(tracker.state().gamemode_code(), "payload");
    }

    #[test]
    fn unchanged_log_is_not_republished() {
        let (dir, mut tracker) = setup(true);
        write_console(&dir, "Map: pl_badwater\nPyro selected\n");
        tracker.tick();
        tracker.tick();
        tracker.tick();
        assert_eq!(tracker.publisher().published.len(), 1);
    }

    #[test]
    fn consumer_appearing_gets_current_activity() {
        let (dir, mut tracker) = setup(false);
        write_console(&dir, "Map: koth_viaduct\n");

        assert_eq!(tracker.tick(), TrackerState::WaitingForConsumer);
        assert!(tracker.publisher().published.is_empty());

        tracker.processes_mut().add(30, "Discord.exe", None);
        assert_eq!(tracker.tick(), TrackerState::Active);
        assert_eq!(tracker.publisher().published.len(), 1);
        assert_eq!(tracker.publisher().published[0].large_image, "koth_viaduct");
    }

    #[test]
    fn game_exit_resets_to_menus() {
        let (dir, mut tracker) = setup(true);
        write_console(&dir, "Map: pl_badwater\n");
        tracker.tick();
        assert!(!tracker.state().in_menus());

        tracker.processes_mut().processes.remove(&10);
        assert_eq!(tracker.tick(), TrackerState::WaitingForGame);
        assert!(tracker.state().in_menus());
        assert_eq!(tracker.state().map(), "");
    }

    #[test]
    fn config_override_path_is_used() {
        let (dir, mut tracker) = setup(true);
        let custom = dir.path().join("elsewhere.log");
        std::fs::write(&custom, "Map: ctf_2fort\n").unwrap();

        let mut config = offline_config();
        config.log.path = Some(custom);
        tracker.apply_config(config);

        assert_eq!(tracker.tick(), TrackerState::Active);
        assert_eq!(tracker.state().map(), "ctf_2fort");
    }

    #[test]
    fn configured_usernames_detect_own_leave() {
        let (dir, mut tracker) = setup(true);
        write_console(&dir, "Map: pl_badwater\nAlice left the game (Disconnect by user.)\n");
        tracker.tick();
        assert!(!tracker.state().in_menus());

        let mut config = offline_config();
        config.log.usernames = vec!["Alice".to_string()];
        tracker.apply_config(config);
        tracker.tick();
        assert!(tracker.state().in_menus());
    }

    #[test]
    fn unusable_cache_dir_keeps_classifications_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();

        let mut config = Config::default();
        config.custom_maps.api_key = "key".to_string();
        assert!(build_resolver(&config, &blocker.join("custom_maps.json")).is_some());
        assert!(build_resolver(&offline_config(), &blocker.join("custom_maps.json")).is_none());
    }

    impl<P: PresencePublisher> Tracker<FakeTable, P> {
        fn processes_mut(&mut self) -> &mut FakeTable {
            self.processes.table_mut()
        }

        fn state(&self) -> &GameState {
            &self.state
        }
    }
}
