/// Detects the game, its platform client and the presence consumer.
///
/// The scanner runs in one of two modes:
///   - `Enumerating`: walk the whole process table and match by name. Used on
///     the first scan and after any tracked process disappears.
///   - `Cached`: all three PIDs are known, so only those PIDs are inspected.
///     A PID that is gone, or now belongs to a process with another name, marks
///     its target as not running and drops the scanner back to `Enumerating`
///     for the next call.
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

const GAME_NAMES: &[&str] = &["tf_win64.exe", "tf.exe", "hl2.exe", "tf_linux64", "hl2_linux"];
const PLATFORM_NAMES: &[&str] = &["steam.exe", "steam"];
const CONSUMER_NAMES: &[&str] = &[
    "discord.exe",
    "discordcanary.exe",
    "discordptb.exe",
    "discord",
    "discordcanary",
    "discordptb",
];

/// The three processes the daemon cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Game,
    Platform,
    PresenceConsumer,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Game, Target::Platform, Target::PresenceConsumer];

    fn index(self) -> usize {
        match self {
            Target::Game => 0,
            Target::Platform => 1,
            Target::PresenceConsumer => 2,
        }
    }

    /// Lowercase executable names that identify this target.
    pub fn executable_names(self) -> &'static [&'static str] {
        match self {
            Target::Game => GAME_NAMES,
            Target::Platform => PLATFORM_NAMES,
            Target::PresenceConsumer => CONSUMER_NAMES,
        }
    }

    pub fn matches(self, process_name: &str) -> bool {
        let name = process_name.to_lowercase();
        self.executable_names().iter().any(|n| *n == name)
    }
}

/// One entry of the OS process table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
    pub start_time: Option<DateTime<Utc>>,
}

/// Access to the OS process table.
pub trait ProcessTable {
    /// Every process currently running. Processes that cannot be inspected are skipped.
    fn enumerate(&mut self) -> Vec<ProcessInfo>;

    /// A single process by PID, or `None` if it no longer exists.
    fn lookup(&mut self, pid: u32) -> Option<ProcessInfo>;
}

/// [`ProcessTable`] backed by `sysinfo`.
pub struct SysinfoTable {
    sys: System,
}

impl SysinfoTable {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet)
    }

    fn info(pid: Pid, process: &sysinfo::Process) -> ProcessInfo {
        let start = process.start_time();
        ProcessInfo {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            exe: process.exe().map(|p| p.to_path_buf()),
            start_time: if start == 0 {
                None
            } else {
                Utc.timestamp_opt(start as i64, 0).single()
            },
        }
    }
}

impl ProcessTable for SysinfoTable {
    fn enumerate(&mut self) -> Vec<ProcessInfo> {
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());
        self.sys
            .processes()
            .iter()
            .map(|(pid, p)| Self::info(*pid, p))
            .collect()
    }

    fn lookup(&mut self, pid: u32) -> Option<ProcessInfo> {
        let pid = Pid::from_u32(pid);
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, Self::refresh_kind());
        self.sys.process(pid).map(|p| Self::info(pid, p))
    }
}

/// Observed state of a single target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub path: Option<PathBuf>,
    pub start_time: Option<DateTime<Utc>>,
}

impl ProcessStatus {
    fn found(info: ProcessInfo) -> Self {
        Self {
            running: true,
            pid: Some(info.pid),
            path: info.exe,
            start_time: info.start_time,
        }
    }
}

/// Result of one scan: exactly one status per [`Target`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessSnapshot {
    statuses: [ProcessStatus; 3],
}

impl ProcessSnapshot {
    pub fn get(&self, target: Target) -> &ProcessStatus {
        &self.statuses[target.index()]
    }

    pub fn game(&self) -> &ProcessStatus {
        self.get(Target::Game)
    }

    pub fn platform(&self) -> &ProcessStatus {
        self.get(Target::Platform)
    }

    pub fn presence_consumer(&self) -> &ProcessStatus {
        self.get(Target::PresenceConsumer)
    }

    fn set(&mut self, target: Target, status: ProcessStatus) {
        self.statuses[target.index()] = status;
    }

    fn all_running(&self) -> bool {
        self.statuses.iter().all(|s| s.running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Enumerating,
    /// PIDs of game, platform client and presence consumer.
    Cached([u32; 3]),
}

pub struct ProcessScanner<T: ProcessTable> {
    table: T,
    mode: ScanMode,
    last: ProcessSnapshot,
}

impl<T: ProcessTable> ProcessScanner<T> {
    pub fn new(table: T) -> Self {
        Self {
            table,
            mode: ScanMode::Enumerating,
            last: ProcessSnapshot::default(),
        }
    }

    #[cfg(test)]
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    #[cfg(test)]
    pub(crate) fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    pub fn scan(&mut self) -> ProcessSnapshot {
        let snapshot = match self.mode {
            ScanMode::Enumerating => self.enumerate(),
            ScanMode::Cached(pids) => self.check_cached(pids),
        };

        for target in Target::ALL {
            let (was, now) = (self.last.get(target).running, snapshot.get(target).running);
            if was != now {
                tracing::info!(
                    target: "process_monitor",
                    "{target:?} {}",
                    if now { "started" } else { "stopped" }
                );
            }
        }
        self.last = snapshot.clone();
        snapshot
    }

    fn enumerate(&mut self) -> ProcessSnapshot {
        let processes = self.table.enumerate();
        let mut snapshot = ProcessSnapshot::default();

        for target in Target::ALL {
            if let Some(info) = processes.iter().find(|p| target.matches(&p.name)) {
                snapshot.set(target, ProcessStatus::found(info.clone()));
            }
        }

        if snapshot.all_running() {
            let pid = |t: Target| snapshot.get(t).pid.unwrap_or_default();
            self.mode = ScanMode::Cached([
                pid(Target::Game),
                pid(Target::Platform),
                pid(Target::PresenceConsumer),
            ]);
            tracing::debug!(target: "process_monitor", "All targets found, switching to PID fast path");
        }
        snapshot
    }

    fn check_cached(&mut self, pids: [u32; 3]) -> ProcessSnapshot {
        let mut snapshot = ProcessSnapshot::default();

        for target in Target::ALL {
            let pid = pids[target.index()];
            match self.table.lookup(pid) {
                Some(info) if target.matches(&info.name) => {
                    snapshot.set(target, ProcessStatus::found(info));
                }
                Some(info) => {
                    tracing::debug!(
                        target: "process_monitor",
                        "PID {pid} was reused by {}, {target:?} is gone",
                        info.name
                    );
                }
                None => {}
            }
        }

        if !snapshot.all_running() {
            self.mode = ScanMode::Enumerating;
        }
        snapshot
    }
}
