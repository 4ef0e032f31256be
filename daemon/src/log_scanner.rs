/// Incremental scanner for the game's append-only console log.
///
/// Each scan reads at most the last `size_limit_kb` of the file, runs every
/// line through [`console_rules`](crate::console_rules) and folds the
/// resulting events into a [`LogSnapshot`]. The file's modification time is
/// cached so an untouched log is never re-read. Oversized logs are trimmed
/// back down to their tail.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::console_rules::{
    self, queued_label, LineContext, RawEvent, DEVELOPER_NAME, NOT_QUEUED, STANDBY_QUEUED,
    UNSELECTED_CLASS,
};

/// The game rewrites the start of its log while loading; skip scans until it settles.
pub const STARTUP_GRACE_SECS: i64 = 20;

/// Trim once the file grows past this multiple of the read limit…
const TRIM_TRIGGER_FACTOR: u64 = 4;
/// …down to this multiple.
const TRIM_KEEP_FACTOR: u64 = 2;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("console log not found at {}", .0.display())]
    LogMissing(PathBuf),
}

/// Settings the scanner takes from the user's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub size_limit_kb: u64,
    pub trim: bool,
    pub hide_queued_gamemode: bool,
}

/// Values derived from one pass over the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSnapshot {
    /// Empty while in menus.
    pub map: String,
    pub class: String,
    pub queued_state: String,
    pub hosting: bool,
    pub server_name: String,
    pub player_count: (u32, u32),
    /// Events in file order.
    pub events: Vec<RawEvent>,
    /// Last line that changed any value above.
    pub deciding_line: Option<String>,
    pub bytes_read: u64,
    pub lines_read: usize,
}

impl Default for LogSnapshot {
    fn default() -> Self {
        Self {
            map: String::new(),
            class: UNSELECTED_CLASS.to_string(),
            queued_state: NOT_QUEUED.to_string(),
            hosting: false,
            server_name: String::new(),
            player_count: (0, 0),
            events: Vec::new(),
            deciding_line: None,
            bytes_read: 0,
            lines_read: 0,
        }
    }
}

impl LogSnapshot {
    pub fn in_menus(&self) -> bool {
        self.map.is_empty()
    }

    fn reset_connection(&mut self) {
        self.hosting = false;
        self.server_name.clear();
        self.player_count = (0, 0);
    }

    /// Folds one event into the snapshot. Returns true if a value changed.
    fn apply(&mut self, event: &RawEvent, hide_queued_gamemode: bool) -> bool {
        let before = (
            self.map.clone(),
            self.class.clone(),
            self.queued_state.clone(),
            self.hosting,
            self.server_name.clone(),
            self.player_count,
        );

        match event {
            RawEvent::MapChanged(map) => {
                self.map = map.clone();
                self.class = UNSELECTED_CLASS.to_string();
                self.reset_connection();
            }
            RawEvent::ClassSelected(class) => self.class = class.clone(),
            RawEvent::Disconnected => {
                self.map.clear();
                self.class = UNSELECTED_CLASS.to_string();
                self.queued_state = NOT_QUEUED.to_string();
                self.reset_connection();
            }
            RawEvent::EnteredQueue(match_type) => {
                self.queued_state = queued_label(match_type, hide_queued_gamemode);
            }
            RawEvent::EnteredStandbyQueue => self.queued_state = STANDBY_QUEUED.to_string(),
            RawEvent::LeftQueue => self.queued_state = NOT_QUEUED.to_string(),
            RawEvent::OperatorSighted => {}
            RawEvent::HostingStarted => self.hosting = true,
            RawEvent::ServerNameReported(name) => self.server_name = name.clone(),
            RawEvent::PlayerCountReported(current, max) => self.player_count = (*current, *max),
        }

        before
            != (
                self.map.clone(),
                self.class.clone(),
                self.queued_state.clone(),
                self.hosting,
                self.server_name.clone(),
                self.player_count,
            )
    }
}

/// Scanner state kept between ticks.
#[derive(Debug, Default)]
pub struct LogCursor {
    pub last_read_offset: u64,
    pub last_modified: Option<SystemTime>,
    pub snapshot: Option<LogSnapshot>,
}

/// Disk access behind the scanner.
pub trait LogFiles {
    /// Reads at most `len` bytes of `path` starting at `offset`.
    fn read_range(&self, path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>>;

    /// Rewrites `path` so that only (roughly) its last `keep` bytes remain,
    /// starting at a line boundary. Returns the new size.
    fn trim_to_tail(&self, path: &Path, size: u64, keep: u64) -> std::io::Result<u64>;
}

#[derive(Debug, Default)]
pub struct DiskLogFiles;

impl LogFiles for DiskLogFiles {
    fn read_range(&self, path: &Path, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = Vec::new();
        // The game may append after the size was taken.
        file.take(len).read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn trim_to_tail(&self, path: &Path, size: u64, keep: u64) -> std::io::Result<u64> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(size.saturating_sub(keep)))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)?;
        drop(file);

        let start = tail.iter().position(|b| *b == b'\n').map_or(0, |i| i + 1);
        std::fs::write(path, &tail[start..])?;
        Ok((tail.len() - start) as u64)
    }
}

#[derive(Debug, Default)]
pub struct LogScanner<F: LogFiles = DiskLogFiles> {
    files: F,
    cursor: LogCursor,
    developer_notified: bool,
}

impl LogScanner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: LogFiles> LogScanner<F> {
    #[cfg(test)]
    fn with_files(files: F) -> Self {
        Self {
            files,
            cursor: LogCursor::default(),
            developer_notified: false,
        }
    }

    #[cfg(test)]
    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// Scans the log at `path`.
    ///
    /// Only a missing file is an error. Read failures are logged and the last
    /// good snapshot (or the default one) is returned instead.
    pub fn scan(
        &mut self,
        path: &Path,
        usernames: &[String],
        process_start: Option<DateTime<Utc>>,
        settings: &LogSettings,
        force: bool,
    ) -> Result<LogSnapshot, ScanError> {
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ScanError::LogMissing(path.to_path_buf()));
            }
            Err(e) => {
                tracing::warn!(target: "log_scanner", "Failed to stat {}: {e}", path.display());
                return Ok(self.fallback());
            }
        };

        if let Some(started) = process_start {
            let age = Utc::now().signed_duration_since(started);
            if age.num_seconds() < STARTUP_GRACE_SECS {
                tracing::debug!(target: "log_scanner", "Game started {}s ago, not scanning yet", age.num_seconds());
                return Ok(LogSnapshot::default());
            }
        }

        let mut size = metadata.len();
        let mut modified = metadata.modified().ok();

        if !force && modified.is_some() && modified == self.cursor.last_modified {
            if let Some(snapshot) = &self.cursor.snapshot {
                return Ok(snapshot.clone());
            }
        }

        let limit = settings.size_limit_kb.max(1) * 1024;
        if settings.trim && !force && size > limit * TRIM_TRIGGER_FACTOR {
            match self.files.trim_to_tail(path, size, limit * TRIM_KEEP_FACTOR) {
                Ok(new_size) => {
                    tracing::info!(target: "log_scanner", "Trimmed console log from {size} to {new_size} bytes");
                    if let Ok(m) = std::fs::metadata(path) {
                        size = m.len();
                        modified = m.modified().ok();
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "log_scanner", "Could not trim {}: {e}", path.display());
                }
            }
        }

        let offset = size.saturating_sub(limit);
        // One byte before the window tells whether it starts on a line boundary.
        let lead = u64::from(offset > 0);
        let bytes = match self.files.read_range(path, offset - lead, limit + lead) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(target: "log_scanner", "Failed to read {}: {e}", path.display());
                return Ok(self.fallback());
            }
        };
        let (starts_mid_line, window) = match bytes.split_first() {
            Some((before, rest)) if lead == 1 => (*before != b'\n', rest),
            _ => (false, bytes.as_slice()),
        };

        let text = String::from_utf8_lossy(window);
        let mut snapshot = self.parse(&text, starts_mid_line, usernames, settings);
        snapshot.bytes_read = window.len() as u64;
        tracing::debug!(
            target: "log_scanner",
            "Read {} bytes ({} lines, {} events) from {} at offset {offset} (previous {}), deciding line: {:?}",
            snapshot.bytes_read,
            snapshot.lines_read,
            snapshot.events.len(),
            path.display(),
            self.cursor.last_read_offset,
            snapshot.deciding_line
        );

        self.cursor = LogCursor {
            last_read_offset: offset,
            last_modified: modified,
            snapshot: Some(snapshot.clone()),
        };
        Ok(snapshot)
    }

    fn fallback(&self) -> LogSnapshot {
        self.cursor.snapshot.clone().unwrap_or_default()
    }

    fn parse(
        &mut self,
        text: &str,
        starts_mid_line: bool,
        usernames: &[String],
        settings: &LogSettings,
    ) -> LogSnapshot {
        let mut snapshot = LogSnapshot::default();
        let mut lines = text.lines();
        if starts_mid_line {
            let _ = lines.next();
        }

        for line in lines {
            snapshot.lines_read += 1;
            let ctx = LineContext {
                usernames,
                on_map: !snapshot.map.is_empty(),
            };

            for event in console_rules::classify(line, &ctx) {
                if event == RawEvent::OperatorSighted {
                    if self.developer_notified {
                        continue;
                    }
                    self.developer_notified = true;
                    tracing::info!(target: "log_scanner", "Hi there! {DEVELOPER_NAME} is on your server, say hello!");
                }
                if snapshot.apply(&event, settings.hide_queued_gamemode) {
                    snapshot.deciding_line = Some(line.to_string());
                }
                snapshot.events.push(event);
            }
        }
        snapshot
    }
}
