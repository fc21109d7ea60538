//! Append-only on-disk event log for replay and audit.

use crate::events::event::Event;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

const EVENTS_DIR: &str = "events";
const EVENTS_FILE: &str = "events.jsonl";

/// File-backed event log, one JSON object per line.
///
/// Writing is best effort: the first I/O failure disables persistence for
/// the rest of the run so that publishing never blocks on a broken disk.
/// Malformed lines are skipped with a warning on load.
#[derive(Debug)]
pub struct EventPersistence {
    file: PathBuf,
    enabled: AtomicBool,
}

impl EventPersistence {
    /// Create the log under `<base_dir>/events/events.jsonl`, creating the
    /// containing directory on first use.
    pub fn new(base_dir: &Path) -> Self {
        let events_dir = base_dir.join(EVENTS_DIR);
        let file = events_dir.join(EVENTS_FILE);

        let enabled = match fs::create_dir_all(&events_dir) {
            Ok(()) => {
                info!(directory = %events_dir.display(), "event persistence initialized");
                true
            },
            Err(err) => {
                error!(
                    directory = %events_dir.display(),
                    error = %err,
                    "failed to create events directory, persistence disabled"
                );
                false
            },
        };

        Self { file, enabled: AtomicBool::new(enabled) }
    }

    /// Append an event to the log.
    pub fn persist(&self, event: &Event) {
        if !self.is_enabled() {
            return;
        }

        let result = serde_json::to_string(event).map_err(std::io::Error::other).and_then(|line| {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.file)?;
            writeln!(file, "{line}")
        });

        match result {
            Ok(()) => debug!(event_type = %event.event_type(), "persisted event"),
            Err(err) => {
                error!(
                    path = %self.file.display(),
                    error = %err,
                    "failed to persist event, disabling persistence for this run"
                );
                self.set_enabled(false);
            },
        }
    }

    /// Load events from the log, oldest first.
    ///
    /// `limit` of 0 means unbounded. Lines that fail to parse are skipped
    /// with a warning.
    pub fn load(&self, limit: usize) -> Vec<Event> {
        let file = match fs::File::open(&self.file) {
            Ok(file) => file,
            Err(_) => return Vec::new(),
        };

        let cap = if limit == 0 { usize::MAX } else { limit };
        let mut events = Vec::new();

        for line in BufReader::new(file).lines() {
            if events.len() >= cap {
                break;
            }
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    error!(path = %self.file.display(), error = %err, "failed to read event log");
                    break;
                },
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(err) => warn!(error = %err, line, "skipping malformed event line"),
            }
        }

        info!(count = events.len(), "loaded events from disk");
        events
    }

    /// Number of lines currently in the log.
    pub fn count(&self) -> usize {
        match fs::File::open(&self.file) {
            Ok(file) => BufReader::new(file).lines().count(),
            Err(_) => 0,
        }
    }

    /// Delete the log file.
    pub fn clear(&self) {
        if self.file.exists() {
            if let Err(err) = fs::remove_file(&self.file) {
                error!(path = %self.file.display(), error = %err, "failed to clear event log");
            } else {
                info!("cleared persisted events");
            }
        }
    }

    /// Whether persistence is currently active.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable persistence.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn persists_and_loads_in_order() {
        let dir = TempDir::new().expect("temp dir");
        let log = EventPersistence::new(dir.path());

        log.persist(&Event::new("T1", "test"));
        log.persist(&Event::new("T2", "test"));

        let events = log.load(0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), "T1");
        assert_eq!(events[1].event_type(), "T2");
        assert_eq!(log.count(), 2);
    }

    #[test]
    fn load_respects_limit() {
        let dir = TempDir::new().expect("temp dir");
        let log = EventPersistence::new(dir.path());
        for n in 0..5 {
            log.persist(&Event::new(format!("T{n}"), "test"));
        }

        assert_eq!(log.load(3).len(), 3);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = TempDir::new().expect("temp dir");
        let log = EventPersistence::new(dir.path());
        log.persist(&Event::new("T1", "test"));

        let path = dir.path().join(EVENTS_DIR).join(EVENTS_FILE);
        let mut raw = fs::read_to_string(&path).expect("read log");
        raw.push_str("not json at all\n");
        fs::write(&path, raw).expect("write log");
        log.persist(&Event::new("T2", "test"));

        let events = log.load(0);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn write_failure_disables_persistence() {
        let dir = TempDir::new().expect("temp dir");
        let log = EventPersistence::new(dir.path());

        // Make the log path unwritable by turning it into a directory.
        fs::create_dir(dir.path().join(EVENTS_DIR).join(EVENTS_FILE)).expect("block file");
        log.persist(&Event::new("T1", "test"));

        assert!(!log.is_enabled());
    }

    #[test]
    fn clear_removes_log() {
        let dir = TempDir::new().expect("temp dir");
        let log = EventPersistence::new(dir.path());
        log.persist(&Event::new("T1", "test"));
        log.clear();

        assert_eq!(log.count(), 0);
        assert!(log.load(0).is_empty());
    }
}
