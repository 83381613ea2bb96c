//! File-log queue: one JSON file per event in a shared directory.
//!
//! Producers (the command-line agent, or [`FolderQueue::publish`]) drop files
//! named `YYYYMMDDHHMMSSmmm_<8 hex>.json`; lexical order is therefore
//! chronological. Consumers acknowledge by moving a file into `.processed/`,
//! which doubles as an archive cleaned by retention.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use profhub_core::Clock;

const PROCESSED_DIR: &str = ".processed";
const FILE_EXTENSION: &str = "json";
const TIMESTAMP_LEN: usize = 17;

#[derive(Debug, Error)]
pub enum FolderQueueError {
    #[error("folder queue I/O failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FolderQueueError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One readable file in the queue directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderEntry<T> {
    pub path: PathBuf,
    pub file_name: String,
    pub payload: T,
}

/// Directory-backed event queue.
pub struct FolderQueue {
    dir: PathBuf,
    processed_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FolderQueue {
    /// Open (creating if needed) a queue rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self, FolderQueueError> {
        let dir = dir.into();
        let processed_dir = dir.join(PROCESSED_DIR);
        fs::create_dir_all(&processed_dir).map_err(|e| FolderQueueError::io(&processed_dir, e))?;
        Ok(Self {
            dir,
            processed_dir,
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Write `content` as a new file and return its path.
    ///
    /// The file is written under a hidden temporary name and renamed, so
    /// pollers never observe a partial write.
    pub fn publish(&self, content: &str) -> Result<PathBuf, FolderQueueError> {
        let name = file_name_for(self.clock.now());
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let target = self.dir.join(&name);

        fs::write(&tmp, content).map_err(|e| FolderQueueError::io(&tmp, e))?;
        fs::rename(&tmp, &target).map_err(|e| FolderQueueError::io(&target, e))?;
        Ok(target)
    }

    /// Read every pending file, oldest first.
    ///
    /// Hidden files and directories are ignored. Files that cannot be read or
    /// parsed are logged and left in place for a later attempt.
    pub fn poll<T, E, F>(&self, parse: F) -> Result<Vec<FolderEntry<T>>, FolderQueueError>
    where
        F: Fn(&str) -> Result<T, E>,
        E: core::fmt::Display,
    {
        let mut names = pending_file_names(&self.dir)?;
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for file_name in names {
            let path = self.dir.join(&file_name);
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(file = %file_name, error = %err, "failed to read event file, skipping");
                    continue;
                }
            };
            match parse(&raw) {
                Ok(payload) => entries.push(FolderEntry {
                    path,
                    file_name,
                    payload,
                }),
                Err(err) => {
                    warn!(file = %file_name, error = %err, "failed to parse event file, skipping");
                }
            }
        }
        Ok(entries)
    }

    /// Move the entry's file into the processed archive.
    pub fn acknowledge<T>(&self, entry: &FolderEntry<T>) -> Result<(), FolderQueueError> {
        let target = self.processed_dir.join(&entry.file_name);
        fs::rename(&entry.path, &target).map_err(|e| FolderQueueError::io(&entry.path, e))?;
        debug!(file = %entry.file_name, "event file acknowledged");
        Ok(())
    }

    /// Delete archived files whose filename timestamp is older than `now - retain`.
    pub fn cleanup(&self, retain: chrono::Duration) -> Result<u64, FolderQueueError> {
        self.cleanup_older_than(self.clock.now() - retain)
    }

    /// Delete archived files whose filename timestamp is strictly before `cutoff`.
    ///
    /// Files without a recognizable timestamp are kept.
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, FolderQueueError> {
        let mut deleted = 0;
        for file_name in pending_file_names(&self.processed_dir)? {
            let Some(written_at) = timestamp_of(&file_name) else {
                continue;
            };
            if written_at < cutoff {
                let path = self.processed_dir.join(&file_name);
                fs::remove_file(&path).map_err(|e| FolderQueueError::io(&path, e))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

fn pending_file_names(dir: &Path) -> Result<Vec<String>, FolderQueueError> {
    let read_dir = fs::read_dir(dir).map_err(|e| FolderQueueError::io(dir, e))?;

    let mut names = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| FolderQueueError::io(dir, e))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if is_file && !name.starts_with('.') {
            names.push(name);
        }
    }
    Ok(names)
}

fn file_name_for(now: DateTime<Utc>) -> String {
    let suffix = Uuid::now_v7().simple().to_string();
    format!(
        "{}{:03}_{}.{FILE_EXTENSION}",
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_millis(),
        &suffix[suffix.len() - 8..]
    )
}

fn timestamp_of(file_name: &str) -> Option<DateTime<Utc>> {
    let stamp = file_name.as_bytes().get(..TIMESTAMP_LEN)?;
    if !stamp.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let (seconds, millis) = file_name.split_at(14);
    let seconds = NaiveDateTime::parse_from_str(seconds, "%Y%m%d%H%M%S").ok()?;
    let millis: i64 = millis.get(..3)?.parse().ok()?;
    Some(seconds.and_utc() + chrono::Duration::milliseconds(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::at;
    use profhub_core::FixedClock;

    fn parse_string(raw: &str) -> Result<String, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn queue(clock: Arc<FixedClock>) -> (tempfile::TempDir, FolderQueue) {
        let dir = tempfile::tempdir().unwrap();
        let queue = FolderQueue::open(dir.path().join("events"), clock).unwrap();
        (dir, queue)
    }

    #[test]
    fn file_names_sort_chronologically() {
        let a = file_name_for(at("2026-02-20T10:00:00.005Z"));
        let b = file_name_for(at("2026-02-20T10:00:00.040Z"));
        assert!(a.starts_with("20260220100000005_"));
        assert!(a < b);
        assert_eq!(timestamp_of(&a), Some(at("2026-02-20T10:00:00.005Z")));
    }

    #[test]
    fn poll_returns_oldest_first_and_skips_garbage() {
        let clock = Arc::new(FixedClock::new(at("2026-02-20T10:00:00Z")));
        let (_dir, queue) = queue(clock.clone());

        queue.publish("\"first\"").unwrap();
        clock.advance(chrono::Duration::seconds(1));
        queue.publish("not json").unwrap();
        clock.advance(chrono::Duration::seconds(1));
        queue.publish("\"third\"").unwrap();
        fs::write(queue.dir().join(".hidden"), "\"hidden\"").unwrap();

        let entries = queue.poll(parse_string).unwrap();
        let payloads: Vec<_> = entries.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(payloads, vec!["first", "third"]);
    }

    #[test]
    fn acknowledge_moves_file_to_archive() {
        let clock = Arc::new(FixedClock::new(at("2026-02-20T10:00:00Z")));
        let (_dir, queue) = queue(clock);
        queue.publish("\"x\"").unwrap();

        let entries = queue.poll(parse_string).unwrap();
        queue.acknowledge(&entries[0]).unwrap();

        assert!(queue.poll(parse_string).unwrap().is_empty());
        assert!(queue.processed_dir().join(&entries[0].file_name).exists());
    }

    #[test]
    fn non_ascii_names_have_no_timestamp() {
        assert_eq!(timestamp_of("2026022010000éab.json"), None);
        assert_eq!(timestamp_of("é0260220100000005_x.json"), None);
        assert_eq!(timestamp_of("2026022010"), None);
    }

    #[test]
    fn cleanup_keeps_files_with_malformed_names() {
        let clock = Arc::new(FixedClock::new(at("2026-03-01T00:00:00Z")));
        let (_dir, queue) = queue(clock);
        let odd = queue.processed_dir().join("2026022010000éab.json");
        fs::write(&odd, "\"x\"").unwrap();

        let deleted = queue.cleanup_older_than(at("2026-03-01T00:00:00Z")).unwrap();

        assert_eq!(deleted, 0);
        assert!(odd.exists());
    }

    #[test]
    fn cleanup_removes_only_old_archived_files() {
        let clock = Arc::new(FixedClock::new(at("2026-01-01T00:00:00Z")));
        let (_dir, queue) = queue(clock.clone());
        queue.publish("\"old\"").unwrap();
        clock.set(at("2026-02-15T00:00:00Z"));
        queue.publish("\"recent\"").unwrap();
        for entry in queue.poll(parse_string).unwrap() {
            queue.acknowledge(&entry).unwrap();
        }

        let deleted = queue.cleanup(chrono::Duration::days(31)).unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(pending_file_names(queue.processed_dir()).unwrap().len(), 1);
    }
}
