//! # Transcript Store
//!
//! Append-only, timestamp-ordered log of accepted transcripts. The worker
//! appends from its background loop while REST handlers take snapshots
//! concurrently; a reader-writer lock keeps mutation exclusive and reads
//! shared.
//!
//! Timestamps are wall-clock `HH:MM:SS` strings. Because the format is
//! fixed-width and zero-padded, plain lexical comparison is a valid
//! ordering, which is what the `since` query relies on.

use crate::error::{AppError, AppResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::RwLock;

/// One accepted utterance. Immutable once inserted.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    /// Wall-clock time of acceptance, formatted `HH:MM:SS`
    pub timestamp: String,

    /// Decoded text, already past the hallucination filter
    pub text: String,

    /// Confidence score in [0, 1] derived from the model's average
    /// log-probability
    pub confidence: f64,
}

impl TranscriptEntry {
    /// Create an entry stamped with the current local time.
    pub fn now(text: String, confidence: f64) -> Self {
        Self {
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            text,
            confidence,
        }
    }
}

/// The result of a save: where the file landed and what was written.
#[derive(Debug)]
pub struct SavedTranscript {
    pub path: PathBuf,
    pub contents: String,
}

pub struct TranscriptStore {
    entries: RwLock<Vec<TranscriptEntry>>,
    output_path: PathBuf,
}

impl TranscriptStore {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            output_path: output_path.into(),
        }
    }

    /// Append an entry, preserving arrival order.
    ///
    /// Timestamps are clamped to be non-decreasing: if the wall clock
    /// stepped backwards between entries (NTP adjustment), the new entry
    /// inherits the previous timestamp rather than breaking the ordering
    /// invariant the `since` query depends on.
    pub fn append(&self, mut entry: TranscriptEntry) {
        let mut entries = self.entries.write().unwrap();
        if let Some(last) = entries.last() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp.clone();
            }
        }
        entries.push(entry);
    }

    /// Atomically empty the store.
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    /// Immutable copy of all entries, in arrival order.
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.read().unwrap().clone()
    }

    /// The most recent entry, if any.
    pub fn latest(&self) -> Option<TranscriptEntry> {
        self.entries.read().unwrap().last().cloned()
    }

    /// Entries strictly after the given `HH:MM:SS` timestamp, in order.
    /// Lexical comparison; see the module docs for why that is sound.
    pub fn since(&self, timestamp: &str) -> Vec<TranscriptEntry> {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.timestamp.as_str() > timestamp)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Serialize all entries as `[timestamp] text` lines and write them to
    /// the configured output file. An empty store writes a valid empty
    /// file. Filesystem failures surface as `Io` errors to the caller; the
    /// store itself is unaffected.
    pub fn save(&self) -> AppResult<SavedTranscript> {
        let contents = {
            let entries = self.entries.read().unwrap();
            let mut out = String::new();
            for entry in entries.iter() {
                out.push_str(&format!("[{}] {}\n", entry.timestamp, entry.text));
            }
            out
        };

        std::fs::write(&self.output_path, &contents).map_err(|e| {
            AppError::Io(format!(
                "failed to write {}: {}",
                self.output_path.display(),
                e
            ))
        })?;

        Ok(SavedTranscript {
            path: self.output_path.clone(),
            contents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(timestamp: &str, text: &str) -> TranscriptEntry {
        TranscriptEntry {
            timestamp: timestamp.to_string(),
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let store = TranscriptStore::new("unused.txt");
        store.append(entry("00:00:01", "first"));
        store.append(entry("00:00:02", "second"));
        store.append(entry("00:00:02", "third"));

        let snapshot = store.snapshot();
        let texts: Vec<&str> = snapshot.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_timestamps_clamped_to_non_decreasing() {
        let store = TranscriptStore::new("unused.txt");
        store.append(entry("10:00:05", "a"));
        store.append(entry("10:00:03", "clock stepped back"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot[1].timestamp, "10:00:05");
    }

    #[test]
    fn test_since_returns_strictly_later_entries() {
        let store = TranscriptStore::new("unused.txt");
        store.append(entry("00:00:01", "a"));
        store.append(entry("00:00:05", "b"));
        store.append(entry("00:00:09", "c"));

        let result = store.since("00:00:04");
        let texts: Vec<&str> = result.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "c"]);

        // Boundary is exclusive
        assert!(store.since("00:00:09").is_empty());
    }

    #[test]
    fn test_latest() {
        let store = TranscriptStore::new("unused.txt");
        assert!(store.latest().is_none());

        store.append(entry("00:00:01", "a"));
        store.append(entry("00:00:02", "b"));
        assert_eq!(store.latest().unwrap().text, "b");
    }

    #[test]
    fn test_save_writes_bracketed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript_output.txt");
        let store = TranscriptStore::new(&path);

        store.append(entry("00:00:01", "hello"));
        store.append(entry("00:00:02", "world"));

        let saved = store.save().unwrap();
        assert_eq!(saved.path, path);
        assert_eq!(saved.contents, "[00:00:01] hello\n[00:00:02] world\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), saved.contents);
    }

    #[test]
    fn test_clear_then_save_produces_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript_output.txt");
        let store = TranscriptStore::new(&path);

        store.append(entry("00:00:01", "soon gone"));
        store.clear();

        let saved = store.save().unwrap();
        assert_eq!(saved.contents, "");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_save_to_unwritable_path_is_io_error() {
        let store = TranscriptStore::new("/definitely/not/a/real/dir/out.txt");
        store.append(entry("00:00:01", "x"));
        assert!(matches!(
            store.save(),
            Err(crate::error::AppError::Io(_))
        ));
    }
}
