//! Persisted top-N high-score ledger
//!
//! The file holds one `name score timestamp` line per entry, best first.
//! Older files without a timestamp column still load.

use log::{info, warn};
use shared::{HighScoreEntry, MAX_HIGH_SCORES};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct HighScoreLedger {
    path: Option<PathBuf>,
    entries: Vec<HighScoreEntry>,
    capacity: usize,
}

impl HighScoreLedger {
    /// A ledger that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
            capacity: MAX_HIGH_SCORES,
        }
    }

    /// Loads `path`, treating a missing file as an empty ledger
    pub fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No high score file at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut ledger = Self {
            path: Some(path),
            entries: Vec::new(),
            capacity: MAX_HIGH_SCORES,
        };
        for entry in entries {
            ledger.insert_sorted(entry);
        }
        info!("Loaded {} high scores", ledger.entries.len());
        Ok(ledger)
    }

    pub fn entries(&self) -> &[HighScoreEntry] {
        &self.entries
    }

    /// Whether `score` would make the list
    pub fn qualifies(&self, score: u32) -> bool {
        self.entries.len() < self.capacity
            || self.entries.last().map_or(true, |last| score > last.score)
    }

    fn insert_sorted(&mut self, entry: HighScoreEntry) -> bool {
        if !self.qualifies(entry.score) {
            return false;
        }
        let at = self
            .entries
            .iter()
            .position(|e| e.score < entry.score)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
        self.entries.truncate(self.capacity);
        true
    }

    /// Inserts and persists; returns whether the score made the list
    pub fn try_insert(&mut self, name: &str, score: u32, timestamp: u64) -> bool {
        let entry = HighScoreEntry {
            name: sanitize_name(name),
            score,
            timestamp,
        };
        if !self.insert_sorted(entry) {
            return false;
        }
        info!("{} entered the high scores with {}", name, score);
        if let Err(e) = self.persist() {
            warn!("Failed to save high scores: {}", e);
        }
        true
    }

    pub fn persist(&self) -> io::Result<()> {
        match &self.path {
            Some(path) => fs::write(path, render(&self.entries)),
            None => Ok(()),
        }
    }
}

/// Names are stored whitespace-free so each line splits into three fields
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "anonymous".to_string()
    } else {
        cleaned
    }
}

/// Skips lines that do not parse
pub fn parse(text: &str) -> Vec<HighScoreEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?.to_string();
            let score = fields.next()?.parse().ok()?;
            let timestamp = match fields.next() {
                Some(raw) => raw.parse().ok()?,
                None => 0,
            };
            Some(HighScoreEntry {
                name,
                score,
                timestamp,
            })
        })
        .collect()
}

pub fn render(entries: &[HighScoreEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{} {} {}\n", e.name, e.score, e.timestamp))
        .collect()
}
