//! JSON-lines input loading and report writing.
//!
//! Parser output files are read leniently: a line that is not JSON, or not a
//! record, becomes a [`MalformedRecord`] for the invariant checker to count.
//! Journal and gold files are trusted inputs, so a bad line there is fatal.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{
    CanaryGoldRecord, GoldSet, Journal, JournalSet, MalformedRecord, MonitorInputs,
    ParserOutputRecord, ParserOutputSet,
};

/// Errors that stop a run before any detector starts.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid record at {path}:{line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("No journals found in {0}")]
    Empty(PathBuf),

    #[error("Failed to write report {path}: {message}")]
    Write { path: PathBuf, message: String },
}

fn read(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Non-blank lines with their 1-based line numbers.
fn numbered_lines(contents: &str) -> impl Iterator<Item = (usize, &str)> {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}

fn load_strict<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LoadError> {
    let contents = read(path)?;
    numbered_lines(&contents)
        .map(|(line, text)| {
            serde_json::from_str(text).map_err(|source| LoadError::Parse {
                path: path.to_path_buf(),
                line,
                source,
            })
        })
        .collect()
}

/// Load journals keyed by id. Accepts `id` or `journal_id`.
///
/// A later line with an id already seen replaces the earlier one.
pub fn load_journals(path: impl AsRef<Path>) -> Result<JournalSet, LoadError> {
    let path = path.as_ref();
    let journals: Vec<Journal> = load_strict(path)?;
    if journals.is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    let count = journals.len();
    let set: JournalSet = journals.into_iter().map(|j| (j.id.clone(), j)).collect();
    if set.len() < count {
        tracing::warn!(
            path = %path.display(),
            duplicates = count - set.len(),
            "Duplicate journal ids"
        );
    }

    tracing::debug!(path = %path.display(), journals = set.len(), "Loaded journals");
    Ok(set)
}

/// Load one parser run. Only unreadable files are errors.
pub fn load_output_set(path: impl AsRef<Path>, label: &str) -> Result<ParserOutputSet, LoadError> {
    let path = path.as_ref();
    let contents = read(path)?;
    let mut set = ParserOutputSet::new(label);

    for (line, text) in numbered_lines(&contents) {
        let parsed = serde_json::from_str::<Value>(text)
            .map_err(|e| MalformedRecord {
                line,
                journal_id: None,
                item_count: 0,
                reason: format!("invalid JSON: {}", e),
            })
            .and_then(|value| ParserOutputRecord::from_value(line, &value));

        match parsed {
            Ok(record) => set.insert(line, record),
            Err(malformed) => set.malformed.push(malformed),
        }
    }

    if !set.malformed.is_empty() {
        tracing::warn!(
            path = %path.display(),
            malformed = set.malformed.len(),
            "Parser output has malformed records"
        );
    }
    tracing::debug!(
        path = %path.display(),
        label,
        records = set.records.len(),
        "Loaded parser output"
    );
    Ok(set)
}

/// Load gold labels keyed by journal id.
///
/// A later line with a journal id already seen replaces the earlier one.
pub fn load_gold(path: impl AsRef<Path>) -> Result<GoldSet, LoadError> {
    let path = path.as_ref();
    let records: Vec<CanaryGoldRecord> = load_strict(path)?;
    let count = records.len();
    let gold: GoldSet = records
        .into_iter()
        .map(|r| (r.journal_id.clone(), r))
        .collect();
    if gold.len() < count {
        tracing::warn!(
            path = %path.display(),
            duplicates = count - gold.len(),
            "Duplicate gold journal ids"
        );
    }

    tracing::debug!(path = %path.display(), journals = gold.len(), "Loaded gold labels");
    Ok(gold)
}

/// The conventional data directory layout.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn journals(&self) -> PathBuf {
        self.root.join("journals.jsonl")
    }

    /// `parser_outputs_<label>.jsonl`
    pub fn parser_outputs(&self, label: &str) -> PathBuf {
        self.root.join(format!("parser_outputs_{}.jsonl", label))
    }

    pub fn canary_journals(&self) -> PathBuf {
        self.root.join("canary").join("journals.jsonl")
    }

    pub fn canary_gold(&self) -> PathBuf {
        self.root.join("canary").join("gold.jsonl")
    }

    /// Load everything a monitoring run needs.
    pub fn load_inputs(&self, baseline: &str, candidate: &str) -> Result<MonitorInputs, LoadError> {
        Ok(MonitorInputs {
            journals: load_journals(self.journals())?,
            baseline: load_output_set(self.parser_outputs(baseline), baseline)?,
            candidate: load_output_set(self.parser_outputs(candidate), candidate)?,
            canary_journals: load_journals(self.canary_journals())?,
            gold: load_gold(self.canary_gold())?,
        })
    }
}

/// Write `report` as pretty JSON, creating parent directories.
pub fn write_report(path: impl AsRef<Path>, report: &impl Serialize) -> Result<(), LoadError> {
    let path = path.as_ref();
    let write_error = |message: String| LoadError::Write {
        path: path.to_path_buf(),
        message,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|e| write_error(e.to_string()))?;
    fs::write(path, json + "\n").map_err(|e| write_error(e.to_string()))?;

    tracing::debug!(path = %path.display(), "Wrote report");
    Ok(())
}
