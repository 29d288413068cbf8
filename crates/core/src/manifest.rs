use crate::error::IngestError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Last-observed modification time per indexed source path.
///
/// Loaded whole at the start of an indexing pass and rewritten whole at the
/// end of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(error.into()),
        }
    }

    /// Writes to a sibling temporary file and renames it over `path`.
    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }

    /// A document needs (re-)embedding unless its recorded mtime is identical.
    pub fn is_stale(&self, source_path: &str, modified: DateTime<Utc>) -> bool {
        self.entries.get(source_path) != Some(&modified)
    }

    pub fn record(&mut self, source_path: impl Into<String>, modified: DateTime<Utc>) {
        self.entries.insert(source_path.into(), modified);
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
