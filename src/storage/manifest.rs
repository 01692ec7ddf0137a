use super::types::FileId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the backup initiator remembers about one of its own files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_id: FileId,
    pub chunk_count: u32,
    pub desired_degree: u32,
}

/// Filenames this peer backed up, keyed by the name the operator used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl FileManifest {
    /// Returns `false` (and changes nothing) if the filename is already present.
    pub fn insert(&mut self, filename: &str, entry: ManifestEntry) -> bool {
        if self.entries.contains_key(filename) {
            return false;
        }
        self.entries.insert(filename.to_string(), entry);
        true
    }

    pub fn get(&self, filename: &str) -> Option<&ManifestEntry> {
        self.entries.get(filename)
    }

    pub fn remove(&mut self, filename: &str) -> Option<ManifestEntry> {
        self.entries.remove(filename)
    }

    pub fn contains_file_id(&self, file_id: &FileId) -> bool {
        self.entries.values().any(|entry| &entry.file_id == file_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
