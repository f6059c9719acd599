//! Simulated artifact filesystem.
//!
//! Paths are group-root relative (`<group>/<section>/...`). The store keeps
//! file contents and the actor tag of the last writer; it performs no access
//! control of its own, the driver gates every call first.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Content hash per path at one instant.
pub type ArtifactSnapshot = BTreeMap<String, String>;

#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    files: BTreeMap<String, Vec<u8>>,
    last_writer: BTreeMap<String, String>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, path: &str, content: Vec<u8>, writer_tag: &str) {
        self.files.insert(path.to_string(), content);
        self.last_writer
            .insert(path.to_string(), writer_tag.to_string());
    }

    /// Contents of `path`; missing files read as empty.
    pub fn read(&self, path: &str) -> &[u8] {
        self.files.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn last_writers(&self) -> &BTreeMap<String, String> {
        &self.last_writer
    }

    /// Hash every `internal` or `exposed` artifact.
    pub fn snapshot(&self) -> ArtifactSnapshot {
        self.files
            .iter()
            .filter(|(path, _)| path.contains("/internal/") || path.contains("/exposed/"))
            .map(|(path, content)| (path.clone(), hex::encode(Sha256::digest(content))))
            .collect()
    }

    /// Copy every artifact below `root`, preserving relative paths.
    pub fn export(&self, root: &Path) -> std::io::Result<()> {
        for (path, content) in &self.files {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, content)?;
        }
        Ok(())
    }
}

/// Paths added, removed, or modified between two snapshots, sorted.
pub fn changed_paths(before: &ArtifactSnapshot, after: &ArtifactSnapshot) -> Vec<String> {
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .filter(|k| before.get(*k) != after.get(*k))
        .cloned()
        .collect()
}
