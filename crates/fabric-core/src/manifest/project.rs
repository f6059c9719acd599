//! Project manifest: which groups a project selected and where their
//! manifests live.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::coverage::InteractionEdge;
use crate::error::{FabricError, Result};
use crate::manifest::group::GroupManifest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupEntry {
    /// Path of the group manifest, relative to the project directory.
    pub manifest_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_id: String,
    #[serde(default)]
    pub selected_groups: Vec<String>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
    /// Replaces the canonical interaction table when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_edges: Option<Vec<InteractionEdge>>,
}

/// Directory holding a project's generated bundle.
pub fn project_dir(fabric_root: &Path, project_id: &str) -> PathBuf {
    fabric_root
        .join("generated")
        .join("projects")
        .join(slugify(project_id))
}

/// Lower-case, hyphen-separated identifier.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

impl ProjectManifest {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load `<fabric_root>/generated/projects/<project_id>/manifest.yaml`.
    pub fn load(fabric_root: &Path, project_id: &str) -> Result<(PathBuf, Self)> {
        let dir = project_dir(fabric_root, project_id);
        let path = dir.join("manifest.yaml");
        let text = std::fs::read_to_string(&path).map_err(|e| {
            FabricError::config(format!(
                "project manifest {} could not be loaded: {e}",
                path.display()
            ))
        })?;
        Ok((dir, Self::from_yaml(&text)?))
    }

    /// Expand `"all"` to the selected groups, otherwise split a comma list
    /// and check every id belongs to this project.
    pub fn resolve_groups(&self, groups_arg: &str) -> Result<Vec<String>> {
        if groups_arg.trim().eq_ignore_ascii_case("all") {
            if self.selected_groups.is_empty() {
                return Err(FabricError::config(format!(
                    "project '{}' has no selected_groups",
                    self.project_id
                )));
            }
            return Ok(self.selected_groups.clone());
        }
        let groups: Vec<String> = groups_arg
            .split(',')
            .map(slugify)
            .filter(|g| !g.is_empty())
            .collect();
        if groups.is_empty() {
            return Err(FabricError::config(
                "--groups must be 'all' or comma-separated group ids",
            ));
        }
        let unknown: Vec<&str> = groups
            .iter()
            .filter(|g| !self.groups.contains_key(g.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(FabricError::config(format!(
                "unknown groups: {}",
                unknown.join(", ")
            )));
        }
        Ok(groups)
    }

    /// Load the manifest of every group in `groups`, in order.
    pub fn load_group_manifests(
        &self,
        project_dir: &Path,
        groups: &[String],
    ) -> Result<Vec<(String, GroupManifest)>> {
        groups
            .iter()
            .map(|group_id| {
                let entry = self.groups.get(group_id).ok_or_else(|| {
                    FabricError::config(format!(
                        "group '{group_id}' missing from project manifest"
                    ))
                })?;
                let manifest = GroupManifest::load(&project_dir.join(&entry.manifest_path))?;
                Ok((group_id.clone(), manifest))
            })
            .collect()
    }
}
