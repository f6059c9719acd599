//! Group manifest: the head, its specialists, and their dependency records.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, Result};

/// Head agent id used when a manifest does not name one.
pub const DEFAULT_HEAD_AGENT: &str = "head-controller";

/// Specialist archetype within a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialistRole {
    #[default]
    DomainCore,
    WebResearch,
    Integration,
    EvidenceReview,
    ReproQa,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SpecialistRole::DomainCore => "domain-core",
            SpecialistRole::WebResearch => "web-research",
            SpecialistRole::Integration => "integration",
            SpecialistRole::EvidenceReview => "evidence-review",
            SpecialistRole::ReproQa => "repro-qa",
            SpecialistRole::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// A normalised dependency on another specialist's artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub agent_id: String,
    pub required_artifacts: Vec<String>,
    pub validate_with: String,
    pub on_missing: String,
}

impl DependencyRecord {
    /// Record with the defaults applied to a bare agent-id dependency.
    pub fn on_agent(agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            required_artifacts: vec![default_handoff_artifact(&agent_id)],
            agent_id,
            validate_with: "json-parse".to_string(),
            on_missing: "request-rerun".to_string(),
        }
    }
}

fn default_handoff_artifact(agent_id: &str) -> String {
    format!("internal/{agent_id}/handoff.json")
}

/// `depends_on` as written in YAML: either an agent id or a partial record.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum DependencyEntry {
    AgentId(String),
    Record {
        #[serde(default)]
        agent_id: Option<String>,
        #[serde(default)]
        required_artifacts: Option<Vec<String>>,
        #[serde(default)]
        validate_with: Option<String>,
        #[serde(default)]
        on_missing: Option<String>,
    },
}

impl DependencyEntry {
    fn normalize(self) -> Option<DependencyRecord> {
        match self {
            DependencyEntry::AgentId(id) => {
                let id = id.trim();
                (!id.is_empty()).then(|| DependencyRecord::on_agent(id))
            }
            DependencyEntry::Record {
                agent_id,
                required_artifacts,
                validate_with,
                on_missing,
            } => {
                let agent_id = agent_id.map(|s| s.trim().to_string()).unwrap_or_default();
                if agent_id.is_empty() {
                    return None;
                }
                let required_artifacts = match required_artifacts {
                    Some(list) => list
                        .into_iter()
                        .filter(|item| !item.trim().is_empty())
                        .collect(),
                    None => vec![default_handoff_artifact(&agent_id)],
                };
                Some(DependencyRecord {
                    agent_id,
                    required_artifacts,
                    validate_with: non_empty_or(validate_with, "exists"),
                    on_missing: non_empty_or(on_missing, "request-rerun"),
                })
            }
        }
    }
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => fallback.to_string(),
    }
}

fn deserialize_dependencies<'de, D>(deserializer: D) -> std::result::Result<Vec<DependencyRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries: Option<Vec<DependencyEntry>> = Option::deserialize(deserializer)?;
    let mut seen = HashSet::new();
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(DependencyEntry::normalize)
        .filter(|record| seen.insert(record.agent_id.clone()))
        .collect())
}

/// Per-specialist execution overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_gpu: Option<bool>,
}

/// Group-wide execution defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_transport: Option<String>,
    #[serde(default)]
    pub schedulers: Vec<String>,
    #[serde(default)]
    pub hardware: Vec<String>,
}

/// A leaf worker declared by a group manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialist {
    pub agent_id: String,
    #[serde(default)]
    pub role: SpecialistRole,
    #[serde(default)]
    pub focus: String,
    #[serde(default, deserialize_with = "deserialize_dependencies")]
    pub depends_on: Vec<DependencyRecord>,
    #[serde(default)]
    pub execution: ExecutionOverride,
}

impl Specialist {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: SpecialistRole::default(),
            focus: String::new(),
            depends_on: Vec::new(),
            execution: ExecutionOverride::default(),
        }
    }

    /// Add a bare dependency on `agent_id` (no-op if already present).
    pub fn with_dependency(mut self, agent_id: &str) -> Self {
        if !self.depends_on.iter().any(|d| d.agent_id == agent_id) {
            self.depends_on.push(DependencyRecord::on_agent(agent_id));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadSpec {
    #[serde(default = "default_head_agent")]
    pub agent_id: String,
}

impl Default for HeadSpec {
    fn default() -> Self {
        Self {
            agent_id: default_head_agent(),
        }
    }
}

fn default_head_agent() -> String {
    DEFAULT_HEAD_AGENT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityGates {
    #[serde(default = "default_true")]
    pub citation_required: bool,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            citation_required: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A group's manifest, as produced by the manifest-authoring collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub head: HeadSpec,
    #[serde(default)]
    pub specialists: Vec<Specialist>,
    #[serde(default)]
    pub quality_gates: QualityGates,
    #[serde(default)]
    pub execution_defaults: ExecutionDefaults,
    #[serde(default)]
    pub interaction: InteractionSettings,
}

impl GroupManifest {
    /// Minimal manifest with the default head and no specialists.
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            head: HeadSpec::default(),
            specialists: Vec::new(),
            quality_gates: QualityGates::default(),
            execution_defaults: ExecutionDefaults::default(),
            interaction: InteractionSettings::default(),
        }
    }

    pub fn with_specialist(mut self, specialist: Specialist) -> Self {
        self.specialists.push(specialist);
        self
    }

    /// Parse a manifest from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FabricError::config(format!("cannot read group manifest {}: {e}", path.display()))
        })?;
        Self::from_yaml(&text)
    }

    pub fn head_agent(&self) -> &str {
        &self.head.agent_id
    }

    pub fn specialist(&self, agent_id: &str) -> Option<&Specialist> {
        self.specialists.iter().find(|s| s.agent_id == agent_id)
    }

    /// Reject manifests the scheduler cannot work with.
    pub fn validate(&self, group_id: &str) -> Result<()> {
        ensure_path_segment("group id", group_id)?;
        ensure_path_segment("head agent_id", self.head_agent())?;
        if self.specialists.is_empty() {
            return Err(FabricError::config(format!(
                "group '{group_id}' has no specialists"
            )));
        }
        let mut seen = HashSet::new();
        for specialist in &self.specialists {
            if specialist.agent_id.trim().is_empty() {
                return Err(FabricError::config(format!(
                    "group '{group_id}' declares a specialist without agent_id"
                )));
            }
            ensure_path_segment("specialist agent_id", &specialist.agent_id)?;
            if !seen.insert(specialist.agent_id.as_str()) {
                return Err(FabricError::config(format!(
                    "group '{group_id}' declares specialist '{}' more than once",
                    specialist.agent_id
                )));
            }
        }
        Ok(())
    }
}

/// Ids become artifact path segments (`<group>/internal/<agent>/...`).
fn ensure_path_segment(what: &str, id: &str) -> Result<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(FabricError::config(format!(
            "{what} '{id}' must be a single path segment"
        )));
    }
    Ok(())
}
