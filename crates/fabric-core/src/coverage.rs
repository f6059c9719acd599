//! Producer→consumer interaction edges and their run-time coverage.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical group catalog, in canonical order.
pub const FULL_GROUPS: [&str; 9] = [
    "material-scientist",
    "material-engineer",
    "developer",
    "designer",
    "data-curation",
    "literature-intelligence",
    "quality-assurance",
    "publication-packaging",
    "atomistic-hpc-simulation",
];

/// Canonical handoff table as `(producer, consumer)`.
pub const HANDOFF_EDGES: [(&str, &str); 20] = [
    ("literature-intelligence", "data-curation"),
    ("literature-intelligence", "material-scientist"),
    ("literature-intelligence", "material-engineer"),
    ("data-curation", "material-scientist"),
    ("data-curation", "developer"),
    ("material-scientist", "atomistic-hpc-simulation"),
    ("atomistic-hpc-simulation", "material-scientist"),
    ("atomistic-hpc-simulation", "developer"),
    ("developer", "atomistic-hpc-simulation"),
    ("material-scientist", "material-engineer"),
    ("material-engineer", "quality-assurance"),
    ("material-scientist", "quality-assurance"),
    ("atomistic-hpc-simulation", "quality-assurance"),
    ("developer", "quality-assurance"),
    ("material-scientist", "designer"),
    ("material-engineer", "designer"),
    ("quality-assurance", "designer"),
    ("designer", "publication-packaging"),
    ("quality-assurance", "publication-packaging"),
    ("publication-packaging", "quality-assurance"),
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InteractionEdge {
    pub from: String,
    pub to: String,
}

impl InteractionEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    fn touches_only(&self, groups: &[String]) -> bool {
        groups.contains(&self.from) && groups.contains(&self.to)
    }
}

impl fmt::Display for InteractionEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

pub fn canonical_edges() -> Vec<InteractionEdge> {
    HANDOFF_EDGES
        .iter()
        .map(|(from, to)| InteractionEdge::new(*from, *to))
        .collect()
}

/// Edges of `table` whose both endpoints are active, in table order and
/// without duplicates.
pub fn active_edges(table: &[InteractionEdge], groups: &[String]) -> Vec<InteractionEdge> {
    let mut seen = BTreeSet::new();
    table
        .iter()
        .filter(|e| e.touches_only(groups))
        .filter(|e| seen.insert((*e).clone()))
        .cloned()
        .collect()
}

/// Interaction graph document for the active group set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionGraph {
    pub task: String,
    pub groups: Vec<String>,
    pub edges: Vec<InteractionEdge>,
    pub coverage_target_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_edges: usize,
    pub covered_edges: usize,
    pub coverage_percent: f64,
    pub defined_edges: Vec<InteractionEdge>,
    pub covered_edge_list: Vec<InteractionEdge>,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.coverage_percent >= 100.0
    }
}

/// Accumulates exercised edges over a run.
#[derive(Debug, Clone, Default)]
pub struct CoverageTracker {
    defined: Vec<InteractionEdge>,
    covered: BTreeSet<InteractionEdge>,
}

impl CoverageTracker {
    pub fn new(defined: Vec<InteractionEdge>) -> Self {
        Self {
            defined,
            covered: BTreeSet::new(),
        }
    }

    /// Mark `edge` exercised. Edges outside the defined set are ignored.
    /// Returns `true` the first time a defined edge is covered.
    pub fn mark_covered(&mut self, edge: &InteractionEdge) -> bool {
        self.defined.contains(edge) && self.covered.insert(edge.clone())
    }

    /// Percentage rounded to three decimals; 100.0 with no defined edges.
    pub fn percent(&self) -> f64 {
        if self.defined.is_empty() {
            return 100.0;
        }
        let raw = self.covered.len() as f64 / self.defined.len() as f64 * 100.0;
        (raw * 1000.0).round() / 1000.0
    }

    pub fn report(&self) -> CoverageReport {
        CoverageReport {
            total_edges: self.defined.len(),
            covered_edges: self.covered.len(),
            coverage_percent: self.percent(),
            defined_edges: self.defined.clone(),
            covered_edge_list: self.covered.iter().cloned().collect(),
        }
    }
}
