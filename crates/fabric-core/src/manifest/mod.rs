//! Manifest model consumed from the manifest-authoring collaborator.
//!
//! - [`group`]: `GroupManifest`, `Specialist`, `DependencyRecord`
//! - [`project`]: `ProjectManifest`, group selection, bundle paths

pub mod group;
pub mod project;

pub use group::{
    DependencyRecord, ExecutionDefaults, ExecutionOverride, GroupManifest, QualityGates,
    Specialist, SpecialistRole, DEFAULT_HEAD_AGENT,
};
pub use project::{project_dir, slugify, GroupEntry, ProjectManifest};
