//! The persisted intermediate artifact.
//!
//! A JSON document holding the binding model a run declared and the files
//! each of its translation units depended on. Later runs import it to
//! resolve cross-module references without emitting its modules again.

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::BindingModel;
use crate::TOOL_VERSION;

#[derive(Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub tool_version: String,
    pub model: BindingModel,
    /// Source file to the files it included, in input order.
    pub dependencies: IndexMap<String, Vec<PathBuf>>,
}

impl Artifact {
    /// Snapshot of what this run declared itself; imported entities are left
    /// to the artifacts they came from.
    pub fn new(model: &BindingModel, dependencies: IndexMap<String, Vec<PathBuf>>) -> Self {
        let mut model = model.clone();
        model.retain_local();
        Self {
            tool_version: TOOL_VERSION.to_string(),
            model,
            dependencies,
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing artifact {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("reading artifact {}", path.display()))?;
        let mut artifact: Artifact = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing artifact {}", path.display()))?;
        if artifact.tool_version != TOOL_VERSION {
            tracing::warn!(
                path = %path.display(),
                written_by = %artifact.tool_version,
                "artifact was written by another stubsmith version"
            );
        }
        artifact.model.reindex();
        Ok(artifact)
    }

    /// The artifact's model, flagged as imported.
    pub fn into_imported_model(self) -> BindingModel {
        let mut model = self.model;
        model.mark_imported();
        model
    }

    /// Every file any translation unit depended on, deduplicated.
    pub fn all_dependencies(&self) -> Vec<PathBuf> {
        let mut seen = indexmap::IndexSet::new();
        for (source, deps) in &self.dependencies {
            seen.insert(PathBuf::from(source));
            seen.extend(deps.iter().cloned());
        }
        seen.into_iter().collect()
    }
}
