use std::path::Path;

use deltaship_types::manifest::ReleaseManifest;
use serde::{Deserialize, Serialize};

use crate::diff::DiffResult;
use crate::error::{DeltashipError, Result};

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounts {
    pub old: usize,
    pub new: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub added: usize,
}

/// One file placed in the output's `chunks/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub chunk_id: String,
    /// Path relative to `chunks/`; also the key suffix under the remote folder.
    pub path: String,
    pub size: u64,
    /// Content hash of the staged file itself.
    pub hash: String,
    /// Set when the file is a binary patch against the previous chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_base_hash: Option<String>,
}

/// Machine-readable record of one staged release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSummary {
    pub old_version: Option<String>,
    pub new_version: String,
    pub counts: SummaryCounts,
    pub upload_bytes: u64,
    pub total_bytes: u64,
    pub savings_percent: f64,
    pub changed_chunk_list: Vec<String>,
    pub new_chunk_list: Vec<String>,
    #[serde(default)]
    pub removed_chunk_list: Vec<String>,
    #[serde(default)]
    pub staged_files: Vec<StagedFile>,
    /// Bytes actually staged, patches included.
    #[serde(default)]
    pub staged_bytes: u64,
    #[serde(default)]
    pub patch_failures: Vec<String>,
}

impl ReleaseSummary {
    pub fn new(old: Option<&ReleaseManifest>, new: &ReleaseManifest, diff: &DiffResult) -> Self {
        let old_paths = |ids: &[String]| -> Vec<String> {
            ids.iter()
                .filter_map(|id| old.and_then(|m| m.find(id)).map(|c| c.path.clone()))
                .collect()
        };
        let new_paths = |ids: &[String]| -> Vec<String> {
            ids.iter()
                .filter_map(|id| new.find(id).map(|c| c.path.clone()))
                .collect()
        };

        Self {
            old_version: old.map(|m| m.version.clone()),
            new_version: new.version.clone(),
            counts: SummaryCounts {
                old: old.map_or(0, |m| m.chunks.len()),
                new: new.chunks.len(),
                unchanged: diff.unchanged.len(),
                changed: diff.changed.len(),
                added: diff.added.len(),
            },
            upload_bytes: diff.upload_bytes,
            total_bytes: diff.total_bytes,
            savings_percent: diff.savings_percent(),
            changed_chunk_list: new_paths(&diff.changed),
            new_chunk_list: new_paths(&diff.added),
            removed_chunk_list: old_paths(&diff.removed),
            staged_files: Vec::new(),
            staged_bytes: 0,
            patch_failures: Vec::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            DeltashipError::Config(format!("cannot read summary '{}': {e}", path.display()))
        })?;
        serde_json::from_slice(&raw).map_err(|e| DeltashipError::Config(format!(
            "invalid summary '{}': {e}",
            path.display()
        )))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        std::fs::write(path, out)?;
        Ok(())
    }
}
