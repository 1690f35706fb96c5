use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{DeltashipError, Result};

/// One content-addressed unit of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    /// Path relative to the release root, always `/`-separated.
    pub path: String,
    pub size: u64,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Binary patch from the previous release's copy of this chunk, offered
    /// alongside the full file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<ChunkPatch>,
}

/// A patch that turns the chunk with `base_hash` into this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPatch {
    pub path: String,
    pub size: u64,
    pub hash: String,
    pub base_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ChunkRecord {
    pub fn new(id: impl Into<String>, path: impl Into<String>, size: u64, hash: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            size,
            hash: hash.into(),
            url: None,
            patch: None,
        }
    }
}

/// Where a published release lives. All fields are absent until a publish succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_repo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_folder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_base_url: Option<String>,
}

impl HostingMetadata {
    pub fn is_empty(&self) -> bool {
        *self == HostingMetadata::default()
    }
}

/// Versioned description of a release's chunk set.
///
/// A published manifest is never edited in place by callers; a new release
/// produces a new manifest. Staging may attach chunk patches; after that the
/// only mutation is [`apply_hosting`], done once by the publisher after every
/// chunk is confirmed remote.
///
/// [`apply_hosting`]: ReleaseManifest::apply_hosting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseManifest {
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    pub chunk_size_mb: u32,
    pub total_size: u64,
    pub chunks: Vec<ChunkRecord>,
    #[serde(flatten)]
    pub hosting: HostingMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ReleaseManifest {
    /// Build a manifest, deriving `total_size` from the chunks.
    pub fn new(version: impl Into<String>, chunk_size_mb: u32, chunks: Vec<ChunkRecord>) -> Self {
        let total_size = chunks.iter().map(|c| c.size).sum();
        Self {
            version: version.into(),
            chunk_size_mb,
            total_size,
            chunks,
            hosting: HostingMetadata::default(),
            updated_at: None,
        }
    }

    /// Load and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let label = path.display().to_string();
        let raw = std::fs::read(path)
            .map_err(|e| DeltashipError::manifest(&label, format!("cannot read: {e}")))?;
        Self::from_slice(&raw, &label)
    }

    /// Parse and validate manifest JSON. `label` names the source in errors.
    pub fn from_slice(raw: &[u8], label: &str) -> Result<Self> {
        let manifest: ReleaseManifest =
            serde_json::from_slice(raw).map_err(|e| DeltashipError::manifest(label, e.to_string()))?;
        manifest.validate(label)?;
        Ok(manifest)
    }

    /// Check the structural invariants: unique non-empty ids and a consistent total.
    pub fn validate(&self, label: &str) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.chunks.len());
        for chunk in &self.chunks {
            if chunk.id.is_empty() {
                return Err(DeltashipError::manifest(
                    label,
                    format!("chunk at '{}' has an empty id", chunk.path),
                ));
            }
            if !seen.insert(chunk.id.as_str()) {
                return Err(DeltashipError::manifest(
                    label,
                    format!("duplicate chunk id '{}'", chunk.id),
                ));
            }
        }
        let sum = self.computed_size();
        if sum != self.total_size {
            return Err(DeltashipError::manifest(
                label,
                format!("total_size {} does not match chunk sizes ({sum})", self.total_size),
            ));
        }
        Ok(())
    }

    pub fn computed_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    pub fn find(&self, id: &str) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|c| c.id == id)
    }

    pub fn chunk_ids(&self) -> HashSet<&str> {
        self.chunks.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut ChunkRecord> {
        self.chunks.iter_mut().find(|c| c.id == id)
    }

    /// Record where the release is hosted and give each chunk, and each
    /// chunk patch, its absolute URL. `url_for` maps a release-relative path.
    pub fn apply_hosting(&mut self, hosting: HostingMetadata, url_for: impl Fn(&str) -> String) {
        for chunk in &mut self.chunks {
            chunk.url = Some(url_for(&chunk.path));
            if let Some(patch) = chunk.patch.as_mut() {
                patch.url = Some(url_for(&patch.path));
            }
        }
        self.hosting = hosting;
        self.updated_at = Some(Utc::now());
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self)?;
        out.push(b'\n');
        Ok(out)
    }

    /// Write the manifest through a temp file in the destination directory,
    /// then rename it into place so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.to_json_pretty()?)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}
