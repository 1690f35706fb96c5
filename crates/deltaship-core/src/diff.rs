use std::collections::HashMap;

use deltaship_types::manifest::{ChunkRecord, ReleaseManifest};
use serde::Serialize;

/// Partition of a new manifest's chunk ids against a prior manifest.
///
/// `added`, `changed` and `unchanged` are disjoint and together hold every id
/// of the new manifest exactly once. `removed` lists ids only the old manifest
/// had; it is informational and never drives remote deletion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    /// Bytes of added + changed chunks.
    pub upload_bytes: u64,
    /// The new manifest's total size.
    pub total_bytes: u64,
    /// `1 - upload_bytes / total_bytes`, or 0 for an empty release.
    pub savings: f64,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.changed.is_empty()
    }

    /// Ids that must be transferred: changed then added.
    pub fn transfer_ids(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().chain(self.added.iter()).map(String::as_str)
    }

    pub fn savings_percent(&self) -> f64 {
        (self.savings * 10_000.0).round() / 100.0
    }
}

/// Compare two manifests by chunk id and content hash.
pub fn diff(old: &ReleaseManifest, new: &ReleaseManifest) -> DiffResult {
    let old_by_id: HashMap<&str, &ChunkRecord> =
        old.chunks.iter().map(|c| (c.id.as_str(), c)).collect();
    let new_by_id: HashMap<&str, &ChunkRecord> =
        new.chunks.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    let mut unchanged = Vec::new();
    for chunk in new_by_id.values() {
        match old_by_id.get(chunk.id.as_str()) {
            None => added.push(*chunk),
            Some(prev) if prev.hash != chunk.hash => changed.push(*chunk),
            Some(_) => unchanged.push(*chunk),
        }
    }
    let mut removed: Vec<&ChunkRecord> = old_by_id
        .values()
        .filter(|c| !new_by_id.contains_key(c.id.as_str()))
        .copied()
        .collect();

    let upload_bytes: u64 = added.iter().chain(changed.iter()).map(|c| c.size).sum();
    let total_bytes = new.total_size;
    let savings = if total_bytes == 0 {
        0.0
    } else {
        1.0 - upload_bytes as f64 / total_bytes as f64
    };

    DiffResult {
        added: sorted_ids(&mut added),
        changed: sorted_ids(&mut changed),
        unchanged: sorted_ids(&mut unchanged),
        removed: sorted_ids(&mut removed),
        upload_bytes,
        total_bytes,
        savings,
    }
}

fn sorted_ids(records: &mut [&ChunkRecord]) -> Vec<String> {
    records.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));
    records.iter().map(|c| c.id.clone()).collect()
}
