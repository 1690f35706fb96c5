use std::fs;
use std::path::{Component, Path, PathBuf};

use deltaship_types::content_hash::ContentHash;
use deltaship_types::manifest::{ChunkPatch, ChunkRecord, ReleaseManifest};

use super::summary::{ReleaseSummary, StagedFile};
use crate::chunker::ChunkedRelease;
use crate::diff::DiffResult;
use crate::error::{DeltashipError, Result};
use crate::patch::{Payload, PatchGenerator, choose_payload};

/// Directory under the output root holding staged chunk files.
pub const CHUNKS_DIR: &str = "chunks";

/// Binary-patch settings for the stage step.
pub struct PatchSource<'a> {
    pub generator: &'a dyn PatchGenerator,
    /// Directory holding the previous release's chunk files.
    pub previous_chunks: &'a Path,
}

/// Copy the chunks a release needs uploaded into `output_dir`.
///
/// Only added and changed chunks are staged, each as a full file; a changed
/// chunk may also get a smaller `.patch`. Any `chunks/` directory left by
/// an earlier stage is replaced. Returns the summary's file list filled in.
pub(crate) fn stage_chunks(
    release: &ChunkedRelease,
    old: Option<&ReleaseManifest>,
    diff: &DiffResult,
    output_dir: &Path,
    patches: Option<&PatchSource<'_>>,
    summary: &mut ReleaseSummary,
) -> Result<()> {
    let chunks_root = output_dir.join(CHUNKS_DIR);
    if chunks_root.exists() {
        fs::remove_dir_all(&chunks_root)?;
    }
    fs::create_dir_all(&chunks_root)?;

    for id in &diff.changed {
        let chunk = find_chunk(&release.manifest, id)?;
        summary.staged_files.push(stage_full(release, chunk, &chunks_root)?);
        if let (Some(src), Some(prev)) = (patches, old.and_then(|m| m.find(id))) {
            if let Some(patch) = stage_patch(release, chunk, prev, &chunks_root, src, summary)? {
                summary.staged_files.push(patch);
            }
        }
    }
    for id in &diff.added {
        let chunk = find_chunk(&release.manifest, id)?;
        summary.staged_files.push(stage_full(release, chunk, &chunks_root)?);
    }

    summary.staged_bytes = summary.staged_files.iter().map(|f| f.size).sum();
    tracing::info!(
        "staged {} files ({} bytes) into {}",
        summary.staged_files.len(),
        summary.staged_bytes,
        chunks_root.display()
    );
    Ok(())
}

fn find_chunk<'m>(manifest: &'m ReleaseManifest, id: &str) -> Result<&'m ChunkRecord> {
    manifest
        .find(id)
        .ok_or_else(|| DeltashipError::Other(format!("chunk '{id}' vanished from manifest")))
}

fn stage_full(release: &ChunkedRelease, chunk: &ChunkRecord, chunks_root: &Path) -> Result<StagedFile> {
    let dest = staged_path(chunks_root, &chunk.path)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let size = fs::copy(release.chunk_file(chunk), &dest)?;
    tracing::debug!("staged {} ({size} bytes)", chunk.path);
    Ok(StagedFile {
        chunk_id: chunk.id.clone(),
        path: chunk.path.clone(),
        size,
        hash: chunk.hash.clone(),
        patch_base_hash: None,
    })
}

/// Stage a patch against the previous chunk next to the full file when it is
/// smaller. A failing patch tool is recorded and the chunk ships full only.
fn stage_patch(
    release: &ChunkedRelease,
    chunk: &ChunkRecord,
    previous: &ChunkRecord,
    chunks_root: &Path,
    src: &PatchSource<'_>,
    summary: &mut ReleaseSummary,
) -> Result<Option<StagedFile>> {
    let patch_rel = format!("{}.patch", chunk.path);
    let patch_dest = staged_path(chunks_root, &patch_rel)?;
    let old_file = src.previous_chunks.join(&previous.path);
    let new_file = release.chunk_file(chunk);

    match src.generator.generate_patch(&old_file, &new_file, &patch_dest) {
        Ok(patch_size) => match choose_payload(chunk.size, patch_size) {
            Payload::Patch => {
                tracing::debug!("{}: patch {patch_size} bytes < full {}", chunk.path, chunk.size);
                Ok(Some(StagedFile {
                    chunk_id: chunk.id.clone(),
                    hash: ContentHash::of_file(&patch_dest)?.to_string(),
                    path: patch_rel,
                    size: patch_size,
                    patch_base_hash: Some(previous.hash.clone()),
                }))
            }
            Payload::Full => {
                let _ = fs::remove_file(&patch_dest);
                Ok(None)
            }
        },
        Err(e) => {
            tracing::warn!("{e}; shipping full file only");
            let _ = fs::remove_file(&patch_dest);
            summary.patch_failures.push(format!("{}: {e}", chunk.path));
            Ok(None)
        }
    }
}

/// Record each staged patch on its chunk so clients can find it.
pub(crate) fn attach_patches(manifest: &mut ReleaseManifest, staged: &[StagedFile]) {
    for f in staged {
        let (Some(base_hash), Some(chunk)) = (f.patch_base_hash.as_ref(), manifest.find_mut(&f.chunk_id)) else {
            continue;
        };
        chunk.patch = Some(ChunkPatch {
            path: f.path.clone(),
            size: f.size,
            hash: f.hash.clone(),
            base_hash: base_hash.clone(),
            url: None,
        });
    }
}

/// Resolve a manifest chunk path under `root`, refusing anything that could
/// escape it.
fn staged_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    let escapes = rel.is_empty()
        || rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(DeltashipError::manifest(
            rel,
            "chunk path must be relative and stay inside the release",
        ));
    }
    Ok(root.join(rel_path))
}
