use std::path::Path;

use deltaship_types::manifest::{HostingMetadata, ReleaseManifest};
use serde::Serialize;

use super::RemoteLayout;
use super::stage::CHUNKS_DIR;
use super::summary::{ReleaseSummary, SUMMARY_FILE};
use crate::config::HostingConfig;
use crate::error::Result;
use crate::transfer::{TransferEngine, TransferJob, TransferReport};

pub struct PublishSettings<'a> {
    pub hosting: &'a HostingConfig,
    pub layout: RemoteLayout,
    pub manifest_name: &'a str,
    /// Files per atomic commit; 0 pushes files individually.
    pub batch_size: usize,
    /// Rewrite and upload the manifest even if some chunks failed.
    pub accept_partial: bool,
}

#[derive(Debug, Serialize)]
pub struct PublishOutcome {
    pub version: String,
    pub report: TransferReport,
    /// The manifest (and latest alias) were rewritten and uploaded.
    pub manifest_published: bool,
    pub manifest_key: String,
    pub manifest_url: Option<String>,
}

impl PublishOutcome {
    pub fn failed(&self) -> usize {
        self.report.failed()
    }
}

/// Push a staged output directory and, once every file is in place, publish
/// its manifest.
///
/// Safe to re-run: remote files whose content already matches are skipped, so a partial
/// publish is completed by invoking this again.
pub fn publish_staged(
    engine: &TransferEngine<'_>,
    output_dir: &Path,
    settings: &PublishSettings<'_>,
) -> Result<PublishOutcome> {
    let manifest_path = output_dir.join(settings.manifest_name);
    let mut manifest = ReleaseManifest::load(&manifest_path)?;
    let summary = ReleaseSummary::load(&output_dir.join(SUMMARY_FILE))?;
    let layout = &settings.layout;

    let jobs: Vec<TransferJob> = summary
        .staged_files
        .iter()
        .map(|f| {
            TransferJob::new(layout.chunk_key(&f.path), output_dir.join(CHUNKS_DIR).join(&f.path))
                .with_size(f.size)
                .with_hash(f.hash.clone())
        })
        .collect();

    tracing::info!("publishing release {} ({} files)", manifest.version, jobs.len());
    let report = if settings.batch_size > 0 {
        engine.push_batched(jobs, settings.batch_size, &format!("Release {}", manifest.version))
    } else {
        engine.push(jobs)
    };

    let manifest_key = layout.manifest_key(&manifest.version);
    let base_url = settings.hosting.base_url.as_deref();
    let mut outcome = PublishOutcome {
        version: manifest.version.clone(),
        report,
        manifest_published: false,
        manifest_key: manifest_key.clone(),
        manifest_url: base_url.map(|b| RemoteLayout::url(b, &manifest_key)),
    };

    let failed = outcome.failed();
    if failed > 0 {
        if !settings.accept_partial {
            tracing::warn!(
                "{failed} of {} files failed to upload; manifest not published",
                outcome.report.jobs.len()
            );
            return Ok(outcome);
        }
        tracing::warn!("{failed} files failed to upload; publishing partial release as requested");
    }
    for m in &outcome.report.integrity_mismatches {
        tracing::warn!("integrity mismatch on {}: expected {}, got {}", m.path, m.expected, m.actual);
    }

    let hosting = HostingMetadata {
        host_repo_id: settings.hosting.repo_id.clone(),
        host_type: Some(settings.hosting.host_type.clone()),
        host_revision: Some(settings.hosting.revision.clone()),
        host_folder: layout.folder().map(str::to_string),
        host_base_url: settings.hosting.base_url.clone(),
    };
    manifest.apply_hosting(hosting, |path| {
        RemoteLayout::url(base_url.unwrap_or(""), &layout.chunk_key(path))
    });
    manifest.save(&manifest_path)?;

    let bytes = manifest.to_json_pretty()?;
    engine.put_replacing(&manifest_key, &bytes)?;
    engine.put_replacing(&layout.alias_key(), &bytes)?;
    tracing::info!("published manifest {manifest_key}");

    outcome.manifest_published = true;
    Ok(outcome)
}
