//! Release cycle: chunk a new release, diff it against the published one,
//! stage the delta and optionally publish it.

mod instructions;
mod publish;
mod stage;
mod summary;

use std::fmt;
use std::path::{Path, PathBuf};

use deltaship_storage::RemoteStore;
use deltaship_types::manifest::ReleaseManifest;

pub use instructions::{INSTRUCTIONS_FILE, render_instructions};
pub use publish::{PublishOutcome, PublishSettings, publish_staged};
pub use stage::{CHUNKS_DIR, PatchSource};
pub use summary::{ReleaseSummary, SUMMARY_FILE, StagedFile, SummaryCounts};

use crate::chunker::{ChunkedRelease, Chunker};
use crate::config::DeltashipConfig;
use crate::diff::{DiffResult, diff};
use crate::error::{DeltashipError, Result};
use crate::notify::{BroadcastHub, ReleaseEvent};
use crate::origin::{join_url, normalize_path};
use crate::patch::PatchGenerator;
use crate::transfer::{Sleeper, TransferEngine};

/// Where each release file lives on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    folder: String,
    latest_alias: String,
}

impl RemoteLayout {
    pub fn new(folder: Option<&str>, latest_alias: &str) -> Self {
        Self {
            folder: folder.unwrap_or("").trim_matches('/').to_string(),
            latest_alias: latest_alias.trim_matches('/').to_string(),
        }
    }

    pub fn folder(&self) -> Option<&str> {
        (!self.folder.is_empty()).then_some(self.folder.as_str())
    }

    fn key(&self, name: &str) -> String {
        if self.folder.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.folder)
        }
    }

    pub fn chunk_key(&self, chunk_path: &str) -> String {
        self.key(chunk_path)
    }

    pub fn manifest_key(&self, version: &str) -> String {
        self.key(&format!("manifest-{version}.json"))
    }

    pub fn alias_key(&self) -> String {
        self.key(&self.latest_alias)
    }

    /// Public URL of a remote key under `base_url`.
    pub fn url(base_url: &str, key: &str) -> String {
        join_url(base_url, &normalize_path(key))
    }
}

/// How the new release is supplied.
#[derive(Debug, Clone)]
pub enum ReleaseInput {
    /// A payload directory, split by the configured chunker.
    Source { dir: PathBuf, version: String },
    /// Output of an earlier chunker run.
    Chunked { manifest: PathBuf, chunk_root: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SelectInputs,
    Chunk,
    Diff,
    StageOutput,
    Publish,
    Notify,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::SelectInputs => "select-inputs",
            Stage::Chunk => "chunk",
            Stage::Diff => "diff",
            Stage::StageOutput => "stage-output",
            Stage::Publish => "publish",
            Stage::Notify => "notify",
        })
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    /// Nothing was added or changed; nothing was staged.
    NoChanges { version: String, diff: DiffResult },
    Staged { output_dir: PathBuf, summary: ReleaseSummary },
    Published {
        output_dir: PathBuf,
        summary: ReleaseSummary,
        publish: PublishOutcome,
    },
}

/// Drives one release cycle.
///
/// The output directory and manifest are single-writer: callers must not run
/// two cycles against the same output concurrently.
pub struct ReleaseOrchestrator<'a> {
    config: &'a DeltashipConfig,
    chunker: Option<&'a dyn Chunker>,
    patcher: Option<&'a dyn PatchGenerator>,
    store: Option<&'a dyn RemoteStore>,
    sleeper: Option<&'a dyn Sleeper>,
    hub: Option<&'a BroadcastHub>,
    accept_partial: bool,
}

impl<'a> ReleaseOrchestrator<'a> {
    pub fn new(config: &'a DeltashipConfig) -> Self {
        Self {
            config,
            chunker: None,
            patcher: None,
            store: None,
            sleeper: None,
            hub: None,
            accept_partial: false,
        }
    }

    pub fn with_chunker(mut self, chunker: &'a dyn Chunker) -> Self {
        self.chunker = Some(chunker);
        self
    }

    pub fn with_patcher(mut self, patcher: &'a dyn PatchGenerator) -> Self {
        self.patcher = Some(patcher);
        self
    }

    /// Publishing is skipped unless a store is attached.
    pub fn with_store(mut self, store: &'a dyn RemoteStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn with_hub(mut self, hub: &'a BroadcastHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn accept_partial(mut self, accept: bool) -> Self {
        self.accept_partial = accept;
        self
    }

    pub fn output_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.release.output_dir)
    }

    /// Run the cycle. A failing stage ends it; artifacts from earlier stages
    /// stay on disk.
    pub fn run(&self, input: &ReleaseInput) -> Result<CycleOutcome> {
        let output_dir = self.output_dir();

        let previous = self.in_stage(Stage::SelectInputs, || self.load_previous())?;

        // Chunker output must outlive the stage step.
        let mut _work_dir = None;
        let release = self.in_stage(Stage::Chunk, || {
            let (release, work) = self.chunk(input, previous.as_ref())?;
            _work_dir = work;
            Ok(release)
        })?;

        let result = self.in_stage(Stage::Diff, || {
            check_chunk_size(previous.as_ref(), &release.manifest)?;
            let empty;
            let old = match &previous {
                Some(m) => m,
                None => {
                    empty = ReleaseManifest::new("", release.manifest.chunk_size_mb, Vec::new());
                    &empty
                }
            };
            Ok(diff(old, &release.manifest))
        })?;
        tracing::info!(
            "diff: {} added, {} changed, {} unchanged, {} removed; upload {} of {} bytes",
            result.added.len(),
            result.changed.len(),
            result.unchanged.len(),
            result.removed.len(),
            result.upload_bytes,
            result.total_bytes
        );

        if !result.has_changes() {
            tracing::info!("release {} has no changes; nothing staged", release.manifest.version);
            return Ok(CycleOutcome::NoChanges {
                version: release.manifest.version.clone(),
                diff: result,
            });
        }

        let summary = self.in_stage(Stage::StageOutput, || {
            self.stage_output(&release, previous.as_ref(), &result, &output_dir)
        })?;

        let Some(store) = self.store else {
            return Ok(CycleOutcome::Staged { output_dir, summary });
        };

        let publish = self.in_stage(Stage::Publish, || self.publish(store, &output_dir))?;

        if publish.manifest_published {
            self.in_stage(Stage::Notify, || {
                self.notify(&publish);
                Ok(())
            })?;
        }

        Ok(CycleOutcome::Published {
            output_dir,
            summary,
            publish,
        })
    }

    /// Publish a directory staged by an earlier run.
    pub fn publish(&self, store: &dyn RemoteStore, output_dir: &Path) -> Result<PublishOutcome> {
        let mut engine = TransferEngine::new(store, self.config.transfer.options());
        if let Some(sleeper) = self.sleeper {
            engine = engine.with_sleeper(sleeper);
        }
        let settings = PublishSettings {
            hosting: &self.config.hosting,
            layout: self.layout(),
            manifest_name: &self.config.release.manifest_name,
            batch_size: self.config.transfer.batch_size,
            accept_partial: self.accept_partial,
        };
        publish_staged(&engine, output_dir, &settings)
    }

    pub fn layout(&self) -> RemoteLayout {
        RemoteLayout::new(
            self.config.hosting.folder.as_deref(),
            &self.config.release.latest_alias,
        )
    }

    fn in_stage<T>(&self, stage: Stage, f: impl FnOnce() -> Result<T>) -> Result<T> {
        tracing::debug!("entering {stage}");
        f().inspect_err(|e| tracing::error!("{stage} failed: {e}"))
    }

    fn load_previous(&self) -> Result<Option<ReleaseManifest>> {
        match &self.config.release.manifest {
            Some(path) => {
                let manifest = ReleaseManifest::load(Path::new(path))?;
                tracing::info!("previous release {} ({} chunks)", manifest.version, manifest.chunks.len());
                Ok(Some(manifest))
            }
            None => {
                tracing::info!("no previous manifest configured; treating as first release");
                Ok(None)
            }
        }
    }

    fn chunk(
        &self,
        input: &ReleaseInput,
        previous: Option<&ReleaseManifest>,
    ) -> Result<(ChunkedRelease, Option<tempfile::TempDir>)> {
        match input {
            ReleaseInput::Chunked { manifest, chunk_root } => {
                Ok((ChunkedRelease::load(manifest, chunk_root)?, None))
            }
            ReleaseInput::Source { dir, version } => {
                let chunker = self
                    .chunker
                    .ok_or_else(|| DeltashipError::Config("chunker.command is not configured".into()))?;
                if !dir.is_dir() {
                    return Err(DeltashipError::Config(format!(
                        "source directory '{}' does not exist",
                        dir.display()
                    )));
                }
                // Boundaries must be computed the same way every release.
                let chunk_size_mb = previous.map_or(self.config.release.chunk_size_mb, |m| m.chunk_size_mb);
                let work = tempfile::Builder::new().prefix("deltaship-chunks-").tempdir()?;
                let mut release = chunker.chunk(dir, chunk_size_mb, version, work.path())?;
                release.manifest.version = version.clone();
                Ok((release, Some(work)))
            }
        }
    }

    fn stage_output(
        &self,
        release: &ChunkedRelease,
        previous: Option<&ReleaseManifest>,
        result: &DiffResult,
        output_dir: &Path,
    ) -> Result<ReleaseSummary> {
        std::fs::create_dir_all(output_dir)?;
        let mut summary = ReleaseSummary::new(previous, &release.manifest, result);

        let previous_chunks = self.config.release.previous_chunks.as_deref().map(Path::new);
        let patches = match (self.patcher, previous_chunks) {
            (Some(generator), Some(previous_chunks)) => Some(PatchSource {
                generator,
                previous_chunks,
            }),
            _ => None,
        };
        stage::stage_chunks(release, previous, result, output_dir, patches.as_ref(), &mut summary)?;

        let mut manifest = release.manifest.clone();
        stage::attach_patches(&mut manifest, &summary.staged_files);
        manifest.updated_at = Some(chrono::Utc::now());
        manifest.save(&output_dir.join(&self.config.release.manifest_name))?;
        summary.save(&output_dir.join(SUMMARY_FILE))?;

        let doc = render_instructions(
            &summary,
            output_dir,
            &self.config.release.manifest_name,
            &self.layout(),
            &self.config.release.upload_command,
        );
        std::fs::write(output_dir.join(INSTRUCTIONS_FILE), doc)?;
        Ok(summary)
    }

    fn notify(&self, publish: &PublishOutcome) {
        let Some(hub) = self.hub else {
            return;
        };
        let event = ReleaseEvent {
            version: publish.version.clone(),
            manifest_url: publish.manifest_url.clone(),
        };
        let delivered = hub.broadcast(&event);
        tracing::info!("release {} announced to {delivered} subscribers", event.version);
    }
}

/// New and prior manifests must share a chunk size, or their ids and hashes
/// are not comparable.
fn check_chunk_size(previous: Option<&ReleaseManifest>, new: &ReleaseManifest) -> Result<()> {
    match previous {
        Some(prev) if prev.chunk_size_mb != new.chunk_size_mb => Err(DeltashipError::Config(format!(
            "chunk size changed from {} MB to {} MB; releases must keep the same chunk size",
            prev.chunk_size_mb, new.chunk_size_mb
        ))),
        _ => Ok(()),
    }
}
