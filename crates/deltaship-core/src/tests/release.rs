use std::path::{Path, PathBuf};
use std::sync::Mutex;

use deltaship_types::content_hash::ContentHash;
use deltaship_types::manifest::ReleaseManifest;

use super::helpers::release_config;
use crate::chunker::{ChunkedRelease, Chunker};
use crate::error::{DeltashipError, Result};
use crate::notify::BroadcastHub;
use crate::patch::PatchGenerator;
use crate::release::{
    CycleOutcome, INSTRUCTIONS_FILE, ReleaseInput, ReleaseOrchestrator, ReleaseSummary, SUMMARY_FILE,
};
use crate::testutil::{Fault, MemoryStore, RecordingSleeper, ScriptedStore, write_release};

const OLD: &[(&str, &str, &[u8])] = &[("A", "A.bin", b"aaaa"), ("B", "B.bin", b"bbbb")];
const NEW: &[(&str, &str, &[u8])] = &[
    ("A", "A.bin", b"aaaa"),
    ("B", "B.bin", b"BBBBBBBB"),
    ("C", "sub/C.bin", b"cc"),
];

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    out: PathBuf,
    old_manifest: PathBuf,
    old_chunks: PathBuf,
    new_manifest: PathBuf,
    new_chunks: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let old_chunks = root.join("old");
        let new_chunks = root.join("new");
        let old_manifest = root.join("old-manifest.json");
        let new_manifest = root.join("new-manifest.json");
        write_release(&old_chunks, "1.0", OLD).save(&old_manifest).unwrap();
        write_release(&new_chunks, "2.0", NEW).save(&new_manifest).unwrap();
        Self {
            out: root.join("out"),
            _dir: dir,
            root,
            old_manifest,
            old_chunks,
            new_manifest,
            new_chunks,
        }
    }

    fn chunked_input(&self) -> ReleaseInput {
        ReleaseInput::Chunked {
            manifest: self.new_manifest.clone(),
            chunk_root: self.new_chunks.clone(),
        }
    }
}

#[test]
fn stage_copies_only_the_delta() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.old_manifest));

    let outcome = ReleaseOrchestrator::new(&config).run(&fx.chunked_input()).unwrap();

    let CycleOutcome::Staged { summary, output_dir } = outcome else {
        panic!("expected a staged outcome");
    };
    assert_eq!(output_dir, fx.out);
    assert!(fx.out.join("chunks/B.bin").is_file());
    assert!(fx.out.join("chunks/sub/C.bin").is_file());
    assert!(!fx.out.join("chunks/A.bin").exists());

    assert_eq!(summary.old_version.as_deref(), Some("1.0"));
    assert_eq!(summary.new_version, "2.0");
    assert_eq!(summary.counts.old, 2);
    assert_eq!(summary.counts.new, 3);
    assert_eq!(summary.counts.unchanged, 1);
    assert_eq!(summary.counts.changed, 1);
    assert_eq!(summary.counts.added, 1);
    assert_eq!(summary.upload_bytes, 10);
    assert_eq!(summary.total_bytes, 14);
    assert_eq!(summary.changed_chunk_list, vec!["B.bin"]);
    assert_eq!(summary.new_chunk_list, vec!["sub/C.bin"]);

    let on_disk = ReleaseSummary::load(&fx.out.join(SUMMARY_FILE)).unwrap();
    assert_eq!(on_disk.staged_files.len(), 2);
    let staged = ReleaseManifest::load(&fx.out.join("manifest.json")).unwrap();
    assert_eq!(staged.version, "2.0");
    assert!(staged.updated_at.is_some());

    let doc = std::fs::read_to_string(fx.out.join(INSTRUCTIONS_FILE)).unwrap();
    assert!(doc.contains("Files to upload (2):"));
    assert!(doc.contains("releases/manifest-2.0.json"));
    assert!(doc.contains("releases/manifest-latest.json"));
}

#[test]
fn unchanged_release_stops_before_staging() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.new_manifest));

    let outcome = ReleaseOrchestrator::new(&config).run(&fx.chunked_input()).unwrap();

    assert!(matches!(outcome, CycleOutcome::NoChanges { .. }));
    assert!(!fx.out.exists());
}

#[test]
fn first_release_stages_everything() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, None);

    let CycleOutcome::Staged { summary, .. } =
        ReleaseOrchestrator::new(&config).run(&fx.chunked_input()).unwrap()
    else {
        panic!("expected a staged outcome");
    };
    assert_eq!(summary.old_version, None);
    assert_eq!(summary.counts.added, 3);
    assert_eq!(summary.savings_percent, 0.0);
}

#[test]
fn chunk_size_change_is_rejected() {
    let fx = Fixture::new();
    let mut old = ReleaseManifest::load(&fx.old_manifest).unwrap();
    old.chunk_size_mb = 32;
    old.save(&fx.old_manifest).unwrap();
    let config = release_config(&fx.out, Some(&fx.old_manifest));

    let err = ReleaseOrchestrator::new(&config).run(&fx.chunked_input()).unwrap_err();
    assert!(matches!(err, DeltashipError::Config(_)), "{err}");
    assert!(!fx.out.exists());
}

#[test]
fn malformed_previous_manifest_aborts_early() {
    let fx = Fixture::new();
    std::fs::write(&fx.old_manifest, br#"{"version": "1.0"}"#).unwrap();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let store = MemoryStore::new();

    let err = ReleaseOrchestrator::new(&config)
        .with_store(&store)
        .run(&fx.chunked_input())
        .unwrap_err();
    assert!(matches!(err, DeltashipError::ManifestFormat { .. }), "{err}");
    assert!(store.keys().is_empty());
}

#[test]
fn publish_uploads_delta_and_rewrites_hosting() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let store = MemoryStore::new();
    let hub = BroadcastHub::new(4);
    let sub = hub.subscribe().unwrap();

    let outcome = ReleaseOrchestrator::new(&config)
        .with_store(&store)
        .with_hub(&hub)
        .run(&fx.chunked_input())
        .unwrap();

    let CycleOutcome::Published { publish, .. } = outcome else {
        panic!("expected a published outcome");
    };
    assert!(publish.manifest_published);
    assert_eq!(publish.failed(), 0);
    assert_eq!(
        store.keys(),
        vec![
            "releases/B.bin",
            "releases/manifest-2.0.json",
            "releases/manifest-latest.json",
            "releases/sub/C.bin",
        ]
    );
    assert_eq!(store.contents("releases/B.bin").unwrap(), b"BBBBBBBB");

    let manifest = ReleaseManifest::load(&fx.out.join("manifest.json")).unwrap();
    assert_eq!(manifest.hosting.host_repo_id.as_deref(), Some("org/app"));
    assert_eq!(manifest.hosting.host_folder.as_deref(), Some("releases"));
    assert_eq!(
        manifest.find("A").unwrap().url.as_deref(),
        Some("https://cdn.example.com/releases/A.bin")
    );
    assert_eq!(
        store.contents("releases/manifest-latest.json"),
        store.contents("releases/manifest-2.0.json")
    );

    let event = sub.events.try_recv().unwrap();
    assert_eq!(event.version, "2.0");
    assert_eq!(
        event.manifest_url.as_deref(),
        Some("https://cdn.example.com/releases/manifest-2.0.json")
    );
}

#[test]
fn publish_replaces_stale_chunk_under_same_key() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let store = MemoryStore::new();
    store.insert("releases/A.bin", b"aaaa");
    store.insert("releases/B.bin", b"bbbb");

    let CycleOutcome::Published { publish, .. } = ReleaseOrchestrator::new(&config)
        .with_store(&store)
        .run(&fx.chunked_input())
        .unwrap()
    else {
        panic!("expected a published outcome");
    };

    assert!(publish.manifest_published);
    assert_eq!(publish.report.skipped(), 0);
    assert_eq!(publish.report.transferred(), 2);
    assert!(publish.report.integrity_mismatches.is_empty());
    assert_eq!(store.contents("releases/B.bin").unwrap(), b"BBBBBBBB");
}

#[test]
fn partial_publish_withholds_manifest_until_rerun() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let store = ScriptedStore::new();
    store.fail_key("releases/sub/C.bin", [Fault::Unrecoverable("quota".into())]);
    let sleeper = RecordingSleeper::new();
    let orchestrator = ReleaseOrchestrator::new(&config)
        .with_store(&store)
        .with_sleeper(&sleeper);

    let CycleOutcome::Published { publish, .. } = orchestrator.run(&fx.chunked_input()).unwrap() else {
        panic!("expected a published outcome");
    };
    assert!(!publish.manifest_published);
    assert_eq!(publish.failed(), 1);
    assert_eq!(store.inner().keys(), vec!["releases/B.bin"]);
    let staged = ReleaseManifest::load(&fx.out.join("manifest.json")).unwrap();
    assert!(staged.hosting.is_empty());

    let b_attempts = store.attempts("releases/B.bin");
    let rerun = orchestrator.publish(&store, &fx.out).unwrap();
    assert!(rerun.manifest_published);
    assert_eq!(rerun.report.skipped(), 1);
    assert_eq!(store.attempts("releases/B.bin"), b_attempts);
    assert!(store.inner().contents("releases/manifest-latest.json").is_some());
}

#[test]
fn accepted_partial_publish_writes_manifest() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let store = ScriptedStore::new();
    store.fail_key("releases/sub/C.bin", [Fault::Unrecoverable("quota".into())]);

    let CycleOutcome::Published { publish, .. } = ReleaseOrchestrator::new(&config)
        .with_store(&store)
        .accept_partial(true)
        .run(&fx.chunked_input())
        .unwrap()
    else {
        panic!("expected a published outcome");
    };
    assert_eq!(publish.failed(), 1);
    assert!(publish.manifest_published);
    assert!(store.inner().contents("releases/manifest-2.0.json").is_some());
}

#[test]
fn batched_publish_commits_chunks_together() {
    let fx = Fixture::new();
    let mut config = release_config(&fx.out, Some(&fx.old_manifest));
    config.transfer.batch_size = 10;
    let store = ScriptedStore::new();

    ReleaseOrchestrator::new(&config)
        .with_store(&store)
        .run(&fx.chunked_input())
        .unwrap();

    assert_eq!(
        store.commit_calls(),
        vec![vec!["releases/B.bin".to_string(), "releases/sub/C.bin".to_string()]]
    );
}

/// Writes a fixed-size patch, or fails when `fail` is set.
struct FakePatcher {
    size: usize,
    fail: bool,
}

impl PatchGenerator for FakePatcher {
    fn generate_patch(&self, old: &Path, _new: &Path, dest: &Path) -> Result<u64> {
        assert!(old.is_file(), "previous chunk {} missing", old.display());
        if self.fail {
            return Err(DeltashipError::PatchGenerationFailed {
                path: dest.display().to_string(),
                detail: "tool crashed".into(),
            });
        }
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(dest, vec![b'p'; self.size]).unwrap();
        Ok(self.size as u64)
    }
}

#[test]
fn smaller_patch_ships_alongside_full_file() {
    let fx = Fixture::new();
    let mut config = release_config(&fx.out, Some(&fx.old_manifest));
    config.release.previous_chunks = Some(fx.old_chunks.to_string_lossy().into_owned());
    let patcher = FakePatcher { size: 3, fail: false };
    let store = MemoryStore::new();

    let CycleOutcome::Published { summary, publish, .. } = ReleaseOrchestrator::new(&config)
        .with_patcher(&patcher)
        .with_store(&store)
        .run(&fx.chunked_input())
        .unwrap()
    else {
        panic!("expected a published outcome");
    };

    let for_b: Vec<&str> = summary
        .staged_files
        .iter()
        .filter(|f| f.chunk_id == "B")
        .map(|f| f.path.as_str())
        .collect();
    assert_eq!(for_b, vec!["B.bin", "B.bin.patch"]);
    assert!(fx.out.join("chunks/B.bin").is_file());
    assert!(fx.out.join("chunks/B.bin.patch").is_file());
    assert_eq!(summary.staged_bytes, 13);

    assert!(publish.manifest_published);
    assert_eq!(store.contents("releases/B.bin").unwrap(), b"BBBBBBBB");
    assert_eq!(store.contents("releases/B.bin.patch").unwrap(), b"ppp");

    let manifest = ReleaseManifest::load(&fx.out.join("manifest.json")).unwrap();
    let b = manifest.find("B").unwrap();
    assert_eq!(b.url.as_deref(), Some("https://cdn.example.com/releases/B.bin"));
    let patch = b.patch.as_ref().unwrap();
    assert_eq!(patch.base_hash, ContentHash::of_bytes(b"bbbb").to_string());
    assert_eq!(patch.hash, ContentHash::of_bytes(b"ppp").to_string());
    assert_eq!(
        patch.url.as_deref(),
        Some("https://cdn.example.com/releases/B.bin.patch")
    );
    assert!(manifest.find("C").unwrap().patch.is_none());
}

#[test]
fn larger_patch_keeps_full_file() {
    let fx = Fixture::new();
    let mut config = release_config(&fx.out, Some(&fx.old_manifest));
    config.release.previous_chunks = Some(fx.old_chunks.to_string_lossy().into_owned());
    let patcher = FakePatcher { size: 64, fail: false };

    ReleaseOrchestrator::new(&config)
        .with_patcher(&patcher)
        .run(&fx.chunked_input())
        .unwrap();

    assert!(fx.out.join("chunks/B.bin").is_file());
    assert!(!fx.out.join("chunks/B.bin.patch").exists());
    let staged = ReleaseManifest::load(&fx.out.join("manifest.json")).unwrap();
    assert!(staged.find("B").unwrap().patch.is_none());
}

#[test]
fn failed_patch_falls_back_to_full_file() {
    let fx = Fixture::new();
    let mut config = release_config(&fx.out, Some(&fx.old_manifest));
    config.release.previous_chunks = Some(fx.old_chunks.to_string_lossy().into_owned());
    let patcher = FakePatcher { size: 0, fail: true };

    let CycleOutcome::Staged { summary, .. } = ReleaseOrchestrator::new(&config)
        .with_patcher(&patcher)
        .run(&fx.chunked_input())
        .unwrap()
    else {
        panic!("expected a staged outcome");
    };

    assert_eq!(summary.patch_failures.len(), 1);
    assert!(summary.patch_failures[0].starts_with("B.bin:"));
    assert!(fx.out.join("chunks/B.bin").is_file());
}

/// Copies a prepared release into the chunker's output directory.
struct FakeChunker {
    prepared: PathBuf,
    seen_chunk_size: Mutex<Option<u32>>,
}

impl Chunker for FakeChunker {
    fn chunk(&self, _source: &Path, chunk_size_mb: u32, version: &str, out_dir: &Path) -> Result<ChunkedRelease> {
        *self.seen_chunk_size.lock().unwrap() = Some(chunk_size_mb);
        let mut manifest = write_release(out_dir, version, NEW);
        manifest.chunk_size_mb = chunk_size_mb;
        manifest.save(&out_dir.join("manifest.json"))?;
        assert!(self.prepared.is_dir());
        ChunkedRelease::load(&out_dir.join("manifest.json"), out_dir)
    }
}

#[test]
fn source_input_reuses_previous_chunk_size() {
    let fx = Fixture::new();
    let mut old = ReleaseManifest::load(&fx.old_manifest).unwrap();
    old.chunk_size_mb = 32;
    old.save(&fx.old_manifest).unwrap();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let chunker = FakeChunker {
        prepared: fx.root.clone(),
        seen_chunk_size: Mutex::new(None),
    };

    let input = ReleaseInput::Source {
        dir: fx.root.clone(),
        version: "3.0".into(),
    };
    let CycleOutcome::Staged { summary, .. } = ReleaseOrchestrator::new(&config)
        .with_chunker(&chunker)
        .run(&input)
        .unwrap()
    else {
        panic!("expected a staged outcome");
    };

    assert_eq!(*chunker.seen_chunk_size.lock().unwrap(), Some(32));
    assert_eq!(summary.new_version, "3.0");
}

#[test]
fn source_input_needs_a_chunker() {
    let fx = Fixture::new();
    let config = release_config(&fx.out, Some(&fx.old_manifest));
    let input = ReleaseInput::Source {
        dir: fx.root.clone(),
        version: "3.0".into(),
    };
    let err = ReleaseOrchestrator::new(&config).run(&input).unwrap_err();
    assert!(matches!(err, DeltashipError::Config(_)));
}
