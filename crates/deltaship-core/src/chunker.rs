use std::path::{Path, PathBuf};
use std::process::Command;

use deltaship_types::manifest::{ChunkRecord, ReleaseManifest};

use crate::error::{DeltashipError, Result};

/// File name the external chunker writes its manifest to.
pub const CHUNKER_MANIFEST: &str = "manifest.json";

/// A new release split into chunks: the manifest plus the directory its
/// chunk paths are relative to.
#[derive(Debug, Clone)]
pub struct ChunkedRelease {
    pub manifest: ReleaseManifest,
    pub chunk_root: PathBuf,
}

impl ChunkedRelease {
    /// Load an already-chunked release and check every chunk file is present.
    pub fn load(manifest_path: &Path, chunk_root: &Path) -> Result<Self> {
        let manifest = ReleaseManifest::load(manifest_path)?;
        let release = Self {
            manifest,
            chunk_root: chunk_root.to_path_buf(),
        };
        release.check_files()?;
        Ok(release)
    }

    pub fn chunk_file(&self, chunk: &ChunkRecord) -> PathBuf {
        self.chunk_root.join(&chunk.path)
    }

    fn check_files(&self) -> Result<()> {
        for chunk in &self.manifest.chunks {
            let path = self.chunk_file(chunk);
            if !path.is_file() {
                return Err(DeltashipError::Config(format!(
                    "chunk '{}' missing at '{}'",
                    chunk.id,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Turns a payload directory into chunks with a fixed target chunk size.
pub trait Chunker: Send + Sync {
    fn chunk(&self, source: &Path, chunk_size_mb: u32, version: &str, out_dir: &Path) -> Result<ChunkedRelease>;
}

/// Runs an external chunking program that writes `manifest.json` and the
/// chunk files into the output directory.
///
/// Argument placeholders: `{source}`, `{out}`, `{chunk_size_mb}`, `{version}`.
#[derive(Debug, Clone)]
pub struct CommandChunker {
    program: String,
    args: Vec<String>,
}

impl CommandChunker {
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DeltashipError::Config("chunker command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Chunker for CommandChunker {
    fn chunk(&self, source: &Path, chunk_size_mb: u32, version: &str, out_dir: &Path) -> Result<ChunkedRelease> {
        std::fs::create_dir_all(out_dir)?;
        let source_str = source.to_string_lossy();
        let out_str = out_dir.to_string_lossy();
        let size_str = chunk_size_mb.to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{source}", &source_str)
                    .replace("{out}", &out_str)
                    .replace("{chunk_size_mb}", &size_str)
                    .replace("{version}", version)
            })
            .collect();

        tracing::info!("Running chunker: {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| DeltashipError::Config(format!("failed to execute chunker '{}': {e}", self.program)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeltashipError::Other(format!(
                "chunker exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        ChunkedRelease::load(&out_dir.join(CHUNKER_MANIFEST), out_dir)
    }
}
