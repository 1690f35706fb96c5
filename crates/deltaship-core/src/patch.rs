use std::path::Path;
use std::process::Command;

use crate::error::{DeltashipError, Result};

/// Produces a binary patch turning `old` into `new`, written to `dest`.
pub trait PatchGenerator: Send + Sync {
    /// Returns the patch size in bytes.
    fn generate_patch(&self, old: &Path, new: &Path, dest: &Path) -> Result<u64>;
}

/// Runs an external binary-diff program.
///
/// `args` may contain `{old}`, `{new}` and `{patch}` placeholders; they are
/// replaced by the corresponding paths.
#[derive(Debug, Clone)]
pub struct ExternalPatchTool {
    program: String,
    args: Vec<String>,
}

impl ExternalPatchTool {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command line: program followed by its argument template.
    pub fn from_command(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| DeltashipError::Config("patch command is empty".into()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    fn expand(&self, old: &Path, new: &Path, dest: &Path) -> Vec<String> {
        let old = old.to_string_lossy();
        let new = new.to_string_lossy();
        let dest = dest.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{old}", &old)
                    .replace("{new}", &new)
                    .replace("{patch}", &dest)
            })
            .collect()
    }
}

impl PatchGenerator for ExternalPatchTool {
    fn generate_patch(&self, old: &Path, new: &Path, dest: &Path) -> Result<u64> {
        let args = self.expand(old, new, dest);
        tracing::debug!("running patch tool: {} {}", self.program, args.join(" "));
        let failed = |detail: String| DeltashipError::PatchGenerationFailed {
            path: new.display().to_string(),
            detail,
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| failed(format!("failed to execute '{}': {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if !stderr.trim().is_empty() {
                stderr.trim().to_string()
            } else if !stdout.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                match output.status.code() {
                    Some(code) => format!("exited with status {code}"),
                    None => "terminated by signal".to_string(),
                }
            };
            return Err(failed(detail));
        }

        let size = std::fs::metadata(dest)
            .map_err(|e| failed(format!("tool succeeded but patch is unreadable: {e}")))?
            .len();
        if size == 0 {
            return Err(failed("tool succeeded but wrote an empty patch".into()));
        }
        Ok(size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Full,
    Patch,
}

/// Send the patch only when it is strictly smaller than the full file.
pub fn choose_payload(full_size: u64, patch_size: u64) -> Payload {
    if patch_size < full_size {
        Payload::Patch
    } else {
        Payload::Full
    }
}
