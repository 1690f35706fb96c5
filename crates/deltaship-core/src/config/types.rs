use std::time::Duration;

use deltaship_storage::StoreConfig;
use serde::{Deserialize, Serialize};

use super::defaults::*;
use crate::error::{DeltashipError, Result};
use crate::origin::OriginResolver;
use crate::transfer::{RateLimitPolicy, Strategy, TransferOptions};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeltashipConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
    #[serde(default)]
    pub origins: OriginsConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub release: ReleaseConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub patch: PatchConfig,
}

/// Identity of the hosting location recorded into published manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingConfig {
    /// Repository / bucket identifier on the host, e.g. "org/app".
    #[serde(default)]
    pub repo_id: Option<String>,
    #[serde(default = "default_host_type")]
    pub host_type: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Remote folder every release file lives under.
    #[serde(default)]
    pub folder: Option<String>,
    /// Public base URL chunks are downloaded from.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            repo_id: None,
            host_type: default_host_type(),
            revision: default_revision(),
            folder: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginsConfig {
    #[serde(default)]
    pub release: Vec<String>,
    #[serde(default)]
    pub prerelease: Vec<String>,
    /// HMAC key for signed URLs. Unset or empty disables signing.
    #[serde(default)]
    pub signing_secret: Option<String>,
}

impl OriginsConfig {
    pub fn resolver(&self) -> Result<OriginResolver> {
        OriginResolver::new(
            self.release.clone(),
            self.prerelease.clone(),
            self.signing_secret.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Total attempts per item, counting the first.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Files per atomic commit when pushing; 0 pushes files individually.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            concurrency: default_concurrency(),
            retries: default_retries(),
            batch_size: default_batch_size(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl TransferConfig {
    pub fn options(&self) -> TransferOptions {
        TransferOptions {
            strategy: self.strategy,
            concurrency: self.concurrency,
            retries: self.retries,
            rate_limit: self.rate_limit.policy(),
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_ceiling_seconds")]
    pub ceiling_seconds: u64,
    #[serde(default = "default_margin_seconds")]
    pub margin_seconds: u64,
    #[serde(default = "default_wait_seconds")]
    pub default_wait_seconds: u64,
    #[serde(default = "default_report_interval_seconds")]
    pub report_interval_seconds: u64,
    #[serde(default = "default_max_waits")]
    pub max_waits: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ceiling_seconds: default_ceiling_seconds(),
            margin_seconds: default_margin_seconds(),
            default_wait_seconds: default_wait_seconds(),
            report_interval_seconds: default_report_interval_seconds(),
            max_waits: default_max_waits(),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            ceiling: Duration::from_secs(self.ceiling_seconds),
            margin: Duration::from_secs(self.margin_seconds),
            default_wait: Duration::from_secs(self.default_wait_seconds),
            report_interval: Duration::from_secs(self.report_interval_seconds),
            max_waits: self.max_waits,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    /// Manifest of the currently published release.
    #[serde(default)]
    pub manifest: Option<String>,
    /// Chunk files of the currently published release, used for patches.
    #[serde(default)]
    pub previous_chunks: Option<String>,
    /// Chunk size for the first release; later releases reuse the prior manifest's.
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u32,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,
    #[serde(default = "default_latest_alias")]
    pub latest_alias: String,
    /// Template for the instruction document; `{local}` and `{remote}` are replaced.
    #[serde(default = "default_upload_command")]
    pub upload_command: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            manifest: None,
            previous_chunks: None,
            chunk_size_mb: default_chunk_size_mb(),
            output_dir: default_output_dir(),
            manifest_name: default_manifest_name(),
            latest_alias: default_latest_alias(),
            upload_command: default_upload_command(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// External chunker: program followed by arguments.
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_patch_command")]
    pub command: Vec<String>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: default_patch_command(),
        }
    }
}

impl DeltashipConfig {
    /// Reject settings that would only fail later, mid-transfer.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.concurrency == 0 {
            return Err(DeltashipError::Config("transfer.concurrency must be at least 1".into()));
        }
        if self.transfer.retries == 0 {
            return Err(DeltashipError::Config("transfer.retries must be at least 1".into()));
        }
        let rl = &self.transfer.rate_limit;
        if rl.margin_seconds > rl.ceiling_seconds {
            return Err(DeltashipError::Config(format!(
                "transfer.rate_limit.margin_seconds ({}) exceeds ceiling_seconds ({})",
                rl.margin_seconds, rl.ceiling_seconds
            )));
        }
        if self.release.manifest_name.trim().is_empty() || self.release.latest_alias.trim().is_empty() {
            return Err(DeltashipError::Config(
                "release.manifest_name and release.latest_alias must not be empty".into(),
            ));
        }
        if self.release.chunk_size_mb == 0 {
            return Err(DeltashipError::Config("release.chunk_size_mb must be at least 1".into()));
        }
        if self.patch.enabled && self.patch.command.is_empty() {
            return Err(DeltashipError::Config("patch.enabled requires patch.command".into()));
        }
        if !self.store.url.is_empty() {
            deltaship_storage::parse_store_url(&self.store.url)?;
        }
        Ok(())
    }

    /// The store, required before anything is published or fetched.
    pub fn require_store(&self) -> Result<&StoreConfig> {
        if self.store.url.trim().is_empty() {
            return Err(DeltashipError::Config("store.url is required".into()));
        }
        Ok(&self.store)
    }
}
