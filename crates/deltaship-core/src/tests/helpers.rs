use std::path::Path;

use crate::config::DeltashipConfig;
use crate::transfer::{RateLimitPolicy, Strategy, TransferOptions};

/// Per-item options with fast, deterministic settings.
pub fn per_item_options(retries: u32) -> TransferOptions {
    TransferOptions {
        strategy: Strategy::PerItem,
        concurrency: 2,
        retries,
        rate_limit: RateLimitPolicy::default(),
        skip_existing: true,
    }
}

/// Config staging into `out` and publishing under `releases/`.
pub fn release_config(out: &Path, previous_manifest: Option<&Path>) -> DeltashipConfig {
    let mut config = DeltashipConfig::default();
    config.release.output_dir = out.to_string_lossy().into_owned();
    config.release.manifest = previous_manifest.map(|p| p.to_string_lossy().into_owned());
    config.hosting.repo_id = Some("org/app".into());
    config.hosting.folder = Some("releases".into());
    config.hosting.base_url = Some("https://cdn.example.com".into());
    config.transfer.strategy = Strategy::PerItem;
    config.transfer.concurrency = 2;
    config
}
