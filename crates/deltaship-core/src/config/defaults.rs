pub(super) fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().clamp(2, 8))
        .unwrap_or(4)
}

pub(super) fn default_retries() -> u32 {
    4
}

pub(super) fn default_batch_size() -> usize {
    0 // per-file pushes
}

pub(super) fn default_ceiling_seconds() -> u64 {
    3 * 3600
}

pub(super) fn default_margin_seconds() -> u64 {
    5
}

pub(super) fn default_wait_seconds() -> u64 {
    60
}

pub(super) fn default_report_interval_seconds() -> u64 {
    30
}

pub(super) fn default_max_waits() -> u32 {
    10
}

pub(super) fn default_host_type() -> String {
    "model".to_string()
}

pub(super) fn default_revision() -> String {
    "main".to_string()
}

pub(super) fn default_chunk_size_mb() -> u32 {
    64
}

pub(super) fn default_output_dir() -> String {
    "release-out".to_string()
}

pub(super) fn default_manifest_name() -> String {
    "manifest.json".to_string()
}

pub(super) fn default_latest_alias() -> String {
    "manifest-latest.json".to_string()
}

pub(super) fn default_upload_command() -> String {
    "deltaship push {local} {remote}".to_string()
}

pub(super) fn default_patch_command() -> Vec<String> {
    ["bsdiff", "{old}", "{new}", "{patch}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
