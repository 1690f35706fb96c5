use std::path::{Path, PathBuf};

use comfy_table::Cell;
use deltaship_core::config::DeltashipConfig;
use deltaship_core::release::RemoteLayout;
use deltaship_core::transfer::{Strategy, TransferEngine, TransferJob};
use deltaship_storage::{RemoteStore, store_from_config};
use deltaship_types::manifest::ReleaseManifest;

use crate::dispatch::CmdResult;
use crate::format::format_bytes;
use crate::table::{CliTableTheme, add_kv_row, job_status};

pub(crate) fn run_fetch(cfg: &DeltashipConfig, manifest: &str, dest: &str, strategy: Option<&str>) -> CmdResult {
    let store = store_from_config(cfg.require_store()?)?;
    let manifest = load_manifest(store.as_ref(), manifest)?;

    let mut options = cfg.transfer.options();
    if let Some(s) = strategy {
        options.strategy = s.parse::<Strategy>()?;
    }

    let layout = RemoteLayout::new(cfg.hosting.folder.as_deref(), &cfg.release.latest_alias);
    let dest = PathBuf::from(dest);
    let jobs: Vec<TransferJob> = manifest
        .chunks
        .iter()
        .map(|c| {
            TransferJob::new(layout.chunk_key(&c.path), dest.join(&c.path))
                .with_size(c.size)
                .with_hash(c.hash.clone())
        })
        .collect();

    let engine = TransferEngine::new(store.as_ref(), options);
    let report = engine.fetch(jobs);

    let theme = CliTableTheme::detect();
    let mut kv = theme.new_kv_table();
    add_kv_row(&mut kv, theme, "Version", &manifest.version);
    add_kv_row(&mut kv, theme, "Size", format_bytes(manifest.total_size));
    add_kv_row(&mut kv, theme, "Strategy", report.strategy);
    add_kv_row(&mut kv, theme, "Downloaded", report.transferred());
    add_kv_row(&mut kv, theme, "Already present", report.skipped());
    add_kv_row(&mut kv, theme, "Failed", report.failed());
    add_kv_row(&mut kv, theme, "Integrity mismatches", report.integrity_mismatches.len());
    println!("{kv}");

    if !report.is_complete() {
        let mut table = theme.new_data_table(&["Status", "File", "Detail"]);
        for job in report.failed_jobs() {
            table.add_row(vec![
                theme.status_cell(job_status(job.state, job.skipped)),
                Cell::new(&job.remote_path),
                Cell::new(job.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
        return Err(format!("{} of {} files failed to download", report.failed(), report.jobs.len()).into());
    }
    for m in &report.integrity_mismatches {
        eprintln!("Warning: {} does not match its manifest hash ({} != {})", m.path, m.actual, m.expected);
    }
    Ok(())
}

/// A local manifest file, or else a key on the store.
fn load_manifest(store: &dyn RemoteStore, location: &str) -> Result<ReleaseManifest, Box<dyn std::error::Error>> {
    let path = Path::new(location);
    if path.is_file() {
        return Ok(ReleaseManifest::load(path)?);
    }
    let raw = store
        .get(location)?
        .ok_or_else(|| format!("manifest '{location}' not found locally or on the {} store", store.label()))?;
    Ok(ReleaseManifest::from_slice(&raw, location)?)
}
