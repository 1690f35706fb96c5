use std::path::PathBuf;

use comfy_table::Cell;
use deltaship_core::chunker::CommandChunker;
use deltaship_core::config::DeltashipConfig;
use deltaship_core::patch::ExternalPatchTool;
use deltaship_core::release::{CycleOutcome, INSTRUCTIONS_FILE, ReleaseInput, ReleaseOrchestrator, ReleaseSummary};
use deltaship_storage::store_from_config;

use super::publish::print_publish;
use crate::dispatch::CmdResult;
use crate::format::{format_bytes, format_upload};
use crate::table::{CliTableTheme, add_kv_row};

pub(crate) fn run_release(
    cfg: &DeltashipConfig,
    source: &str,
    version: &str,
    publish: bool,
    accept_partial: bool,
) -> CmdResult {
    let input = ReleaseInput::Source {
        dir: PathBuf::from(source),
        version: version.to_string(),
    };
    run_cycle(cfg, &input, publish, accept_partial)
}

pub(crate) fn run_stage(
    cfg: &DeltashipConfig,
    manifest: &str,
    chunks: &str,
    publish: bool,
    accept_partial: bool,
) -> CmdResult {
    let input = ReleaseInput::Chunked {
        manifest: PathBuf::from(manifest),
        chunk_root: PathBuf::from(chunks),
    };
    run_cycle(cfg, &input, publish, accept_partial)
}

fn run_cycle(cfg: &DeltashipConfig, input: &ReleaseInput, publish: bool, accept_partial: bool) -> CmdResult {
    let chunker = if cfg.chunker.command.is_empty() {
        None
    } else {
        Some(CommandChunker::from_command(&cfg.chunker.command)?)
    };
    let patcher = if cfg.patch.enabled {
        Some(ExternalPatchTool::from_command(&cfg.patch.command)?)
    } else {
        None
    };
    let store = if publish {
        Some(store_from_config(cfg.require_store()?)?)
    } else {
        None
    };

    let mut orchestrator = ReleaseOrchestrator::new(cfg).accept_partial(accept_partial);
    if let Some(c) = &chunker {
        orchestrator = orchestrator.with_chunker(c);
    }
    if let Some(p) = &patcher {
        orchestrator = orchestrator.with_patcher(p);
    }
    if let Some(s) = &store {
        orchestrator = orchestrator.with_store(s.as_ref());
    }

    match orchestrator.run(input)? {
        CycleOutcome::NoChanges { version, .. } => {
            println!("Release {version} has no changes; nothing staged.");
            Ok(())
        }
        CycleOutcome::Staged { output_dir, summary } => {
            print_summary(&summary);
            println!();
            println!(
                "Staged into {}. See {} or run `deltaship publish`.",
                output_dir.display(),
                output_dir.join(INSTRUCTIONS_FILE).display()
            );
            Ok(())
        }
        CycleOutcome::Published { summary, publish, .. } => {
            print_summary(&summary);
            println!();
            print_publish(&publish)
        }
    }
}

pub(crate) fn print_summary(summary: &ReleaseSummary) {
    let theme = CliTableTheme::detect();
    let mut kv = theme.new_kv_table();
    add_kv_row(
        &mut kv,
        theme,
        "Release",
        match &summary.old_version {
            Some(old) => format!("{old} -> {}", summary.new_version),
            None => summary.new_version.clone(),
        },
    );
    add_kv_row(
        &mut kv,
        theme,
        "Chunks",
        format!(
            "{} new, {} changed, {} unchanged",
            summary.counts.added, summary.counts.changed, summary.counts.unchanged
        ),
    );
    add_kv_row(
        &mut kv,
        theme,
        "Upload",
        format_upload(summary.upload_bytes, summary.total_bytes, summary.savings_percent),
    );
    if summary.staged_bytes != summary.upload_bytes {
        add_kv_row(&mut kv, theme, "Staged (with patches)", format_bytes(summary.staged_bytes));
    }
    println!("{kv}");

    if !summary.patch_failures.is_empty() {
        let mut table = theme.new_data_table(&["Patch failure"]);
        for failure in &summary.patch_failures {
            table.add_row(vec![Cell::new(failure)]);
        }
        println!();
        println!("{table}");
    }
}
