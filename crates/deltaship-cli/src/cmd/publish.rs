use std::path::PathBuf;

use comfy_table::Cell;
use deltaship_core::config::DeltashipConfig;
use deltaship_core::release::{PublishOutcome, ReleaseOrchestrator};
use deltaship_storage::store_from_config;

use crate::dispatch::CmdResult;
use crate::table::{CliTableTheme, add_kv_row, job_status};

pub(crate) fn run_publish(cfg: &DeltashipConfig, output: Option<&str>, accept_partial: bool) -> CmdResult {
    let store = store_from_config(cfg.require_store()?)?;
    let orchestrator = ReleaseOrchestrator::new(cfg).accept_partial(accept_partial);
    let output_dir = output.map(PathBuf::from).unwrap_or_else(|| orchestrator.output_dir());
    let outcome = orchestrator.publish(store.as_ref(), &output_dir)?;
    print_publish(&outcome)
}

/// Print a publish outcome. Fails when the manifest was withheld.
pub(crate) fn print_publish(outcome: &PublishOutcome) -> CmdResult {
    let theme = CliTableTheme::detect();
    let report = &outcome.report;

    let mut kv = theme.new_kv_table();
    add_kv_row(&mut kv, theme, "Version", &outcome.version);
    add_kv_row(&mut kv, theme, "Strategy", report.strategy);
    add_kv_row(&mut kv, theme, "Uploaded", report.transferred());
    add_kv_row(&mut kv, theme, "Already present", report.skipped());
    add_kv_row(&mut kv, theme, "Failed", report.failed());
    add_kv_row(
        &mut kv,
        theme,
        "Manifest",
        if outcome.manifest_published {
            outcome.manifest_url.as_deref().unwrap_or(&outcome.manifest_key)
        } else {
            "not published"
        },
    );
    println!("{kv}");

    if report.failed() > 0 || !report.integrity_mismatches.is_empty() {
        let mut table = theme.new_data_table(&["Status", "File", "Attempts", "Detail"]);
        for job in report.failed_jobs() {
            table.add_row(vec![
                theme.status_cell(job_status(job.state, job.skipped)),
                Cell::new(&job.remote_path),
                Cell::new(job.attempts),
                Cell::new(job.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("")),
            ]);
        }
        for m in &report.integrity_mismatches {
            table.add_row(vec![
                theme.status_cell("mismatch"),
                Cell::new(&m.path),
                Cell::new(""),
                Cell::new(format!("expected {}, got {}", m.expected, m.actual)),
            ]);
        }
        println!();
        println!("{table}");
    }

    if !outcome.manifest_published {
        return Err(format!(
            "{} of {} files failed to upload; re-run `deltaship publish` to resume, or pass --accept-partial",
            report.failed(),
            report.jobs.len()
        )
        .into());
    }
    Ok(())
}
