use std::path::Path;

use comfy_table::Cell;
use deltaship_core::diff::diff;
use deltaship_core::release::ReleaseSummary;
use deltaship_types::manifest::ReleaseManifest;

use crate::dispatch::CmdResult;
use crate::format::{format_bytes, format_upload};
use crate::table::{CliTableTheme, add_kv_row};

pub(crate) fn run_diff(old: &str, new: &str, json: bool) -> CmdResult {
    let old = ReleaseManifest::load(Path::new(old))?;
    let new = ReleaseManifest::load(Path::new(new))?;
    let result = diff(&old, &new);

    if json {
        let summary = ReleaseSummary::new(Some(&old), &new, &result);
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let theme = CliTableTheme::detect();
    let mut kv = theme.new_kv_table();
    add_kv_row(&mut kv, theme, "Old version", &old.version);
    add_kv_row(&mut kv, theme, "New version", &new.version);
    add_kv_row(&mut kv, theme, "Added", result.added.len());
    add_kv_row(&mut kv, theme, "Changed", result.changed.len());
    add_kv_row(&mut kv, theme, "Unchanged", result.unchanged.len());
    add_kv_row(&mut kv, theme, "Removed", result.removed.len());
    add_kv_row(
        &mut kv,
        theme,
        "Upload",
        format_upload(result.upload_bytes, result.total_bytes, result.savings_percent()),
    );
    println!("{kv}");

    if !result.has_changes() && result.removed.is_empty() {
        println!();
        println!("No changes.");
        return Ok(());
    }

    let mut table = theme.new_data_table(&["Status", "Chunk", "Path", "Size"]);
    let rows = [
        ("changed", &result.changed, &new),
        ("added", &result.added, &new),
        ("removed", &result.removed, &old),
    ];
    for (status, ids, manifest) in rows {
        for chunk in ids.iter().filter_map(|id| manifest.find(id)) {
            table.add_row(vec![
                theme.status_cell(status),
                Cell::new(&chunk.id),
                Cell::new(&chunk.path),
                Cell::new(format_bytes(chunk.size)),
            ]);
        }
    }
    println!();
    println!("{table}");
    Ok(())
}
