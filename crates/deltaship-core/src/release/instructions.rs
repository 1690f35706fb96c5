use std::fmt::Write as _;
use std::path::Path;

use super::RemoteLayout;
use super::summary::ReleaseSummary;

pub const INSTRUCTIONS_FILE: &str = "UPLOAD_INSTRUCTIONS.txt";

/// Render the operator-facing transfer document.
///
/// `command` is a template with `{local}` and `{remote}` placeholders,
/// expanded once per file in upload order: manifest, chunks, latest alias.
pub fn render_instructions(
    summary: &ReleaseSummary,
    output_dir: &Path,
    manifest_name: &str,
    layout: &RemoteLayout,
    command: &str,
) -> String {
    let mut files: Vec<&str> = summary.staged_files.iter().map(|f| f.path.as_str()).collect();
    files.sort_unstable();

    let manifest_local = output_dir.join(manifest_name);
    let cmd = |local: &Path, remote: &str| {
        command
            .replace("{local}", &local.display().to_string())
            .replace("{remote}", remote)
    };

    let mut out = String::new();
    let _ = writeln!(out, "Release {}", summary.new_version);
    if let Some(old) = &summary.old_version {
        let _ = writeln!(out, "Previous release: {old}");
    }
    let _ = writeln!(out, "Manifest: {manifest_name}");
    let _ = writeln!(
        out,
        "Upload size: {} of {} bytes ({}% saved)",
        summary.upload_bytes, summary.total_bytes, summary.savings_percent
    );
    out.push('\n');

    let _ = writeln!(out, "Files to upload ({}):", files.len());
    for f in &files {
        let _ = writeln!(out, "  {f}");
    }
    out.push('\n');

    let _ = writeln!(out, "Commands:");
    let _ = writeln!(
        out,
        "  {}",
        cmd(&manifest_local, &layout.manifest_key(&summary.new_version))
    );
    for f in &files {
        let _ = writeln!(out, "  {}", cmd(&output_dir.join("chunks").join(f), &layout.chunk_key(f)));
    }
    let _ = writeln!(out, "  {}", cmd(&manifest_local, &layout.alias_key()));
    out
}
