use std::path::PathBuf;

use deltaship_core::config;

use crate::dispatch::CmdResult;

pub(crate) fn run_config_generate(dest: Option<&str>) -> CmdResult {
    let path = dest
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("deltaship.yaml"));

    if path.exists() {
        return Err(format!("file already exists: {}", path.display()).into());
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(&path, config::minimal_config_template())?;
    println!("Config written to: {}", path.display());
    println!("Edit it to set your store, hosting folder and origin pools.");
    Ok(())
}
