use deltaship_core::config::DeltashipConfig;
use deltaship_storage::{ParsedUrl, parse_store_url};

use crate::cli::Commands;
use crate::cmd;
use crate::config_gen::run_config_generate;

pub(crate) type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Commands that run before any config file is located.
pub(crate) fn dispatch_standalone(command: &Commands) -> CmdResult {
    match command {
        Commands::Diff { old, new, json } => cmd::diff::run_diff(old, new, *json),
        Commands::Config { dest } => run_config_generate(dest.as_deref()),
        other => Err(format!("{} needs a config file", other.name()).into()),
    }
}

pub(crate) fn dispatch_command(command: &Commands, cfg: &DeltashipConfig) -> CmdResult {
    match command {
        Commands::Resolve {
            path,
            channel,
            signed,
            ttl,
        } => cmd::resolve::run_resolve(cfg, path, channel, *signed, *ttl),
        Commands::Release {
            source,
            version,
            publish,
            accept_partial,
        } => {
            warn_if_insecure_store(cfg, *publish);
            cmd::release::run_release(cfg, source, version, *publish, *accept_partial)
        }
        Commands::Stage {
            manifest,
            chunks,
            publish,
            accept_partial,
        } => {
            warn_if_insecure_store(cfg, *publish);
            cmd::release::run_stage(cfg, manifest, chunks, *publish, *accept_partial)
        }
        Commands::Publish {
            output,
            accept_partial,
        } => {
            warn_if_insecure_store(cfg, true);
            cmd::publish::run_publish(cfg, output.as_deref(), *accept_partial)
        }
        Commands::Fetch {
            manifest,
            dest,
            strategy,
        } => cmd::fetch::run_fetch(cfg, manifest, dest, strategy.as_deref()),
        Commands::Diff { .. } | Commands::Config { .. } => dispatch_standalone(command),
    }
}

fn warn_if_insecure_store(cfg: &DeltashipConfig, uploading: bool) {
    if !uploading {
        return;
    }
    if let Ok(ParsedUrl::Http { url }) = parse_store_url(&cfg.store.url) {
        if url.starts_with("http://") {
            eprintln!("Warning: store URL '{url}' is not HTTPS. Uploads are not TLS-protected.");
        }
        if cfg.store.token.is_none() {
            eprintln!("Warning: store URL '{url}' has no token configured.");
        }
    }
}
