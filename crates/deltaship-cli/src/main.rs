mod cli;
mod cmd;
mod config_gen;
mod dispatch;
mod format;
mod table;

use clap::Parser;

use deltaship_core::config;

use cli::Cli;
use dispatch::{dispatch_command, dispatch_standalone};

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if cli.command.standalone() {
        if let Err(e) = dispatch_standalone(&cli.command) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let source = match config::resolve_config_path(cli.config.as_deref()) {
        Some(s) => s,
        None => {
            eprintln!("Error: no configuration file found.");
            eprintln!("Searched:");
            for (path, level) in config::default_config_search_paths() {
                eprintln!("  {} ({})", path.display(), level);
            }
            eprintln!();
            eprintln!("Run `deltaship config` to generate a starter config file.");
            std::process::exit(1);
        }
    };

    tracing::info!("Using config: {source}");

    let cfg = match config::load_config(source.path()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch_command(&cli.command, &cfg) {
        eprintln!("Error: {} failed: {e}", cli.command.name());
        std::process::exit(1);
    }
}
