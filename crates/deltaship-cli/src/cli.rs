use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "deltaship",
    version,
    about = "Incremental release distribution: diff, stage and publish only what changed",
    after_help = "\
Configuration file lookup order:
  1. --config <path>             (explicit flag)
  2. $DELTASHIP_CONFIG           (environment variable)
  3. ./deltaship.yaml            (project)
  4. Platform user config dir + /deltaship/config.yaml (e.g. ~/.config)
  5. /etc/deltaship/config.yaml  (system)

Config values may reference environment variables as ${VAR} or ${VAR:-default}."
)]
pub(crate) struct Cli {
    /// Path to configuration file (overrides DELTASHIP_CONFIG and default search)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Compare two manifests
    Diff {
        /// Previously published manifest
        old: String,

        /// Candidate manifest
        new: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve a logical path to origin URLs
    Resolve {
        path: String,

        /// Release channel (stable, production and release use the release pool)
        #[arg(long, default_value = "stable")]
        channel: String,

        /// Append expiring HMAC signatures
        #[arg(long)]
        signed: bool,

        /// Signature lifetime in seconds (clamped to 60-3600)
        #[arg(long, default_value_t = 600)]
        ttl: u64,
    },

    /// Chunk a payload directory, diff it against the previous release and stage the delta
    Release {
        /// Payload directory to chunk
        #[arg(long)]
        source: String,

        /// Version of the new release
        #[arg(long)]
        version: String,

        /// Publish to the configured store after staging
        #[arg(long)]
        publish: bool,

        /// Publish the manifest even if some files failed to upload
        #[arg(long, requires = "publish")]
        accept_partial: bool,
    },

    /// Stage an already-chunked release
    Stage {
        /// Manifest written by the chunker
        #[arg(long)]
        manifest: String,

        /// Directory the manifest's chunk paths are relative to
        #[arg(long)]
        chunks: String,

        /// Publish to the configured store after staging
        #[arg(long)]
        publish: bool,

        /// Publish the manifest even if some files failed to upload
        #[arg(long, requires = "publish")]
        accept_partial: bool,
    },

    /// Upload a staged output directory (safe to re-run)
    Publish {
        /// Staged output directory (defaults to release.output_dir)
        #[arg(long)]
        output: Option<String>,

        /// Publish the manifest even if some files failed to upload
        #[arg(long)]
        accept_partial: bool,
    },

    /// Download every chunk of a release
    Fetch {
        /// Local manifest file, or a key on the configured store
        #[arg(long)]
        manifest: String,

        /// Destination directory
        #[arg(long)]
        dest: String,

        /// Transfer strategy override (auto, bulk, per-item)
        #[arg(long)]
        strategy: Option<String>,
    },

    /// Generate a starter configuration file
    Config {
        /// Destination path (defaults to ./deltaship.yaml)
        dest: Option<String>,
    },
}

impl Commands {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Diff { .. } => "diff",
            Self::Resolve { .. } => "resolve",
            Self::Release { .. } => "release",
            Self::Stage { .. } => "stage",
            Self::Publish { .. } => "publish",
            Self::Fetch { .. } => "fetch",
            Self::Config { .. } => "config",
        }
    }

    /// Commands that work without a config file.
    pub(crate) fn standalone(&self) -> bool {
        matches!(self, Self::Diff { .. } | Self::Config { .. })
    }
}
