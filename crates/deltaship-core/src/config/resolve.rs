use std::fmt;
use std::path::{Path, PathBuf};

use super::types::DeltashipConfig;
use crate::error::{DeltashipError, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DELTASHIP_CONFIG";

/// Load, expand and validate a YAML config file.
pub fn load_config(path: &Path) -> Result<DeltashipConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DeltashipError::Config(format!("cannot read '{}': {e}", path.display())))?;
    parse_config(&contents, path)
}

/// Parse config text already read from `path` (used for error messages only).
pub fn parse_config(contents: &str, path: &Path) -> Result<DeltashipConfig> {
    let expanded = expand_env_placeholders(contents, path)?;
    // An empty document means "all defaults".
    let mut config: DeltashipConfig = if expanded.trim().is_empty() {
        DeltashipConfig::default()
    } else {
        serde_yaml::from_str(&expanded)
            .map_err(|e| DeltashipError::Config(format!("invalid config '{}': {e}", path.display())))?
    };
    config.store.url = expand_tilde(&config.store.url);
    config.validate()?;
    Ok(config)
}

/// Expand `${VAR}` and `${VAR:-default}` placeholders in raw config text.
fn expand_env_placeholders(input: &str, path: &Path) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0usize;

    while let Some(offset) = input[cursor..].find("${") {
        let start = cursor + offset;
        out.push_str(&input[cursor..start]);

        let token_start = start + 2;
        let Some(token_end_rel) = input[token_start..].find('}') else {
            return Err(expand_error(path, input, start, "unterminated environment placeholder"));
        };
        let token_end = token_start + token_end_rel;
        let token = &input[token_start..token_end];
        out.push_str(&lookup_env(token, path, input, start)?);
        cursor = token_end + 1;
    }

    out.push_str(&input[cursor..]);
    Ok(out)
}

fn lookup_env(token: &str, path: &Path, input: &str, start: usize) -> Result<String> {
    let (name, default) = match token.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (token, None),
    };
    if !is_valid_env_var_name(name) {
        return Err(expand_error(
            path,
            input,
            start,
            format!("invalid environment placeholder '{token}'"),
        ));
    }

    match (std::env::var(name), default) {
        (Ok(value), Some(default)) if value.is_empty() => Ok(default.to_string()),
        (Ok(value), _) => Ok(value),
        (Err(std::env::VarError::NotPresent), Some(default)) => Ok(default.to_string()),
        (Err(std::env::VarError::NotPresent), None) => Err(expand_error(
            path,
            input,
            start,
            format!("environment variable '{name}' is not set"),
        )),
        (Err(std::env::VarError::NotUnicode(_)), _) => Err(expand_error(
            path,
            input,
            start,
            format!("environment variable '{name}' is not valid UTF-8"),
        )),
    }
}

fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first == '_' || first.is_ascii_alphabetic()) && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn expand_error(path: &Path, input: &str, start: usize, message: impl fmt::Display) -> DeltashipError {
    let before = &input[..start];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    DeltashipError::Config(format!(
        "invalid config '{}': {message} at line {line}, column {column}",
        path.display()
    ))
}

fn expand_tilde(path: &str) -> String {
    if path == "~" {
        if let Some(h) = dirs::home_dir() {
            return h.to_string_lossy().into_owned();
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(h) = dirs::home_dir() {
            return h.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

/// Tracks where the config file was found.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Passed via `--config`.
    CliArg(PathBuf),
    /// Set via `DELTASHIP_CONFIG`.
    EnvVar(PathBuf),
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) | ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} ({CONFIG_ENV_VAR})", p.display()),
            ConfigSource::SearchOrder { path, level } => write!(f, "{} ({level})", path.display()),
        }
    }
}

/// Search locations in priority order: project, user, system.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("deltaship.yaml"), "project")];

    let user_config = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(dirs::config_dir)
        .map(|base| base.join("deltaship").join("config.yaml"));
    if let Some(p) = user_config {
        paths.push((p, "user"));
    }

    #[cfg(windows)]
    {
        let program_data = std::env::var_os("PROGRAMDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData"));
        paths.push((program_data.join("deltaship").join("config.yaml"), "system"));
    }

    #[cfg(not(windows))]
    paths.push((PathBuf::from("/etc/deltaship/config.yaml"), "system"));

    paths
}

/// Priority: CLI arg > `DELTASHIP_CONFIG` > first existing search path.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var(CONFIG_ENV_VAR) {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}

/// Minimal YAML config for `deltaship config`.
pub fn minimal_config_template() -> &'static str {
    r#"# deltaship configuration file

store:
  url: ${DELTASHIP_STORE:-/srv/releases}
  # token: "${DELTASHIP_TOKEN:-}"

hosting:
  repo_id: org/app
  folder: releases
  base_url: https://cdn.example.com

origins:
  release:
    - https://r1.example.com
  prerelease:
    - https://p1.example.com
  # signing_secret: "${DELTASHIP_SIGNING_SECRET:-}"

# --- Common optional settings (uncomment as needed) ---

# transfer:
#   strategy: auto        # auto | bulk | per-item
#   concurrency: 4
#   retries: 4
#   batch_size: 0
#   rate_limit:
#     ceiling_seconds: 10800
#
# release:
#   manifest: current/manifest.json
#   previous_chunks: current/chunks
#   output_dir: release-out
#
# chunker:
#   command: ["chunk-tool", "{source}", "{out}", "--size", "{chunk_size_mb}"]
#
# patch:
#   enabled: true
#   command: ["bsdiff", "{old}", "{new}", "{patch}"]
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests touching env vars must not interleave.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn parse(text: &str) -> Result<DeltashipConfig> {
        parse_config(text, Path::new("test.yaml"))
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.transfer.retries, 4);
        assert_eq!(config.release.manifest_name, "manifest.json");
        assert!(config.origins.release.is_empty());
    }

    #[test]
    fn expands_default_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        // SAFETY: serialized by ENV_LOCK.
        unsafe { std::env::remove_var("DELTASHIP_TEST_UNSET") };
        let out = expand_env_placeholders("url: ${DELTASHIP_TEST_UNSET:-/tmp/x}", Path::new("c.yaml")).unwrap();
        assert_eq!(out, "url: /tmp/x");
    }

    #[test]
    fn expands_set_variable() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::set_var("DELTASHIP_TEST_SET", "value") };
        let out = expand_env_placeholders("a: ${DELTASHIP_TEST_SET}", Path::new("c.yaml")).unwrap();
        assert_eq!(out, "a: value");
        unsafe { std::env::remove_var("DELTASHIP_TEST_SET") };
    }

    #[test]
    fn missing_variable_reports_position() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var("DELTASHIP_TEST_MISSING") };
        let err = expand_env_placeholders("a: 1\nb: ${DELTASHIP_TEST_MISSING}", Path::new("c.yaml"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("line 2, column 4"), "{err}");
        assert!(err.contains("DELTASHIP_TEST_MISSING"));
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let err = expand_env_placeholders("a: ${OOPS", Path::new("c.yaml")).unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn invalid_name_is_rejected() {
        assert!(expand_env_placeholders("${1ABC}", Path::new("c.yaml")).is_err());
        assert!(expand_env_placeholders("${}", Path::new("c.yaml")).is_err());
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let err = parse("transfer:\n  concurrency: 0\n").unwrap_err();
        assert!(matches!(err, DeltashipError::Config(_)));
    }

    #[test]
    fn unknown_strategy_fails_to_parse() {
        assert!(parse("transfer:\n  strategy: sideways\n").is_err());
    }

    #[test]
    fn template_parses() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { std::env::remove_var("DELTASHIP_STORE") };
        let config = parse(minimal_config_template()).unwrap();
        assert_eq!(config.store.url, "/srv/releases");
        assert_eq!(config.origins.release, vec!["https://r1.example.com"]);
        assert_eq!(config.hosting.folder.as_deref(), Some("releases"));
    }

    #[test]
    fn search_paths_order() {
        let paths = default_config_search_paths();
        assert_eq!(paths[0].1, "project");
        assert_eq!(paths.last().unwrap().1, "system");
    }

    #[test]
    fn cli_arg_wins() {
        let source = resolve_config_path(Some("/x/y.yaml")).unwrap();
        assert!(matches!(source, ConfigSource::CliArg(_)));
        assert_eq!(source.path(), Path::new("/x/y.yaml"));
    }
}
