use deltaship_core::config::DeltashipConfig;
use deltaship_core::origin::ResolveRequest;

use crate::dispatch::CmdResult;

pub(crate) fn run_resolve(cfg: &DeltashipConfig, path: &str, channel: &str, signed: bool, ttl: u64) -> CmdResult {
    let resolver = cfg.origins.resolver()?;
    let request = ResolveRequest {
        path: path.to_string(),
        channel: channel.to_string(),
        signed,
        ttl_seconds: ttl,
    };
    if signed && cfg.origins.signing_secret.as_deref().unwrap_or("").is_empty() {
        eprintln!("Warning: origins.signing_secret is not set; URLs are unsigned.");
    }
    let route = resolver.resolve_request(&request);
    println!("{}", serde_json::to_string_pretty(&route)?);
    Ok(())
}
