//! Logical path → ranked absolute URLs across release and pre-release origin
//! pools, with optional HMAC signing.

use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{DeltashipError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const RELEASE_POOL: &str = "release";
pub const PRERELEASE_POOL: &str = "pre-release";

pub const DEFAULT_CHANNEL: &str = "stable";
pub const DEFAULT_TTL_SECONDS: u64 = 600;
pub const MIN_TTL_SECONDS: u64 = 60;
pub const MAX_TTL_SECONDS: u64 = 3600;

/// Everything outside `A-Z a-z 0-9 - _ . ~` is percent-encoded.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Channels served primarily from the release pool.
const RELEASE_CHANNELS: &[&str] = &["stable", "production", "release"];

/// Caller-facing resolution request with its defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub path: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

impl ResolveRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            channel: default_channel(),
            signed: false,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    pub fn clamped_ttl(&self) -> u64 {
        self.ttl_seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginRoute {
    /// Pool the primary URL came from.
    pub origin: String,
    pub url: String,
    pub fallbacks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

/// Resolves logical paths against two ordered pools of origin roots.
#[derive(Clone)]
pub struct OriginResolver {
    release: Vec<String>,
    prerelease: Vec<String>,
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for OriginResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResolver")
            .field("release", &self.release)
            .field("prerelease", &self.prerelease)
            .field("signing", &self.secret.is_some())
            .finish()
    }
}

impl OriginResolver {
    /// Both pools must name at least one root. An empty secret disables signing.
    pub fn new(release: Vec<String>, prerelease: Vec<String>, secret: Option<&str>) -> Result<Self> {
        let release = normalize_roots(release);
        let prerelease = normalize_roots(prerelease);
        if release.is_empty() {
            return Err(DeltashipError::Config("origin pool 'release' is empty".into()));
        }
        if prerelease.is_empty() {
            return Err(DeltashipError::Config("origin pool 'pre-release' is empty".into()));
        }
        Ok(Self {
            release,
            prerelease,
            secret: secret
                .filter(|s| !s.is_empty())
                .map(|s| s.as_bytes().to_vec()),
        })
    }

    pub fn resolve_request(&self, req: &ResolveRequest) -> OriginRoute {
        self.resolve(&req.path, &req.channel, req.signed, req.clamped_ttl())
    }

    pub fn resolve(&self, path: &str, channel: &str, signed: bool, ttl_seconds: u64) -> OriginRoute {
        self.resolve_at(path, channel, signed, ttl_seconds, Utc::now().timestamp())
    }

    /// Resolve against an explicit clock (epoch seconds).
    pub fn resolve_at(
        &self,
        path: &str,
        channel: &str,
        signed: bool,
        ttl_seconds: u64,
        now: i64,
    ) -> OriginRoute {
        let (origin, primary, fallback) = if is_release_channel(channel) {
            (RELEASE_POOL, &self.release, &self.prerelease)
        } else {
            (PRERELEASE_POOL, &self.prerelease, &self.release)
        };

        let normalized = normalize_path(path);
        let url = join_url(&primary[0], &normalized);
        let fallbacks: Vec<String> = fallback.iter().map(|root| join_url(root, &normalized)).collect();

        match (signed, self.secret.as_deref()) {
            (true, Some(secret)) => {
                let ttl = ttl_seconds.max(MIN_TTL_SECONDS) as i64;
                let expires = now.saturating_add(ttl);
                OriginRoute {
                    origin: origin.to_string(),
                    url: sign_url(&url, expires, secret),
                    fallbacks: fallbacks.iter().map(|u| sign_url(u, expires, secret)).collect(),
                    expires: Some(expires),
                }
            }
            _ => OriginRoute {
                origin: origin.to_string(),
                url,
                fallbacks,
                expires: None,
            },
        }
    }

    /// Check a `sig` presented for `url` (the URL before signing) and `expires`.
    pub fn verify_signature(&self, url: &str, expires: i64, sig: &str, now: i64) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return false;
        };
        if now > expires {
            return false;
        }
        let expected = signature(url, expires, secret);
        expected.as_bytes().ct_eq(sig.to_ascii_lowercase().as_bytes()).into()
    }
}

fn normalize_roots(roots: Vec<String>) -> Vec<String> {
    roots
        .into_iter()
        .map(|r| r.trim().trim_end_matches('/').to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

pub fn is_release_channel(channel: &str) -> bool {
    let channel = channel.trim().to_ascii_lowercase();
    RELEASE_CHANNELS.contains(&channel.as_str())
}

/// Strip leading slashes, turn `\` into `/`, drop empty segments and
/// percent-encode each remaining segment.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty())
        .map(|seg| utf8_percent_encode(seg, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a root and an already-normalized path; the root alone for an empty path.
pub fn join_url(root: &str, normalized: &str) -> String {
    let root = root.trim_end_matches('/');
    if normalized.is_empty() {
        root.to_string()
    } else {
        format!("{root}/{normalized}")
    }
}

fn signature(url: &str, expires: i64, secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(format!("{url}|{expires}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Append `expires` and `sig` query parameters to `url`.
pub fn sign_url(url: &str, expires: i64, secret: &[u8]) -> String {
    let sig = signature(url, expires, secret);
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}expires={expires}&sig={sig}")
}
