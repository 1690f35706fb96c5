use std::io::Read;
use std::time::Duration;

use deltaship_types::error::{DeltashipError, Result};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use crate::RemoteStore;
use crate::http_util::{describe_http_error, extract_content_length};

const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Plain HTTP object store: `GET`/`PUT`/`HEAD` on `<base>/<key>`.
pub struct HttpStore {
    /// Base URL without trailing slash, e.g. "https://uploads.example.com/app".
    base_url: String,
    agent: ureq::Agent,
    token: Option<String>,
}

impl HttpStore {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
            token: token.map(|t| t.to_string()),
        }
    }

    /// Each key segment is percent-encoded so `#`, `?` and `%` in chunk
    /// names stay part of the path.
    fn url(&self, key: &str) -> String {
        let path: Vec<String> = key
            .split('/')
            .filter(|seg| !seg.is_empty())
            .map(|seg| utf8_percent_encode(seg, KEY_SEGMENT).to_string())
            .collect();
        format!("{}/{}", self.base_url, path.join("/"))
    }

    fn apply_auth(&self, req: ureq::Request) -> ureq::Request {
        match self.token {
            Some(ref token) => req.set("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }
}

impl RemoteStore for HttpStore {
    fn label(&self) -> &str {
        "http"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let req = self.apply_auth(self.agent.get(&self.url(key)));
        match req.call() {
            Ok(resp) => {
                let mut buf = Vec::with_capacity(extract_content_length(&resp).unwrap_or(0) as usize);
                resp.into_reader()
                    .read_to_end(&mut buf)
                    .map_err(|e| DeltashipError::Transport(format!("GET {key}: body read: {e}")))?;
                Ok(Some(buf))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(describe_http_error(&format!("GET {key}"), e)),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let req = self.apply_auth(self.agent.put(&self.url(key)));
        req.send_bytes(data)
            .map_err(|e| describe_http_error(&format!("PUT {key}"), e))?;
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let req = self.apply_auth(self.agent.head(&self.url(key)));
        match req.call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(describe_http_error(&format!("HEAD {key}"), e)),
        }
    }
}
