use deltaship_types::error::DeltashipError;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Convert a `ureq` failure into a store error that keeps the origin's own
/// wording: status code, `Retry-After` header, and the start of the body.
pub fn describe_http_error(op: &str, err: ureq::Error) -> DeltashipError {
    match err {
        ureq::Error::Status(status, resp) => {
            let retry_after = resp.header("Retry-After").map(|v| v.trim().to_string());
            let status_text = resp.status_text().to_string();
            let body = resp.into_string().unwrap_or_default();
            DeltashipError::Http {
                status,
                message: format_status_message(op, &status_text, &body),
                retry_after,
            }
        }
        ureq::Error::Transport(t) => DeltashipError::Transport(format!("{op}: {t}")),
    }
}

fn format_status_message(op: &str, status_text: &str, body: &str) -> String {
    let body = truncate_at_char_boundary(body.trim(), MAX_ERROR_BODY);
    if body.is_empty() {
        format!("{op}: {status_text}")
    } else {
        format!("{op}: {status_text}: {body}")
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Extract and parse the `Content-Length` header from an HTTP response.
pub fn extract_content_length(resp: &ureq::Response) -> Option<u64> {
    resp.header("Content-Length")?.trim().parse::<u64>().ok()
}
