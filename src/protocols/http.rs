//! HTTP request parser
//!
//! Extracts request-line and header metadata from TCP payloads that
//! open with a known method token. Response parsing is out of scope.

use crate::core::packet::HttpRequestInfo;

const METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// Check whether a payload opens like an HTTP request.
pub fn is_http_request(payload: &[u8]) -> bool {
    METHODS.iter().any(|m| {
        payload.len() > m.len()
            && payload.starts_with(m.as_bytes())
            && payload[m.len()] == b' '
    })
}

/// Parse an HTTP request from a TCP payload.
///
/// Returns `None` for payloads that do not start with a recognized
/// method. Headers are read until a blank line or end of payload;
/// `Host` and `User-Agent` are matched case-insensitively.
pub fn parse_request(payload: &[u8]) -> Option<HttpRequestInfo> {
    if !is_http_request(payload) {
        return None;
    }

    let text = String::from_utf8_lossy(payload);
    let mut lines = text.split("\r\n");

    let request_line = lines.next()?.trim_end();
    let mut parts = request_line.split(' ');
    let method = parts.next()?.to_string();
    let uri = parts.next()?.to_string();

    let mut host = String::new();
    let mut user_agent = String::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_lowercase().as_str() {
                "host" => host = value.trim().to_string(),
                "user-agent" => user_agent = value.trim().to_string(),
                _ => {}
            }
        }
    }

    Some(HttpRequestInfo {
        method,
        uri,
        request_line: request_line.to_string(),
        host,
        user_agent,
    })
}
