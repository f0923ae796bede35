//! Log-safe rendering of request/response bodies and headers. Nothing here
//! ever touches what's actually sent over the wire — only what ends up in a
//! `tracing` event.

use regex::Regex;

const MAX_BODY_LEN: usize = 1000;
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "token",
    "accessToken",
    "refreshToken",
    "secret",
    "ssn",
    "authorization",
];

/// Mask sensitive JSON string fields and truncate to a logging-safe length.
pub fn redact_body(body: &str) -> String {
    let mut out = body.to_string();
    for key in SENSITIVE_KEYS {
        let pattern = format!(r#""{key}"\s*:\s*"[^"]*""#);
        if let Ok(re) = Regex::new(&pattern) {
            out = re
                .replace_all(&out, format!(r#""{key}":"[redacted]""#))
                .into_owned();
        }
    }
    out = redact_emails(&out);
    truncate(&out)
}

fn redact_emails(text: &str) -> String {
    static EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
    match Regex::new(EMAIL_PATTERN) {
        Ok(re) => re.replace_all(text, "[redacted-email]").into_owned(),
        Err(_) => text.to_string(),
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_BODY_LEN {
        text.to_string()
    } else {
        format!("{}...[truncated]", &text[..MAX_BODY_LEN])
    }
}

/// Render an `Authorization` header value safely: keep the scheme, drop the
/// credential.
pub fn redact_bearer(header_value: &str) -> String {
    match header_value.split_once(' ') {
        Some((scheme, _token)) => format!("{scheme} [redacted]"),
        None => "[redacted]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_sensitive_keys() {
        let body = r#"{"email":"a@b.com","password":"hunter2","id":"r1"}"#;
        let redacted = redact_body(body);
        assert!(!redacted.contains("hunter2"));
        assert!(!redacted.contains("a@b.com"));
        assert!(redacted.contains("\"id\":\"r1\""));
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "x".repeat(2000);
        let redacted = redact_body(&body);
        assert!(redacted.ends_with("...[truncated]"));
        assert!(redacted.len() < 2000);
    }

    #[test]
    fn bearer_token_is_masked_but_scheme_kept() {
        assert_eq!(redact_bearer("Bearer abc123.def456"), "Bearer [redacted]");
    }
}
