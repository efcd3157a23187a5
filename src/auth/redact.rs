//! Scrubbing of provider error text before it is stored or logged.

use std::sync::LazyLock;

use regex::Regex;

static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\b(bearer)\s+[a-z0-9._\-~+/]+=*", "$1 [REDACTED]"),
        (
            r"(?i)\b(token|api[_\-]?key|api[_\-]?hash|secret|password|code)\b(\s*[:=]\s*)([^,\s]+)",
            "$1$2[REDACTED]",
        ),
        (r"(?i)\bsk-[a-z0-9\-]{10,}\b", "sk-[REDACTED]"),
        (r"\+\d[\d\s\-]{6,}\d", "[PHONE]"),
        (r"[A-Za-z0-9+/_\-]{64,}={0,2}", "[REDACTED]"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Mask bearer tokens, key assignments, phone numbers and long opaque blobs
/// (serialized credentials) in free-form error text.
pub fn redact_sensitive_detail(raw: &str) -> String {
    let mut value = raw.to_string();
    for (re, replacement) in PATTERNS.iter() {
        value = re.replace_all(&value, *replacement).to_string();
    }
    value
}
