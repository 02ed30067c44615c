//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Document references often carry credentials (presigned query strings,
//! userinfo). Spans only ever see the redacted form.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Strips userinfo and query/fragment from a document reference.
///
/// - `https://user:pw@host/a.pdf?X-Amz-Signature=..` → `https://****@host/a.pdf`
/// - `s3://bucket/key.pdf` → `s3://bucket/key.pdf` (no change)
/// - `/srv/in/a.pdf` → `/srv/in/a.pdf` (no change)
pub fn redact_source(source: &str) -> String {
    let end = source.find(['?', '#']).unwrap_or(source.len());
    let source = &source[..end];

    if let Some(scheme_end) = source.find("://") {
        let after_scheme = &source[scheme_end + 3..];
        let authority_end = after_scheme.find('/').unwrap_or(after_scheme.len());
        if let Some(at_pos) = after_scheme[..authority_end].rfind('@') {
            let scheme = &source[..scheme_end + 3];
            let after_at = &after_scheme[at_pos + 1..];
            return format!("{}****@{}", scheme, after_at);
        }
    }

    source.to_string()
}

/// Returns a short deterministic hash of a reference for correlation
/// without exposing it.
pub fn hash_source(source: &str) -> String {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
