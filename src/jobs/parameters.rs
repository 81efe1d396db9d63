//! Runtime parameter placeholders
//!
//! Job documents may reference device-local values as
//! `${aws:iot:parameter:<name>}`. Each placeholder is replaced with the value
//! of the environment variable `<NAME>` (upper-cased), or the empty string
//! when that variable is unset.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{aws:iot:parameter:([^}]+)\}").unwrap());

/// Resolve placeholders against the process environment
pub fn resolve(text: &str) -> String {
    resolve_with(text, |name| std::env::var(name).ok())
}

/// Resolve placeholders with a custom variable lookup.
///
/// `lookup` receives the upper-cased parameter name. Substituted values are
/// not rescanned.
pub fn resolve_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let name = caps[1].to_uppercase();
            lookup(&name).unwrap_or_default()
        })
        .into_owned()
}
