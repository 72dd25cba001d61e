//! SQL dependency extraction: a `{identifier}` template scan. SQL cells never
//! bind a top-level name, so `writes` is always empty.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static placeholder regex is valid")
});

/// Extracts `(reads, writes)` from a SQL cell's source. Always infallible;
/// the `Result` return matches the Python extractor's signature so callers
/// can dispatch on language without matching on a different error shape.
pub fn extract(code: &str) -> Result<(Vec<String>, Vec<String>)> {
    let mut reads: Vec<String> = Vec::new();
    for capture in PLACEHOLDER.captures_iter(code) {
        let name = capture[1].to_string();
        if !reads.contains(&name) {
            reads.push(name);
        }
    }
    reads.sort();
    Ok((reads, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_unique_placeholders() {
        let (reads, writes) = extract("select * from t where id = {user_id} and name = {name}").unwrap();
        assert_eq!(reads, vec!["name".to_string(), "user_id".to_string()]);
        assert!(writes.is_empty());
    }

    #[test]
    fn duplicate_placeholder_counted_once() {
        let (reads, _) = extract("select {x} + {x}").unwrap();
        assert_eq!(reads, vec!["x".to_string()]);
    }

    #[test]
    fn no_placeholders_yields_empty_reads() {
        let (reads, writes) = extract("select 1").unwrap();
        assert!(reads.is_empty());
        assert!(writes.is_empty());
    }
}
