//! Dependency extraction: `(code, language) -> (reads, writes)`.

mod python;
mod sql;

use rustc_hash::FxHashSet;

use crate::cell::Language;
use crate::error::Result;

/// Pure: repeated calls with the same `(code, language)` return equal sets.
pub fn extract(code: &str, language: Language) -> Result<(FxHashSet<String>, FxHashSet<String>)> {
    let (reads, writes) = match language {
        Language::Python => python::extract(code)?,
        Language::Sql => sql::extract(code)?,
    };
    Ok((reads.into_iter().collect(), writes.into_iter().collect()))
}
