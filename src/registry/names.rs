//! Display-name disambiguation
//!
//! A requested name that collides with a present participant gets the first
//! free numeric suffix: `Guest`, `Guest#1`, `Guest#2`, ... Comparison is
//! ASCII case-insensitive. Only the current population is consulted, so a
//! client that re-registers never inherits an old suffix.

use std::collections::HashSet;

use crate::protocol::constants::NAME_SUFFIX_SEPARATOR;

/// Pick a name not present in `taken`
pub fn disambiguate<'a, I>(requested: &str, taken: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let taken: HashSet<String> = taken
        .into_iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();

    if !taken.contains(&requested.to_ascii_lowercase()) {
        return requested.to_string();
    }

    (1u32..)
        .map(|n| format!("{}{}{}", requested, NAME_SUFFIX_SEPARATOR, n))
        .find(|candidate| !taken.contains(&candidate.to_ascii_lowercase()))
        .unwrap_or_else(|| requested.to_string())
}

/// Normalise a requested name for the line protocol
///
/// Names travel as a single whitespace-free token; anything else falls back
/// to `default`.
pub fn sanitize(requested: Option<&str>, default: &str) -> String {
    match requested.map(str::trim) {
        Some(name) if !name.is_empty() => name.split_whitespace().collect::<Vec<_>>().join("_"),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_name_kept() {
        assert_eq!(disambiguate("alice", ["bob"]), "alice");
    }

    #[test]
    fn test_suffix_sequence() {
        assert_eq!(disambiguate("Guest", ["Guest"]), "Guest#1");
        assert_eq!(disambiguate("Guest", ["Guest", "Guest#1"]), "Guest#2");
    }

    #[test]
    fn test_probes_past_gaps() {
        // Guest#1 left; the first free suffix is reused
        assert_eq!(disambiguate("Guest", ["Guest", "Guest#2"]), "Guest#1");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(disambiguate("ALICE", ["alice"]), "ALICE#1");
        assert_eq!(disambiguate("alice", ["ALICE", "Alice#1"]), "alice#2");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize(None, "Guest"), "Guest");
        assert_eq!(sanitize(Some("   "), "Guest"), "Guest");
        assert_eq!(sanitize(Some("bob"), "Guest"), "bob");
        assert_eq!(sanitize(Some("big  bob"), "Guest"), "big_bob");
    }
}
