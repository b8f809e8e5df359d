//! Allow-list reconciliation.
//!
//! The allow list is rebuilt on every sync from two sources: the remote feed
//! (already validated and gated) and the administrator's custom entries.
//! Remote entries come first in feed order, custom entries follow in the
//! order they were configured, and exact duplicates keep their first
//! position.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::address::{self, AddressEntry};

/// Ordered set of unique IP/CIDR literals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    /// Build an allow list from literals, dropping exact duplicates.
    ///
    /// Literals are taken as given; use [`AllowList::merge`] for untrusted
    /// input.
    pub fn from_literals<I, S>(literals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = AHashSet::new();
        let mut entries = Vec::new();
        for literal in literals {
            let literal = literal.into();
            if seen.insert(literal.clone()) {
                entries.push(literal);
            }
        }
        Self { entries }
    }

    /// Merge remote entries with custom entries.
    ///
    /// Remote entries are trusted (the feed parser and sanity gate already
    /// ran). Custom entries are validated one by one and invalid ones are
    /// dropped.
    ///
    /// # Examples
    /// ```
    /// use xmlrpc_allowlist::AllowList;
    ///
    /// let list = AllowList::merge(&["1.1.1.1", "2.2.2.2", "1.1.1.1"], &["3.3.3.3", "2.2.2.2"]);
    /// assert_eq!(list.entries(), ["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
    /// ```
    pub fn merge<R, C>(remote: &[R], custom: &[C]) -> Self
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        let remote = remote.iter().map(|r| r.as_ref());
        let custom = custom
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| address::validate(c));

        Self::from_literals(remote.chain(custom))
    }

    /// Entries in allow-list order.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the allow list has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether an IPv4 address is covered by any entry.
    ///
    /// Containment uses the masked range; the stored literal is untouched.
    pub fn permits(&self, ip: Ipv4Addr) -> bool {
        self.entries
            .iter()
            .filter_map(|literal| AddressEntry::parse(literal).ok())
            .any(|entry| entry.contains(ip))
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a AllowList {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Split stored custom-entry text into trimmed, non-empty lines.
///
/// Validation is left to [`AllowList::merge`].
pub fn custom_entries(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_stable_dedup() {
        let list = AllowList::merge(&["a", "b", "a"], &["c", "b"]);
        // "c" is not a valid literal, so only remote entries survive here.
        assert_eq!(list.entries(), ["a", "b"]);

        let list = AllowList::merge(
            &["1.0.0.1", "2.0.0.2", "1.0.0.1"],
            &["3.0.0.3", "2.0.0.2"],
        );
        assert_eq!(list.entries(), ["1.0.0.1", "2.0.0.2", "3.0.0.3"]);
    }

    #[test]
    fn test_from_literals_first_occurrence_wins() {
        let list = AllowList::from_literals(["a", "b", "a", "c", "b"]);
        assert_eq!(list.entries(), ["a", "b", "c"]);
    }

    #[test]
    fn test_merge_drops_invalid_custom() {
        let list = AllowList::merge(&["10.0.0.0/8"], &["nope", "1.2.3.4", "1.2.3.4/40", " 5.5.5.5"]);
        assert_eq!(list.entries(), ["10.0.0.0/8", "1.2.3.4"]);
    }

    #[test]
    fn test_dedup_is_textual() {
        // Same range, different literal: both kept.
        let list = AllowList::merge(&["10.0.0.0/8"], &["10.1.2.3/8"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_empty_sources() {
        let empty: [&str; 0] = [];
        let list = AllowList::merge(&empty, &empty);
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_permits() {
        let list = AllowList::merge(&["192.0.64.0/18", "122.248.245.244/32"], &["203.0.113.7"]);
        assert!(list.permits(Ipv4Addr::new(192, 0, 100, 1)));
        assert!(list.permits(Ipv4Addr::new(122, 248, 245, 244)));
        assert!(list.permits(Ipv4Addr::new(203, 0, 113, 7)));
        assert!(!list.permits(Ipv4Addr::new(203, 0, 113, 8)));
        assert!(!list.permits(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[test]
    fn test_custom_entries() {
        let text = "  1.2.3.4 \n\n10.0.0.0/8\r\n   \n";
        assert_eq!(custom_entries(text), vec!["1.2.3.4", "10.0.0.0/8"]);
        assert!(custom_entries("").is_empty());
    }

    #[test]
    fn test_serde_roundtrip_is_plain_array() {
        let list = AllowList::from_literals(["1.1.1.1", "2.2.2.0/24"]);
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"["1.1.1.1","2.2.2.0/24"]"#);
        let back: AllowList = serde_json::from_str(&json).unwrap();
        assert_eq!(back, list);
    }
}
