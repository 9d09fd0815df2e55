//! Subscription filters.

use crate::{Kind, PublicKey, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Selects records a relay should deliver on a subscription.
///
/// Every populated field must match; an absent field matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Accepted authors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<BTreeSet<PublicKey>>,
    /// Accepted kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<Kind>>,
    /// Accepted `p` tag values; a record matches if any of its `p` tags does.
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub p_tags: Option<BTreeSet<PublicKey>>,
}

impl Filter {
    /// A filter that matches everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to these authors.
    pub fn authors(mut self, authors: impl IntoIterator<Item = PublicKey>) -> Self {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    /// Restrict to these kinds.
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = Kind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Restrict to records addressed to one of these keys.
    pub fn p_tags(mut self, keys: impl IntoIterator<Item = PublicKey>) -> Self {
        self.p_tags = Some(keys.into_iter().collect());
        self
    }

    /// Check whether a record passes this filter.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(authors) = &self.authors {
            if !authors.contains(&record.author) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&record.kind) {
                return false;
            }
        }
        if let Some(keys) = &self.p_tags {
            if !record.tags.p().iter().any(|p| keys.contains(p)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tags, UnsignedRecord};

    fn key(b: u8) -> PublicKey {
        PublicKey::from_bytes([b; 32])
    }

    fn record(author: u8, kind: Kind, p: Option<u8>) -> Record {
        let tags = match p {
            Some(b) => Tags::new().with_p(&key(b)),
            None => Tags::new(),
        };
        Record::from_unsigned(UnsignedRecord::new(key(author), kind, tags, ""), String::new())
    }

    #[test]
    fn empty_filter_matches_all() {
        assert!(Filter::new().matches(&record(1, Kind::Text, None)));
    }

    #[test]
    fn author_and_kind() {
        let filter = Filter::new().authors([key(1)]).kinds([Kind::DirectMessage]);

        assert!(filter.matches(&record(1, Kind::DirectMessage, Some(2))));
        assert!(!filter.matches(&record(2, Kind::DirectMessage, Some(1))));
        assert!(!filter.matches(&record(1, Kind::Text, None)));
    }

    #[test]
    fn p_tags() {
        let filter = Filter::new().p_tags([key(9)]);

        assert!(filter.matches(&record(1, Kind::GroupMessage, Some(9))));
        assert!(!filter.matches(&record(1, Kind::GroupMessage, Some(8))));
        assert!(!filter.matches(&record(1, Kind::GroupMessage, None)));
    }

    #[test]
    fn serializes_p_with_hash_prefix() {
        let json = serde_json::to_string(&Filter::new().p_tags([key(1)])).unwrap();
        assert!(json.starts_with("{\"#p\":["));
    }
}
