//! Subtree Tag Model
//!
//! Tags attached to hierarchy edges. A tag set distinguishes tags set
//! *explicitly* on a node from tags *inherited* from its ancestors; read
//! queries exclude a node when its effective (explicit plus inherited) tags
//! intersect the caller's visibility constraints.
//!
//! Tag sets are stored on the edge as JSON:
//! `{"explicit": ["disabled"], "inherited": []}`.

use crate::models::node::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A single subtree tag: a lowercase label such as `disabled` or `removed`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtreeTag(String);

impl SubtreeTag {
    /// Create a validated tag. Tags are non-empty, lowercase alphanumeric
    /// with `-` and `_` allowed.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        let valid = !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if valid {
            Ok(Self(value))
        } else {
            Err(ValidationError::InvalidSubtreeTag(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubtreeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The explicit and inherited tag sets carried by one hierarchy edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtreeTags {
    /// Tags set directly on this node.
    #[serde(default)]
    pub explicit: BTreeSet<SubtreeTag>,
    /// Tags propagated from ancestors.
    #[serde(default)]
    pub inherited: BTreeSet<SubtreeTag>,
}

impl SubtreeTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_explicit<I: IntoIterator<Item = SubtreeTag>>(tags: I) -> Self {
        Self {
            explicit: tags.into_iter().collect(),
            inherited: BTreeSet::new(),
        }
    }

    /// Explicit union inherited: the set visibility constraints are matched
    /// against.
    pub fn effective(&self) -> BTreeSet<SubtreeTag> {
        self.explicit.union(&self.inherited).cloned().collect()
    }

    /// The tag set a direct child edge receives: everything effective here
    /// becomes inherited there.
    pub fn inherit(&self) -> Self {
        Self {
            explicit: BTreeSet::new(),
            inherited: self.effective(),
        }
    }

    pub fn contains(&self, tag: &SubtreeTag) -> bool {
        self.explicit.contains(tag) || self.inherited.contains(tag)
    }

    /// Whether any effective tag appears in `tags`.
    pub fn intersects(&self, tags: &BTreeSet<SubtreeTag>) -> bool {
        self.explicit.iter().any(|t| tags.contains(t))
            || self.inherited.iter().any(|t| tags.contains(t))
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.inherited.is_empty()
    }

    /// JSON form stored on the hierarchy edge.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"explicit":[],"inherited":[]}"#.to_string())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(value: &str) -> SubtreeTag {
        SubtreeTag::new(value).unwrap()
    }

    #[test]
    fn tag_validation() {
        assert!(SubtreeTag::new("disabled").is_ok());
        assert!(SubtreeTag::new("my-tag_2").is_ok());
        assert!(SubtreeTag::new("").is_err());
        assert!(SubtreeTag::new("Upper").is_err());
        assert!(SubtreeTag::new("has space").is_err());
    }

    #[test]
    fn effective_is_union() {
        let mut tags = SubtreeTags::from_explicit([tag("disabled")]);
        tags.inherited.insert(tag("archived"));

        let effective = tags.effective();
        assert!(effective.contains(&tag("disabled")));
        assert!(effective.contains(&tag("archived")));
        assert_eq!(effective.len(), 2);
    }

    #[test]
    fn inherit_flattens_to_inherited() {
        let mut tags = SubtreeTags::from_explicit([tag("disabled")]);
        tags.inherited.insert(tag("archived"));

        let child = tags.inherit();
        assert!(child.explicit.is_empty());
        assert!(child.inherited.contains(&tag("disabled")));
        assert!(child.inherited.contains(&tag("archived")));
    }

    #[test]
    fn json_round_trip() {
        let tags = SubtreeTags::from_explicit([tag("disabled")]);
        let json = tags.to_json();
        let restored = SubtreeTags::from_json(&json).unwrap();
        assert_eq!(tags, restored);
    }

    #[test]
    fn intersects_checks_both_sets() {
        let mut tags = SubtreeTags::new();
        tags.inherited.insert(tag("disabled"));

        let constraint: BTreeSet<SubtreeTag> = [tag("disabled")].into_iter().collect();
        assert!(tags.intersects(&constraint));

        let other: BTreeSet<SubtreeTag> = [tag("archived")].into_iter().collect();
        assert!(!tags.intersects(&other));
    }
}
