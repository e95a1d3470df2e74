//! Version strings and the ordering rules applied to them.
//!
//! Versions are opaque strings compared numeric-tuple first: both strings are
//! split on `.`, `-` and `_`, and corresponding fragments compare numerically
//! when both parse as integers, lexicographically otherwise. News and
//! unsigned-router versions are decimal millisecond timestamps, which order
//! correctly under the numeric rule.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque artifact version.
///
/// Equality follows the comparator, so `"1.0"` and `"1-0"` are the same
/// version. `Version` intentionally does not implement `Hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Wraps a version string.
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// Returns the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the empty version, which orders below every
    /// non-empty version.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Version {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

impl From<String> for Version {
    fn from(version: String) -> Self {
        Self(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        compare_versions(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

/// Compares two version strings fragment by fragment.
///
/// Fragments are the substrings between `.`, `-` and `_` separators. Two
/// fragments that both parse as unsigned integers compare numerically, so
/// `0.9.10 > 0.9.9`; otherwise they compare lexicographically. When one
/// version is a prefix of the other, the longer one is newer. The empty
/// string compares below everything else.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if a.is_empty() {
        return Ordering::Less;
    }
    if b.is_empty() {
        return Ordering::Greater;
    }
    let mut left = a.split(['.', '-', '_']);
    let mut right = b.split(['.', '-', '_']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
