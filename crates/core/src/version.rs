//! Release version parsing and ordering for the update catalog
//!
//! Versions are `major.minor.patch` with an optional `-suffix`. Ordering
//! compares the three numeric components, then the suffix: a bare version
//! sorts BEFORE any suffixed build of the same triple, and suffixes order
//! lexically. This is the rollout ordering the update protocol relies on; it
//! intentionally differs from semver, where a pre-release precedes the
//! release it tags.

use crate::error::SignageError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A software release version as carried in the update catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Optional build suffix, e.g. "beta.2" in "1.4.0-beta.2"
    pub suffix: Option<String>,
}

impl ReleaseVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: None,
        }
    }

    pub fn with_suffix(major: u32, minor: u32, patch: u32, suffix: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: Some(suffix.into()),
        }
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                // bare version sorts first, suffixed builds after it
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{}", suffix)?;
        }
        Ok(())
    }
}

impl FromStr for ReleaseVersion {
    type Err = SignageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (numbers, suffix) = match s.split_once('-') {
            Some((n, rest)) if !rest.is_empty() => (n, Some(rest.to_string())),
            Some(_) => {
                return Err(SignageError::Validation(format!(
                    "version '{}' has an empty suffix",
                    s
                )))
            }
            None => (s, None),
        };

        let mut parts = numbers.split('.');
        let mut next_component = |name: &str| -> Result<u32, SignageError> {
            parts
                .next()
                .ok_or_else(|| {
                    SignageError::Validation(format!("version '{}' is missing {}", s, name))
                })?
                .parse::<u32>()
                .map_err(|_| {
                    SignageError::Validation(format!("version '{}' has a non-numeric {}", s, name))
                })
        };

        let major = next_component("major")?;
        let minor = next_component("minor")?;
        let patch = next_component("patch")?;

        if parts.next().is_some() {
            return Err(SignageError::Validation(format!(
                "version '{}' has too many components",
                s
            )));
        }

        Ok(Self {
            major,
            minor,
            patch,
            suffix,
        })
    }
}

impl TryFrom<String> for ReleaseVersion {
    type Error = SignageError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ReleaseVersion> for String {
    fn from(v: ReleaseVersion) -> Self {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> ReleaseVersion {
        s.parse().unwrap()
    }

    #[test]
    fn parses_and_round_trips() {
        assert_eq!(v("1.2.3"), ReleaseVersion::new(1, 2, 3));
        assert_eq!(
            v("2.0.1-beta.2"),
            ReleaseVersion::with_suffix(2, 0, 1, "beta.2")
        );
        assert_eq!(v("10.20.30").to_string(), "10.20.30");
        assert_eq!(v("1.0.0-rc1").to_string(), "1.0.0-rc1");
    }

    #[test]
    fn rejects_malformed_versions() {
        assert!("1.2".parse::<ReleaseVersion>().is_err());
        assert!("1.2.3.4".parse::<ReleaseVersion>().is_err());
        assert!("a.b.c".parse::<ReleaseVersion>().is_err());
        assert!("1.2.3-".parse::<ReleaseVersion>().is_err());
        assert!("".parse::<ReleaseVersion>().is_err());
    }

    #[test]
    fn numeric_components_order_as_integers() {
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("0.10.0") > v("0.2.0"));
    }

    #[test]
    fn suffixed_build_sorts_after_bare_version() {
        assert!(v("1.4.0-beta.1") > v("1.4.0"));
        assert!(v("1.4.0-beta.2") > v("1.4.0-beta.1"));
        assert!(v("1.4.1") > v("1.4.0-zz"));
    }

    #[test]
    fn equality_ignores_nothing() {
        assert_eq!(v("1.2.3"), v("1.2.3"));
        assert_ne!(v("1.2.3"), v("1.2.3-hotfix"));
    }
}
