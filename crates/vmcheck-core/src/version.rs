//! Lenient version parsing
//!
//! Distribution and tool versions rarely follow semantic versioning
//! exactly ("18.04", "v1.2.3-beta", "10.0.22000.100"). [`parse_version`]
//! accepts canonical semver strings directly and falls back to a lenient
//! pattern that fills missing components with zero. The result orders with
//! standard semantic-version precedence.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

// 10.0.22000.100
// 18.04.5
// 18.04
// v1.2-rc1
static LENIENT_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[vV]?(?P<major>\d+)(?:[._-](?P<minor>\d+))?(?:[._-](?P<patch>\d+))?(?:[._-](?P<prerelease>[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*))?",
    )
    .expect("lenient version regex is valid")
});

/// A comparable `major.minor.patch` version with optional prerelease and
/// build metadata.
///
/// Equality and ordering ignore build metadata, so `1.0.0+a == 1.0.0+b`.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl VersionInfo {
    /// Create a release version without prerelease or build metadata
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Set the prerelease component
    pub fn with_prerelease(mut self, prerelease: impl Into<String>) -> Self {
        self.prerelease = Some(prerelease.into());
        self
    }

    /// Set the build metadata
    pub fn with_build(mut self, build: impl Into<String>) -> Self {
        self.build = Some(build.into());
        self
    }

    /// Check whether this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn from_semver(version: semver::Version) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            major: version.major,
            minor: version.minor,
            patch: version.patch,
            prerelease: non_empty(version.pre.as_str()),
            build: non_empty(version.build.as_str()),
        }
    }
}

/// Parse a loosely formatted version string
///
/// # Examples
///
/// ```rust
/// use vmcheck_core::version::{parse_version, VersionInfo};
///
/// assert_eq!(parse_version("18.04").unwrap(), VersionInfo::new(18, 4, 0));
/// let beta = parse_version("v1.2.3-beta").unwrap();
/// assert_eq!(beta.prerelease.as_deref(), Some("beta"));
/// assert!(parse_version("not a version").is_err());
/// ```
pub fn parse_version(text: &str) -> Result<VersionInfo> {
    let text = text.trim();

    if let Ok(version) = semver::Version::parse(text) {
        return Ok(VersionInfo::from_semver(version));
    }

    let captures = LENIENT_VERSION_RE
        .captures(text)
        .ok_or_else(|| Error::invalid_version(text))?;

    let component = |name: &str| -> Result<u64> {
        match captures.name(name) {
            Some(m) => m
                .as_str()
                .parse::<u64>()
                .map_err(|_| Error::invalid_version(text)),
            None => Ok(0),
        }
    };

    let rest = captures
        .get(0)
        .map(|m| text[m.end()..].trim())
        .unwrap_or_default();

    Ok(VersionInfo {
        major: component("major")?,
        minor: component("minor")?,
        patch: component("patch")?,
        prerelease: captures.name("prerelease").map(|m| m.as_str().to_string()),
        build: (!rest.is_empty()).then(|| rest.to_string()),
    })
}

impl FromStr for VersionInfo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_version(s)
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl Serialize for VersionInfo {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl Ord for VersionInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
            .then_with(|| {
                compare_prerelease(self.prerelease.as_deref(), other.prerelease.as_deref())
            })
    }
}

impl PartialOrd for VersionInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionInfo {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionInfo {}

/// A release without prerelease outranks any prerelease of the same triple.
fn compare_prerelease(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let mut left = a.split('.');
            let mut right = b.split('.');
            loop {
                match (left.next(), right.next()) {
                    (None, None) => return Ordering::Equal,
                    (None, Some(_)) => return Ordering::Less,
                    (Some(_), None) => return Ordering::Greater,
                    (Some(x), Some(y)) => {
                        let ordering = compare_identifier(x, y);
                        if ordering != Ordering::Equal {
                            return ordering;
                        }
                    }
                }
            }
        }
    }
}

fn compare_identifier(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        // numeric identifiers always have lower precedence
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let v = parse_version("2.0.15").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 0, 15));
        assert!(v.prerelease.is_none());
        assert!(v.build.is_none());
    }

    #[test]
    fn test_parse_two_components() {
        let v = parse_version("18.04").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (18, 4, 0));
    }

    #[test]
    fn test_parse_v_prefix_with_prerelease() {
        let v = parse_version("v1.2.3-beta").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert_eq!(v.prerelease.as_deref(), Some("beta"));
    }

    #[test]
    fn test_parse_four_components() {
        let v = parse_version("10.0.22000.100").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (10, 0, 22000));
        assert_eq!(v.prerelease.as_deref(), Some("100"));
    }

    #[test]
    fn test_parse_underscore_separators() {
        let v = parse_version("7_9").unwrap();
        assert_eq!(v, VersionInfo::new(7, 9, 0));
    }

    #[test]
    fn test_parse_major_only() {
        assert_eq!(parse_version("15").unwrap(), VersionInfo::new(15, 0, 0));
    }

    #[test]
    fn test_trailing_text_kept_as_build() {
        let v = parse_version("2.0.16 (kexec-tools)").unwrap();
        assert_eq!(v, VersionInfo::new(2, 0, 16));
        assert_eq!(v.build.as_deref(), Some("(kexec-tools)"));
    }

    #[test]
    fn test_parse_kernel_release() {
        let v = parse_version("5.15.0-1051-azure").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (5, 15, 0));
        assert_eq!(v.prerelease.as_deref(), Some("1051-azure"));
    }

    #[test]
    fn test_parse_malformed() {
        for input in ["", "abc", "version", "v", ".."] {
            let err = parse_version(input).unwrap_err();
            assert!(matches!(err, Error::InvalidVersion { .. }), "{input}");
        }
    }

    #[test]
    fn test_parse_overflow_is_format_error() {
        let err = parse_version("99999999999999999999999.1").unwrap_err();
        assert!(matches!(err, Error::InvalidVersion { .. }));
    }

    #[test]
    fn test_ordering() {
        let v14 = parse_version("2.0.14").unwrap();
        let v15 = parse_version("2.0.15").unwrap();
        let v16 = parse_version("2.0.16").unwrap();
        assert!(v14 < v15);
        assert!(v15 < v16);
        assert!(VersionInfo::new(1, 10, 0) > VersionInfo::new(1, 9, 99));
    }

    #[test]
    fn test_prerelease_precedence() {
        let rc = VersionInfo::new(1, 0, 0).with_prerelease("rc1");
        assert!(rc < VersionInfo::new(1, 0, 0));
        assert!(rc > VersionInfo::new(0, 9, 9));

        let alpha = VersionInfo::new(1, 0, 0).with_prerelease("alpha");
        let alpha1 = VersionInfo::new(1, 0, 0).with_prerelease("alpha.1");
        let alpha_beta = VersionInfo::new(1, 0, 0).with_prerelease("alpha.beta");
        let beta2 = VersionInfo::new(1, 0, 0).with_prerelease("beta.2");
        let beta11 = VersionInfo::new(1, 0, 0).with_prerelease("beta.11");
        assert!(alpha < alpha1);
        assert!(alpha1 < alpha_beta);
        assert!(alpha_beta < beta2);
        assert!(beta2 < beta11);
    }

    #[test]
    fn test_build_ignored_in_equality() {
        let a = VersionInfo::new(1, 0, 0).with_build("a");
        let b = VersionInfo::new(1, 0, 0).with_build("b");
        assert_eq!(a, b);
    }

    #[test]
    fn test_display() {
        let v = VersionInfo::new(1, 2, 3)
            .with_prerelease("beta")
            .with_build("x86");
        assert_eq!(v.to_string(), "1.2.3-beta+x86");
        assert_eq!("8.6".parse::<VersionInfo>().unwrap().to_string(), "8.6.0");
    }
}
