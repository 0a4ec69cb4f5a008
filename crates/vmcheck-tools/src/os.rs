//! Operating system classification
//!
//! Nodes are classified by parsing `/etc/os-release`. `ID` decides the
//! family first, then every entry of `ID_LIKE`.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use vmcheck_core::{parse_version, VersionInfo};

/// Distribution family a tool variant is selected by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// RHEL, CentOS, Fedora, Rocky, AlmaLinux, Oracle Linux, Azure Linux
    Redhat,
    /// Debian, Ubuntu and derivatives
    Debian,
    /// SLES, openSUSE
    Suse,
    Unknown,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redhat => write!(f, "Redhat"),
            Self::Debian => write!(f, "Debian"),
            Self::Suse => write!(f, "Suse"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

impl OsFamily {
    fn from_id(id: &str) -> Option<Self> {
        match id {
            "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "ol" | "mariner"
            | "azurelinux" => Some(Self::Redhat),
            "debian" | "ubuntu" | "linuxmint" | "pop" | "raspbian" => Some(Self::Debian),
            "sles" | "sled" | "suse" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" => {
                Some(Self::Suse)
            }
            _ => None,
        }
    }
}

/// Classified operating system of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsClassification {
    pub family: OsFamily,
    /// Value of `NAME`, e.g. `Ubuntu`
    pub name: String,
    /// `ID`, e.g. `ubuntu`
    pub id: String,
    pub version: VersionInfo,
}

impl OsClassification {
    pub fn new(family: OsFamily, name: impl Into<String>, version: VersionInfo) -> Self {
        let name = name.into();
        Self {
            family,
            id: name.to_lowercase(),
            name,
            version,
        }
    }

    /// Classification used when nothing could be detected
    pub fn unknown() -> Self {
        Self::new(OsFamily::Unknown, "Unknown", VersionInfo::new(0, 0, 0))
    }

    /// Parse the contents of `/etc/os-release`
    ///
    /// ```rust
    /// use vmcheck_tools::os::{OsClassification, OsFamily};
    ///
    /// let os = OsClassification::from_os_release(
    ///     "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"18.04\"\n",
    /// );
    /// assert_eq!(os.family, OsFamily::Debian);
    /// assert_eq!(os.version.major, 18);
    /// ```
    pub fn from_os_release(content: &str) -> Self {
        let fields = parse_os_release(content);
        let id = fields.get("ID").cloned().unwrap_or_default().to_lowercase();
        let like = fields.get("ID_LIKE").cloned().unwrap_or_default().to_lowercase();

        let family = OsFamily::from_id(&id)
            .or_else(|| like.split_whitespace().find_map(OsFamily::from_id))
            .unwrap_or(OsFamily::Unknown);

        let name = fields
            .get("NAME")
            .cloned()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| if id.is_empty() { "Unknown".to_string() } else { id.clone() });

        let version = fields
            .get("VERSION_ID")
            .and_then(|v| parse_version(v).ok())
            .unwrap_or_else(|| VersionInfo::new(0, 0, 0));

        Self {
            family,
            name,
            id,
            version,
        }
    }
}

impl fmt::Display for OsClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.family)
    }
}

fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}
