//! Distribution package managers
//!
//! [`PackageManager::install`] reports packages the repositories do not know
//! as [`Error::MissingPackages`] listing exactly those names; other failures
//! are execution errors. Repository metadata is refreshed once per node
//! before the first install.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use vmcheck_core::{Error, Initializer, Result, VersionInfo};

use crate::node::{shell_quote, ExecOptions, Node};
use crate::os::{OsClassification, OsFamily};

// E: Unable to locate package kdump-tool
// E: Package 'kexec-tools' has no installation candidate
static APT_MISSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:Unable to locate package ([A-Za-z0-9+._:-]+)|Package '([A-Za-z0-9+._:-]+)' has no installation candidate)",
    )
    .expect("apt missing package regex is valid")
});

// No match for argument: kexec-toolz
// No package kexec-toolz available.
static RPM_MISSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:No match for argument: |No package )([A-Za-z0-9+._:-]+)")
        .expect("rpm missing package regex is valid")
});

// 'kdumpx' not found in package names. Trying capabilities.
// No provider of 'kdumpx' found.
static ZYPPER_MISSING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(?:'([A-Za-z0-9+._:-]+)' not found in package names|No provider of '([A-Za-z0-9+._:-]+)')",
    )
    .expect("zypper missing package regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Yum,
    Zypper,
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Apt => write!(f, "apt-get"),
            Self::Dnf => write!(f, "dnf"),
            Self::Yum => write!(f, "yum"),
            Self::Zypper => write!(f, "zypper"),
        }
    }
}

/// Package manager of one node
#[derive(Debug)]
pub struct PackageManager {
    kind: PackageManagerKind,
    refreshed: Initializer,
}

impl PackageManager {
    pub fn new(kind: PackageManagerKind) -> Self {
        Self {
            kind,
            refreshed: Initializer::new(),
        }
    }

    /// Pick the package manager of a distribution
    pub fn for_os(os: &OsClassification) -> Result<Self> {
        let kind = match os.family {
            OsFamily::Debian => PackageManagerKind::Apt,
            OsFamily::Redhat if os.version >= VersionInfo::new(8, 0, 0) => PackageManagerKind::Dnf,
            OsFamily::Redhat => PackageManagerKind::Yum,
            OsFamily::Suse => PackageManagerKind::Zypper,
            OsFamily::Unknown => {
                return Err(Error::unsupported_distro(&os.name, os.version.to_string())
                    .with_message("no known package manager"))
            }
        };
        Ok(Self::new(kind))
    }

    pub fn kind(&self) -> PackageManagerKind {
        self.kind
    }

    /// Install packages, failing with the exact list of unknown packages
    pub fn install(&self, node: &Node, packages: &[&str]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        self.refreshed.ensure(|| self.refresh(node))?;

        let names = quote_all(packages)?;
        let command = match self.kind {
            PackageManagerKind::Apt => {
                format!("DEBIAN_FRONTEND=noninteractive apt-get -y install {}", names)
            }
            PackageManagerKind::Dnf => format!("dnf install -y {}", names),
            // yum skips unknown names and exits 0 unless told otherwise
            PackageManagerKind::Yum => format!(
                "yum install -y --setopt=skip_missing_names_on_install=False {}",
                names
            ),
            PackageManagerKind::Zypper => format!("zypper --non-interactive install {}", names),
        };

        tracing::info!(
            node = %node.name(),
            manager = %self.kind,
            packages = ?packages,
            "installing packages"
        );
        let result = node.execute(&command, &self.options().no_error_log())?;

        // Older yum ignores the option above, so the output is scanned even
        // when the exit code says success
        let output = format!("{}\n{}", result.stdout, result.stderr);
        let missing = self.missing_packages(&output, packages);
        if !missing.is_empty() {
            return Err(Error::missing_packages(missing));
        }

        if result.is_success() {
            return Ok(());
        }
        result.assert_success(&format!("failed to install {}", packages.join(" ")))?;
        Ok(())
    }

    /// Check whether the repositories know a package
    pub fn is_package_in_repo(&self, node: &Node, package: &str) -> Result<bool> {
        self.refreshed.ensure(|| self.refresh(node))?;

        let name = shell_quote(package)?;
        let (command, needs_candidate) = match self.kind {
            PackageManagerKind::Apt => (format!("apt-cache policy {}", name), true),
            PackageManagerKind::Dnf => (format!("dnf list {}", name), false),
            PackageManagerKind::Yum => (format!("yum list {}", name), false),
            PackageManagerKind::Zypper => {
                (format!("zypper --non-interactive search -x {}", name), false)
            }
        };

        let result = node.execute(&command, &self.options().quiet())?;
        if needs_candidate {
            // apt-cache prints nothing for unknown names and "(none)" for
            // names without an installable version
            return Ok(result.is_success()
                && result.stdout.contains("Candidate:")
                && !result.stdout.contains("Candidate: (none)"));
        }
        Ok(result.is_success())
    }

    fn refresh(&self, node: &Node) -> Result<()> {
        let command = match self.kind {
            PackageManagerKind::Apt => "apt-get update",
            PackageManagerKind::Zypper => "zypper --non-interactive --gpg-auto-import-keys refresh",
            PackageManagerKind::Dnf | PackageManagerKind::Yum => return Ok(()),
        };
        let options = self
            .options()
            .expect_exit_code(0, "failed to refresh package metadata");
        node.execute(command, &options)?;
        Ok(())
    }

    fn options(&self) -> ExecOptions {
        ExecOptions::new().sudo().shell()
    }

    fn missing_packages(&self, output: &str, requested: &[&str]) -> Vec<String> {
        let regex: &Regex = match self.kind {
            PackageManagerKind::Apt => &APT_MISSING_RE,
            PackageManagerKind::Dnf | PackageManagerKind::Yum => &RPM_MISSING_RE,
            PackageManagerKind::Zypper => &ZYPPER_MISSING_RE,
        };

        let mut missing: Vec<String> = Vec::new();
        for captures in regex.captures_iter(output) {
            let name = captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .next();
            if let Some(name) = name {
                if requested.contains(&name) && !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
            }
        }
        missing
    }
}

fn quote_all(packages: &[&str]) -> Result<String> {
    let quoted = packages
        .iter()
        .map(|package| shell_quote(package))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(" "))
}
