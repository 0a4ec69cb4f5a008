//! Distribution variant tables
//!
//! Per-family behavior of a tool lives in a hook struct `H` (plain values and
//! `fn` pointers). A [`VariantTable`] maps OS families to hook sets so tools
//! look up their behavior instead of branching on the family inline.

use vmcheck_core::{Error, Result};

use crate::os::{OsClassification, OsFamily};

/// Hooks for one distribution family
#[derive(Debug)]
pub struct Variant<H: 'static> {
    pub family: OsFamily,
    /// Shown in logs, e.g. `KdumpDebian`
    pub name: &'static str,
    pub hooks: H,
}

/// Family-keyed variants of one tool
#[derive(Debug)]
pub struct VariantTable<H: 'static> {
    pub tool: &'static str,
    pub entries: &'static [Variant<H>],
    /// Used when no entry matches; `None` makes the family unsupported
    pub fallback: Option<&'static Variant<H>>,
}

impl<H> VariantTable<H> {
    /// Select the variant for a node's OS
    pub fn select(&self, os: &OsClassification) -> Result<&'static Variant<H>> {
        let entries: &'static [Variant<H>] = self.entries;
        let variant = entries
            .iter()
            .find(|variant| variant.family == os.family)
            .or(self.fallback)
            .ok_or_else(|| {
                Error::unsupported_distro(&os.name, os.version.to_string())
                    .with_message(format!(
                        "{} has no variant for the {} family",
                        self.tool, os.family
                    ))
            })?;

        tracing::debug!(tool = self.tool, variant = variant.name, os = %os, "selected variant");
        Ok(variant)
    }

    /// Families with a dedicated variant
    pub fn families(&self) -> impl Iterator<Item = OsFamily> + '_ {
        self.entries.iter().map(|variant| variant.family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmcheck_core::VersionInfo;

    #[derive(Debug)]
    struct Hooks {
        service: &'static str,
    }

    static TABLE: VariantTable<Hooks> = VariantTable {
        tool: "demo",
        entries: &[
            Variant {
                family: OsFamily::Debian,
                name: "DemoDebian",
                hooks: Hooks { service: "demo-tools" },
            },
            Variant {
                family: OsFamily::Redhat,
                name: "DemoRedhat",
                hooks: Hooks { service: "demod" },
            },
        ],
        fallback: None,
    };

    fn os(family: OsFamily, name: &str, version: VersionInfo) -> OsClassification {
        OsClassification::new(family, name, version)
    }

    #[test]
    fn test_select_by_family() {
        let ubuntu = os(OsFamily::Debian, "Ubuntu", VersionInfo::new(22, 4, 0));
        let debian = os(OsFamily::Debian, "Debian", VersionInfo::new(12, 0, 0));

        let a = TABLE.select(&ubuntu).unwrap();
        let b = TABLE.select(&debian).unwrap();
        assert_eq!(a.hooks.service, "demo-tools");
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_unsupported_family() {
        let sles = os(OsFamily::Suse, "SLES", VersionInfo::new(15, 4, 0));
        let err = TABLE.select(&sles).unwrap_err();
        assert!(matches!(err, Error::UnsupportedDistro { .. }));
        assert!(err.to_string().contains("SLES 15.4.0"));
    }

    #[test]
    fn test_fallback() {
        static FALLBACK: Variant<Hooks> = Variant {
            family: OsFamily::Unknown,
            name: "DemoDefault",
            hooks: Hooks { service: "demo" },
        };
        let table = VariantTable {
            tool: "demo",
            entries: TABLE.entries,
            fallback: Some(&FALLBACK),
        };
        let sles = os(OsFamily::Suse, "SLES", VersionInfo::new(15, 4, 0));
        assert_eq!(table.select(&sles).unwrap().name, "DemoDefault");
    }
}
