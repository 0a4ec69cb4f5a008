//! Clock source and time synchronization tooling

use std::fmt;

use vmcheck_core::retry::{ClosurePredicate, RetryError, RetryExecutorBuilder, TracingObserver};
use vmcheck_core::{poll_until, Error, Expected, Result, RuntimeConfig};

use crate::node::{shell_quote, ExecOptions, Node};
use crate::os::{OsClassification, OsFamily};
use crate::tool::{Tool, ToolContext, ToolFactory, ToolId};
use crate::variant::{Variant, VariantTable};

use super::base::{Cat, Service};

const CURRENT_CLOCKSOURCE: &str = "/sys/devices/system/clocksource/clocksource0/current_clocksource";
const AVAILABLE_CLOCKSOURCE: &str = "/sys/devices/system/clocksource/clocksource0/available_clocksource";
const UNBIND_CLOCKSOURCE: &str = "/sys/devices/system/clocksource/clocksource0/unbind_clocksource";

/// Logged once the PTP clock driver is up
pub const PTP_REGISTERED_MESSAGE: &str = "PTP clock support registered";

command_tool!(
    /// Kernel ring buffer
    Dmesg,
    id = "dmesg",
    command = "dmesg"
);

impl Dmesg {
    pub fn output(&self, node: &Node, force_run: bool) -> Result<String> {
        let mut opts = ExecOptions::new()
            .sudo()
            .no_info_log()
            .expect_exit_code(0, "failed to read the kernel log");
        if force_run {
            opts = opts.force_run();
        }
        Ok(node.execute_cached("dmesg", &opts)?.stdout)
    }

    pub fn contains(&self, node: &Node, text: &str) -> Result<bool> {
        Ok(self.output(node, false)?.contains(text))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuArchitecture {
    X86_64,
    Aarch64,
    Other(String),
}

impl From<&str> for CpuArchitecture {
    fn from(value: &str) -> Self {
        match value {
            "x86_64" => Self::X86_64,
            "aarch64" => Self::Aarch64,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CpuArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86_64 => write!(f, "x86_64"),
            Self::Aarch64 => write!(f, "aarch64"),
            Self::Other(arch) => write!(f, "{}", arch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuType {
    Intel,
    Amd,
    Other,
}

command_tool!(
    /// CPU information from `lscpu`
    Lscpu,
    id = "lscpu",
    command = "lscpu"
);

impl Lscpu {
    pub fn architecture(&self, node: &Node) -> Result<CpuArchitecture> {
        Ok(CpuArchitecture::from(self.field(node, "Architecture")?.as_str()))
    }

    /// Number of online CPUs
    pub fn core_count(&self, node: &Node) -> Result<u32> {
        let value = self.field(node, "CPU(s)")?;
        value.parse().map_err(|_| {
            Error::condition_not_met(format!("unexpected CPU count `{}` in lscpu output", value))
        })
    }

    pub fn cpu_type(&self, node: &Node) -> Result<CpuType> {
        let vendor = self.field(node, "Vendor ID")?;
        Ok(match vendor.as_str() {
            "GenuineIntel" => CpuType::Intel,
            "AuthenticAMD" => CpuType::Amd,
            _ => CpuType::Other,
        })
    }

    fn field(&self, node: &Node, name: &str) -> Result<String> {
        let result = node.execute_cached(
            "lscpu",
            &ExecOptions::new()
                .no_info_log()
                .expect_exit_code(0, "failed to run lscpu"),
        )?;
        parse_lscpu_field(&result.stdout, name)
            .ok_or_else(|| Error::condition_not_met(format!("no `{}` in lscpu output", name)))
    }
}

fn parse_lscpu_field(output: &str, name: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == name).then(|| value.trim().to_string())
    })
}

command_tool!(
    /// Kernel clock sources under sysfs
    Clocksource,
    id = "clocksource",
    command = "cat"
);

impl Clocksource {
    /// Clock sources acceptable on an Azure guest of this architecture
    pub fn expected(arch: &CpuArchitecture) -> Result<&'static [&'static str]> {
        match arch {
            CpuArchitecture::X86_64 => Ok(&[
                "hyperv_clocksource_tsc_page",
                "lis_hyperv_clocksource_tsc_page",
                "hyperv_clocksource",
            ]),
            CpuArchitecture::Aarch64 => Ok(&["arch_sys_counter"]),
            CpuArchitecture::Other(arch) => Err(Error::unsupported_arch(arch)),
        }
    }

    pub fn current(&self, ctx: &ToolContext<'_>) -> Result<String> {
        ctx.tool::<Cat>()?.read(ctx.node(), CURRENT_CLOCKSOURCE, false, true)
    }

    pub fn available(&self, ctx: &ToolContext<'_>) -> Result<Vec<String>> {
        let content = ctx.tool::<Cat>()?.read(ctx.node(), AVAILABLE_CLOCKSOURCE, false, true)?;
        Ok(content.split_whitespace().map(str::to_string).collect())
    }

    /// Whether the kernel lets the current source be unbound
    pub fn can_unbind(&self, ctx: &ToolContext<'_>) -> Result<bool> {
        ctx.node().path_exists(UNBIND_CLOCKSOURCE)
    }

    /// Unbind the current clock source and wait for the kernel to switch to
    /// another available one. Returns the new source, or `None` when only
    /// one source is available.
    pub fn unbind_current(&self, ctx: &ToolContext<'_>) -> Result<Option<String>> {
        let node = ctx.node();
        let current = self.current(ctx)?;
        let remaining: Vec<String> = self
            .available(ctx)?
            .into_iter()
            .filter(|source| *source != current)
            .collect();
        if remaining.is_empty() {
            tracing::info!(
                node = %node.name(),
                clocksource = %current,
                "only one clock source, not unbinding"
            );
            return Ok(None);
        }

        node.execute(
            &format!("echo {} > {}", shell_quote(&current)?, UNBIND_CLOCKSOURCE),
            &ExecOptions::new()
                .sudo()
                .shell()
                .expect_exit_code(0, format!("failed to unbind {}", current)),
        )?;

        let polling = &ctx.config().polling;
        let expected = Expected::any_of(remaining);
        let switched = poll_until(
            || self.current(ctx),
            &expected,
            polling.interval(),
            polling.timeout(),
        );
        if !switched {
            return Err(Error::condition_not_met(format!(
                "after unbinding {} the current clock source did not switch to {}",
                current, expected
            )));
        }
        self.current(ctx).map(Some)
    }
}

/// Per-family chrony packaging
#[derive(Debug)]
pub struct ChronyHooks {
    pub service: &'static str,
}

static CHRONY_VARIANTS: VariantTable<ChronyHooks> = VariantTable {
    tool: "chrony",
    entries: &[Variant {
        family: OsFamily::Debian,
        name: "ChronyDebian",
        hooks: ChronyHooks { service: "chrony" },
    }],
    fallback: Some(&Variant {
        family: OsFamily::Unknown,
        name: "Chrony",
        hooks: ChronyHooks { service: "chronyd" },
    }),
};

/// Candidate chrony configuration files, in lookup order
pub const CHRONY_CONFIG_PATHS: &[&str] = &[
    "/etc/chrony.conf",
    "/etc/chrony/chrony.conf",
    "/etc/chrony.d/azure.conf",
];

/// The `chronyc` client and chrony service
#[derive(Debug)]
pub struct Chrony {
    variant: &'static Variant<ChronyHooks>,
}

impl Chrony {
    pub fn service_name(&self) -> &'static str {
        self.variant.hooks.service
    }

    pub fn restart(&self, ctx: &ToolContext<'_>) -> Result<()> {
        ctx.tool::<Service>()?.restart(ctx.node(), self.service_name())
    }

    /// Configuration files present on the node
    pub fn config_files(&self, node: &Node) -> Result<Vec<&'static str>> {
        let mut found = Vec::new();
        for path in CHRONY_CONFIG_PATHS {
            if node.path_exists(path)? {
                found.push(*path);
            }
        }
        Ok(found)
    }

    /// Whether every configuration file refers to the Hyper-V PTP device
    pub fn uses_hyperv_ptp(&self, ctx: &ToolContext<'_>) -> Result<bool> {
        let cat = ctx.tool::<Cat>()?;
        for path in self.config_files(ctx.node())? {
            if !cat.read(ctx.node(), path, true, false)?.contains("ptp_hyperv") {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn sources(&self, node: &Node) -> Result<String> {
        self.chronyc(node, "sources")
    }

    pub fn source_stats(&self, node: &Node) -> Result<String> {
        self.chronyc(node, "sourcestats")
    }

    /// Wait until `chronyc tracking` reports a synchronized clock
    pub fn check_tracking(&self, ctx: &ToolContext<'_>) -> Result<String> {
        let policy = ctx.config().retry_policy("chrony-tracking").clone();
        RetryExecutorBuilder::new()
            .with_policy(policy)
            .with_predicate(ClosurePredicate::new(Error::is_condition_not_met))
            .with_observer(TracingObserver::new("chrony-tracking"))
            .with_jitter(false)
            .build()
            .execute(|| {
                let result = ctx.node().execute("chronyc tracking", &ExecOptions::new().quiet())?;
                if !result.is_success() || result.stdout.contains("Not synchronised") {
                    return Err(Error::condition_not_met("chrony is not synchronised"));
                }
                Ok(result.stdout)
            })
            .map_err(RetryError::into_source)
    }

    fn chronyc(&self, node: &Node, command: &str) -> Result<String> {
        let result = node.execute(
            &format!("chronyc {}", command),
            &ExecOptions::new().expect_exit_code(0, format!("chronyc {} failed", command)),
        )?;
        Ok(result.stdout)
    }
}

impl ToolFactory for Chrony {
    const ID: ToolId = "chrony";

    fn create(os: &OsClassification, _config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            variant: CHRONY_VARIANTS.select(os)?,
        })
    }
}

impl Tool for Chrony {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        "chronyc"
    }

    fn can_install(&self) -> bool {
        true
    }

    fn install(&self, ctx: &ToolContext<'_>) -> Result<()> {
        ctx.install_packages(&["chrony"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmcheck_core::VersionInfo;

    const LSCPU_OUTPUT: &str = "Architecture:            x86_64
  CPU op-mode(s):        32-bit, 64-bit
CPU(s):                  4
  On-line CPU(s) list:   0-3
Vendor ID:               GenuineIntel
  Model name:            Intel(R) Xeon(R) Platinum 8272CL CPU @ 2.60GHz";

    #[test]
    fn test_parse_lscpu_field() {
        assert_eq!(parse_lscpu_field(LSCPU_OUTPUT, "Architecture").as_deref(), Some("x86_64"));
        assert_eq!(parse_lscpu_field(LSCPU_OUTPUT, "CPU(s)").as_deref(), Some("4"));
        assert_eq!(parse_lscpu_field(LSCPU_OUTPUT, "Vendor ID").as_deref(), Some("GenuineIntel"));
        assert!(parse_lscpu_field(LSCPU_OUTPUT, "BogoMIPS").is_none());
    }

    #[test]
    fn test_expected_clocksources() {
        assert!(Clocksource::expected(&CpuArchitecture::X86_64)
            .unwrap()
            .contains(&"hyperv_clocksource_tsc_page"));
        assert_eq!(
            Clocksource::expected(&CpuArchitecture::Aarch64).unwrap(),
            &["arch_sys_counter"]
        );
        let err = Clocksource::expected(&CpuArchitecture::from("riscv64")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedArch { .. }));
    }

    #[test]
    fn test_chrony_service_per_family() {
        let config = RuntimeConfig::default();
        let debian = OsClassification::new(OsFamily::Debian, "Ubuntu", VersionInfo::new(22, 4, 0));
        let redhat =
            OsClassification::new(OsFamily::Redhat, "AlmaLinux", VersionInfo::new(9, 2, 0));
        assert_eq!(Chrony::create(&debian, &config).unwrap().service_name(), "chrony");
        assert_eq!(Chrony::create(&redhat, &config).unwrap().service_name(), "chronyd");
        assert_eq!(
            Chrony::create(&OsClassification::unknown(), &config).unwrap().service_name(),
            "chronyd"
        );
    }
}
