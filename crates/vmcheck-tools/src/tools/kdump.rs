//! Crash dump tooling
//!
//! [`Kdump`] carries the per-family differences (service, package, boot
//! configuration) in a [`VariantTable`]. [`KdumpSession`] drives a node
//! through configuration, reboot and verification of a crash dump.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use vmcheck_core::config::KdumpConfig;
use vmcheck_core::retry::{ClosurePredicate, RetryError, RetryExecutorBuilder, TracingObserver};
use vmcheck_core::{Error, Result, RuntimeConfig, VersionInfo};

use crate::node::{shell_quote, ExecOptions, Node};
use crate::os::{OsClassification, OsFamily};
use crate::tool::{Tool, ToolContext, ToolFactory, ToolId};
use crate::variant::{Variant, VariantTable};

use super::base::{Cat, Gcc, Make, Sed, Service, Sysctl, Tar, Wget};

// kexec-tools 2.0.16
static KEXEC_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^kexec\S+\s+(\d+).(\d+).(\d+)").expect("kexec version regex is valid")
});

/// Packaged kexec-tools older than this cannot load a crash kernel on Debian
/// (<https://bugs.launchpad.net/ubuntu/+source/kexec-tools/+bug/1713940>)
const KEXEC_MIN_DEBIAN_VERSION: VersionInfo = VersionInfo {
    major: 2,
    minor: 0,
    patch: 15,
    prerelease: None,
    build: None,
};

const KEXEC_SOURCE_URL: &str =
    "https://mirrors.edge.kernel.org/pub/linux/utils/kernel/kexec/kexec-tools-2.0.18.tar.gz";
const KEXEC_BUILD_DIR: &str = "/var/tmp/vmcheck/kexec";

const KEXEC_CRASH_LOADED: &str = "/sys/kernel/kexec_crash_loaded";
const IOMEM: &str = "/proc/iomem";
const UNKNOWN_NMI_PANIC: &str = "/proc/sys/kernel/unknown_nmi_panic";
const REDHAT_KDUMP_CONF: &str = "/etc/kdump.conf";

/// Kernel options a crash dump needs in both kernels
pub const REQUIRED_KERNEL_CONFIG: &[&str] =
    &["CONFIG_KEXEC", "CONFIG_CRASH_DUMP", "CONFIG_PROC_VMCORE"];

/// `kexec`, loads the crash kernel
#[derive(Debug)]
pub struct Kexec {
    family: OsFamily,
}

impl Kexec {
    /// Version reported by `kexec -v`
    pub fn version(&self, node: &Node) -> Result<VersionInfo> {
        let result = node.execute_cached("kexec -v", &ExecOptions::new().sudo().quiet())?;
        result.assert_success(result.stderr.trim())?;

        let captures = KEXEC_VERSION_RE
            .captures(&result.stdout)
            .ok_or_else(|| Error::invalid_version(result.stdout.clone()))?;
        let component = |index: usize| -> Result<u64> {
            captures[index]
                .parse()
                .map_err(|_| Error::invalid_version(&captures[0]))
        };
        let version = VersionInfo::new(component(1)?, component(2)?, component(3)?);
        tracing::info!(node = %node.name(), version = %version, "kexec version");
        Ok(version)
    }

    fn install_from_source(&self, ctx: &ToolContext<'_>) -> Result<()> {
        let node = ctx.node();
        tracing::info!(
            node = %node.name(),
            url = KEXEC_SOURCE_URL,
            "building kexec-tools from source"
        );

        let wget = ctx.tool::<Wget>()?;
        let archive = wget.get(node, KEXEC_SOURCE_URL, KEXEC_BUILD_DIR, None, false, false)?;
        let tar = ctx.tool::<Tar>()?;
        tar.extract(node, &archive, KEXEC_BUILD_DIR, true, false)?;
        let source_dir = format!("{}/{}", KEXEC_BUILD_DIR, tar.root_folder(node, &archive)?);

        ctx.tool::<Gcc>()?;
        node.execute(
            "./configure",
            &ExecOptions::new()
                .cwd(&source_dir)
                .expect_exit_code(0, "failed to configure kexec-tools"),
        )?;
        ctx.tool::<Make>()?.make_install(node, &source_dir, true)?;
        node.execute(
            "yes | cp -f /usr/local/sbin/kexec /sbin/",
            &ExecOptions::new()
                .sudo()
                .shell()
                .expect_exit_code(0, "failed to replace /sbin/kexec"),
        )?;
        Ok(())
    }
}

impl ToolFactory for Kexec {
    const ID: ToolId = "kexec";

    fn create(os: &OsClassification, _config: &RuntimeConfig) -> Result<Self> {
        Ok(Self { family: os.family })
    }
}

impl Tool for Kexec {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        "kexec"
    }

    fn can_install(&self) -> bool {
        true
    }

    fn install(&self, ctx: &ToolContext<'_>) -> Result<()> {
        ctx.install_packages(&["kexec-tools"])?;
        if self.family == OsFamily::Debian && self.version(ctx.node())? < KEXEC_MIN_DEBIAN_VERSION {
            self.install_from_source(ctx)?;
        }
        Ok(())
    }
}

/// `makedumpfile`, shrinks the captured vmcore
#[derive(Debug)]
pub struct Makedumpfile {
    package: &'static str,
}

impl ToolFactory for Makedumpfile {
    const ID: ToolId = "makedumpfile";

    fn create(os: &OsClassification, _config: &RuntimeConfig) -> Result<Self> {
        let package = match os.family {
            OsFamily::Redhat => "kexec-tools",
            _ => "makedumpfile",
        };
        Ok(Self { package })
    }
}

impl Tool for Makedumpfile {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        "makedumpfile"
    }

    fn can_install(&self) -> bool {
        true
    }

    fn install(&self, ctx: &ToolContext<'_>) -> Result<()> {
        ctx.install_packages(&[self.package])
    }
}

/// Per-family kdump behavior
#[derive(Debug)]
pub struct KdumpHooks {
    pub command: &'static str,
    pub package: &'static str,
    pub service: &'static str,
    /// Bootloader defaults file carrying `crashkernel=`; `None` when the
    /// update command sets the parameter itself
    pub grub_config: fn(&OsClassification) -> Option<&'static str>,
    /// Command regenerating the boot configuration
    pub grub_update: fn(&Node, &OsClassification, &str) -> Result<String>,
    /// Move the dump directory when the default location is too small;
    /// returns the new directory
    pub relocate_dump_path: fn(&ToolContext<'_>, &KdumpConfig) -> Result<Option<String>>,
}

fn default_grub_config(_os: &OsClassification) -> Option<&'static str> {
    Some("/etc/default/grub")
}

fn default_grub_update(_node: &Node, _os: &OsClassification, _crashkernel: &str) -> Result<String> {
    Ok("grub2-mkconfig -o /boot/grub2/grub.cfg".to_string())
}

fn keep_dump_path(_ctx: &ToolContext<'_>, _config: &KdumpConfig) -> Result<Option<String>> {
    Ok(None)
}

fn uses_grubby(os: &OsClassification) -> bool {
    os.version >= VersionInfo::new(8, 0, 0)
}

fn redhat_grub_config(os: &OsClassification) -> Option<&'static str> {
    if uses_grubby(os) {
        None
    } else {
        Some("/etc/default/grub")
    }
}

fn redhat_grub_update(node: &Node, os: &OsClassification, crashkernel: &str) -> Result<String> {
    if uses_grubby(os) {
        return Ok(format!("grubby --update-kernel=ALL --args=\"crashkernel={}\"", crashkernel));
    }
    if node.path_exists("/sys/firmware/efi")? {
        Ok("grub2-mkconfig -o /boot/efi/EFI/redhat/grub.cfg".to_string())
    } else {
        Ok("grub2-mkconfig -o /boot/grub2/grub.cfg".to_string())
    }
}

fn redhat_relocate_dump_path(
    ctx: &ToolContext<'_>,
    config: &KdumpConfig,
) -> Result<Option<String>> {
    let node = ctx.node();
    let result = node.execute(
        "free -h | grep Mem | awk '{print $2}'",
        &ExecOptions::new().sudo().shell(),
    )?;
    let total = result.stdout.trim();
    let Some(size) = total.strip_suffix("Ti") else {
        return Ok(None);
    };
    let size: f64 = size
        .trim()
        .parse()
        .map_err(|_| Error::condition_not_met(format!("cannot parse memory size `{}`", total)))?;
    if size <= config.large_memory_threshold_tib {
        return Ok(None);
    }

    let path = config.relocated_dump_path.as_str();
    tracing::info!(node = %node.name(), memory = %total, path = %path, "relocating dump path");
    node.execute(
        &format!("mkdir -p {}", shell_quote(path)?),
        &ExecOptions::new()
            .sudo()
            .shell()
            .expect_exit_code(0, format!("failed to create {}", path)),
    )?;
    let sed = ctx.tool::<Sed>()?;
    sed.substitute(node, "path", "#path", REDHAT_KDUMP_CONF, Some("^path"), true)?;
    sed.append(node, &format!("path {}", path), REDHAT_KDUMP_CONF, true)?;
    Ok(Some(path.to_string()))
}

fn debian_grub_config(_os: &OsClassification) -> Option<&'static str> {
    Some("/etc/default/grub.d/kdump-tools.cfg")
}

fn debian_grub_update(_node: &Node, _os: &OsClassification, _crashkernel: &str) -> Result<String> {
    Ok("update-grub".to_string())
}

static KDUMP_VARIANTS: VariantTable<KdumpHooks> = VariantTable {
    tool: "kdump",
    entries: &[
        Variant {
            family: OsFamily::Redhat,
            name: "KdumpRedhat",
            hooks: KdumpHooks {
                command: "kdumpctl",
                package: "kexec-tools",
                service: "kdump",
                grub_config: redhat_grub_config,
                grub_update: redhat_grub_update,
                relocate_dump_path: redhat_relocate_dump_path,
            },
        },
        Variant {
            family: OsFamily::Debian,
            name: "KdumpDebian",
            hooks: KdumpHooks {
                command: "kdump-config",
                package: "kdump-tools",
                service: "kdump-tools",
                grub_config: debian_grub_config,
                grub_update: debian_grub_update,
                relocate_dump_path: keep_dump_path,
            },
        },
        Variant {
            family: OsFamily::Suse,
            name: "KdumpSuse",
            hooks: KdumpHooks {
                command: "kdumptool",
                package: "kdump",
                service: "kdump",
                grub_config: default_grub_config,
                grub_update: default_grub_update,
                relocate_dump_path: keep_dump_path,
            },
        },
    ],
    fallback: None,
};

/// The kdump service of the node's distribution
pub struct Kdump {
    variant: &'static Variant<KdumpHooks>,
    os: OsClassification,
    config: KdumpConfig,
    dump_path: RefCell<String>,
}

impl Kdump {
    pub fn variants() -> &'static VariantTable<KdumpHooks> {
        &KDUMP_VARIANTS
    }

    pub fn variant(&self) -> &'static Variant<KdumpHooks> {
        self.variant
    }

    pub fn service_name(&self) -> &'static str {
        self.variant.hooks.service
    }

    /// Where vmcore files are expected, after any relocation
    pub fn dump_path(&self) -> String {
        self.dump_path.borrow().clone()
    }

    /// Fail unless the kernel was built with crash dump support
    pub fn check_required_kernel_config(
        &self,
        ctx: &ToolContext<'_>,
        config_path: &str,
    ) -> Result<()> {
        let path = shell_quote(config_path)?;
        for option in REQUIRED_KERNEL_CONFIG {
            ctx.node().execute(
                &format!("grep {}=y {}", option, path),
                &ExecOptions::new().no_info_log().expect_exit_code(
                    0,
                    format!("The kernel config {} is not set. Kdump is not supported.", option),
                ),
            )?;
        }
        Ok(())
    }

    /// Reserve crash kernel memory in the bootloader configuration and
    /// regenerate the boot configuration
    pub fn config_crashkernel_memory(
        &self,
        ctx: &ToolContext<'_>,
        crashkernel: &str,
    ) -> Result<()> {
        let node = ctx.node();
        let hooks = &self.variant.hooks;
        let parameter = format!("crashkernel={}", crashkernel);

        if let Some(file) = (hooks.grub_config)(&self.os) {
            if !node.path_exists(file)? {
                return Err(Error::condition_not_met(format!(
                    "{} doesn't exist, check the grub file for {}",
                    file, self.os
                )));
            }
            let cat = ctx.tool::<Cat>()?;
            let sed = ctx.tool::<Sed>()?;
            let content = cat.read(node, file, true, true)?;
            if content.contains("crashkernel") {
                sed.substitute(
                    node,
                    "crashkernel=[^[:space:]\"]*",
                    &parameter,
                    file,
                    Some("^GRUB_CMDLINE_LINUX"),
                    true,
                )?;
            } else {
                sed.substitute(
                    node,
                    "\"$",
                    &format!(" {}\"", parameter),
                    file,
                    Some("^GRUB_CMDLINE_LINUX"),
                    true,
                )?;
            }

            let content = cat.read(node, file, true, true)?;
            if !content.contains(&parameter) {
                return Err(Error::condition_not_met(format!(
                    "{} is missing from {} after editing it",
                    parameter, file
                )));
            }
        }

        let update = (hooks.grub_update)(node, &self.os, crashkernel)?;
        node.execute(
            &update,
            &ExecOptions::new()
                .sudo()
                .shell()
                .expect_exit_code(0, "Failed to update grub"),
        )?;
        Ok(())
    }

    /// Relocate the dump directory when the family needs it
    pub fn config_dump_path(&self, ctx: &ToolContext<'_>) -> Result<()> {
        if let Some(path) = (self.variant.hooks.relocate_dump_path)(ctx, &self.config)? {
            *self.dump_path.borrow_mut() = path;
        }
        Ok(())
    }

    pub fn enable_kdump_service(&self, ctx: &ToolContext<'_>) -> Result<()> {
        ctx.tool::<Service>()?.enable(ctx.node(), self.service_name())
    }

    /// Panic on unknown NMIs so an NMI can trigger a dump. Architectures
    /// without NMIs have no such knob.
    pub fn set_unknown_nmi_panic(&self, ctx: &ToolContext<'_>) -> Result<()> {
        if ctx.node().path_exists(UNKNOWN_NMI_PANIC)? {
            ctx.tool::<Sysctl>()?.write(ctx.node(), "kernel.unknown_nmi_panic", "1")?;
        }
        Ok(())
    }

    /// Check that the booted kernel reserved memory for and loaded the
    /// crash kernel
    pub fn check_crashkernel_loaded(&self, ctx: &ToolContext<'_>, crashkernel: &str) -> Result<()> {
        let node = ctx.node();
        let cat = ctx.tool::<Cat>()?;

        let cmdline = cat.read(node, "/proc/cmdline", false, true)?;
        let parameter = format!("crashkernel={}", crashkernel);
        if !cmdline.contains(&parameter) {
            return Err(Error::condition_not_met(format!(
                "{} boot parameter is not present in kernel cmdline",
                parameter
            )));
        }

        if !node.path_exists(KEXEC_CRASH_LOADED)? {
            return Err(Error::condition_not_met(format!(
                "{} doesn't exist, kexec crash is not loaded",
                KEXEC_CRASH_LOADED
            )));
        }
        self.wait_crash_loaded(ctx, &cat)?;

        let iomem = cat.read(node, IOMEM, true, true)?;
        if !iomem.contains("Crash kernel") {
            return Err(Error::condition_not_met(format!(
                "no 'Crash kernel' in {}, memory isn't reserved for the crash kernel",
                IOMEM
            )));
        }
        Ok(())
    }

    /// Check that a vmcore larger than the configured minimum was written
    pub fn check_vmcore_exist(&self, ctx: &ToolContext<'_>) -> Result<()> {
        let dump_path = self.dump_path();
        let result = ctx.node().execute(
            &format!(
                "find {} -type f -size +{}M",
                shell_quote(&dump_path)?,
                self.config.min_dump_size_mb
            ),
            &ExecOptions::new().sudo().shell(),
        )?;
        if result.stdout.is_empty() {
            return Err(Error::condition_not_met(format!(
                "no file larger than {}M in {}, the dump file wasn't generated",
                self.config.min_dump_size_mb, dump_path
            )));
        }
        Ok(())
    }

    // loading the crash kernel can lag behind boot
    fn wait_crash_loaded(&self, ctx: &ToolContext<'_>, cat: &Cat) -> Result<()> {
        let policy = ctx.config().retry_policy("kexec-crash-loaded").clone();
        RetryExecutorBuilder::new()
            .with_policy(policy)
            .with_predicate(ClosurePredicate::new(Error::is_condition_not_met))
            .with_observer(TracingObserver::new("kexec-crash-loaded"))
            .with_jitter(false)
            .build()
            .execute(|| {
                let value = cat.read(ctx.node(), KEXEC_CRASH_LOADED, false, true)?;
                if value == "1" {
                    Ok(())
                } else {
                    Err(Error::condition_not_met(format!(
                        "{} reads `{}`, not 1",
                        KEXEC_CRASH_LOADED, value
                    )))
                }
            })
            .map_err(RetryError::into_source)
    }
}

impl ToolFactory for Kdump {
    const ID: ToolId = "kdump";
    const DEPENDENCIES: &'static [ToolId] = &[Kexec::ID, Makedumpfile::ID];

    fn create(os: &OsClassification, config: &RuntimeConfig) -> Result<Self> {
        Ok(Self {
            variant: KDUMP_VARIANTS.select(os)?,
            os: os.clone(),
            config: config.kdump.clone(),
            dump_path: RefCell::new(config.kdump.dump_path.clone()),
        })
    }
}

impl Tool for Kdump {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        self.variant.hooks.command
    }

    fn can_install(&self) -> bool {
        true
    }

    fn install(&self, ctx: &ToolContext<'_>) -> Result<()> {
        ctx.install_packages(&[self.variant.hooks.package])
    }
}

impl fmt::Debug for Kdump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kdump")
            .field("variant", &self.variant.name)
            .field("os", &self.os)
            .field("dump_path", &self.dump_path.borrow())
            .finish()
    }
}

/// Progress of a crash dump check on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdumpState {
    NotConfigured,
    /// Configured; the node must reboot to load the crash kernel
    PendingReboot,
    Loaded,
    DumpVerified,
}

impl fmt::Display for KdumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "not-configured"),
            Self::PendingReboot => write!(f, "pending-reboot"),
            Self::Loaded => write!(f, "loaded"),
            Self::DumpVerified => write!(f, "dump-verified"),
        }
    }
}

/// Drives a node through kdump setup and verification
///
/// The reboot between [`configure`](Self::configure) and
/// [`verify_loaded`](Self::verify_loaded), and the crash between
/// `verify_loaded` and [`verify_dump`](Self::verify_dump), are left to the
/// caller. A session can start at any step, e.g. on a node configured by an
/// earlier run.
pub struct KdumpSession<'a> {
    ctx: ToolContext<'a>,
    kdump: Rc<Kdump>,
    crashkernel: String,
    state: KdumpState,
}

impl<'a> KdumpSession<'a> {
    /// Resolve kdump on the node, installing it when needed
    pub fn new(ctx: ToolContext<'a>) -> Result<Self> {
        let kdump = ctx.tool::<Kdump>()?;
        Ok(Self {
            ctx,
            crashkernel: ctx.config().kdump.crashkernel.clone(),
            kdump,
            state: KdumpState::NotConfigured,
        })
    }

    /// Override the configured crash kernel reservation
    pub fn with_crashkernel(mut self, crashkernel: impl Into<String>) -> Self {
        self.crashkernel = crashkernel.into();
        self
    }

    pub fn state(&self) -> KdumpState {
        self.state
    }

    pub fn kdump(&self) -> &Kdump {
        &self.kdump
    }

    pub fn crashkernel(&self) -> &str {
        &self.crashkernel
    }

    /// Prepare the node for capturing a dump after the next reboot
    pub fn configure(&mut self) -> Result<()> {
        let node = self.ctx.node();
        let release = node.execute(
            "uname -r",
            &ExecOptions::new()
                .no_info_log()
                .expect_exit_code(0, "failed to read the kernel release"),
        )?;
        let kernel_config = format!("/boot/config-{}", release.stdout.trim());

        self.kdump.check_required_kernel_config(&self.ctx, &kernel_config)?;
        self.kdump.config_crashkernel_memory(&self.ctx, &self.crashkernel)?;
        self.kdump.config_dump_path(&self.ctx)?;
        self.kdump.enable_kdump_service(&self.ctx)?;
        self.kdump.set_unknown_nmi_panic(&self.ctx)?;

        self.transition(KdumpState::PendingReboot);
        Ok(())
    }

    /// Check the crash kernel is loaded after the reboot
    pub fn verify_loaded(&mut self) -> Result<()> {
        self.kdump.check_crashkernel_loaded(&self.ctx, &self.crashkernel)?;
        self.transition(KdumpState::Loaded);
        Ok(())
    }

    /// Check a vmcore was captured after a crash. Not retried.
    pub fn verify_dump(&mut self) -> Result<()> {
        self.kdump.check_vmcore_exist(&self.ctx)?;
        self.transition(KdumpState::DumpVerified);
        Ok(())
    }

    fn transition(&mut self, next: KdumpState) {
        tracing::info!(
            node = %self.ctx.node().name(),
            from = %self.state,
            to = %next,
            "kdump state changed"
        );
        self.state = next;
    }
}

impl fmt::Debug for KdumpSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KdumpSession")
            .field("node", &self.ctx.node().name())
            .field("kdump", &self.kdump)
            .field("crashkernel", &self.crashkernel)
            .field("state", &self.state)
            .finish()
    }
}
