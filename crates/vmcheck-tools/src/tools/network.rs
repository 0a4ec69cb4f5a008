//! Kernel module and SR-IOV device tooling

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use vmcheck_core::{Error, Result};

use crate::node::{shell_quote, ExecOptions, Node};
use crate::tool::ToolContext;

use super::base::Cat;

// 00:00.0 "Host bridge" "Intel Corporation" "440BX/ZX/DX - 82443BX/ZX/DX Host bridge" -r03 "" ""
static LSPCI_MACHINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<slot>\S+)\s+"(?P<class>[^"]*)"\s+"(?P<vendor>[^"]*)"\s+"(?P<device>[^"]*)""#)
        .expect("lspci machine-readable regex is valid")
});

static KERNEL_DRIVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Kernel driver in use:\s*(\S+)").expect("lspci driver regex is valid")
});

/// Modules driving SR-IOV virtual functions on Azure
pub const SRIOV_MODULES: &[&str] = &["mlx4_core", "mlx4_en", "mlx5_core", "ixgbevf"];

/// Modules that hold a reference on the core module and must be removed
/// before it can be reloaded
pub fn reload_modules(module: &str) -> Option<&'static [&'static str]> {
    match module {
        "mlx5_core" => Some(&["mlx5_ib"]),
        "mlx4_core" => Some(&["mlx4_en", "mlx4_ib"]),
        _ => None,
    }
}

command_tool!(
    /// Loaded kernel modules
    Lsmod,
    id = "lsmod",
    command = "lsmod"
);

impl Lsmod {
    pub fn module_exists(&self, node: &Node, module: &str, force_run: bool) -> Result<bool> {
        let mut opts = ExecOptions::new()
            .sudo()
            .no_info_log()
            .expect_exit_code(0, "failed to list kernel modules");
        if force_run {
            opts = opts.force_run();
        }
        let result = node.execute_cached("lsmod", &opts)?;
        let loaded = result
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|name| name == module);
        Ok(loaded)
    }
}

command_tool!(
    /// Kernel module loading
    Modprobe,
    id = "modprobe",
    command = "modprobe"
);

impl Modprobe {
    pub fn load(&self, node: &Node, module: &str) -> Result<()> {
        node.execute(
            &format!("modprobe {}", shell_quote(module)?),
            &ExecOptions::new()
                .sudo()
                .expect_exit_code(0, format!("failed to load {}", module)),
        )?;
        Ok(())
    }

    /// Remove modules in order
    pub fn remove(&self, node: &Node, modules: &[&str]) -> Result<()> {
        for module in modules {
            node.execute(
                &format!("modprobe -r {}", shell_quote(module)?),
                &ExecOptions::new()
                    .sudo()
                    .expect_exit_code(0, format!("failed to remove {}", module)),
            )?;
        }
        Ok(())
    }
}

/// One PCI device from `lspci -m`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    pub slot: String,
    pub class: String,
    pub vendor: String,
    pub device: String,
}

impl PciDevice {
    /// Ethernet virtual function from a vendor Azure exposes through SR-IOV
    pub fn is_sriov(&self) -> bool {
        self.class == "Ethernet controller"
            && (self.vendor.contains("Mellanox") || self.vendor.contains("Intel"))
            && self.device.contains("Virtual Function")
    }
}

impl fmt::Display for PciDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {} {}", self.slot, self.class, self.vendor, self.device)
    }
}

command_tool!(
    /// PCI devices
    Lspci,
    id = "lspci",
    command = "lspci",
    package = "pciutils"
);

impl Lspci {
    pub fn devices(&self, node: &Node, force_run: bool) -> Result<Vec<PciDevice>> {
        let mut opts = ExecOptions::new()
            .sudo()
            .no_info_log()
            .expect_exit_code(0, "failed to list PCI devices");
        if force_run {
            opts = opts.force_run();
        }
        let result = node.execute_cached("lspci -m", &opts)?;
        Ok(result.lines().filter_map(parse_lspci_line).collect())
    }

    /// Slots of the SR-IOV virtual functions
    pub fn sriov_slots(&self, node: &Node, force_run: bool) -> Result<Vec<String>> {
        Ok(self
            .devices(node, force_run)?
            .into_iter()
            .filter(PciDevice::is_sriov)
            .map(|device| device.slot)
            .collect())
    }

    /// Kernel module driving the device in `slot`
    pub fn used_module(&self, node: &Node, slot: &str) -> Result<String> {
        let result = node.execute(
            &format!("lspci -s {} -v", shell_quote(slot)?),
            &ExecOptions::new()
                .sudo()
                .no_info_log()
                .expect_exit_code(0, format!("failed to inspect PCI device {}", slot)),
        )?;
        KERNEL_DRIVER_RE
            .captures(&result.stdout)
            .map(|captures| captures[1].to_string())
            .ok_or_else(|| {
                Error::condition_not_met(format!("no kernel driver in use for {}", slot))
            })
    }
}

fn parse_lspci_line(line: &str) -> Option<PciDevice> {
    let captures = LSPCI_MACHINE_RE.captures(line)?;
    Some(PciDevice {
        slot: captures["slot"].to_string(),
        class: captures["class"].to_string(),
        vendor: captures["vendor"].to_string(),
        device: captures["device"].to_string(),
    })
}

/// Whether any SR-IOV module is loaded
pub fn sriov_module_loaded(ctx: &ToolContext<'_>) -> Result<bool> {
    let lsmod = ctx.tool::<Lsmod>()?;
    for module in SRIOV_MODULES {
        if lsmod.module_exists(ctx.node(), module, true)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Remove the modules stacked on the SR-IOV driver, returning the driver
/// so the caller can load it again
pub fn remove_sriov_module(ctx: &ToolContext<'_>) -> Result<String> {
    let node = ctx.node();
    let lspci = ctx.tool::<Lspci>()?;
    let slots = lspci.sriov_slots(node, true)?;
    let slot = slots
        .first()
        .ok_or_else(|| Error::condition_not_met("no SR-IOV device found"))?;

    // a VM never mixes Mellanox generations, any device tells the driver
    let module = lspci.used_module(node, slot)?;
    let stacked = reload_modules(&module).ok_or_else(|| {
        Error::condition_not_met(format!("{} is not a reloadable SR-IOV module", module))
    })?;
    ctx.tool::<Modprobe>()?.remove(node, stacked)?;
    Ok(module)
}

pub fn load_module(ctx: &ToolContext<'_>, module: &str) -> Result<()> {
    ctx.tool::<Modprobe>()?.load(ctx.node(), module)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketCounter {
    Tx,
    Rx,
}

impl PacketCounter {
    fn file(self) -> &'static str {
        match self {
            Self::Tx => "tx_packets",
            Self::Rx => "rx_packets",
        }
    }
}

/// Packet counter of a network interface
pub fn packets(ctx: &ToolContext<'_>, nic: &str, counter: PacketCounter) -> Result<u64> {
    let path = format!("/sys/class/net/{}/statistics/{}", nic, counter.file());
    let value = ctx.tool::<Cat>()?.read(ctx.node(), &path, false, true)?;
    value
        .trim()
        .parse()
        .map_err(|_| Error::condition_not_met(format!("{} holds `{}`, not a counter", path, value)))
}
