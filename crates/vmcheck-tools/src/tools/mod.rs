//! Built-in tools
//!
//! Grouped by the checks that use them: general utilities in [`base`],
//! crash-dump tooling in [`kdump`], clock and time sync tooling in
//! [`time`] and SR-IOV networking helpers in [`network`].

/// Define a stateless tool found by its command name and optionally
/// installable from a package of the same name on every family.
macro_rules! command_tool {
    (
        $(#[$meta:meta])*
        $name:ident,
        id = $id:literal,
        command = $command:literal
        $(, package = $package:literal)?
        $(,)?
    ) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl $crate::tool::ToolFactory for $name {
            const ID: $crate::tool::ToolId = $id;

            fn create(
                _os: &$crate::os::OsClassification,
                _config: &::vmcheck_core::RuntimeConfig,
            ) -> ::vmcheck_core::Result<Self> {
                Ok(Self)
            }
        }

        impl $crate::tool::Tool for $name {
            fn id(&self) -> $crate::tool::ToolId {
                $id
            }

            fn command(&self) -> &str {
                $command
            }

            $(
            fn can_install(&self) -> bool {
                true
            }

            fn install(&self, ctx: &$crate::tool::ToolContext<'_>) -> ::vmcheck_core::Result<()> {
                ctx.install_packages(&[$package])
            }
            )?
        }
    };
}

pub mod base;
pub mod kdump;
pub mod network;
pub mod time;

use crate::registry::ToolRegistry;

/// Register every built-in tool
pub(crate) fn register_builtin(registry: &mut ToolRegistry) {
    registry
        .register::<base::Cat>()
        .register::<base::Sed>()
        .register::<base::Echo>()
        .register::<base::Service>()
        .register::<base::Sysctl>()
        .register::<base::Wget>()
        .register::<base::Tar>()
        .register::<base::Gcc>()
        .register::<base::Make>()
        .register::<base::Git>()
        .register::<kdump::Kexec>()
        .register::<kdump::Makedumpfile>()
        .register::<kdump::Kdump>()
        .register::<time::Dmesg>()
        .register::<time::Lscpu>()
        .register::<time::Clocksource>()
        .register::<time::Chrony>()
        .register::<network::Lsmod>()
        .register::<network::Modprobe>()
        .register::<network::Lspci>();
}
