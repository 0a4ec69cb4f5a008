//! Nodes, transports and the distro-aware tool registry
//!
//! A [`Node`] runs commands through a [`node::Transport`]. The
//! [`ToolRegistry`] resolves [`Tool`]s on a node: it picks the variant for
//! the node's distribution, probes for the executable, installs it when
//! possible and caches the result per node.

pub mod node;
pub mod os;
pub mod package;
pub mod registry;
pub mod tool;
pub mod tools;
pub mod variant;

pub use node::{ExecOptions, ExecutionResult, Node};
pub use os::{OsClassification, OsFamily};
pub use package::{PackageManager, PackageManagerKind};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolFactory, ToolId};
pub use variant::{Variant, VariantTable};
