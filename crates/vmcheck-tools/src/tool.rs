//! The tool contract
//!
//! A tool wraps a command-line utility on a node. The object-safe [`Tool`]
//! trait is what the registry stores and probes; [`ToolFactory`] adds the
//! identifier, declared dependencies and the constructor that picks the
//! distribution-specific variant.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use vmcheck_core::{Error, RuntimeConfig, Result};

use crate::node::{shell_quote, ExecOptions, Node};
use crate::os::OsClassification;
use crate::registry::ToolRegistry;

/// Identifier a tool is registered and cached under
pub type ToolId = &'static str;

/// A resolved, usable tool
pub trait Tool: Any {
    fn id(&self) -> ToolId;

    /// Executable name, used by the default existence probe
    fn command(&self) -> &str;

    fn can_install(&self) -> bool {
        false
    }

    /// Probe the node; never served from a cache
    fn check_exists(&self, ctx: &ToolContext<'_>) -> Result<bool> {
        command_exists(ctx.node(), self.command())
    }

    /// Install the tool. The registry re-probes afterwards.
    fn install(&self, ctx: &ToolContext<'_>) -> Result<()> {
        Err(Error::missing_capability(
            self.id(),
            ctx.node().name(),
            "installation is not supported",
        ))
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("id", &self.id())
            .field("command", &self.command())
            .finish()
    }
}

/// Construction side of a tool
pub trait ToolFactory: Tool + Sized {
    const ID: ToolId;

    /// Tools resolved before this one
    const DEPENDENCIES: &'static [ToolId] = &[];

    /// Build the variant matching `os`
    fn create(os: &OsClassification, config: &RuntimeConfig) -> Result<Self>;
}

/// What a tool sees while it runs: the node and the registry for its peers
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    registry: &'a ToolRegistry,
    node: &'a Node,
}

impl<'a> ToolContext<'a> {
    pub fn new(registry: &'a ToolRegistry, node: &'a Node) -> Self {
        Self { registry, node }
    }

    pub fn node(&self) -> &'a Node {
        self.node
    }

    pub fn registry(&self) -> &'a ToolRegistry {
        self.registry
    }

    pub fn config(&self) -> &'a RuntimeConfig {
        self.registry.config()
    }

    pub fn os(&self) -> Result<&'a OsClassification> {
        self.node.os()
    }

    /// Resolve another tool on the same node
    pub fn tool<T: ToolFactory>(&self) -> Result<Rc<T>> {
        self.registry.resolve::<T>(self.node)
    }

    /// Install packages with the node's package manager
    pub fn install_packages(&self, packages: &[&str]) -> Result<()> {
        self.node.package_manager()?.install(self.node, packages)
    }
}

/// Resolved tools of one node
#[derive(Default)]
pub struct ToolCache {
    resolved: RefCell<HashMap<ToolId, Rc<dyn Tool>>>,
    resolving: RefCell<HashSet<ToolId>>,
}

impl ToolCache {
    pub fn get(&self, id: &str) -> Option<Rc<dyn Tool>> {
        self.resolved.borrow().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolved.borrow().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resolved.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.borrow().is_empty()
    }

    /// Identifiers of resolved tools, sorted
    pub fn ids(&self) -> Vec<ToolId> {
        let mut ids: Vec<ToolId> = self.resolved.borrow().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn insert(&self, id: ToolId, tool: Rc<dyn Tool>) {
        self.resolved.borrow_mut().insert(id, tool);
    }

    pub(crate) fn remove(&self, id: &str) -> Option<Rc<dyn Tool>> {
        self.resolved.borrow_mut().remove(id)
    }

    /// Mark `id` as being resolved; false when it already is
    pub(crate) fn begin(&self, id: ToolId) -> bool {
        self.resolving.borrow_mut().insert(id)
    }

    pub(crate) fn finish(&self, id: &str) {
        self.resolving.borrow_mut().remove(id);
    }
}

/// `command -v <command>` on the node
pub fn command_exists(node: &Node, command: &str) -> Result<bool> {
    let result = node.execute(
        &format!("command -v {}", shell_quote(command)?),
        &ExecOptions::new().shell().quiet(),
    )?;
    Ok(result.is_success())
}
