//! Tool capability registry
//!
//! Resolution of a tool on a node:
//! 1. A cached instance is returned without running any command.
//! 2. Declared dependencies are resolved first.
//! 3. The factory builds the variant for the node's OS.
//! 4. The variant is probed. A missing tool is installed when it can be,
//!    then probed again.
//! 5. The instance is cached on the node and returned.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

use vmcheck_core::{Error, Result, RuntimeConfig};

use crate::node::Node;
use crate::os::OsClassification;
use crate::tool::{Tool, ToolContext, ToolFactory, ToolId};
use crate::tools;

type CreateFn = fn(&OsClassification, &RuntimeConfig) -> Result<Rc<dyn Tool>>;

struct ToolEntry {
    dependencies: &'static [ToolId],
    type_id: TypeId,
    create: CreateFn,
}

fn create_erased<T: ToolFactory>(
    os: &OsClassification,
    config: &RuntimeConfig,
) -> Result<Rc<dyn Tool>> {
    Ok(Rc::new(T::create(os, config)?))
}

/// Registry of tool factories, shared by every node of a run
pub struct ToolRegistry {
    entries: HashMap<ToolId, ToolEntry>,
    config: RuntimeConfig,
}

impl ToolRegistry {
    /// Empty registry
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// Registry with every built-in tool
    pub fn builtin(config: RuntimeConfig) -> Self {
        let mut registry = Self::new(config);
        tools::register_builtin(&mut registry);
        registry
    }

    /// Register a tool type, replacing any tool with the same identifier
    pub fn register<T: ToolFactory>(&mut self) -> &mut Self {
        self.entries.insert(
            T::ID,
            ToolEntry {
                dependencies: T::DEPENDENCIES,
                type_id: TypeId::of::<T>(),
                create: create_erased::<T>,
            },
        );
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Registered identifiers, sorted
    pub fn tool_ids(&self) -> Vec<ToolId> {
        let mut ids: Vec<ToolId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn dependencies(&self, id: &str) -> Result<&'static [ToolId]> {
        self.entry(id).map(|(_, entry)| entry.dependencies)
    }

    pub fn context<'a>(&'a self, node: &'a Node) -> ToolContext<'a> {
        ToolContext::new(self, node)
    }

    /// Resolve a tool by type
    pub fn resolve<T: ToolFactory>(&self, node: &Node) -> Result<Rc<T>> {
        let (_, entry) = self.entry(T::ID)?;
        if entry.type_id != TypeId::of::<T>() {
            return Err(Error::tool_type_mismatch(T::ID));
        }

        let tool: Rc<dyn Any> = self.resolve_by_id(node, T::ID)?;
        tool.downcast::<T>()
            .map_err(|_| Error::tool_type_mismatch(T::ID))
    }

    /// Resolve a tool by identifier
    pub fn resolve_by_id(&self, node: &Node, id: &str) -> Result<Rc<dyn Tool>> {
        let (id, entry) = self.entry(id)?;
        let cache = node.tool_cache();

        if let Some(tool) = cache.get(id) {
            tracing::trace!(node = %node.name(), tool = id, "tool cache hit");
            return Ok(tool);
        }

        if !cache.begin(id) {
            return Err(Error::circular_dependency(id));
        }
        let resolved = self.resolve_uncached(node, id, entry);
        cache.finish(id);

        let tool = resolved?;
        cache.insert(id, Rc::clone(&tool));
        Ok(tool)
    }

    /// Probe a cached tool again and evict it when it disappeared
    ///
    /// Returns whether the tool is present. Uncached tools report `false`.
    pub fn recheck(&self, node: &Node, id: &str) -> Result<bool> {
        let Some(tool) = node.tool_cache().get(id) else {
            return Ok(false);
        };

        let present = tool.check_exists(&self.context(node))?;
        if !present {
            tracing::warn!(node = %node.name(), tool = id, "cached tool is gone, evicting");
            node.tool_cache().remove(id);
        }
        Ok(present)
    }

    fn entry(&self, id: &str) -> Result<(ToolId, &ToolEntry)> {
        self.entries
            .get_key_value(id)
            .map(|(id, entry)| (*id, entry))
            .ok_or_else(|| Error::unknown_tool(id))
    }

    fn resolve_uncached(&self, node: &Node, id: ToolId, entry: &ToolEntry) -> Result<Rc<dyn Tool>> {
        for dependency in entry.dependencies {
            tracing::debug!(
                node = %node.name(),
                tool = id,
                dependency = *dependency,
                "resolving dependency"
            );
            self.resolve_by_id(node, dependency)?;
        }

        let os = node.os()?;
        let tool = (entry.create)(os, &self.config)?;
        let ctx = self.context(node);

        if tool.check_exists(&ctx)? {
            tracing::debug!(node = %node.name(), tool = id, "tool found");
            return Ok(tool);
        }

        if !tool.can_install() {
            return Err(Error::missing_capability(
                id,
                node.name(),
                format!("`{}` is not installed and cannot be installed", tool.command()),
            ));
        }

        tracing::info!(node = %node.name(), tool = id, os = %os, "installing tool");
        tool.install(&ctx)?;

        if !tool.check_exists(&ctx)? {
            return Err(Error::missing_capability(
                id,
                node.name(),
                format!("`{}` is still missing after installation", tool.command()),
            ));
        }
        tracing::info!(node = %node.name(), tool = id, "tool installed");
        Ok(tool)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_ids())
            .finish_non_exhaustive()
    }
}
