//! Tool resolution: caching, dependencies, installation and failures

mod common;

use std::rc::Rc;

use common::{fail, mock_node, ok, registry, ubuntu, MockTransport};
use vmcheck_core::{Error, Result, RuntimeConfig};
use vmcheck_tools::tools::base::{Cat, Wget};
use vmcheck_tools::tools::kdump::Kdump;
use vmcheck_tools::{OsClassification, Tool, ToolFactory, ToolId, ToolRegistry};

#[test]
fn test_builtin_tool_ids() {
    let ids = registry().tool_ids();
    for id in ["cat", "sed", "kexec", "makedumpfile", "kdump", "chrony", "lspci"] {
        assert!(ids.contains(&id), "{id} is not registered");
    }
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[test]
fn test_cached_resolution_runs_no_commands() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    let first = registry.resolve::<Cat>(&node).unwrap();
    let calls = transport.log().calls().len();
    let second = registry.resolve::<Cat>(&node).unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(transport.log().calls().len(), calls);
    assert_eq!(transport.log().call_count("command -v cat"), 1);
}

#[test]
fn test_cache_is_per_node() {
    let transport = MockTransport::new();
    let a = mock_node(&transport, ubuntu());
    let b = mock_node(&transport, ubuntu());
    let registry = registry();

    let on_a = registry.resolve::<Cat>(&a).unwrap();
    let on_b = registry.resolve::<Cat>(&b).unwrap();

    assert!(!Rc::ptr_eq(&on_a, &on_b));
    assert_eq!(transport.log().call_count("command -v cat"), 2);
}

#[test]
fn test_dependencies_resolved_first() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());

    registry().resolve::<Kdump>(&node).unwrap();

    let log = transport.log();
    let kexec = log.position("command -v kexec").unwrap();
    let makedumpfile = log.position("command -v makedumpfile").unwrap();
    let kdump = log.position("command -v kdump-config").unwrap();
    assert!(kexec < kdump);
    assert!(makedumpfile < kdump);
    assert!(node.tool_cache().contains("kexec"));
    assert!(node.tool_cache().contains("makedumpfile"));
    assert_eq!(node.tool_cache().ids(), vec!["kdump", "kexec", "makedumpfile"]);
}

#[test]
fn test_resolve_by_id() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());

    let tool = registry().resolve_by_id(&node, "sed").unwrap();
    assert_eq!(tool.id(), "sed");
    assert_eq!(tool.command(), "sed");
    assert_eq!(format!("{tool:?}"), r#"Tool { id: "sed", command: "sed" }"#);
}

#[test]
fn test_unknown_tool() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());

    let err = registry().resolve_by_id(&node, "no-such-tool").unwrap_err();
    assert!(matches!(err, Error::UnknownTool { .. }));
    assert!(transport.log().calls().is_empty());
}

#[test]
fn test_missing_and_not_installable() {
    let transport = MockTransport::new();
    transport.on("command -v cat", fail(1, ""));
    let node = mock_node(&transport, ubuntu());

    let err = registry().resolve::<Cat>(&node).unwrap_err();
    assert!(matches!(err, Error::MissingCapability { .. }), "{err}");
    assert!(!node.tool_cache().contains("cat"));
    transport.log().assert_not_called("apt-get");
}

#[test]
fn test_install_then_reprobe() {
    let transport = MockTransport::new();
    transport.on_sequence("command -v wget", vec![fail(1, ""), ok("/usr/bin/wget")]);
    let node = mock_node(&transport, ubuntu());

    registry().resolve::<Wget>(&node).unwrap();

    let log = transport.log();
    log.assert_called("apt-get update");
    log.assert_called("apt-get -y install wget");
    assert_eq!(log.call_count("command -v wget"), 2);
    assert!(log.calls().last().unwrap().contains("command -v wget"));
}

#[test]
fn test_install_without_effect_fails() {
    let transport = MockTransport::new();
    transport.on("command -v wget", fail(1, ""));
    let node = mock_node(&transport, ubuntu());

    let err = registry().resolve::<Wget>(&node).unwrap_err();
    match err {
        Error::MissingCapability { reason, .. } => assert!(reason.contains("after installation")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_recheck_evicts_missing_tool() {
    let transport = MockTransport::new();
    transport.on_sequence("command -v cat", vec![ok("/usr/bin/cat"), fail(1, "")]);
    let node = mock_node(&transport, ubuntu());
    let registry = registry();

    registry.resolve::<Cat>(&node).unwrap();
    assert!(node.tool_cache().contains("cat"));

    assert!(!registry.recheck(&node, "cat").unwrap());
    assert!(!node.tool_cache().contains("cat"));
}

// ─── Custom tools ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct Ping;

impl ToolFactory for Ping {
    const ID: ToolId = "ping";
    const DEPENDENCIES: &'static [ToolId] = &["pong"];

    fn create(_os: &OsClassification, _config: &RuntimeConfig) -> Result<Self> {
        Ok(Self)
    }
}

impl Tool for Ping {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        "ping"
    }
}

#[derive(Debug)]
struct Pong;

impl ToolFactory for Pong {
    const ID: ToolId = "pong";
    const DEPENDENCIES: &'static [ToolId] = &["ping"];

    fn create(_os: &OsClassification, _config: &RuntimeConfig) -> Result<Self> {
        Ok(Self)
    }
}

impl Tool for Pong {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        "pong"
    }
}

#[derive(Debug)]
struct FakeCat;

impl ToolFactory for FakeCat {
    const ID: ToolId = "cat";

    fn create(_os: &OsClassification, _config: &RuntimeConfig) -> Result<Self> {
        Ok(Self)
    }
}

impl Tool for FakeCat {
    fn id(&self) -> ToolId {
        Self::ID
    }

    fn command(&self) -> &str {
        "cat"
    }
}

#[test]
fn test_circular_dependency() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());
    let mut registry = ToolRegistry::new(RuntimeConfig::default());
    registry.register::<Ping>().register::<Pong>();

    let err = registry.resolve::<Ping>(&node).unwrap_err();
    assert!(matches!(err, Error::CircularDependency { .. }), "{err}");
    assert!(node.tool_cache().is_empty());
}

#[test]
fn test_type_mismatch() {
    let transport = MockTransport::new();
    let node = mock_node(&transport, ubuntu());
    let mut registry = ToolRegistry::builtin(RuntimeConfig::default());
    registry.register::<FakeCat>();

    let err = registry.resolve::<Cat>(&node).unwrap_err();
    assert!(matches!(err, Error::ToolTypeMismatch { .. }));
    assert!(registry.resolve::<FakeCat>(&node).is_ok());
}
