//! Shared helpers for vmcheck-tools integration tests
//!
//! - `MockTransport`: scripted command responses matched by substring
//! - `CommandLog`: every command line the node sent, for verification
//! - Node and config fixtures

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use vmcheck_core::config::{PollingConfig, RetryPolicy};
use vmcheck_core::{Result, RuntimeConfig, VersionInfo};
use vmcheck_tools::node::{CommandRequest, RawOutput, Transport};
use vmcheck_tools::{Node, OsClassification, OsFamily, ToolRegistry};

// ─── Responses ──────────────────────────────────────────────────────────────

pub fn ok(stdout: &str) -> RawOutput {
    RawOutput::new(0, stdout, "")
}

pub fn fail(exit_code: i32, stderr: &str) -> RawOutput {
    RawOutput::new(exit_code, "", stderr)
}

// ─── Command Log ────────────────────────────────────────────────────────────

/// Whether `command` contains `fragment` as sent, or once shell quoting is
/// removed, so fragments can be written the way the remote shell sees them
pub fn command_contains(command: &str, fragment: &str) -> bool {
    command.contains(fragment)
        || shlex::split(command).is_some_and(|words| words.join(" ").contains(fragment))
}

/// Command lines received by a `MockTransport`, in order
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    calls: Rc<RefCell<Vec<String>>>,
}

impl CommandLog {
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Assert some command contained `fragment`
    pub fn assert_called(&self, fragment: &str) {
        let calls = self.calls.borrow();
        assert!(
            calls.iter().any(|c| command_contains(c, fragment)),
            "no command contained '{}'. Actual calls: {:#?}",
            fragment,
            *calls
        );
    }

    /// Assert a single command contained every fragment
    pub fn assert_called_with(&self, fragments: &[&str]) {
        let calls = self.calls.borrow();
        assert!(
            calls.iter().any(|c| fragments.iter().all(|f| command_contains(c, f))),
            "no command contained all of {:?}. Actual calls: {:#?}",
            fragments,
            *calls
        );
    }

    pub fn assert_not_called(&self, fragment: &str) {
        let calls = self.calls.borrow();
        assert!(
            !calls.iter().any(|c| command_contains(c, fragment)),
            "'{}' was sent but should not have been. Actual calls: {:#?}",
            fragment,
            *calls
        );
    }

    pub fn call_count(&self, fragment: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| command_contains(c, fragment))
            .count()
    }

    /// Position of the first command containing `fragment`
    pub fn position(&self, fragment: &str) -> Option<usize> {
        self.calls
            .borrow()
            .iter()
            .position(|c| command_contains(c, fragment))
    }
}

// ─── Mock Transport ─────────────────────────────────────────────────────────

struct Rule {
    fragment: String,
    responses: Vec<RawOutput>,
    served: usize,
}

impl Rule {
    /// Responses are served in order; the last one repeats
    fn next(&mut self) -> RawOutput {
        let index = self.served.min(self.responses.len() - 1);
        self.served += 1;
        self.responses[index].clone()
    }
}

/// Transport answering from a script instead of running anything
///
/// The first rule whose fragment occurs in the command line answers.
/// Commands without a rule succeed with empty output.
#[derive(Clone, Default)]
pub struct MockTransport {
    rules: Rc<RefCell<Vec<Rule>>>,
    log: CommandLog,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, fragment: &str, response: RawOutput) -> &Self {
        self.on_sequence(fragment, vec![response])
    }

    pub fn on_sequence(&self, fragment: &str, responses: Vec<RawOutput>) -> &Self {
        assert!(!responses.is_empty(), "a rule needs at least one response");
        self.rules.borrow_mut().push(Rule {
            fragment: fragment.to_string(),
            responses,
            served: 0,
        });
        self
    }

    pub fn log(&self) -> CommandLog {
        self.log.clone()
    }
}

impl Transport for MockTransport {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn run(&self, request: &CommandRequest) -> Result<RawOutput> {
        self.log.calls.borrow_mut().push(request.command.clone());
        let mut rules = self.rules.borrow_mut();
        let response = rules
            .iter_mut()
            .find(|rule| request.command.contains(&rule.fragment))
            .map(Rule::next)
            .unwrap_or_default();
        Ok(response)
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────────────

pub fn ubuntu() -> OsClassification {
    OsClassification::new(OsFamily::Debian, "Ubuntu", VersionInfo::new(22, 4, 0))
}

pub fn debian() -> OsClassification {
    OsClassification::new(OsFamily::Debian, "Debian GNU/Linux", VersionInfo::new(12, 0, 0))
}

pub fn rhel(major: u64, minor: u64) -> OsClassification {
    OsClassification::new(
        OsFamily::Redhat,
        "Red Hat Enterprise Linux",
        VersionInfo::new(major, minor, 0),
    )
}

pub fn sles() -> OsClassification {
    OsClassification::new(OsFamily::Suse, "SLES", VersionInfo::new(15, 4, 0))
}

/// Node backed by `transport` with a known OS
pub fn mock_node(transport: &MockTransport, os: OsClassification) -> Node {
    Node::new("mock-vm", transport.clone()).with_os(os)
}

/// Defaults with retries and polling that do not sleep noticeably
pub fn fast_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.polling = PollingConfig {
        interval_ms: 1,
        timeout_secs: 5,
    };
    for operation in ["kexec-crash-loaded", "chrony-tracking"] {
        config
            .retry_policies
            .operations
            .insert(operation.to_string(), RetryPolicy::fixed(3, Duration::ZERO));
    }
    config
}

pub fn registry() -> ToolRegistry {
    ToolRegistry::builtin(fast_config())
}
