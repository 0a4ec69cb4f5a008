//! # vmcheck-core
//!
//! Core library for vmcheck providing:
//! - The error taxonomy shared by every vmcheck crate
//! - Lenient version parsing with semantic-version ordering
//! - Bounded retry and poll-until-match primitives
//! - Lazy one-time initialization state
//! - Layered runtime configuration (embedded defaults, files, environment)

pub mod config;
pub mod error;
pub mod init;
pub mod merge;
pub mod retry;
pub mod utils;
pub mod version;

pub use config::{ConfigLoader, RuntimeConfig};
pub use error::{Error, Result};
pub use init::{InitState, Initializer};
pub use retry::{poll_until, retry, Expected};
pub use version::{parse_version, VersionInfo};
