pub mod catalog;
pub mod config;
pub mod discover;
pub mod engine;
pub mod errors;
pub mod filter;
pub mod findings;
pub mod gather;
pub mod http_client;
pub mod output;
pub mod probe;
pub mod scope;
pub mod utils;

// re-export the types most callers need
pub use crate::catalog::{TargetDefinition, TestKind};
pub use crate::config::NetbearConfig;
pub use crate::engine::{Engine, SessionOutput};
pub use crate::errors::{ConfigError, EngineError, ProbeError};
pub use crate::findings::{Finding, Severity};
pub use crate::output::SessionReport;
pub use crate::scope::ScopeMatcher;
