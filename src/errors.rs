use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Failure of a single probe invocation. Never aborts a session on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("request timed out: {0}")]
    NetworkTimeout(String),

    #[error("network failure: {0}")]
    NetworkFailure(String),

    #[error("TLS failure: {0}")]
    TlsFailure(String),

    #[error("unclassifiable response: {0}")]
    ProbeLogic(String),

    #[error("candidate cannot be probed: {0}")]
    InvalidCandidate(String),

    #[error("refused out-of-scope request: {0}")]
    OutOfScope(String),
}

/// Stats bucket a failed candidate is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Network,
    Tls,
    Logic,
}

impl ProbeError {
    /// Timeouts and transient network failures get another attempt; nothing else does.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::NetworkTimeout(_) | ProbeError::NetworkFailure(_))
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            ProbeError::NetworkTimeout(_) | ProbeError::NetworkFailure(_) => FailureClass::Network,
            ProbeError::TlsFailure(_) => FailureClass::Tls,
            ProbeError::ProbeLogic(_) | ProbeError::InvalidCandidate(_) | ProbeError::OutOfScope(_) => {
                FailureClass::Logic
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// Raised before any candidate succeeded, e.g. credentials rejected up front.
    #[error("session aborted: {reason}")]
    SessionFatal { reason: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("session cancelled before dispatch")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_by_class() {
        assert!(ProbeError::NetworkTimeout("t".into()).is_retryable());
        assert!(ProbeError::NetworkFailure("n".into()).is_retryable());
        assert!(!ProbeError::TlsFailure("cert".into()).is_retryable());
        assert!(!ProbeError::ProbeLogic("bad json".into()).is_retryable());
        assert!(!ProbeError::OutOfScope("evil.org".into()).is_retryable());
        assert_eq!(ProbeError::TlsFailure("x".into()).failure_class(), FailureClass::Tls);
        assert_eq!(ProbeError::InvalidCandidate("x".into()).failure_class(), FailureClass::Logic);
    }
}
