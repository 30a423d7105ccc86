//! Error types for the scenario layer.

use cdp_adapter::AdapterError;
use response_capture::CaptureError;
use thiserror::Error;

use crate::config::Role;

/// Why a scenario stopped.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Element lookup, navigation or transport failure reported by the browser adapter.
    #[error("browser: {0}")]
    Browser(#[from] AdapterError),

    #[error("response capture: {0}")]
    Capture(#[from] CaptureError),

    #[error("{what}: expected {expected:?}, got {actual:?}")]
    AssertionMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("no credentials configured for the {role} role")]
    MissingCredentials { role: Role },

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ScenarioError {
    pub fn mismatch(
        what: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::AssertionMismatch {
            what: what.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Expected/actual pair when the failure is an assertion.
    pub fn expectation(&self) -> Option<(&str, &str)> {
        match self {
            Self::AssertionMismatch {
                expected, actual, ..
            } => Some((expected.as_str(), actual.as_str())),
            _ => None,
        }
    }
}

/// Problems found while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid capture settings: {0}")]
    Capture(#[from] CaptureError),

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
}

pub type ScenarioResult<T> = Result<T, ScenarioError>;
