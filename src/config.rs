//! Runner configuration.
//!
//! Loaded from YAML; every section has defaults so an empty file (or no file at all) describes a
//! local MediFlow dev server on `http://localhost:5173/` with the seeded demo accounts.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use cdp_adapter::CdpConfig;
use response_capture::{CaptureConfig, FieldPath, ResponseFilter};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{ConfigError, ScenarioError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5173/";
const DEMO_PASSWORD: &str = "password123";

/// Application role a scenario logs in as.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Doctor,
    Pharmacist,
}

impl Role {
    /// Text the role indicator shows for this role.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Doctor => "Doctor",
            Role::Pharmacist => "Pharmacist",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Doctor => f.write_str("doctor"),
            Role::Pharmacist => f.write_str("pharmacist"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub doctor: Credentials,
    pub pharmacist: Credentials,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            doctor: Credentials::new("doctor@example.com", DEMO_PASSWORD),
            pharmacist: Credentials::new("pharmacist@example.com", DEMO_PASSWORD),
        }
    }
}

impl CredentialsConfig {
    pub fn for_role(&self, role: Role) -> Result<&Credentials, ScenarioError> {
        let creds = match role {
            Role::Doctor => &self.doctor,
            Role::Pharmacist => &self.pharmacist,
        };
        if creds.is_complete() {
            Ok(creds)
        } else {
            Err(ScenarioError::MissingCredentials { role })
        }
    }
}

/// Bounds for explicit waits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub element_ms: u64,
    pub navigation_ms: u64,
    pub screenshot_ms: u64,
    /// Pause after clicks that trigger view transitions. Zero disables it.
    pub settle_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            element_ms: 10_000,
            navigation_ms: 30_000,
            screenshot_ms: 10_000,
            settle_ms: 250,
        }
    }
}

impl Timeouts {
    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn screenshot(&self) -> Duration {
        Duration::from_millis(self.screenshot_ms)
    }

    pub fn settle(&self) -> Option<Duration> {
        (self.settle_ms > 0).then(|| Duration::from_millis(self.settle_ms))
    }
}

/// Where the prescription id comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub prescriptions_pattern: String,
    /// Only responses to this method are inspected. Empty matches any method.
    pub prescriptions_method: String,
    pub prescription_id_field: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prescriptions_pattern: "/api/prescriptions".into(),
            prescriptions_method: "POST".into(),
            prescription_id_field: "prescription.id".into(),
        }
    }
}

impl ApiConfig {
    pub fn prescription_filter(&self) -> Result<ResponseFilter, ConfigError> {
        let filter = ResponseFilter::new(self.prescriptions_pattern.clone())?;
        let method = self.prescriptions_method.trim();
        Ok(if method.is_empty() {
            filter
        } else {
            filter.with_method(method)
        })
    }

    pub fn prescription_id_path(&self) -> Result<FieldPath, ConfigError> {
        Ok(FieldPath::parse(&self.prescription_id_field)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub browser: CdpConfig,
    pub credentials: CredentialsConfig,
    pub timeouts: Timeouts,
    pub capture: CaptureConfig,
    pub api: ApiConfig,
    pub artifacts_dir: PathBuf,
    pub screenshot_on_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            browser: CdpConfig::default(),
            credentials: CredentialsConfig::default(),
            timeouts: Timeouts::default(),
            capture: CaptureConfig::default(),
            api: ApiConfig::default(),
            artifacts_dir: PathBuf::from("artifacts"),
            screenshot_on_failure: true,
        }
    }
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.base_url).map_err(|err| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }
        Ok(url)
    }

    /// Check everything a run depends on before a browser is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        self.api.prescription_filter()?;
        self.api.prescription_id_path()?;
        for (field, value) in [
            ("timeouts.element_ms", self.timeouts.element_ms),
            ("timeouts.navigation_ms", self.timeouts.navigation_ms),
            ("timeouts.screenshot_ms", self.timeouts.screenshot_ms),
            ("capture.ready_timeout_ms", self.capture.ready_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroTimeout { field });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.credentials.doctor.email, "doctor@example.com");
        assert_eq!(config.credentials.pharmacist.password, "password123");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = Config::from_yaml_str(
            "base_url: http://127.0.0.1:4173/\ntimeouts:\n  settle_ms: 0\ncapture:\n  body_timeout_ms: 900\n",
        )
        .unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:4173/");
        assert_eq!(config.timeouts.settle(), None);
        assert_eq!(config.timeouts.element_ms, 10_000);
        assert_eq!(config.capture.body_timeout_ms, 900);
        assert_eq!(config.api.prescriptions_pattern, "/api/prescriptions");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.base_url = "file:///tmp/index.html".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));

        let mut config = Config::default();
        config.api.prescription_id_field = "prescription..id".into();
        assert!(matches!(config.validate(), Err(ConfigError::Capture(_))));

        let mut config = Config::default();
        config.timeouts.element_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroTimeout {
                field: "timeouts.element_ms"
            })
        ));
    }

    #[test]
    fn missing_credentials_are_reported_per_role() {
        let mut creds = CredentialsConfig::default();
        creds.pharmacist.password.clear();
        assert!(creds.for_role(Role::Doctor).is_ok());
        assert!(matches!(
            creds.for_role(Role::Pharmacist),
            Err(ScenarioError::MissingCredentials {
                role: Role::Pharmacist
            })
        ));
    }

    #[test]
    fn prescription_filter_narrows_to_post() {
        let api = ApiConfig::default();
        let filter = api.prescription_filter().unwrap();
        assert_eq!(filter.method(), Some("POST"));

        let any = ApiConfig {
            prescriptions_method: String::new(),
            ..ApiConfig::default()
        };
        assert_eq!(any.prescription_filter().unwrap().method(), None);
    }
}
