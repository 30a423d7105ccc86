//! Chromium DevTools Protocol adapter used by the MediFlow end-to-end runner.
//!
//! The adapter owns one browser connection, keeps a registry of page targets and the CDP sessions
//! attached to them, and exposes the handful of primitives UI scenarios need: navigation, element
//! lookup with explicit waits, clicks, text entry, script evaluation, screenshots and a stream of
//! completed network responses whose bodies can be fetched on demand.

use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};
use tokio::sync::broadcast;
use which::which;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for the browser instance managed by the adapter.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct BrowserId(pub Uuid);

    /// Unique identifier for a page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    /// Adapter-side session handle paired with a page.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl BrowserId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Eq, PartialEq, Error, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("target element not found")]
        TargetNotFound,
        #[error("internal error")]
        Internal,
    }

    /// Error metadata passed back to the scenario layer.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub fn is_not_found(&self) -> bool {
            matches!(self.kind, AdapterErrorKind::TargetNotFound)
        }
    }

    pub(crate) fn internal(err: impl fmt::Display) -> AdapterError {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string())
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};

    /// Page-level events broadcast by the adapter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum RawEvent {
        PageLifecycle {
            page: PageId,
            opener: Option<PageId>,
            phase: String,
            ts: u64,
        },
        PageNavigated {
            page: PageId,
            url: String,
            ts: u64,
        },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{
        env,
        path::{Path, PathBuf},
    };

    /// Configuration for launching and tuning the adapter.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        pub default_deadline_ms: u64,
        pub websocket_url: Option<String>,
        pub heartbeat_interval_ms: u64,
        /// Initial browser window size; the role indicator is only laid out on wide screens.
        pub window_width: u32,
        pub window_height: u32,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                user_data_dir: default_profile_dir(),
                headless: resolve_headless_default(),
                default_deadline_ms: 30_000,
                websocket_url: None,
                heartbeat_interval_ms: 15_000,
                window_width: 1440,
                window_height: 900,
            }
        }
    }

    impl CdpConfig {
        /// Re-apply `MEDIFLOW_HEADLESS`, `MEDIFLOW_CHROME_PROFILE` and `MEDIFLOW_CHROME` on top of
        /// values loaded from a file. Unset variables leave the field untouched.
        pub fn apply_env_overrides(&mut self) {
            if let Some(headless) = headless_from_env() {
                self.headless = headless;
            }
            if let Ok(path) = env::var("MEDIFLOW_CHROME_PROFILE") {
                if !path.trim().is_empty() {
                    self.user_data_dir = PathBuf::from(path.trim());
                }
            }
            if let Ok(raw) = env::var("MEDIFLOW_CHROME") {
                let candidate = PathBuf::from(raw.trim());
                if !raw.trim().is_empty() && candidate.exists() {
                    self.executable = candidate;
                }
            }
        }
    }

    fn headless_from_env() -> Option<bool> {
        let value = env::var("MEDIFLOW_HEADLESS").ok()?;
        let lower = value.trim().to_ascii_lowercase();
        if lower.is_empty() {
            return None;
        }
        Some(!matches!(lower.as_str(), "0" | "false" | "no" | "off"))
    }

    fn resolve_headless_default() -> bool {
        headless_from_env().unwrap_or(true)
    }

    fn default_chrome_path() -> PathBuf {
        detect_chrome_executable().unwrap_or_default()
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("MEDIFLOW_CHROME_PROFILE") {
            return PathBuf::from(path);
        }

        Path::new("./.mediflow-profile").into()
    }
}

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("MEDIFLOW_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("MEDIFLOW_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    if !skip_defaults {
        for candidate in os_specific_chrome_paths() {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/snap/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

/// Whether the adapter talks to a real browser.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterMode {
    Real,
    Stub,
}

impl AdapterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterMode::Real => "real",
            AdapterMode::Stub => "stub",
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, AdapterMode::Stub)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ChromeMode {
    Auto,
    ForceReal,
    ForceStub,
}

fn chrome_mode() -> ChromeMode {
    match env::var("MEDIFLOW_USE_REAL_CHROME")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "1" | "true" | "yes" | "on" => ChromeMode::ForceReal,
        "0" | "false" | "no" | "off" => ChromeMode::ForceStub,
        _ => ChromeMode::Auto,
    }
}

fn resolve_chrome_path(cfg: &config::CdpConfig) -> Option<PathBuf> {
    if !cfg.executable.as_os_str().is_empty() && cfg.executable.exists() {
        return Some(cfg.executable.clone());
    }
    detect_chrome_executable()
}

#[cfg(test)]
mod tests {
    use super::{
        chrome_executable_names, chrome_mode, detect_chrome_executable, CdpConfig, ChromeMode,
    };
    use serial_test::serial;
    use std::{env, fs};
    use tempfile::tempdir;

    fn restore(key: &str, value: Option<String>) {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }

    #[test]
    #[serial]
    fn detects_from_env_var() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("MEDIFLOW_CHROME").ok();
        env::set_var("MEDIFLOW_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        restore("MEDIFLOW_CHROME", original);
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    #[serial]
    fn detects_from_path_entries() {
        let dir = tempdir().unwrap();
        let name = chrome_executable_names()[0];
        let exe_path = dir.path().join(name);
        fs::write(&exe_path, b"").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&exe_path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        let original_path = env::var("PATH").ok();
        let original_env = env::var("MEDIFLOW_CHROME").ok();
        let skip_flag = env::var("MEDIFLOW_SKIP_OS_PATHS").ok();
        env::set_var("MEDIFLOW_CHROME", "");
        env::set_var("MEDIFLOW_SKIP_OS_PATHS", "1");
        env::set_var("PATH", dir.path());
        let detected = detect_chrome_executable();
        restore("PATH", original_path);
        restore("MEDIFLOW_CHROME", original_env);
        restore("MEDIFLOW_SKIP_OS_PATHS", skip_flag);
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    #[serial]
    fn chrome_mode_reads_env_switch() {
        let original = env::var("MEDIFLOW_USE_REAL_CHROME").ok();
        env::set_var("MEDIFLOW_USE_REAL_CHROME", "yes");
        assert_eq!(chrome_mode(), ChromeMode::ForceReal);
        env::set_var("MEDIFLOW_USE_REAL_CHROME", "off");
        assert_eq!(chrome_mode(), ChromeMode::ForceStub);
        env::set_var("MEDIFLOW_USE_REAL_CHROME", "");
        assert_eq!(chrome_mode(), ChromeMode::Auto);
        restore("MEDIFLOW_USE_REAL_CHROME", original);
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_loaded_values() {
        let dir = tempdir().unwrap();
        let original_headless = env::var("MEDIFLOW_HEADLESS").ok();
        let original_profile = env::var("MEDIFLOW_CHROME_PROFILE").ok();
        env::set_var("MEDIFLOW_HEADLESS", "false");
        env::set_var("MEDIFLOW_CHROME_PROFILE", dir.path());

        let mut cfg = CdpConfig {
            headless: true,
            user_data_dir: "./from-file".into(),
            ..CdpConfig::default()
        };
        cfg.apply_env_overrides();

        restore("MEDIFLOW_HEADLESS", original_headless);
        restore("MEDIFLOW_CHROME_PROFILE", original_profile);
        assert!(!cfg.headless);
        assert_eq!(cfg.user_data_dir, dir.path());
    }

    #[test]
    #[serial]
    fn unset_env_keeps_loaded_values() {
        let original = env::var("MEDIFLOW_HEADLESS").ok();
        env::remove_var("MEDIFLOW_HEADLESS");
        let mut cfg = CdpConfig {
            headless: false,
            ..CdpConfig::default()
        };
        cfg.apply_env_overrides();
        restore("MEDIFLOW_HEADLESS", original);
        assert!(!cfg.headless);
    }
}

pub mod adapter;
pub mod commands;
pub mod metrics;
pub mod registry;
pub mod transport;
pub mod util;

pub use adapter::{Cdp, CdpAdapter, CdpBodySource, EventBus, NetworkBus};
pub use commands::{Anchor, Locator, WaitCondition};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::RawEvent;
pub use ids::{BrowserId, PageId, SessionId};
pub use metrics::AdapterMetricsSnapshot;
pub use response_capture::{NetworkEvent, ResponseBody};
pub use transport::{CdpTransport, CommandTarget, TransportEvent};

/// Helper to create a page event bus for the adapter.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    broadcast::channel(buffer)
}

/// Stream of completed network responses.
pub type NetworkStream = broadcast::Receiver<NetworkEvent>;
