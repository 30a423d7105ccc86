use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mediflow_e2e::Config;
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOCAL_ENV_PATH: &str = "config/local.env";

pub fn load_local_env_overrides() {
    apply_env_file(Path::new(LOCAL_ENV_PATH));
}

/// Export `KEY=value` lines from `path` unless the variable is already set.
fn apply_env_file(path: &Path) {
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (idx, raw_line) in contents.lines().enumerate() {
                let line = raw_line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    warn!(line = idx + 1, "invalid local.env entry; skipping");
                    continue;
                };
                let key = key.trim().trim_start_matches("export ").trim();
                if key.is_empty() || env::var(key).is_ok() {
                    continue;
                }
                env::set_var(key, unescape_value(value.trim()));
            }
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

pub fn init_logging(level: &str, debug: bool, json: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;

        let mut config = Config::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
        apply_env_overrides(&mut config);

        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    }
}

/// `MEDIFLOW_*` variables (including those from local.env) win over the config file.
pub fn apply_env_overrides(config: &mut Config) {
    let headless = config.browser.headless;
    config.browser.apply_env_overrides();
    if config.browser.headless != headless {
        info!(
            headless = config.browser.headless,
            "Using MEDIFLOW_HEADLESS from environment"
        );
    }
}

fn default_config_path() -> Result<PathBuf> {
    // Priority: ./config/mediflow.yaml > ~/.config/mediflow/config.yaml
    let local_config = PathBuf::from("config/mediflow.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("mediflow");
    path.push("config.yaml");
    Ok(path)
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn unescapes_quoted_values() {
        assert_eq!(unescape_value("\"a\\tb\""), "a\tb");
        assert_eq!(unescape_value("plain"), "plain");
        assert_eq!(unescape_value("\""), "\"");
    }

    #[test]
    #[serial]
    fn env_file_does_not_override_existing_vars() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("local.env");
        stdfs::write(
            &path,
            "# comment\nMEDIFLOW_TEST_FRESH=\"from file\"\nexport MEDIFLOW_TEST_KEPT=file\nnot a pair\n",
        )
        .unwrap();
        env::remove_var("MEDIFLOW_TEST_FRESH");
        env::set_var("MEDIFLOW_TEST_KEPT", "shell");

        apply_env_file(&path);

        assert_eq!(env::var("MEDIFLOW_TEST_FRESH").unwrap(), "from file");
        assert_eq!(env::var("MEDIFLOW_TEST_KEPT").unwrap(), "shell");
        env::remove_var("MEDIFLOW_TEST_FRESH");
        env::remove_var("MEDIFLOW_TEST_KEPT");
    }

    #[test]
    #[serial]
    fn headless_env_overrides_shipped_config() {
        let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/mediflow.yaml");
        let original = env::var("MEDIFLOW_HEADLESS").ok();
        env::set_var("MEDIFLOW_HEADLESS", "false");

        let loaded = tokio_test::block_on(load_config(Some(&shipped)));

        match original {
            Some(value) => env::set_var("MEDIFLOW_HEADLESS", value),
            None => env::remove_var("MEDIFLOW_HEADLESS"),
        }
        let loaded = loaded.unwrap();
        assert_eq!(loaded.path, shipped);
        assert!(!loaded.config.browser.headless);
    }

    #[test]
    #[serial]
    fn explicit_config_file_is_loaded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mediflow.yaml");
        stdfs::write(&path, "base_url: http://127.0.0.1:4173/\nscreenshot_on_failure: false\n")
            .unwrap();

        let loaded = tokio_test::block_on(load_config(Some(&path))).unwrap();
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.base_url, "http://127.0.0.1:4173/");
        assert!(!loaded.config.screenshot_on_failure);
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = tokio_test::block_on(load_config(Some(&path))).unwrap();
        assert_eq!(loaded.config.base_url, mediflow_e2e::config::DEFAULT_BASE_URL);
    }

    #[test]
    #[serial]
    fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        stdfs::write(&path, "base_url: [unterminated\n").unwrap();
        let err = tokio_test::block_on(load_config(Some(&path))).err().unwrap();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }
}
