pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "CLOUDOPS_CONFIG_PATH";
pub const REGION_ENV: &str = "CLOUDOPS_REGION";
pub const ENDPOINT_ENV: &str = "CLOUDOPS_ENDPOINT";

/// Endpoint scheme selecting the in-process backend
pub const MEMORY_SCHEME: &str = "memory://";

/// Poll settings for implicit and explicit state waits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            timeout_secs: 300,
        }
    }
}

impl WaitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// CloudOps settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub region: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API token
    pub token_env: String,
    pub request_timeout_secs: u64,
    pub page_size: usize,
    pub wait: WaitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: "eu-west-1".to_string(),
            endpoint: "https://api.cloudops.local".to_string(),
            token_env: "CLOUDOPS_TOKEN".to_string(),
            request_timeout_secs: 30,
            page_size: 50,
            wait: WaitConfig::default(),
        }
    }
}

impl Config {
    /// Parse a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CLOUDOPS_REGION` / `CLOUDOPS_ENDPOINT`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(region) = std::env::var(REGION_ENV) {
            if !region.is_empty() {
                self.region = region;
            }
        }
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.is_empty() {
                self.endpoint = endpoint;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::Invalid("region must not be empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".to_string()));
        }
        if self.wait.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "wait.poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.wait.timeout_secs <= self.wait.poll_interval_secs {
            return Err(ConfigError::Invalid(
                "wait.timeout_secs must exceed wait.poll_interval_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_memory(&self) -> bool {
        self.endpoint.starts_with(MEMORY_SCHEME)
    }

    /// API token from the configured environment variable
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Global config directory (`~/.config/cloudops` on Linux)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cloudops"))
}

/// Locate the config file.
///
/// Search order:
/// 1. `CLOUDOPS_CONFIG_PATH`
/// 2. current directory: `cloudops.local.yaml`, `cloudops.yaml`
/// 3. `<config dir>/cloudops/config.yaml`
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Some(path);
        }
    }

    if let Ok(current_dir) = std::env::current_dir() {
        for filename in ["cloudops.local.yaml", "cloudops.yaml"] {
            let path = current_dir.join(filename);
            if path.exists() {
                return Some(path);
            }
        }
    }

    config_dir()
        .map(|dir| dir.join("config.yaml"))
        .filter(|path| path.exists())
}

/// Load the config file if any, then apply environment overrides.
/// A missing file yields the defaults.
pub fn load() -> Result<Config> {
    let mut config = match find_config_file() {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    struct CwdGuard(PathBuf);

    impl CwdGuard {
        fn enter(dir: &Path) -> Self {
            let original = std::env::current_dir().unwrap();
            std::env::set_current_dir(dir).unwrap();
            Self(original)
        }
    }

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    fn clear_env() {
        unsafe {
            std::env::remove_var(CONFIG_PATH_ENV);
            std::env::remove_var(REGION_ENV);
            std::env::remove_var(ENDPOINT_ENV);
        }
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cloudops.yaml");
        fs::write(&path, "region: us-east-2\nwait:\n  timeout_secs: 60\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.region, "us-east-2");
        assert_eq!(config.wait.timeout_secs, 60);
        assert_eq!(config.wait.poll_interval_secs, 5);
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("cloudops.yaml");
        fs::write(&path, "wait:\n  poll_interval_secs: 10\n  timeout_secs: 10\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&path, "region: [unclosed\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_memory_endpoint() {
        let config = Config {
            endpoint: "memory://".to_string(),
            ..Config::default()
        };
        assert!(config.is_memory());
        assert!(!Config::default().is_memory());
    }

    #[test]
    #[serial]
    fn test_local_file_has_priority() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("cloudops.yaml"), "region: shared\n").unwrap();
        fs::write(temp_dir.path().join("cloudops.local.yaml"), "region: local\n").unwrap();
        let _cwd = CwdGuard::enter(temp_dir.path());

        let found = find_config_file().unwrap();
        assert!(found.ends_with("cloudops.local.yaml"));
        assert_eq!(load().unwrap().region, "local");
    }

    #[test]
    #[serial]
    fn test_env_path_and_overrides() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.yaml");
        fs::write(&path, "region: from-file\nendpoint: https://file.example\n").unwrap();
        let _cwd = CwdGuard::enter(temp_dir.path());

        unsafe {
            std::env::set_var(CONFIG_PATH_ENV, &path);
            std::env::set_var(REGION_ENV, "from-env");
        }

        let config = load().unwrap();
        assert_eq!(config.region, "from-env");
        assert_eq!(config.endpoint, "https://file.example");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_no_file_gives_defaults() {
        clear_env();
        let temp_dir = tempfile::tempdir().unwrap();
        let _cwd = CwdGuard::enter(temp_dir.path());

        // a global config file on the test machine would leak in here
        if config_dir().is_some_and(|d| d.join("config.yaml").exists()) {
            return;
        }
        assert_eq!(load().unwrap(), Config::default());
    }
}
