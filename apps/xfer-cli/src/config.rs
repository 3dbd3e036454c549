//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/purple-xfer/config.toml`
//! - Windows: `%APPDATA%/purple-xfer/config.toml`

use std::path::{Path, PathBuf};

use purple_xfer::XferConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local account name shown to the peer (hostname by default).
    #[serde(default = "default_account")]
    pub account: String,

    /// Where received files land when `--out` is not given.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Accept incoming offers without asking.
    #[serde(default)]
    pub auto_accept: bool,

    /// Port the sender listens on (0 = auto-assign).
    #[serde(default)]
    pub port: u16,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pump buffer sizing.
    #[serde(default)]
    pub buffer: XferConfig,
}

fn default_account() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "purple-xfer".into())
}

fn default_download_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE").ok();
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME").ok();

    home.map(|h| PathBuf::from(h).join("Downloads"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: default_account(),
            download_dir: default_download_dir(),
            auto_accept: false,
            port: 0,
            log_level: default_log_level(),
            buffer: XferConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location, creating it if needed.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    /// Loads configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("purple-xfer")
            .join("config.toml")
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("purple-xfer").join("config.toml")
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        PathBuf::from("/tmp/purple-xfer/config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(!config.account.is_empty());
        assert!(!config.auto_accept);
        assert_eq!(config.port, 0);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.buffer, XferConfig::default());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            account = "laptop"
            auto_accept = true

            [buffer]
            max_buffer_size = 8192
            "#,
        )
        .unwrap();
        assert_eq!(config.account, "laptop");
        assert!(config.auto_accept);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.buffer.max_buffer_size, 8192);
        assert_eq!(
            config.buffer.initial_buffer_size,
            purple_xfer::INITIAL_BUFFER_SIZE
        );
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.account, config.account);
        assert_eq!(reloaded.download_dir, config.download_dir);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        Config::default().save_to(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn config_path_not_empty() {
        assert!(config_path().to_string_lossy().contains("purple-xfer"));
    }
}
