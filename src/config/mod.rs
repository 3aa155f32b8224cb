//! Configuration management
//!
//! Handles loading and validation of the daemon/helper configuration from
//! TOML files. The parsed [`Config`] is immutable and threaded explicitly
//! through the supervisor and helper as an `Arc<Config>`; there is no global
//! configuration singleton.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/seatdm/config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon configuration
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// X11 display server configuration
    #[serde(default)]
    pub x11: X11Config,
    /// Theme configuration
    #[serde(default)]
    pub theme: ThemeConfig,
    /// User session environment configuration
    #[serde(default)]
    pub users: UsersConfig,
}

/// Daemon-side settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding auth files and helper channel sockets
    pub runtime_dir: PathBuf,

    /// Path to the seatdm-x11-helper binary
    pub helper_path: PathBuf,

    /// Service account that owns auth files and channel sockets
    pub service_user: String,

    /// Seconds to wait for the helper to exit after a graceful
    /// termination request before it is forcibly killed
    pub stop_timeout_secs: u64,
}

/// X11 display server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct X11Config {
    /// Path to the X server binary
    pub server_path: PathBuf,

    /// Extra arguments passed to the X server, whitespace separated
    pub server_arguments: String,

    /// Path to the nested X server used in test mode
    pub xephyr_path: PathBuf,

    /// Path to the xauth tool
    pub xauth_path: PathBuf,

    /// Display setup script, run after the server reports its display
    pub display_command: String,

    /// Display teardown script, run when the session exits
    pub display_stop_command: String,

    /// Default session command (greeter), overridable per session
    #[serde(default)]
    pub session_command: Option<String>,
}

/// Theme settings forwarded into the session environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeConfig {
    /// Cursor theme exported as XCURSOR_THEME
    pub cursor_theme: String,
}

/// Session environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsersConfig {
    /// PATH exported to display scripts and the session command
    pub default_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/run/seatdm"),
            helper_path: PathBuf::from("/usr/libexec/seatdm-x11-helper"),
            service_user: "seatdm".to_string(),
            stop_timeout_secs: 5,
        }
    }
}

impl Default for X11Config {
    fn default() -> Self {
        Self {
            server_path: PathBuf::from("/usr/bin/X"),
            server_arguments: "-nolisten tcp".to_string(),
            xephyr_path: PathBuf::from("/usr/bin/Xephyr"),
            xauth_path: PathBuf::from("/usr/bin/xauth"),
            display_command: "/usr/share/seatdm/scripts/Xsetup".to_string(),
            display_stop_command: "/usr/share/seatdm/scripts/Xstop".to_string(),
            session_command: None,
        }
    }
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            cursor_theme: String::new(),
        }
    }
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            default_path: "/usr/local/bin:/usr/bin:/bin".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create the built-in default configuration
    pub fn default_config() -> Self {
        Config {
            daemon: DaemonConfig::default(),
            x11: X11Config::default(),
            theme: ThemeConfig::default(),
            users: UsersConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.daemon.runtime_dir.as_os_str().is_empty() {
            anyhow::bail!("daemon.runtime_dir must not be empty");
        }
        if self.daemon.helper_path.as_os_str().is_empty() {
            anyhow::bail!("daemon.helper_path must not be empty");
        }
        if self.daemon.stop_timeout_secs == 0 {
            anyhow::bail!("daemon.stop_timeout_secs must be at least 1");
        }
        if self.x11.server_path.as_os_str().is_empty() {
            anyhow::bail!("x11.server_path must not be empty");
        }
        if self.x11.xauth_path.as_os_str().is_empty() {
            anyhow::bail!("x11.xauth_path must not be empty");
        }

        Ok(())
    }

    /// Bound on graceful helper termination
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.daemon.stop_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.daemon.runtime_dir, PathBuf::from("/run/seatdm"));
        assert_eq!(config.daemon.stop_timeout_secs, 5);
        assert_eq!(config.x11.xauth_path, PathBuf::from("/usr/bin/xauth"));
        assert!(config.x11.session_command.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let config: Config = toml::from_str(
            r#"
            [x11]
            server_path = "/usr/libexec/Xorg"
            server_arguments = ""
            xephyr_path = "/usr/bin/Xephyr"
            xauth_path = "/usr/bin/xauth"
            display_command = "/etc/seatdm/Xsetup"
            display_stop_command = "/etc/seatdm/Xstop"
            "#,
        )
        .unwrap();

        assert_eq!(config.x11.server_path, PathBuf::from("/usr/libexec/Xorg"));
        assert_eq!(config.daemon.service_user, "seatdm");
        assert_eq!(config.users.default_path, "/usr/local/bin:/usr/bin:/bin");
    }

    #[test]
    fn test_config_validation_empty_server_path() {
        let mut config = Config::default_config();
        config.x11.server_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_stop_timeout() {
        let mut config = Config::default_config();
        config.daemon.stop_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Config::load("/nonexistent/seatdm/config.toml").is_err());
    }
}
