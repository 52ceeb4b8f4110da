//! Configuration Vault – reads/writes `~/.strider/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use zeroize::Zeroize;

/// Persisted user configuration stored in `~/.strider/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Hostname or IP of the robot (used by the vendor bridge; the
    /// in-tree simulated backend ignores it).
    #[serde(default = "default_robot_host")]
    pub robot_host: String,

    /// Robot account user name.
    #[serde(default)]
    pub robot_username: String,

    /// Robot account password (stored as plain text – the vault restricts
    /// file permissions to the owner and zeroizes the field on drop).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub robot_password: String,

    /// HTTP port for the command console.
    #[serde(default = "default_console_port")]
    pub console_port: u16,

    /// Camera source polled for one-shot and video captures.
    #[serde(default = "default_image_source")]
    pub image_source: String,

    /// Append-only operational log file.
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("robot_host", &self.robot_host)
            .field("robot_username", &self.robot_username)
            .field(
                "robot_password",
                if self.robot_password.is_empty() {
                    &"<not set>"
                } else {
                    &"<redacted>"
                },
            )
            .field("console_port", &self.console_port)
            .field("image_source", &self.image_source)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.robot_password.zeroize();
    }
}

fn default_robot_host() -> String {
    "192.168.80.3".to_string()
}
fn default_console_port() -> u16 {
    8080
}
fn default_image_source() -> String {
    "frontright_fisheye_image".to_string()
}
fn default_log_file() -> String {
    "strider.log".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            robot_host: default_robot_host(),
            robot_username: String::new(),
            robot_password: String::new(),
            console_port: default_console_port(),
            image_source: default_image_source(),
            log_file: default_log_file(),
        }
    }
}

/// Return the path to `~/.strider/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strider").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `STRIDER_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `STRIDER_ROBOT_HOST` | `robot_host` |
/// | `STRIDER_CONSOLE_PORT` | `console_port` |
/// | `STRIDER_IMAGE_SOURCE` | `image_source` |
/// | `STRIDER_LOG_FILE` | `log_file` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("STRIDER_ROBOT_HOST") {
        cfg.robot_host = v;
    }
    if let Ok(v) = std::env::var("STRIDER_CONSOLE_PORT")
        && let Ok(port) = v.parse::<u16>() {
            cfg.console_port = port;
        }
    if let Ok(v) = std::env::var("STRIDER_IMAGE_SOURCE") {
        cfg.image_source = v;
    }
    if let Ok(v) = std::env::var("STRIDER_LOG_FILE") {
        cfg.log_file = v;
    }
}

/// Save the config to disk, creating `~/.strider/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_debug_redacts_the_password() {
        let mut cfg = Config::default();
        cfg.robot_password = "hunter2".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(
            !debug_str.contains("hunter2"),
            "password must not appear in debug output"
        );
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn config_debug_shows_not_set_for_empty_password() {
        let cfg = Config::default();
        let debug_str = format!("{:?}", cfg);
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let file_meta = std::fs::metadata(&path).expect("file metadata");
        let file_mode = file_meta.permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_meta = std::fs::metadata(path.parent().unwrap()).expect("dir metadata");
        let dir_mode = dir_meta.permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.console_port, 8080);
        assert_eq!(loaded.image_source, "frontright_fisheye_image");
        assert_eq!(loaded.log_file, "strider.log");
    }

    #[test]
    fn config_path_points_to_strider_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".strider"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn apply_env_overrides_changes_console_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("STRIDER_CONSOLE_PORT", "9999") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.console_port, 9999);
        unsafe { std::env::remove_var("STRIDER_CONSOLE_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("STRIDER_CONSOLE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        let original_port = cfg.console_port;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.console_port, original_port);
        unsafe { std::env::remove_var("STRIDER_CONSOLE_PORT") };
    }

    #[test]
    fn apply_env_overrides_changes_image_source() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("STRIDER_IMAGE_SOURCE", "back_fisheye_image") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.image_source, "back_fisheye_image");
        unsafe { std::env::remove_var("STRIDER_IMAGE_SOURCE") };
    }
}
