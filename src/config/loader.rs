// Configuration loader
// Loads ~/.chinta/config.toml (or an explicit path), then applies environment overrides

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::{chinta_dir, DaemonConfig};

/// Load configuration from a config file, the environment, and defaults
///
/// An explicit `path` must exist. Without one, `~/.chinta/config.toml` is
/// used when present. Relative paths are resolved against the current
/// directory, so this must run before the process detaches.
pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig> {
    let config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = chinta_dir().join("config.toml");
            if default_path.exists() {
                read_config_file(&default_path)?
            } else {
                DaemonConfig::default()
            }
        }
    };

    let mut config = apply_env_overrides(config, |key| std::env::var(key).ok())?;

    let base = std::env::current_dir().context("Could not determine current directory")?;
    resolve_paths(&mut config, &base);
    validate(&config)?;

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<DaemonConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse TOML contents; missing fields take their defaults
pub fn parse_config(contents: &str) -> Result<DaemonConfig> {
    Ok(toml::from_str(contents)?)
}

/// Apply CHINTA_* overrides using `lookup` to read variables
pub fn apply_env_overrides<F>(mut config: DaemonConfig, lookup: F) -> Result<DaemonConfig>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("CHINTA_GATEWAY_PORT") {
        config.server.port = parse_port(&port)?;
    }
    if let Some(url) = lookup("CHINTA_WEB_URL") {
        config.server.web_ui_url = url;
    }
    if let Some(url) = lookup("CHINTA_MOBILE_URL") {
        config.server.mobile_ui_url = url;
    }
    if let Some(url) = lookup("CHINTA_AUTH_URL") {
        config.server.auth_url = url;
    }
    if let Some(url) = lookup("CHINTA_AUTH_CALLBACK_URL") {
        config.server.auth_callback_url = url;
    }
    if let Some(path) = lookup("CHINTA_LOG_FILE") {
        config.log_file = PathBuf::from(path);
    }
    Ok(config)
}

fn parse_port(value: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(0) | Err(_) => bail!("Invalid port '{}': expected 1-65535", value),
        Ok(port) => Ok(port),
    }
}

fn resolve_paths(config: &mut DaemonConfig, base: &Path) {
    if config.log_file.is_relative() {
        config.log_file = base.join(&config.log_file);
    }
    if let Some(pid_file) = config.pid_file.as_mut() {
        if pid_file.is_relative() {
            *pid_file = base.join(&*pid_file);
        }
    }
}

fn validate(config: &DaemonConfig) -> Result<()> {
    if config.heartbeat_interval_ms == 0 {
        bail!("heartbeat_interval_ms must be greater than zero");
    }
    if !config.working_directory.is_absolute() {
        bail!(
            "working_directory must be absolute, got {}",
            config.working_directory.display()
        );
    }
    if config.server.bind_address.trim().is_empty() {
        bail!("server.bind_address must not be empty");
    }
    if config.server.port == 0 {
        bail!("server.port must be in 1-65535");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.working_directory, PathBuf::from("/"));
        assert!(config.log_file.ends_with("daemon.log"));
        assert!(!config.server.enabled);
        assert_eq!(config.server.port, 8084);
    }

    #[test]
    fn test_parse_partial_file() {
        let config = parse_config(
            r#"
            heartbeat_interval_ms = 250
            pid_file = "/tmp/chinta.pid"

            [server]
            enabled = true
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.heartbeat_interval_ms, 250);
        assert_eq!(config.pid_file, Some(PathBuf::from("/tmp/chinta.pid")));
        assert!(config.server.enabled);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
    }

    #[test]
    fn test_parse_rejects_out_of_range_port() {
        assert!(parse_config("[server]\nport = 70000\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = apply_env_overrides(
            DaemonConfig::default(),
            env(&[
                ("CHINTA_GATEWAY_PORT", "8085"),
                ("CHINTA_WEB_URL", "http://web"),
                ("CHINTA_MOBILE_URL", "http://web/m"),
                ("CHINTA_AUTH_URL", "http://auth:9000"),
                ("CHINTA_AUTH_CALLBACK_URL", "https://gw.example/auth/callback"),
            ]),
        )
        .unwrap();

        assert_eq!(config.server.port, 8085);
        assert_eq!(config.server.web_ui_url, "http://web");
        assert_eq!(config.server.mobile_ui_url, "http://web/m");
        assert_eq!(config.server.auth_url, "http://auth:9000");
        assert_eq!(config.server.auth_callback_url, "https://gw.example/auth/callback");
    }

    #[test]
    fn test_env_port_must_be_valid() {
        for bad in ["0", "70000", "http"] {
            let result = apply_env_overrides(
                DaemonConfig::default(),
                env(&[("CHINTA_GATEWAY_PORT", bad)]),
            );
            assert!(result.is_err(), "port {:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_relative_paths_resolved_against_base() {
        let mut config = DaemonConfig {
            log_file: PathBuf::from("logs/chinta.log"),
            pid_file: Some(PathBuf::from("chinta.pid")),
            ..Default::default()
        };
        resolve_paths(&mut config, Path::new("/srv/app"));

        assert_eq!(config.log_file, PathBuf::from("/srv/app/logs/chinta.log"));
        assert_eq!(config.pid_file, Some(PathBuf::from("/srv/app/chinta.pid")));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = DaemonConfig {
            heartbeat_interval_ms: 0,
            ..Default::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let log = dir.path().join("d.log");
        fs::write(
            &path,
            format!("heartbeat_interval_ms = 100\nlog_file = {:?}\n", log),
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.heartbeat_interval_ms, 100);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        assert!(load_config(Some(Path::new("/nonexistent/chinta.toml"))).is_err());
    }
}
