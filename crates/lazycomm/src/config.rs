//! Gateway configuration.
//!
//! Read from a TOML file (`config.toml` by default). A missing file means
//! all defaults; unknown keys are rejected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP gateway binds to.
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding worker scripts (`<name>.py`).
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Directory for `server.log` and per-script stderr logs.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Program and leading arguments used to run a script; the script path
    /// is appended.
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// Upper bound for one exchange, spawn to exit (ms).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Largest HTTP request body accepted by the gateway (bytes).
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Largest response payload accepted from a worker (bytes).
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6565
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from(".log")
}

fn default_interpreter() -> Vec<String> {
    vec!["python".to_string(), "-u".to_string()]
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_request_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_max_response_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scripts_dir: default_scripts_dir(),
            logs_dir: default_logs_dir(),
            interpreter: default_interpreter(),
            timeout_ms: default_timeout_ms(),
            max_request_bytes: default_max_request_bytes(),
            max_response_bytes: default_max_response_bytes(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.interpreter.first().is_none_or(|program| program.is_empty()) {
            return Err(anyhow!("interpreter must name a program"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be greater than zero"));
        }
        if self.max_request_bytes == 0 {
            return Err(anyhow!("max_request_bytes must be greater than zero"));
        }
        if self.max_response_bytes == 0 {
            return Err(anyhow!("max_response_bytes must be greater than zero"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Parse and validate a configuration document.
pub fn parse_config(raw: &str) -> Result<Config> {
    let config: Config = toml::from_str(raw).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Load the configuration file, falling back to defaults when it does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6565);
        assert_eq!(config.scripts_dir, PathBuf::from("scripts"));
        assert_eq!(config.logs_dir, PathBuf::from(".log"));
        assert_eq!(config.interpreter, vec!["python", "-u"]);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_request_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn port_only_document() {
        let config = parse_config("port = 8080\n").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn full_document() {
        let raw = r#"
            host = "0.0.0.0"
            port = 9000
            scripts_dir = "/srv/scripts"
            logs_dir = "/var/log/lazycomm"
            interpreter = ["python3"]
            timeout_ms = 1500
            max_request_bytes = 2048
            max_response_bytes = 1024
        "#;
        let config = parse_config(raw).unwrap();
        assert_eq!(config.interpreter, vec!["python3"]);
        assert_eq!(config.timeout(), Duration::from_millis(1500));
        assert_eq!(config.max_request_bytes, 2048);
        assert_eq!(config.max_response_bytes, 1024);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = parse_config("prot = 8080\n").unwrap_err();
        assert!(format!("{err:#}").contains("unknown field"));
    }

    #[test]
    fn empty_interpreter_is_rejected() {
        let err = parse_config("interpreter = []\n").unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"interpreter must name a program");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(parse_config("timeout_ms = 0\n").is_err());
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.port, 6565);
    }

    #[test]
    fn file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "port = 7000\n").unwrap();
        assert_eq!(load_config(&path).unwrap().port, 7000);
    }
}
