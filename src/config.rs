//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::engine::EngineOptions;
use crate::hotkey::{parse_stop_key, Key, DEFAULT_STOP_KEY};
use crate::replay::{DriftPolicy, TimingPolicy, DEFAULT_JITTER_TOLERANCE};

/// Which platform backend drives the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// OS input hooks and injection
    #[default]
    Native,
    /// In-process dry run; nothing reaches the OS
    Loopback,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Ok(BackendKind::Native),
            "loopback" => Ok(BackendKind::Loopback),
            other => bail!("unknown backend '{other}' (expected native or loopback)"),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Stop key used when a replay request names none
    pub stop_key: Key,

    pub timing: TimingPolicy,

    pub backend: BackendKind,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::load`] over an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("replayd");

        let socket_path = lookup("REPLAYD_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let stop_key = lookup("REPLAYD_STOP_KEY")
            .map(|token| parse_stop_key(&token))
            .unwrap_or(DEFAULT_STOP_KEY);

        let jitter_tolerance = match lookup("REPLAYD_JITTER_MS") {
            Some(ms) => Duration::from_millis(
                ms.trim()
                    .parse()
                    .with_context(|| format!("invalid REPLAYD_JITTER_MS '{ms}'"))?,
            ),
            None => DEFAULT_JITTER_TOLERANCE,
        };

        let drift = match lookup("REPLAYD_DRIFT") {
            Some(value) => DriftPolicy::from_str(&value)
                .map_err(anyhow::Error::msg)
                .context("invalid REPLAYD_DRIFT")?,
            None => DriftPolicy::default(),
        };

        let backend = match lookup("REPLAYD_BACKEND") {
            Some(value) => value.parse().context("invalid REPLAYD_BACKEND")?,
            None => BackendKind::default(),
        };

        Ok(Self {
            socket_path,
            data_dir,
            stop_key,
            timing: TimingPolicy {
                jitter_tolerance,
                drift,
            },
            backend,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            timing: self.timing,
            default_stop_key: self.stop_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[("HOME", "/home/tester")]).unwrap();
        assert_eq!(
            config.socket_path,
            PathBuf::from("/home/tester/.local/share/replayd/daemon.sock")
        );
        assert_eq!(config.stop_key, Key::KeyP);
        assert_eq!(config.timing, TimingPolicy::default());
        assert_eq!(config.backend, BackendKind::Native);
    }

    #[test]
    fn test_config_overrides() {
        let config = load(&[
            ("HOME", "/home/tester"),
            ("REPLAYD_SOCKET", "/tmp/r.sock"),
            ("REPLAYD_STOP_KEY", "esc"),
            ("REPLAYD_JITTER_MS", "40"),
            ("REPLAYD_DRIFT", "carry"),
            ("REPLAYD_BACKEND", "loopback"),
        ])
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/r.sock"));
        assert_eq!(config.stop_key, Key::Escape);
        assert_eq!(config.timing.jitter_tolerance, Duration::from_millis(40));
        assert_eq!(config.timing.drift, DriftPolicy::CarryForward);
        assert_eq!(config.backend, BackendKind::Loopback);
        assert_eq!(config.engine_options().default_stop_key, Key::Escape);
    }

    #[test]
    fn test_config_requires_home() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        assert!(load(&[("HOME", "/h"), ("REPLAYD_JITTER_MS", "soon")]).is_err());
        assert!(load(&[("HOME", "/h"), ("REPLAYD_DRIFT", "sideways")]).is_err());
        assert!(load(&[("HOME", "/h"), ("REPLAYD_BACKEND", "x11")]).is_err());
    }
}
