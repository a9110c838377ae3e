use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::line_buffer::LineBufferConfig;
use crate::model::process::ProcessDefinition;

/// Default config file, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "procpane.toml";

/// How often the tick event fires (ms).
pub const TICK_RATE_MS: u64 = 250;

/// How long to wait for processes to exit after asking them to stop (ms).
pub const GRACE_PERIOD_MS: u64 = 4000;

// ---------------------------------------------------------------------------
// procpane.toml
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub display: Option<DisplayConfig>,
    pub buffer: Option<BufferConfig>,
    pub shutdown: Option<ShutdownConfig>,
    #[serde(default)]
    pub process: Vec<ProcessConfig>,
}

#[derive(Debug, Deserialize)]
pub struct DisplayConfig {
    pub tick_rate: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct BufferConfig {
    pub block_size: Option<usize>,
    pub max_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ShutdownConfig {
    pub grace_period_ms: Option<u64>,
    /// e.g. "SIGTERM", "INT". Default: SIGTERM.
    pub signal: Option<String>,
}

/// One `[[process]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub id: String,
    /// Defaults to `id`.
    pub title: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Config {
    pub fn tick_rate(&self) -> u64 {
        self.display
            .as_ref()
            .and_then(|d| d.tick_rate)
            .unwrap_or(TICK_RATE_MS)
    }

    pub fn grace_period(&self) -> Duration {
        let ms = self
            .shutdown
            .as_ref()
            .and_then(|s| s.grace_period_ms)
            .unwrap_or(GRACE_PERIOD_MS);
        Duration::from_millis(ms)
    }

    pub fn kill_signal(&self) -> Result<Signal, ConfigError> {
        match self.shutdown.as_ref().and_then(|s| s.signal.as_deref()) {
            Some(name) => parse_signal(name),
            None => Ok(Signal::SIGTERM),
        }
    }

    pub fn buffer_config(&self) -> Result<LineBufferConfig, ConfigError> {
        let defaults = LineBufferConfig::default();
        let buffer = self.buffer.as_ref();
        let config = LineBufferConfig {
            block_size: buffer
                .and_then(|b| b.block_size)
                .unwrap_or(defaults.block_size),
            max_size: buffer.and_then(|b| b.max_size).unwrap_or(defaults.max_size),
        };
        if config.block_size == 0 {
            return Err(ConfigError::ZeroBufferSize("block_size"));
        }
        if config.max_size == 0 {
            return Err(ConfigError::ZeroBufferSize("max_size"));
        }
        Ok(config)
    }

    /// Process definitions in file order. Relative `cwd` values are
    /// resolved against `base_dir` (the config file's directory).
    pub fn definitions(&self, base_dir: &Path) -> Vec<ProcessDefinition> {
        self.process
            .iter()
            .map(|p| ProcessDefinition {
                id: p.id.clone(),
                title: p.title.clone().unwrap_or_else(|| p.id.clone()),
                command: p.command.clone(),
                cwd: p.cwd.as_ref().map(|c| base_dir.join(c)),
                shell: p.shell,
                env: p.env.clone(),
            })
            .collect()
    }
}

/// Accepts `SIGTERM`, `TERM` or `term`.
pub fn parse_signal(name: &str) -> Result<Signal, ConfigError> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };
    Signal::from_str(&full).map_err(|_| ConfigError::UnknownSignal(name.to_string()))
}

pub fn parse_config(content: &str, path: &Path) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.kill_signal()?;
    config.buffer_config()?;
    Ok(config)
}

/// Load and check a config file. Unlike display settings, a missing file
/// is an error: there would be nothing to supervise.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[display]
tick_rate = 100

[buffer]
max_size = 500

[shutdown]
grace_period_ms = 1500
signal = "int"

[[process]]
id = "serve"
title = "Serve Functions"
command = ["yarn", "serve"]
cwd = "functions"

[[process]]
id = "watch"
command = ["yarn build:watch"]
shell = true
env = { NODE_ENV = "development" }
"#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_config(SAMPLE, Path::new("procpane.toml")).unwrap();
        assert_eq!(config.tick_rate(), 100);
        assert_eq!(config.grace_period(), Duration::from_millis(1500));
        assert_eq!(config.kill_signal().unwrap(), Signal::SIGINT);
        assert_eq!(
            config.buffer_config().unwrap(),
            LineBufferConfig {
                block_size: 1000,
                max_size: 500
            }
        );

        let defs = config.definitions(Path::new("/srv/app"));
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].title, "Serve Functions");
        assert_eq!(defs[0].cwd, Some(PathBuf::from("/srv/app/functions")));
        assert!(!defs[0].shell);
        assert_eq!(defs[1].title, "watch");
        assert!(defs[1].shell);
        assert_eq!(defs[1].env["NODE_ENV"], "development");
        assert_eq!(defs[1].cwd, None);
    }

    #[test]
    fn test_defaults() {
        let config = parse_config("", Path::new("x.toml")).unwrap();
        assert_eq!(config.tick_rate(), TICK_RATE_MS);
        assert_eq!(config.grace_period(), Duration::from_millis(GRACE_PERIOD_MS));
        assert_eq!(config.kill_signal().unwrap(), Signal::SIGTERM);
        assert_eq!(config.buffer_config().unwrap(), LineBufferConfig::default());
        assert!(config.process.is_empty());
    }

    #[test]
    fn test_missing_command_is_empty_not_error() {
        let config = parse_config("[[process]]\nid = \"b\"\n", Path::new("x.toml")).unwrap();
        assert!(config.definitions(Path::new("."))[0].command.is_empty());
    }

    #[test]
    fn test_absolute_cwd_kept() {
        let config = parse_config(
            "[[process]]\nid = \"a\"\ncommand = [\"ls\"]\ncwd = \"/tmp\"\n",
            Path::new("x.toml"),
        )
        .unwrap();
        assert_eq!(
            config.definitions(Path::new("/srv"))[0].cwd,
            Some(PathBuf::from("/tmp"))
        );
    }

    #[test]
    fn test_unknown_signal_rejected() {
        let err = parse_config("[shutdown]\nsignal = \"SIGNOPE\"\n", Path::new("x.toml"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::UnknownSignal(_)));
    }

    #[test]
    fn test_zero_buffer_sizes_rejected() {
        let err = parse_config("[buffer]\nblock_size = 0\n", Path::new("x.toml"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ZeroBufferSize("block_size")));

        let err = parse_config("[buffer]\nmax_size = 0\n", Path::new("x.toml"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ZeroBufferSize("max_size")));
    }

    #[test]
    fn test_parse_signal_forms() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("term").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal(" hup ").unwrap(), Signal::SIGHUP);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.process.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("nope.toml")).err().unwrap();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bad_toml() {
        let err = parse_config("[[process]\n", Path::new("x.toml")).err().unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
