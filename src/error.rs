use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Problems with the process list or config file. Detected before anything
/// is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("duplicate process id '{0}'")]
    DuplicateId(String),

    #[error("process id must not be empty")]
    EmptyId,

    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    #[error("buffer.{0} must be greater than zero")]
    ZeroBufferSize(&'static str),
}

/// Per-process failures. These never escape the supervisor; they end up in
/// a `Failed` state instead.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no command specified")]
    NoCommand,

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to signal process group {pgid}: {source}")]
    Signal {
        pgid: i32,
        #[source]
        source: nix::Error,
    },
}
