//! ## Pool Error Module
//!
//! Central error type for the front-end. Stratum-typed errors that must be
//! reported back to a miner live in `sv1_api::error::StratumError`; this
//! enum covers everything that propagates to the connection supervisor or
//! the main runtime loop instead.

use crate::repository::RepositoryError;
use ext_config::ConfigError;
use std::fmt;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug)]
pub enum PoolError {
    /// Errors on bad CLI argument input.
    BadCliArgs(String),
    /// Errors on bad `config` TOML deserialize.
    BadConfigDeserialize(ConfigError),
    /// Errors on bad `serde_json` serialize/deserialize.
    BadSerdeJson(serde_json::Error),
    /// A pool in the config has no collaborators wired, or similar.
    Config(String),
    /// Errors on bad `TcpStream` connection.
    Io(std::io::Error),
    /// Upstream daemon RPC failure.
    Daemon(String),
    Repository(RepositoryError),
    // Channel errors
    ChannelErrorReceiver(async_channel::RecvError),
    TokioBroadcastRecv(tokio::sync::broadcast::error::RecvError),
    ChannelErrorSender(String),
    /// The peer went away mid-exchange.
    ConnectionClosed,
    Shutdown,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use PoolError::*;
        match self {
            BadCliArgs(ref e) => write!(f, "Bad CLI arg input: `{e}`"),
            BadConfigDeserialize(ref e) => write!(f, "Bad `config` TOML deserialize: `{e:?}`"),
            BadSerdeJson(ref e) => write!(f, "Bad serde json: `{e:?}`"),
            Config(ref e) => write!(f, "Configuration error: `{e}`"),
            Io(ref e) => write!(f, "I/O error: `{e:?}`"),
            Daemon(ref e) => write!(f, "Daemon RPC error: `{e}`"),
            Repository(ref e) => write!(f, "Repository error: `{e}`"),
            ChannelErrorReceiver(ref e) => write!(f, "Channel receive error: `{e:?}`"),
            TokioBroadcastRecv(ref e) => write!(f, "Broadcast receive error: `{e:?}`"),
            ChannelErrorSender(ref e) => write!(f, "Channel send error: `{e}`"),
            ConnectionClosed => write!(f, "Connection closed by peer"),
            Shutdown => write!(f, "Shutdown requested"),
        }
    }
}

impl From<ConfigError> for PoolError {
    fn from(e: ConfigError) -> Self {
        PoolError::BadConfigDeserialize(e)
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(e: serde_json::Error) -> Self {
        PoolError::BadSerdeJson(e)
    }
}

impl From<std::io::Error> for PoolError {
    fn from(e: std::io::Error) -> Self {
        PoolError::Io(e)
    }
}

impl From<RepositoryError> for PoolError {
    fn from(e: RepositoryError) -> Self {
        PoolError::Repository(e)
    }
}

impl From<async_channel::RecvError> for PoolError {
    fn from(e: async_channel::RecvError) -> Self {
        PoolError::ChannelErrorReceiver(e)
    }
}

impl From<tokio::sync::broadcast::error::RecvError> for PoolError {
    fn from(e: tokio::sync::broadcast::error::RecvError) -> Self {
        PoolError::TokioBroadcastRecv(e)
    }
}

impl<T> From<async_channel::SendError<T>> for PoolError {
    fn from(e: async_channel::SendError<T>) -> Self {
        PoolError::ChannelErrorSender(e.to_string())
    }
}
