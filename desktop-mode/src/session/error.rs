// Error types for the session core
// Transport faults are always recovered locally; they never reach the user as failures

use super::settings::SettingKey;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of the binding or of a remote call into the service
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("service is not connected")]
    NotConnected,
    #[error("failed to reach service at {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("service i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed service frame: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("service closed the connection unexpectedly")]
    Closed,
    #[error("service frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),
    #[error("service rejected request: {0}")]
    Rejected(String),
    #[error("unexpected service response: {0}")]
    Unexpected(String),
}

/// Failure to start or stop the service process
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("could not find the desktop-mode-service binary")]
    BinaryNotFound,
    #[error("failed to spawn {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("service did not become ready within {0:?}")]
    NotReady(std::time::Duration),
    #[error("service did not exit within {0:?}")]
    StillRunning(std::time::Duration),
    #[error("failed to prepare runtime directory: {0}")]
    RuntimeDir(#[source] std::io::Error),
    #[error("failed to encode launch parameters: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportFault),
}

/// Rejected setting edit; the pending snapshot is left untouched
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingError {
    #[error("unknown setting: {0}")]
    UnknownKey(String),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: SettingKey, value: String },
    #[error("value {value} out of range for {key}")]
    OutOfRange { key: SettingKey, value: String },
}
