// Service protocol - shared structs for front-end <-> display service communication
// Uses newline-framed JSON messages over Unix sockets

use super::settings::Snapshot;
use serde::{Deserialize, Serialize};

/// Bumped whenever a request or response changes shape
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame either side will accept (1MB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Identity handed to the service so it can trigger the front-end again
pub const RETURN_TRIGGER_PACKAGE: &str = "org.desktopmode.config";
pub const RETURN_TRIGGER_COMPONENT: &str = "org.desktopmode.config.SessionController";

/// Parameters a service process is started (or re-applied) with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchParams {
    /// Explicit width; omitted when the service may resize freely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub dpi: u32,
    pub allow_resize: bool,
    pub emulate_touch: bool,
    pub use_relative_input: bool,
    pub mirror_internal: bool,
    pub has_audio: bool,
    pub remote_cursor: bool,
    pub clipboard: bool,
    pub intent_enable: bool,
    pub intent_pkg: String,
    pub intent_component: String,
}

impl From<&Snapshot> for LaunchParams {
    fn from(snapshot: &Snapshot) -> Self {
        let (width, height) = if snapshot.auto_resolution {
            (None, None)
        } else {
            (
                Some(snapshot.resolution.width),
                Some(snapshot.resolution.height),
            )
        };

        Self {
            width,
            height,
            dpi: snapshot.dpi(),
            allow_resize: snapshot.auto_resolution,
            emulate_touch: snapshot.emulate_touch,
            use_relative_input: snapshot.relative_input,
            mirror_internal: snapshot.mirror_internal,
            has_audio: snapshot.audio,
            remote_cursor: snapshot.remote_cursor,
            clipboard: snapshot.clipboard,
            intent_enable: true,
            intent_pkg: RETURN_TRIGGER_PACKAGE.to_string(),
            intent_component: RETURN_TRIGGER_COMPONENT.to_string(),
        }
    }
}

// ============================================================================
// Client -> Service requests
// ============================================================================

/// Request message from the front-end to the service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceRequest {
    /// Must be the first frame on every connection
    Handshake { client_version: u32 },
    /// Liveness probe
    IsRunning,
    /// Adopt new parameters without restarting
    Reconfigure { params: LaunchParams },
    /// Keep this connection open for as long as the service lives
    Watch,
    /// Request the service to stop
    Shutdown,
}

// ============================================================================
// Service -> Client responses
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceErrorCode {
    VersionMismatch,
    InvalidRequest,
    Internal,
}

/// Response message from the service to the front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceResponse {
    Handshake { protocol_version: u32 },
    Running { running: bool },
    Reconfigured,
    /// Watch accepted; the service closes the stream when it goes away
    Watching,
    ShuttingDown,
    Error {
        code: ServiceErrorCode,
        message: String,
    },
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    serde_json::from_slice(trimmed)
}
