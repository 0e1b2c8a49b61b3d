//! Error types for the disk player.
//!
//! Errors fall into two groups:
//! - **Fatal setup errors** (source open, host registration/activation, config): returned
//!   before any playback thread starts.
//! - **Playback errors** (`Decode`, `DiskThread`): end an already running session and are
//!   reported by the session after the disk thread has been joined.
//!
//! `PortConnect` is the one kind the session never propagates; it is logged and playback
//! continues with the port unconnected.

use std::path::PathBuf;

/// Errors produced by the playback pipeline and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// The audio file is missing, unreadable or in an unsupported format.
    #[error("could not open audio source {path:?}: {reason}")]
    SourceOpen {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// The audio host (device/backend) is not available.
    #[error("audio host unavailable: {0}")]
    HostUnavailable(String),

    /// Output port allocation failed.
    #[error("output port registration failed: {0}")]
    PortRegistration(String),

    /// The host refused to start calling the realtime callback.
    #[error("host activation failed: {0}")]
    HostActivation(String),

    /// A port could not be connected to its auto-connect destination.
    #[error("cannot connect {port} to {destination}: {reason}")]
    PortConnect {
        /// Port name, e.g. `out_1`.
        port: String,
        /// Destination name, e.g. `system:playback_1`.
        destination: String,
        /// Why the connection failed.
        reason: String,
    },

    /// The source failed mid-stream with something other than a corrupt packet.
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration values that cannot produce a working pipeline.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The disk thread could not be started or panicked.
    #[error("disk thread failure: {0}")]
    DiskThread(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// Whether this error is allowed to stop a session that already started.
    ///
    /// Connection failures are downgraded to warnings by the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PlayerError::PortConnect { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_connect_is_not_fatal() {
        let err = PlayerError::PortConnect {
            port: "out_1".to_string(),
            destination: "system:playback_9".to_string(),
            reason: "no such port".to_string(),
        };
        assert!(!err.is_fatal());
        assert_eq!(
            err.to_string(),
            "cannot connect out_1 to system:playback_9: no such port"
        );
    }

    #[test]
    fn setup_errors_are_fatal() {
        assert!(PlayerError::HostUnavailable("gone".to_string()).is_fatal());
        assert!(PlayerError::Decode("bad header".to_string()).is_fatal());
    }
}
