//! Error types for bpfsock.

use thiserror::Error;

/// Main error type for all BPF socket operations.
#[derive(Debug, Error)]
pub enum BpfError {
    /// A setup-time control call failed. The device is left partially
    /// configured and must be discarded.
    #[error("{option} failed on {device}: {source}")]
    Config {
        /// Name of the failing control call (e.g. `BIOCSBLEN`).
        option: &'static str,
        /// Device node or interface the call was issued against.
        device: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A filter expression could not be compiled or attached.
    #[error("Cannot set filter {expression:?}: {reason}")]
    Filter {
        /// The expression that was rejected.
        expression: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No free packet filter device could be allocated.
    #[error("Unable to allocate a BPF device: {0}")]
    Allocation(#[source] std::io::Error),

    /// Writing a frame to the device failed.
    #[error("Send failed on {iface}: {source}")]
    Send {
        /// Interface the frame was destined for.
        iface: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The socket has already been closed.
    #[error("Socket is closed")]
    Closed,

    /// I/O error during readiness polling or other plumbing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BpfError {
    /// True for failures raised while building a socket.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            BpfError::Config { .. } | BpfError::Filter { .. } | BpfError::Allocation(_)
        )
    }

    /// True for failures raised while transmitting.
    pub fn is_send(&self) -> bool {
        matches!(self, BpfError::Send { .. } | BpfError::Closed)
    }

    /// Name of the failing control call, for [`BpfError::Config`].
    pub fn failed_option(&self) -> Option<&'static str> {
        match self {
            BpfError::Config { option, .. } => Some(option),
            _ => None,
        }
    }
}

/// Result type alias using BpfError.
pub type Result<T> = std::result::Result<T, BpfError>;
