//! Error types.
//!
//! Trellis separates four failure conditions callers must be able to tell
//! apart: a connector that was never configured, an operation the topology
//! cannot serve, a failure on the wire, and an argument rejected before any
//! network I/O happened. Transport-level causes are described by
//! [`LinkError`](crate::connector::LinkError) and carried as the source of
//! [`TrellisError::Dispatch`].

use crate::connector::{LinkError, Topology};
use thiserror::Error;

/// Common Trellis error conditions.
#[derive(Debug, Error)]
pub enum TrellisError {
    /// Topology configuration was missing or invalid when the connector was
    /// built. Surfaces on first use, never at construction.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The operation is not served by this topology (capability matrix).
    /// Raised before any connection is leased.
    #[error("the command '{command}' is not supported by the {topology} topology: {reason}")]
    UnsupportedForTopology {
        command: String,
        topology: Topology,
        reason: String,
    },

    /// The operation reached the network layer and failed there.
    #[error("{command} failed: {source}")]
    Dispatch {
        command: String,
        #[source]
        source: LinkError,
    },

    /// An argument was rejected before dispatch.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// A value could not be encoded or decoded at the serialization boundary.
    #[error("codec error: {message}")]
    Codec { message: String },
}

impl TrellisError {
    /// Create a Configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an UnsupportedForTopology error.
    pub fn unsupported(
        command: impl Into<String>,
        topology: Topology,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedForTopology {
            command: command.into(),
            topology,
            reason: reason.into(),
        }
    }

    /// Wrap a transport failure for the named command.
    pub fn dispatch(command: impl Into<String>, source: LinkError) -> Self {
        Self::Dispatch {
            command: command.into(),
            source,
        }
    }

    /// Create a Precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Create a Codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Check if this error indicates the operation may succeed when retried.
    ///
    /// Only transport failures qualify; retry policy itself belongs to the
    /// caller.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Dispatch { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Check if the remote side effect of the failed operation is unknown.
    ///
    /// A lock acquire or release that fails this way must not be read as
    /// "not held".
    pub fn is_state_unknown(&self) -> bool {
        matches!(self, Self::Dispatch { .. })
    }

    /// Check if the error was raised without touching the network.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Dispatch { .. })
    }
}

/// Result type using TrellisError.
pub type TrellisResult<T> = Result<T, TrellisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_command_and_topology() {
        let err = TrellisError::unsupported("rename", Topology::Sharded, "keys may span shards");
        let text = err.to_string();
        assert!(text.contains("'rename'"));
        assert!(text.contains("sharded"));
        assert!(err.is_local());
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_dispatch_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = TrellisError::dispatch("GET", LinkError::Io(io));
        assert!(err.is_state_unknown());
        assert!(err.is_retriable());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_precondition_is_not_retriable() {
        let err = TrellisError::precondition("key must not be empty");
        assert!(!err.is_retriable());
        assert!(!err.is_state_unknown());
    }
}
