use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum LevelingError {
    /// Port could not be opened or the firmware did not finish initialization.
    #[error("connection to {port} failed: {reason}")]
    Connection { port: String, reason: String },

    /// Firmware answered with an error line.
    #[error("`{command}` rejected by firmware: {response}")]
    Protocol { command: String, response: String },

    #[error("`{command}` not acknowledged within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// Operation not allowed in the current session state, or bad argument.
    #[error("{0}")]
    Validation(String),

    /// Link lost mid-exchange; the session has been disconnected.
    #[error("link failed during `{command}`: {source}")]
    Transport {
        command: String,
        #[source]
        source: TransportError,
    },
}

impl LevelingError {
    /// Whether the session is still connected and the same step may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::Timeout { .. })
    }

    /// The command that failed, if the error came from an exchange.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Protocol { command, .. } | Self::Timeout { command, .. } | Self::Transport { command, .. } => {
                Some(command)
            }
            Self::Connection { .. } | Self::Validation(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LevelingError>;
