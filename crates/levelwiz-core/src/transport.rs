//! Line-oriented link to the printer.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("cannot open {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("port closed")]
    Closed,
    #[error("serial I/O failed: {0}")]
    Io(String),
}

/// An open connection that exchanges newline-terminated text lines.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Queues one line; the line terminator is appended by the transport.
    fn write_line(&mut self, line: &str) -> Result<(), TransportError>;

    /// Waits up to `timeout` for the next complete line.
    /// `Ok(None)` means the timeout elapsed without one.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;

    /// Releases the underlying device. Calling it again is a no-op.
    fn close(&mut self);
}

/// Opens transports for a port name and baud rate.
pub trait Opener {
    type Transport: Transport;

    fn open(&mut self, port: &str, baud: u32) -> Result<Self::Transport, TransportError>;
}
