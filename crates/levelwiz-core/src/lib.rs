//! Core functionalities: leveling session, serial transport, traffic log.

pub mod config;
pub mod encoding;
pub mod error;
pub mod gcode;
pub mod logbuf;
pub mod mesh;
pub mod serial_service;
pub mod session;
pub mod transport;

pub use config::{Gcodes, JogLimits, SessionConfig};
pub use encoding::TextEncoding;
pub use error::LevelingError;
pub use logbuf::{Direction, LogEntry, LogStore, SharedLog};
pub use mesh::{parse_export, BedGeometry, MeshEntry, ProbePoint};
pub use serial_service::{LineEnding, PortInfo, SerialConfig, SerialOpener, SerialService};
pub use session::{Reply, Session, SessionState};
pub use transport::{Opener, Transport, TransportError};

pub use levelwiz_decode::{MeshReport, Position, Reading, Temperatures, Tokens};
