//! Decoding of Marlin firmware response lines.

pub mod line;
pub mod mesh;
pub mod position;
pub mod temperature;

pub use line::{LineKind, Tokens};
pub use mesh::MeshReport;
pub use position::{parse_position, Position};
pub use temperature::{parse_temperatures, Reading, Temperatures};

/// Pattern fragment for a signed decimal number as Marlin prints it.
pub(crate) const NUMBER: &str = r"[-+]?\d+(?:\.\d+)?";
