use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "levelwiz", version)]
#[command(about = "Manual mesh bed leveling wizard for Marlin printers")]
pub struct Args {
    /// Serial port to preselect, e.g. /dev/ttyUSB0 or COM3
    #[arg(long)]
    pub port: Option<String>,

    #[arg(long)]
    pub baud: Option<u32>,

    /// Bed width in mm (X)
    #[arg(long)]
    pub width: Option<f64>,

    /// Bed depth in mm (Y)
    #[arg(long)]
    pub depth: Option<f64>,

    #[arg(long)]
    pub rows: Option<usize>,

    #[arg(long)]
    pub columns: Option<usize>,

    /// Distance of the outer probe points from the bed edges, in mm
    #[arg(long)]
    pub margin: Option<f64>,

    /// Jog step in mm
    #[arg(long)]
    pub step: Option<f64>,

    /// Per-command response timeout
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Text encoding of firmware output: auto, utf-8, ascii, latin1, gbk
    #[arg(long)]
    pub encoding: Option<String>,

    /// JSON settings file (default: <config dir>/levelwiz/config.json if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where Export writes the mesh
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Skip homing (G28) while connecting
    #[arg(long)]
    pub no_home: bool,

    /// Use the probe grid size the firmware reports (G29 S0) instead of --rows/--columns
    #[arg(long)]
    pub grid_from_firmware: bool,

    #[arg(long, short, help = "Enable verbose output")]
    pub verbose: bool,
}
