//! Launch settings: built-in defaults, then the JSON config file, then CLI flags.

use anyhow::{bail, Context, Result};
use levelwiz_core::{SerialConfig, SessionConfig, TextEncoding};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;

pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub encoding: Option<String>,
    pub export_path: Option<PathBuf>,
    pub home_on_connect: Option<bool>,
    pub grid_from_firmware: Option<bool>,
    pub max_bed_temperature: Option<f64>,
    pub bed: BedSection,
    pub jog: JogSection,
    pub timeouts: TimeoutSection,
    pub motion: MotionSection,
    pub gcode: GcodeSection,
    pub firmware: FirmwareSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BedSection {
    pub width: Option<f64>,
    pub depth: Option<f64>,
    pub rows: Option<usize>,
    pub columns: Option<usize>,
    pub margin: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JogSection {
    pub step: Option<f64>,
    pub min_step: Option<f64>,
    pub max_step: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSection {
    pub response_ms: Option<u64>,
    pub init_ms: Option<u64>,
    pub boot_settle_ms: Option<u64>,
    pub open_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionSection {
    pub feedrate: Option<f64>,
    pub z_feedrate: Option<f64>,
    pub travel_height: Option<f64>,
    pub probe_height: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcodeSection {
    pub init: Option<Vec<String>>,
    pub home: Option<String>,
    pub mesh_start: Option<String>,
    pub mesh_info: Option<String>,
    pub move_to: Option<Vec<String>>,
    pub relative_mode: Option<String>,
    pub absolute_mode: Option<String>,
    pub jog: Option<String>,
    pub accept: Option<String>,
    pub finish: Option<Vec<String>>,
    pub steppers_off: Option<String>,
    pub position: Option<String>,
    pub temperature: Option<String>,
    pub bed_temperature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirmwareSection {
    pub ok: Option<String>,
    pub error_prefixes: Option<Vec<String>>,
    pub busy_prefix: Option<String>,
}

/// Everything `main` needs to build the session and the window.
#[derive(Debug, Clone)]
pub struct Launch {
    pub port: Option<String>,
    pub baud: u32,
    pub export_path: PathBuf,
    pub serial: SerialConfig,
    pub session: SessionConfig,
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn millis(target: &mut Duration, value: Option<u64>) {
    set(target, value.map(Duration::from_millis));
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("levelwiz").join("config.json"))
}

/// Reads `explicit`, or the default file when it exists. No file means all defaults.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.is_file() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let text = std::fs::read_to_string(&path).with_context(|| format!("cannot read config {}", path.display()))?;
    let file = serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
    tracing::info!("loaded settings from {}", path.display());
    Ok(file)
}

pub fn resolve(args: &Args, file: FileConfig) -> Result<Launch> {
    let mut session = SessionConfig::default();

    let geometry = &mut session.geometry;
    set(&mut geometry.width, args.width.or(file.bed.width));
    set(&mut geometry.depth, args.depth.or(file.bed.depth));
    set(&mut geometry.rows, args.rows.or(file.bed.rows));
    set(&mut geometry.columns, args.columns.or(file.bed.columns));
    set(&mut geometry.margin, args.margin.or(file.bed.margin));

    set(&mut session.jog.step, args.step.or(file.jog.step));
    set(&mut session.jog.min_step, file.jog.min_step);
    set(&mut session.jog.max_step, file.jog.max_step);

    millis(&mut session.response_timeout, args.timeout_ms.or(file.timeouts.response_ms));
    millis(&mut session.init_timeout, file.timeouts.init_ms);
    millis(&mut session.boot_settle, file.timeouts.boot_settle_ms);

    set(&mut session.feedrate, file.motion.feedrate);
    set(&mut session.z_feedrate, file.motion.z_feedrate);
    set(&mut session.travel_height, file.motion.travel_height);
    set(&mut session.probe_height, file.motion.probe_height);

    let gcodes = &mut session.gcodes;
    let g = file.gcode;
    set(&mut gcodes.init, g.init);
    set(&mut gcodes.home, g.home);
    set(&mut gcodes.mesh_start, g.mesh_start);
    set(&mut gcodes.mesh_info, g.mesh_info);
    set(&mut gcodes.move_to, g.move_to);
    set(&mut gcodes.relative_mode, g.relative_mode);
    set(&mut gcodes.absolute_mode, g.absolute_mode);
    set(&mut gcodes.jog, g.jog);
    set(&mut gcodes.accept, g.accept);
    set(&mut gcodes.finish, g.finish);
    set(&mut gcodes.steppers_off, g.steppers_off);
    set(&mut gcodes.position, g.position);
    set(&mut gcodes.temperature, g.temperature);
    set(&mut gcodes.bed_temperature, g.bed_temperature);

    set(&mut session.tokens.ok, file.firmware.ok);
    set(&mut session.tokens.error_prefixes, file.firmware.error_prefixes);
    set(&mut session.tokens.busy_prefix, file.firmware.busy_prefix);

    set(&mut session.home_on_connect, file.home_on_connect);
    if args.no_home {
        session.home_on_connect = false;
    }
    set(&mut session.grid_from_firmware, file.grid_from_firmware);
    if args.grid_from_firmware {
        session.grid_from_firmware = true;
    }
    set(&mut session.max_bed_temperature, file.max_bed_temperature);

    session
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid leveling settings")?;

    let mut serial = SerialConfig::default();
    if let Some(name) = args.encoding.as_deref().or(file.encoding.as_deref()) {
        serial.encoding = name.parse::<TextEncoding>().map_err(anyhow::Error::msg)?;
    }
    millis(&mut serial.open_timeout, file.timeouts.open_ms);

    let baud = args.baud.or(file.baud).unwrap_or(DEFAULT_BAUD);
    if baud == 0 {
        bail!("baud rate must be greater than zero");
    }

    Ok(Launch {
        port: args.port.clone().or(file.port),
        baud,
        export_path: args
            .export
            .clone()
            .or(file.export_path)
            .unwrap_or_else(|| PathBuf::from("mesh.txt")),
        serial,
        session,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_without_file_or_flags() {
        let launch = resolve(&Args::default(), FileConfig::default()).unwrap();
        assert_eq!(launch.baud, DEFAULT_BAUD);
        assert_eq!(launch.port, None);
        assert_eq!(launch.export_path, PathBuf::from("mesh.txt"));
        assert_eq!(launch.session, SessionConfig::default());
    }

    #[test]
    fn file_values_apply() {
        let file = write_config(
            r#"{
                "port": "/dev/ttyUSB1",
                "baud": 250000,
                "encoding": "gbk",
                "bed": { "width": 220, "depth": 220, "rows": 4, "columns": 4 },
                "jog": { "step": 0.05, "max_step": 2.0 },
                "timeouts": { "response_ms": 5000, "boot_settle_ms": 0 },
                "gcode": { "finish": ["M500", "M501"] },
                "firmware": { "busy_prefix": "busy:" }
            }"#,
        );
        let launch = resolve(&Args::default(), load(Some(file.path())).unwrap()).unwrap();
        assert_eq!(launch.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(launch.baud, 250_000);
        assert_eq!(launch.serial.encoding, TextEncoding::Gbk);
        assert_eq!(launch.session.geometry.rows, 4);
        assert_eq!(launch.session.geometry.width, 220.0);
        assert_eq!(launch.session.jog.step, 0.05);
        assert_eq!(launch.session.jog.max_step, 2.0);
        assert_eq!(launch.session.response_timeout, Duration::from_secs(5));
        assert!(launch.session.boot_settle.is_zero());
        assert_eq!(launch.session.gcodes.finish, ["M500", "M501"]);
        assert_eq!(launch.session.tokens.busy_prefix, "busy:");
    }

    #[test]
    fn flags_override_file() {
        let file = write_config(r#"{ "baud": 57600, "bed": { "rows": 5 } }"#);
        let args = Args::parse_from([
            "levelwiz",
            "--baud",
            "250000",
            "--rows",
            "2",
            "--no-home",
            "--grid-from-firmware",
        ]);
        let launch = resolve(&args, load(Some(file.path())).unwrap()).unwrap();
        assert_eq!(launch.baud, 250_000);
        assert_eq!(launch.session.geometry.rows, 2);
        assert!(!launch.session.home_on_connect);
        assert!(launch.session.grid_from_firmware);
    }

    #[test]
    fn unknown_keys_are_errors() {
        let file = write_config(r#"{ "bed": { "colums": 3 } }"#);
        assert!(load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("nope.json"))).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let args = Args::parse_from(["levelwiz", "--rows", "0"]);
        assert!(resolve(&args, FileConfig::default()).is_err());

        let args = Args::parse_from(["levelwiz", "--encoding", "klingon"]);
        assert!(resolve(&args, FileConfig::default()).is_err());

        let file = write_config(r#"{ "gcode": { "accept": "G29 S3 Q{q}" } }"#);
        assert!(resolve(&Args::default(), load(Some(file.path())).unwrap()).is_err());
    }
}
