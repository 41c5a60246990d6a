use levelwiz_decode::Tokens;
use std::time::Duration;

use crate::gcode;
use crate::mesh::BedGeometry;

/// Firmware commands issued by the session. Defaults target Marlin's
/// manual mesh bed leveling (`MESH_BED_LEVELING`).
#[derive(Debug, Clone, PartialEq)]
pub struct Gcodes {
    /// Sent first after connecting. Default disables the stepper idle timeout.
    pub init: Vec<String>,
    pub home: String,
    /// Puts the firmware into manual mesh leveling.
    pub mesh_start: String,
    pub mesh_info: String,
    /// Positioning sequence for a probe point.
    /// Placeholders: `x`, `y`, `feedrate`, `z_feedrate`, `travel_height`, `probe_height`.
    pub move_to: Vec<String>,
    pub relative_mode: String,
    pub absolute_mode: String,
    /// Relative Z move. Placeholders: `delta`, `z_feedrate`.
    pub jog: String,
    /// Stores the offset of one point. Placeholders: `row`, `column`, `index`,
    /// `z` (the jog total alone) and `probe_z` (`probe_height` plus the jog total,
    /// the nozzle's absolute height). The default sends `z`, which is only the
    /// absolute height while `probe_height` is 0; use `probe_z` otherwise.
    pub accept: String,
    /// Sent once the last point is saved; default writes the mesh to EEPROM.
    pub finish: Vec<String>,
    pub steppers_off: String,
    pub position: String,
    pub temperature: String,
    /// Placeholder: `celsius`.
    pub bed_temperature: String,
}

impl Default for Gcodes {
    fn default() -> Self {
        Self {
            init: vec!["M84 S0".to_string()],
            home: "G28".to_string(),
            mesh_start: "G29 S1".to_string(),
            mesh_info: "G29 S0".to_string(),
            move_to: vec![
                "G0 Z{travel_height} F{z_feedrate}".to_string(),
                "G0 X{x} Y{y} F{feedrate}".to_string(),
                "G0 Z{probe_height} F{z_feedrate}".to_string(),
            ],
            relative_mode: "G91".to_string(),
            absolute_mode: "G90".to_string(),
            jog: "G1 Z{delta} F{z_feedrate}".to_string(),
            accept: "G29 S3 I{column} J{row} Z{z}".to_string(),
            finish: vec!["M500".to_string()],
            steppers_off: "M84".to_string(),
            position: "M114".to_string(),
            temperature: "M105".to_string(),
            bed_temperature: "M140 S{celsius}".to_string(),
        }
    }
}

pub const MOVE_PLACEHOLDERS: &[&str] = &["x", "y", "feedrate", "z_feedrate", "travel_height", "probe_height"];
pub const JOG_PLACEHOLDERS: &[&str] = &["delta", "z_feedrate"];
pub const ACCEPT_PLACEHOLDERS: &[&str] = &["row", "column", "index", "z", "probe_z"];
pub const BED_TEMPERATURE_PLACEHOLDERS: &[&str] = &["celsius"];

impl Gcodes {
    pub fn validate(&self) -> Result<(), String> {
        for fixed in self
            .init
            .iter()
            .chain(&self.finish)
            .chain([
                &self.home,
                &self.mesh_start,
                &self.mesh_info,
                &self.relative_mode,
                &self.absolute_mode,
                &self.steppers_off,
                &self.position,
                &self.temperature,
            ])
        {
            gcode::check(fixed, &[])?;
        }
        if self.move_to.is_empty() {
            return Err("positioning sequence is empty".to_string());
        }
        for step in &self.move_to {
            gcode::check(step, MOVE_PLACEHOLDERS)?;
        }
        gcode::check(&self.jog, JOG_PLACEHOLDERS)?;
        gcode::check(&self.accept, ACCEPT_PLACEHOLDERS)?;
        gcode::check(&self.bed_temperature, BED_TEMPERATURE_PLACEHOLDERS)?;
        Ok(())
    }
}

/// Step size for jogging and the bounds any single jog must respect, in mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JogLimits {
    pub step: f64,
    pub min_step: f64,
    pub max_step: f64,
}

impl Default for JogLimits {
    fn default() -> Self {
        Self {
            step: 0.025,
            min_step: 0.005,
            max_step: 1.0,
        }
    }
}

impl JogLimits {
    pub fn contains(&self, delta: f64) -> bool {
        // tolerate float noise from text fields like "0.1"
        const EPS: f64 = 1e-9;
        delta.is_finite() && delta.abs() >= self.min_step - EPS && delta.abs() <= self.max_step + EPS
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_step.is_finite() && self.min_step >= 0.001) {
            return Err(format!("minimum step must be at least 0.001 mm, got {}", self.min_step));
        }
        if !(self.max_step.is_finite() && self.max_step >= self.min_step) {
            return Err(format!(
                "maximum step {} mm is below the minimum {} mm",
                self.max_step, self.min_step
            ));
        }
        if !self.contains(self.step) {
            return Err(format!(
                "step {} mm is outside {}..={} mm",
                self.step, self.min_step, self.max_step
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub geometry: BedGeometry,
    pub gcodes: Gcodes,
    pub tokens: Tokens,
    pub jog: JogLimits,
    /// Bound for ordinary command exchanges.
    pub response_timeout: Duration,
    /// Bound for initialization and homing, which move the whole machine.
    pub init_timeout: Duration,
    /// Quiet period that ends the boot chatter after the port opens.
    /// Zero skips waiting.
    pub boot_settle: Duration,
    pub home_on_connect: bool,
    /// Ask the firmware for its grid size while connecting and use it.
    pub grid_from_firmware: bool,
    pub feedrate: f64,
    pub z_feedrate: f64,
    pub travel_height: f64,
    /// Height the nozzle is parked at before jogging; see [`Gcodes::accept`].
    pub probe_height: f64,
    pub max_bed_temperature: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            geometry: BedGeometry::default(),
            gcodes: Gcodes::default(),
            tokens: Tokens::default(),
            jog: JogLimits::default(),
            response_timeout: Duration::from_secs(3),
            init_timeout: Duration::from_secs(60),
            boot_settle: Duration::from_secs(2),
            home_on_connect: true,
            grid_from_firmware: false,
            feedrate: 3000.0,
            z_feedrate: 300.0,
            travel_height: 5.0,
            probe_height: 0.0,
            max_bed_temperature: 120.0,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.geometry.validate()?;
        self.gcodes.validate()?;
        self.jog.validate()?;
        if self.tokens.ok.trim().is_empty() {
            return Err("acknowledgement token must not be empty".to_string());
        }
        if self.response_timeout.is_zero() || self.init_timeout.is_zero() {
            return Err("timeouts must be greater than zero".to_string());
        }
        for (name, value) in [("feedrate", self.feedrate), ("z feedrate", self.z_feedrate)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }
        if !(self.travel_height.is_finite() && self.probe_height.is_finite()) {
            return Err("travel and probe heights must be finite".to_string());
        }
        if !(self.max_bed_temperature.is_finite() && self.max_bed_temperature > 0.0) {
            return Err(format!("maximum bed temperature must be positive, got {}", self.max_bed_temperature));
        }
        Ok(())
    }
}
