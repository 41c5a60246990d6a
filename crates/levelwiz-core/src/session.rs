//! Interactive leveling session.
//!
//! The session walks the probe grid in row-major order. At each point the
//! user jogs the nozzle until it just touches the bed, then saves the
//! point; the accumulated jog becomes that point's Z offset. Every printer
//! interaction is a single blocking exchange: one line out, lines back
//! until the acknowledgement, an error line, or the timeout.

use levelwiz_decode::{parse_position, parse_temperatures, LineKind, MeshReport, Position, Temperatures, Tokens};
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::error::{LevelingError, Result};
use crate::gcode::{self, format_mm};
use crate::mesh::{self, BedGeometry, ProbePoint};
use crate::transport::{Opener, Transport, TransportError};

/// Upper bound on leftover lines discarded before a new command.
const STALE_LINE_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// An exchange is outstanding.
    Busy,
    /// Connected and every point has been saved.
    Complete,
}

/// Lines received for one command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Everything before the acknowledgement.
    pub lines: Vec<String>,
    /// The acknowledgement line itself; Marlin appends reports to it.
    pub ack: String,
}

impl Reply {
    pub fn all_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.ack.as_str()))
    }
}

pub struct Session<O: Opener> {
    opener: O,
    config: SessionConfig,
    link: Option<O::Transport>,
    port: Option<String>,
    busy: bool,
    points: Vec<ProbePoint>,
    index: usize,
    /// Jog total for the current point, in micrometres so repeated steps sum exactly.
    pending_um: i64,
    step: f64,
    mesh_report: Option<MeshReport>,
}

fn to_um(mm: f64) -> i64 {
    (mm * 1000.0).round() as i64
}

fn to_mm(um: i64) -> f64 {
    um as f64 / 1000.0
}

impl<O: Opener> Session<O> {
    pub fn new(opener: O, config: SessionConfig) -> Result<Self> {
        config.validate().map_err(LevelingError::Validation)?;
        Ok(Self {
            opener,
            points: config.geometry.points(),
            step: config.jog.step,
            config,
            link: None,
            port: None,
            busy: false,
            index: 0,
            pending_um: 0,
            mesh_report: None,
        })
    }

    pub fn state(&self) -> SessionState {
        if self.link.is_none() {
            SessionState::Disconnected
        } else if self.busy {
            SessionState::Busy
        } else if self.index >= self.points.len() {
            SessionState::Complete
        } else {
            SessionState::Connected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    pub fn points(&self) -> &[ProbePoint] {
        &self.points
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    pub fn saved_count(&self) -> usize {
        self.points.iter().filter(|p| p.z.is_some()).count()
    }

    /// The point being leveled; `None` once all points are saved.
    pub fn current_point(&self) -> Option<&ProbePoint> {
        self.points.get(self.index)
    }

    /// Jog total not yet written into the current point, in mm.
    pub fn pending_offset(&self) -> f64 {
        to_mm(self.pending_um)
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Last report received for the firmware's mesh query.
    pub fn mesh_report(&self) -> Option<&MeshReport> {
        self.mesh_report.as_ref()
    }

    /// Replaces the bed geometry and rebuilds the probe table. Only while disconnected.
    pub fn set_geometry(&mut self, geometry: BedGeometry) -> Result<()> {
        if self.is_connected() {
            return Err(LevelingError::Validation(
                "bed geometry cannot change while connected".to_string(),
            ));
        }
        geometry.validate().map_err(LevelingError::Validation)?;
        self.config.geometry = geometry;
        self.restart_table();
        Ok(())
    }

    pub fn set_step(&mut self, step: f64) -> Result<()> {
        let limits = self.config.jog;
        if !(step > 0.0 && limits.contains(step)) {
            return Err(LevelingError::Validation(format!(
                "step {step} mm is outside {}..={} mm",
                limits.min_step, limits.max_step
            )));
        }
        debug!("jog step set to {step} mm");
        self.step = step;
        Ok(())
    }

    pub fn connect(&mut self, port: &str, baud: u32) -> Result<()> {
        if let Some(current) = &self.port {
            return Err(LevelingError::Validation(format!("already connected to {current}")));
        }

        info!("connecting to {port} at {baud} baud");
        let link = self.opener.open(port, baud).map_err(|e| {
            warn!("cannot open {port}: {e}");
            let reason = match e {
                TransportError::Open { reason, .. } => reason,
                other => other.to_string(),
            };
            LevelingError::Connection {
                port: port.to_string(),
                reason,
            }
        })?;
        self.link = Some(link);
        self.port = Some(port.to_string());
        self.mesh_report = None;

        if let Err(e) = self.initialize() {
            warn!("initialization on {port} failed: {e}");
            self.teardown();
            return Err(LevelingError::Connection {
                port: port.to_string(),
                reason: e.to_string(),
            });
        }

        self.restart_table();
        info!("connected to {port}; {} probe points to level", self.points.len());
        Ok(())
    }

    /// Closes the link from any state. The probe table is kept for export.
    pub fn disconnect(&mut self) {
        self.teardown();
    }

    pub fn move_to_next_point(&mut self) -> Result<()> {
        let point = self.require_point()?;
        let vars = [
            ("x", format_mm(point.x)),
            ("y", format_mm(point.y)),
            ("feedrate", format_mm(self.config.feedrate)),
            ("z_feedrate", format_mm(self.config.z_feedrate)),
            ("travel_height", format_mm(self.config.travel_height)),
            ("probe_height", format_mm(self.config.probe_height)),
        ];
        let commands: Vec<String> = self
            .config
            .gcodes
            .move_to
            .iter()
            .map(|template| gcode::render(template, &vars))
            .collect();

        info!(
            "moving to point ({}, {}) at X{} Y{}",
            point.row,
            point.column,
            format_mm(point.x),
            format_mm(point.y)
        );
        let timeout = self.config.response_timeout;
        for command in &commands {
            self.exchange(command, timeout)?;
        }
        // back at probe height, earlier jogs no longer apply
        self.pending_um = 0;
        Ok(())
    }

    /// Moves the nozzle by `delta` mm and adds it to the pending offset.
    /// Returns the new pending offset.
    pub fn jog(&mut self, delta: f64) -> Result<f64> {
        self.require_point()?;
        let limits = self.config.jog;
        if !limits.contains(delta) {
            return Err(LevelingError::Validation(format!(
                "jog of {delta} mm is outside ±{}..={} mm",
                limits.min_step, limits.max_step
            )));
        }

        let delta_um = to_um(delta);
        let command = gcode::render(
            &self.config.gcodes.jog,
            &[
                ("delta", format_mm(to_mm(delta_um))),
                ("z_feedrate", format_mm(self.config.z_feedrate)),
            ],
        );
        let relative = self.config.gcodes.relative_mode.clone();
        let absolute = self.config.gcodes.absolute_mode.clone();
        let timeout = self.config.response_timeout;

        // relative mode may have taken effect even when its exchange failed; always restore
        let moved = self.exchange(&relative, timeout).and_then(|_| self.exchange(&command, timeout));
        if moved.is_ok() {
            self.pending_um += delta_um;
        }
        let restored = if self.is_connected() {
            self.exchange(&absolute, timeout).map(|_| ())
        } else {
            Ok(())
        };

        match (moved, restored) {
            (Err(e), restored) => {
                if let Err(re) = restored {
                    warn!("could not restore absolute positioning: {re}");
                }
                Err(e)
            }
            (Ok(_), Err(e)) => Err(e),
            (Ok(_), Ok(())) => {
                debug!("jogged {delta_um} um, pending offset {} mm", self.pending_offset());
                Ok(self.pending_offset())
            }
        }
    }

    pub fn jog_up(&mut self) -> Result<f64> {
        self.jog(self.step)
    }

    pub fn jog_down(&mut self) -> Result<f64> {
        self.jog(-self.step)
    }

    /// Stores the pending offset in the current point and advances to the next.
    /// After the last point the finish commands (EEPROM save) are sent.
    pub fn save_point(&mut self) -> Result<()> {
        let point = self.require_point()?;
        let z_um = self.pending_um;
        let command = gcode::render(
            &self.config.gcodes.accept,
            &[
                ("row", point.row.to_string()),
                ("column", point.column.to_string()),
                ("index", self.index.to_string()),
                ("z", format_mm(to_mm(z_um))),
                ("probe_z", format_mm(to_mm(to_um(self.config.probe_height) + z_um))),
            ],
        );
        self.exchange(&command, self.config.response_timeout)?;

        let z = to_mm(z_um);
        self.points[self.index].z = Some(z);
        self.pending_um = 0;
        self.index += 1;
        info!(
            "saved point ({}, {}) with offset {z} mm ({}/{})",
            point.row,
            point.column,
            self.index,
            self.points.len()
        );

        if self.index == self.points.len() {
            info!("all points saved, storing mesh");
            self.run_finish()?;
        }
        Ok(())
    }

    /// Sends the finish commands again, e.g. after a failed EEPROM write.
    pub fn save_mesh(&mut self) -> Result<()> {
        self.require_idle()?;
        self.run_finish()
    }

    /// Text form of the table: one `row, column, z_offset` line per point.
    pub fn export(&self) -> Result<String> {
        mesh::render_export(&self.points).ok_or_else(|| {
            LevelingError::Validation(format!(
                "leveling is not complete: {} of {} points saved",
                self.saved_count(),
                self.points.len()
            ))
        })
    }

    pub fn home(&mut self) -> Result<()> {
        let command = self.config.gcodes.home.clone();
        self.exchange(&command, self.config.init_timeout)?;
        self.pending_um = 0;
        Ok(())
    }

    pub fn steppers_off(&mut self) -> Result<()> {
        let command = self.config.gcodes.steppers_off.clone();
        self.exchange(&command, self.config.response_timeout).map(|_| ())
    }

    pub fn query_position(&mut self) -> Result<Position> {
        let command = self.config.gcodes.position.clone();
        let reply = self.exchange(&command, self.config.response_timeout)?;
        let found = reply.all_lines().find_map(parse_position);
        found.ok_or_else(|| LevelingError::Protocol {
            command,
            response: format!("no position in reply: {}", reply.lines.join(" | ")),
        })
    }

    pub fn query_temperature(&mut self) -> Result<Temperatures> {
        let command = self.config.gcodes.temperature.clone();
        let reply = self.exchange(&command, self.config.response_timeout)?;
        let found = reply.all_lines().find_map(parse_temperatures);
        found.ok_or_else(|| LevelingError::Protocol {
            command,
            response: format!("no temperatures in reply: {}", reply.ack),
        })
    }

    pub fn set_bed_temperature(&mut self, celsius: f64) -> Result<()> {
        let max = self.config.max_bed_temperature;
        if !(celsius.is_finite() && (0.0..=max).contains(&celsius)) {
            return Err(LevelingError::Validation(format!(
                "bed temperature {celsius} °C is outside 0..={max} °C"
            )));
        }
        let command = gcode::render(&self.config.gcodes.bed_temperature, &[("celsius", format_mm(celsius))]);
        self.exchange(&command, self.config.response_timeout).map(|_| ())
    }

    pub fn query_mesh_info(&mut self) -> Result<MeshReport> {
        self.fetch_mesh_report(self.config.response_timeout)
    }

    fn fetch_mesh_report(&mut self, timeout: Duration) -> Result<MeshReport> {
        let command = self.config.gcodes.mesh_info.clone();
        let reply = self.exchange(&command, timeout)?;
        let report = MeshReport::from_lines(reply.all_lines());
        self.mesh_report = Some(report);
        Ok(report)
    }

    fn initialize(&mut self) -> Result<()> {
        self.settle()?;

        let timeout = self.config.init_timeout;
        let mut sequence = self.config.gcodes.init.clone();
        if self.config.home_on_connect {
            sequence.push(self.config.gcodes.home.clone());
        }
        for command in &sequence {
            self.exchange(command, timeout)?;
        }

        if self.config.grid_from_firmware {
            let report = self.fetch_mesh_report(timeout)?;
            match report.grid {
                Some((columns, rows)) => {
                    let geometry = BedGeometry {
                        rows,
                        columns,
                        ..self.config.geometry
                    };
                    geometry.validate().map_err(LevelingError::Validation)?;
                    info!("firmware reports a {columns}x{rows} mesh");
                    self.config.geometry = geometry;
                }
                None => warn!(
                    "firmware did not report its mesh size, keeping {}x{}",
                    self.config.geometry.columns, self.config.geometry.rows
                ),
            }
        }

        let start = self.config.gcodes.mesh_start.clone();
        self.exchange(&start, timeout)?;
        Ok(())
    }

    /// Discards boot chatter until the firmware stays quiet for `boot_settle`.
    fn settle(&mut self) -> Result<()> {
        let quiet = self.config.boot_settle;
        if quiet.is_zero() {
            return Ok(());
        }
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };

        // auto-reporting firmware is never quiet; give up after a while
        let give_up = Instant::now() + quiet * 3;
        let mut discarded = 0usize;
        while Instant::now() < give_up {
            match link.read_line(quiet) {
                Ok(Some(line)) => {
                    trace!("boot: {line}");
                    discarded += 1;
                }
                Ok(None) => break,
                Err(source) => {
                    return Err(LevelingError::Transport {
                        command: "(firmware boot)".to_string(),
                        source,
                    })
                }
            }
        }
        debug!("firmware settled after {discarded} boot lines");
        Ok(())
    }

    fn run_finish(&mut self) -> Result<()> {
        let commands = self.config.gcodes.finish.clone();
        let timeout = self.config.response_timeout;
        for command in &commands {
            self.exchange(command, timeout)?;
        }
        Ok(())
    }

    fn require_idle(&self) -> Result<()> {
        match self.state() {
            SessionState::Disconnected => Err(LevelingError::Validation("not connected to a printer".to_string())),
            SessionState::Busy => Err(LevelingError::Validation("a command is still outstanding".to_string())),
            SessionState::Connected | SessionState::Complete => Ok(()),
        }
    }

    fn require_point(&self) -> Result<ProbePoint> {
        self.require_idle()?;
        self.current_point().copied().ok_or_else(|| {
            LevelingError::Validation(format!("leveling is complete; all {} points are saved", self.points.len()))
        })
    }

    fn restart_table(&mut self) {
        self.points = self.config.geometry.points();
        self.index = 0;
        self.pending_um = 0;
    }

    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.busy = false;
        if let Some(port) = self.port.take() {
            info!("disconnected from {port}");
        }
    }

    fn exchange(&mut self, command: &str, timeout: Duration) -> Result<Reply> {
        self.require_idle()?;
        let Some(link) = self.link.as_mut() else {
            return Err(LevelingError::Validation("not connected to a printer".to_string()));
        };

        self.busy = true;
        let result = run_exchange(link, &self.config.tokens, command, timeout);
        self.busy = false;

        match &result {
            Ok(_) => {}
            Err(LevelingError::Transport { source, .. }) => {
                warn!("link lost during `{command}`: {source}");
                self.teardown();
            }
            Err(e) => warn!("{e}"),
        }
        result
    }
}

impl<O: Opener> Drop for Session<O> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_exchange<T: Transport>(link: &mut T, tokens: &Tokens, command: &str, timeout: Duration) -> Result<Reply> {
    let lost = |source| LevelingError::Transport {
        command: command.to_string(),
        source,
    };

    // Marlin follows an error line with "ok"; do not let it acknowledge the next command
    for _ in 0..STALE_LINE_LIMIT {
        match link.read_line(Duration::ZERO).map_err(lost)? {
            Some(line) => debug!("discarding stale line `{line}`"),
            None => break,
        }
    }

    debug!("> {command}");
    link.write_line(command).map_err(lost)?;

    let mut reply = Reply::default();
    let mut deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(line) = link.read_line(remaining).map_err(lost)? else {
            return Err(LevelingError::Timeout {
                command: command.to_string(),
                timeout,
            });
        };

        match tokens.classify(&line) {
            LineKind::Ack(_) => {
                debug!("< {line}");
                reply.ack = line.clone();
                return Ok(reply);
            }
            LineKind::Error(text) => {
                return Err(LevelingError::Protocol {
                    command: command.to_string(),
                    response: text.to_string(),
                })
            }
            LineKind::Busy => {
                trace!("firmware busy with `{command}`");
                deadline = Instant::now() + timeout;
            }
            LineKind::Info(text) => {
                trace!("< {text}");
                reply.lines.push(text.to_string());
            }
        }

        // chatter without an ack must not hold the exchange open past its window
        if Instant::now() >= deadline {
            return Err(LevelingError::Timeout {
                command: command.to_string(),
                timeout,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct MockOpener(Option<MockTransport>);

    impl Opener for MockOpener {
        type Transport = MockTransport;

        fn open(&mut self, port: &str, _baud: u32) -> std::result::Result<MockTransport, TransportError> {
            self.0.take().ok_or_else(|| TransportError::Open {
                port: port.to_string(),
                reason: "no such device".to_string(),
            })
        }
    }

    fn quick_config() -> SessionConfig {
        SessionConfig {
            boot_settle: Duration::ZERO,
            home_on_connect: false,
            response_timeout: Duration::from_millis(200),
            init_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        }
    }

    /// A mock whose reads drain lines queued by the scripted writes.
    fn scripted(script: impl Fn(&str) -> Vec<&'static str> + Send + 'static) -> (MockTransport, Arc<Mutex<Vec<String>>>) {
        let queue: Arc<Mutex<VecDeque<String>>> = Arc::default();
        let written: Arc<Mutex<Vec<String>>> = Arc::default();
        let mut mock = MockTransport::new();

        let (q, w) = (queue.clone(), written.clone());
        mock.expect_write_line().returning(move |line| {
            w.lock().unwrap().push(line.to_string());
            q.lock().unwrap().extend(script(line).into_iter().map(String::from));
            Ok(())
        });
        mock.expect_read_line()
            .returning(move |_| Ok(queue.lock().unwrap().pop_front()));
        mock.expect_close().returning(|| ());
        (mock, written)
    }

    #[test]
    fn open_failure_is_a_connection_error() {
        let mut session = Session::new(MockOpener(None), quick_config()).unwrap();
        let err = session.connect("/dev/ttyACM0", 115_200).unwrap_err();
        match err {
            LevelingError::Connection { port, reason } => {
                assert_eq!(port, "/dev/ttyACM0");
                assert_eq!(reason, "no such device");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn connect_sends_the_init_sequence() {
        let (mock, written) = scripted(|_| vec!["ok"]);
        let config = SessionConfig {
            home_on_connect: true,
            ..quick_config()
        };
        let mut session = Session::new(MockOpener(Some(mock)), config).unwrap();
        session.connect("/dev/ttyACM0", 250_000).unwrap();
        assert_eq!(*written.lock().unwrap(), ["M84 S0", "G28", "G29 S1"]);
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.port(), Some("/dev/ttyACM0"));
    }

    #[test]
    fn busy_keepalive_extends_the_wait() {
        let (mock, _) = scripted(|line| {
            if line == "G28" {
                vec!["echo:busy: processing", "echo:busy: processing", "X:0.00 Y:0.00 Z:10.00", "ok"]
            } else {
                vec!["ok"]
            }
        });
        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        session.connect("p", 115_200).unwrap();
        session.home().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn stale_ok_does_not_acknowledge_the_next_command() {
        // firmware sends an error followed by a late "ok"; the next command must wait for its own ack
        let (mock, written) = scripted(|line| match line {
            "M84" => vec!["echo:Unknown command: \"M84\"", "ok"],
            "M114" => vec!["X:1.00 Y:2.00 Z:3.00 E:0.00 Count X:0 Y:0 Z:0", "ok"],
            _ => vec!["ok"],
        });
        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        session.connect("p", 115_200).unwrap();

        let err = session.steppers_off().unwrap_err();
        assert!(matches!(err, LevelingError::Protocol { .. }));
        assert!(err.is_retryable());

        let pos = session.query_position().unwrap();
        assert_eq!((pos.x, pos.y, pos.z), (1.0, 2.0, 3.0));
        assert_eq!(written.lock().unwrap().last().map(String::as_str), Some("M114"));
    }

    #[test]
    fn write_failure_tears_the_session_down() {
        let mut mock = MockTransport::new();
        let mut writes = 0;
        mock.expect_read_line().returning(|t| if t.is_zero() { Ok(None) } else { Ok(Some("ok".to_string())) });
        mock.expect_write_line().returning(move |_| {
            writes += 1;
            if writes <= 2 {
                Ok(())
            } else {
                Err(TransportError::Io("device unplugged".to_string()))
            }
        });
        mock.expect_close().times(1).returning(|| ());

        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        session.connect("p", 115_200).unwrap();
        let err = session.move_to_next_point().unwrap_err();
        assert!(matches!(err, LevelingError::Transport { .. }));
        assert!(!err.is_retryable());
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.points().len(), 9);
    }

    #[test]
    fn home_clears_pending_and_motors_off() {
        let (mock, written) = scripted(|_| vec!["ok"]);
        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        session.connect("p", 115_200).unwrap();
        session.jog(0.1).unwrap();

        session.home().unwrap();
        assert_eq!(session.pending_offset(), 0.0);
        session.steppers_off().unwrap();

        let written = written.lock().unwrap();
        assert_eq!(&written[written.len() - 2..], ["G28", "M84"]);
    }

    #[test]
    fn accept_can_send_the_absolute_height() {
        let (mock, written) = scripted(|_| vec!["ok"]);
        let mut config = quick_config();
        config.probe_height = 0.2;
        config.gcodes.accept = "G29 S3 I{column} J{row} Z{probe_z}".to_string();
        let mut session = Session::new(MockOpener(Some(mock)), config).unwrap();
        session.connect("p", 115_200).unwrap();

        session.move_to_next_point().unwrap();
        session.jog(-0.05).unwrap();
        session.save_point().unwrap();

        assert_eq!(written.lock().unwrap().last().map(String::as_str), Some("G29 S3 I0 J0 Z0.15"));
        // the table keeps the jog total
        assert_eq!(session.points()[0].z, Some(-0.05));
    }

    #[test]
    fn temperature_from_ack_line() {
        let (mock, _) = scripted(|line| match line {
            "M105" => vec!["ok T:21.3 /0.0 B:20.9 /60.0 @:0 B@:0"],
            _ => vec!["ok"],
        });
        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        session.connect("p", 115_200).unwrap();
        let temps = session.query_temperature().unwrap();
        assert_eq!(temps.bed.map(|b| b.target), Some(60.0));
    }

    #[test]
    fn bed_temperature_bounds() {
        let (mock, written) = scripted(|_| vec!["ok"]);
        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        session.connect("p", 115_200).unwrap();
        assert!(matches!(session.set_bed_temperature(-5.0), Err(LevelingError::Validation(_))));
        assert!(matches!(session.set_bed_temperature(300.0), Err(LevelingError::Validation(_))));
        session.set_bed_temperature(60.0).unwrap();
        assert_eq!(written.lock().unwrap().last().map(String::as_str), Some("M140 S60"));
    }

    #[test]
    fn firmware_grid_replaces_configured_grid() {
        let (mock, _) = scripted(|line| match line {
            "G29 S0" => vec!["Num X,Y: 4,2", "Z search height: 5", "ok"],
            _ => vec!["ok"],
        });
        let config = SessionConfig {
            grid_from_firmware: true,
            ..quick_config()
        };
        let mut session = Session::new(MockOpener(Some(mock)), config).unwrap();
        session.connect("p", 115_200).unwrap();
        assert_eq!(session.count(), 8);
        assert_eq!(session.config().geometry.columns, 4);
        assert_eq!(session.mesh_report().and_then(|r| r.z_search_height), Some(5.0));
        assert_eq!(session.query_mesh_info().unwrap().grid, Some((4, 2)));
    }

    #[test]
    fn geometry_is_locked_while_connected() {
        let (mock, _) = scripted(|_| vec!["ok"]);
        let mut session = Session::new(MockOpener(Some(mock)), quick_config()).unwrap();
        let small = BedGeometry {
            rows: 2,
            columns: 2,
            ..BedGeometry::default()
        };
        session.set_geometry(small).unwrap();
        assert_eq!(session.count(), 4);

        session.connect("p", 115_200).unwrap();
        assert!(session.set_geometry(BedGeometry::default()).is_err());
        session.disconnect();
        assert!(session.set_geometry(BedGeometry::default()).is_ok());
        assert_eq!(session.count(), 9);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SessionConfig {
            jog: crate::config::JogLimits {
                step: 5.0,
                ..Default::default()
            },
            ..quick_config()
        };
        assert!(matches!(
            Session::new(MockOpener(None), config),
            Err(LevelingError::Validation(_))
        ));
    }
}
