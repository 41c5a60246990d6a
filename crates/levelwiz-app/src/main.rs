slint::include_modules!();

mod cli;
mod settings;

use anyhow::Result;
use clap::Parser;
use levelwiz_core::{LevelingError, LogStore, MeshReport, SerialOpener, SerialService, Session, SessionState, SharedLog};
use slint::{ModelRc, SharedString, StandardListViewItem, VecModel};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type SharedSession = Rc<RefCell<Session<SerialOpener>>>;

const PORTS_INTERVAL: Duration = Duration::from_secs(4);
const POSITION_INTERVAL: Duration = Duration::from_millis(2500);
const TEMPERATURE_INTERVAL: Duration = Duration::from_secs(3);
const LOG_INTERVAL: Duration = Duration::from_millis(100);
const LOG_CAPACITY: usize = 2000;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let file = settings::load(args.config.as_deref())?;
    let launch = settings::resolve(&args, file)?;

    let log = LogStore::shared(LOG_CAPACITY);
    let opener = SerialOpener::new(launch.serial.clone(), log.clone());
    let session: SharedSession = Rc::new(RefCell::new(Session::new(opener, launch.session.clone())?));
    tracing::info!(
        "bed {}x{} mm, {} probe points",
        launch.session.geometry.width,
        launch.session.geometry.depth,
        session.borrow().count()
    );

    let app = MainWindow::new()?;
    app.set_selected_baud(launch.baud.to_string().into());
    app.set_step_text(session.borrow().step().to_string().into());
    app.set_export_path(launch.export_path.display().to_string().into());
    if let Some(port) = &launch.port {
        app.set_selected_port(port.as_str().into());
    }
    refresh_ports(&app);
    render(&app, &session.borrow());

    // Connect
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_connect_clicked(move || {
            let app = app_weak.unwrap();
            let port_display = app.get_selected_port().to_string();
            let port = port_name(&port_display);
            if port.is_empty() {
                app.set_error_text("Select a serial port first".into());
                return;
            }
            let baud = match app.get_selected_baud().parse::<u32>() {
                Ok(baud) if baud > 0 => baud,
                _ => {
                    app.set_error_text(format!("Invalid baud rate: {}", app.get_selected_baud()).into());
                    return;
                }
            };

            app.set_error_text("".into());
            act(&app, &session, "Connect", |s| {
                s.connect(&port, baud)?;
                let report = match s.mesh_report().copied() {
                    Some(report) => report,
                    None => match s.query_mesh_info() {
                        Ok(report) => report,
                        Err(e @ LevelingError::Transport { .. }) => return Err(e),
                        Err(e) => {
                            tracing::warn!("firmware mesh query failed: {e}");
                            MeshReport::default()
                        }
                    },
                };
                let table = (s.config().geometry.columns, s.config().geometry.rows);
                Ok(match report.grid {
                    Some(grid) if grid != table => format!(
                        "Connected to {port}. Firmware mesh is {}x{} but the table is {}x{}; \
                         set --columns/--rows or use --grid-from-firmware",
                        grid.0, grid.1, table.0, table.1
                    ),
                    _ => format!("Connected to {port}, move to the first point"),
                })
            });
        });
    }

    // Disconnect
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_disconnect_clicked(move || {
            let app = app_weak.unwrap();
            session.borrow_mut().disconnect();
            app.set_status_text("Disconnected".into());
            render(&app, &session.borrow());
        });
    }

    // Refresh ports
    {
        let app_weak = app.as_weak();
        app.on_refresh_ports_clicked(move || {
            let app = app_weak.unwrap();
            refresh_ports(&app);
        });
    }

    // Printer controls
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_home_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Home", |s| {
                s.home()?;
                Ok("Homed all axes".to_string())
            });
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_off_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Motors off", |s| {
                s.steppers_off()?;
                Ok("Steppers released".to_string())
            });
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_bed_target_edited(move |text| {
            let app = app_weak.unwrap();
            let Some(celsius) = parse_number(&app, "bed temperature", &text) else {
                return;
            };
            act(&app, &session, "Bed temperature", |s| {
                s.set_bed_temperature(celsius)?;
                Ok(format!("Bed target set to {celsius} °C"))
            });
        });
    }

    // Leveling
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_step_edited(move |text| {
            let app = app_weak.unwrap();
            let Some(step) = parse_number(&app, "step", &text) else {
                return;
            };
            act(&app, &session, "Step", |s| {
                s.set_step(step)?;
                Ok(format!("Step size {step} mm"))
            });
            app.set_step_text(session.borrow().step().to_string().into());
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_jog_up_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Jog up", |s| Ok(format!("Zc {:+.3} mm", s.jog_up()?)));
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_jog_down_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Jog down", |s| Ok(format!("Zc {:+.3} mm", s.jog_down()?)));
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_next_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Move", |s| {
                s.move_to_next_point()?;
                Ok(at_point(s))
            });
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_save_point_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Save point", |s| {
                s.save_point()?;
                Ok(after_save(s))
            });
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_save_and_next(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Save point", |s| {
                s.save_point()?;
                if s.state() == SessionState::Connected {
                    s.move_to_next_point()?;
                }
                Ok(after_save(s))
            });
        });
    }
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_save_mesh_clicked(move || {
            let app = app_weak.unwrap();
            act(&app, &session, "Save to EEPROM", |s| {
                s.save_mesh()?;
                Ok("Mesh stored in EEPROM".to_string())
            });
        });
    }

    // Export
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        app.on_export_clicked(move || {
            let app = app_weak.unwrap();
            let path = PathBuf::from(app.get_export_path().as_str());
            let text = match session.borrow().export() {
                Ok(text) => text,
                Err(e) => {
                    app.set_status_text(format!("Export failed: {e}").into());
                    return;
                }
            };
            match std::fs::write(&path, text) {
                Ok(()) => {
                    tracing::info!("mesh exported to {}", path.display());
                    app.set_status_text(format!("Mesh written to {}", path.display()).into());
                }
                Err(e) => {
                    tracing::warn!("export to {} failed: {e}", path.display());
                    app.set_status_text(format!("Cannot write {}: {e}", path.display()).into());
                }
            }
        });
    }

    // Traffic console
    {
        let app_weak = app.as_weak();
        let log = log.clone();
        app.on_clear_clicked(move || {
            let app = app_weak.unwrap();
            log.lock().clear();
            update_log_display(&app, &log);
        });
    }
    {
        let app_weak = app.as_weak();
        let log = log.clone();
        app.on_display_options_changed(move || {
            let app = app_weak.unwrap();
            log.lock().set_filter(app.get_show_rx(), app.get_show_tx());
            update_log_display(&app, &log);
        });
    }
    {
        let app_weak = app.as_weak();
        app.on_dismiss_error(move || {
            let app = app_weak.unwrap();
            app.set_error_text("".into());
        });
    }

    let ports_timer = slint::Timer::default();
    {
        let app_weak = app.as_weak();
        ports_timer.start(slint::TimerMode::Repeated, PORTS_INTERVAL, move || {
            let app = app_weak.unwrap();
            if !app.get_is_connected() {
                refresh_ports(&app);
            }
        });
    }

    let position_timer = slint::Timer::default();
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        position_timer.start(slint::TimerMode::Repeated, POSITION_INTERVAL, move || {
            let app = app_weak.unwrap();
            poll(&app, &session, |s| {
                let pos = s.query_position()?;
                app.set_position_text(format!("X: {:.2} Y: {:.2} Z: {:.2}", pos.x, pos.y, pos.z).into());
                Ok(())
            });
        });
    }

    let temperature_timer = slint::Timer::default();
    {
        let app_weak = app.as_weak();
        let session = session.clone();
        temperature_timer.start(slint::TimerMode::Repeated, TEMPERATURE_INTERVAL, move || {
            let app = app_weak.unwrap();
            poll(&app, &session, |s| {
                if let Some(bed) = s.query_temperature()?.bed {
                    app.set_bed_text(format!("Bed: {:.1} / {:.1} °C", bed.current, bed.target).into());
                }
                Ok(())
            });
        });
    }

    let log_timer = slint::Timer::default();
    {
        let app_weak = app.as_weak();
        let log = log.clone();
        let mut seen = u64::MAX;
        log_timer.start(slint::TimerMode::Repeated, LOG_INTERVAL, move || {
            let revision = log.lock().revision();
            if revision != seen {
                seen = revision;
                update_log_display(&app_weak.unwrap(), &log);
            }
        });
    }

    app.run()?;

    session.borrow_mut().disconnect();
    tracing::info!("bye");
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info,levelwiz_core=debug" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(verbose))
        .init();
}

/// Runs a user action and reports its outcome. Connection failures go to the
/// blocking banner, everything else to the status line.
fn act<F>(app: &MainWindow, session: &SharedSession, what: &str, op: F)
where
    F: FnOnce(&mut Session<SerialOpener>) -> Result<String, LevelingError>,
{
    let Ok(mut guard) = session.try_borrow_mut() else {
        return;
    };
    let result = op(&mut guard);
    drop(guard);

    match result {
        Ok(status) => app.set_status_text(status.into()),
        Err(e) => show_error(app, what, &e),
    }
    render(app, &session.borrow());
}

/// Background queries; skipped unless the printer is idle.
fn poll<F>(app: &MainWindow, session: &SharedSession, op: F)
where
    F: FnOnce(&mut Session<SerialOpener>) -> Result<(), LevelingError>,
{
    let Ok(mut guard) = session.try_borrow_mut() else {
        return;
    };
    if !matches!(guard.state(), SessionState::Connected | SessionState::Complete) {
        return;
    }
    let result = op(&mut guard);
    drop(guard);

    match result {
        Ok(()) => {}
        Err(e @ LevelingError::Transport { .. }) => {
            show_error(app, "Poll", &e);
            render(app, &session.borrow());
        }
        Err(e) => tracing::debug!("poll skipped: {e}"),
    }
}

fn show_error(app: &MainWindow, what: &str, e: &LevelingError) {
    match e {
        LevelingError::Connection { .. } | LevelingError::Transport { .. } => {
            tracing::error!("{what}: {e}");
            app.set_error_text(format!("{what} failed: {e}").into());
            app.set_status_text("Disconnected".into());
        }
        LevelingError::Validation(reason) => {
            app.set_status_text(reason.as_str().into());
        }
        _ => {
            tracing::warn!("{what}: {e}");
            app.set_status_text(format!("{what} failed: {e}. Try again.").into());
        }
    }
}

fn parse_number(app: &MainWindow, what: &str, text: &str) -> Option<f64> {
    match text.trim().parse::<f64>() {
        Ok(value) => Some(value),
        Err(_) => {
            app.set_status_text(format!("Invalid {what}: {text}").into());
            None
        }
    }
}

fn at_point(session: &Session<SerialOpener>) -> String {
    match session.current_point() {
        Some(p) => format!(
            "At point {} of {} (row {}, column {}), adjust Z and save",
            session.index() + 1,
            session.count(),
            p.row,
            p.column
        ),
        None => "All points saved".to_string(),
    }
}

fn after_save(session: &Session<SerialOpener>) -> String {
    if session.state() == SessionState::Complete {
        "All points saved and stored, export the mesh or disconnect".to_string()
    } else {
        format!("Saved {} of {}. {}", session.saved_count(), session.count(), at_point(session))
    }
}

fn render(app: &MainWindow, session: &Session<SerialOpener>) {
    let connected = session.is_connected();
    app.set_is_connected(connected);
    app.set_is_complete(session.state() == SessionState::Complete);
    app.set_can_export(session.count() > 0 && session.saved_count() == session.count());
    app.set_progress_text(format!("{} / {}", session.saved_count(), session.count()).into());
    app.set_progress(session.saved_count() as f32 / session.count().max(1) as f32);

    app.set_mesh_text(match session.mesh_report() {
        Some(report) if connected => format!("Mesh: {report}").into(),
        _ => "Mesh: ??".into(),
    });

    if connected {
        app.set_pending_text(format!("Zc: {:+.3}", session.pending_offset()).into());
    } else {
        app.set_pending_text("Zc: ??".into());
        app.set_position_text("X: ?? Y: ?? Z: ??".into());
        app.set_bed_text("Bed: ??".into());
    }

    let rows: Vec<ModelRc<StandardListViewItem>> = session
        .points()
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let marker = if connected && i == session.index() { "▶" } else { "" };
            let z = p.z.map(|z| format!("{z:+.3}")).unwrap_or_else(|| "-".to_string());
            let cells = vec![
                cell(marker),
                cell(&p.row.to_string()),
                cell(&p.column.to_string()),
                cell(&format!("{:.1}", p.x)),
                cell(&format!("{:.1}", p.y)),
                cell(&z),
            ];
            ModelRc::new(VecModel::from(cells))
        })
        .collect();
    app.set_mesh_rows(ModelRc::new(VecModel::from(rows)));
}

fn cell(text: &str) -> StandardListViewItem {
    StandardListViewItem::from(text)
}

/// The device part of a port label, e.g. "COM3" from "COM3 (1A86:7523 ...)".
fn port_name(display: &str) -> String {
    display.split_whitespace().next().unwrap_or("").to_string()
}

fn refresh_ports(app: &MainWindow) {
    let port_names: Vec<SharedString> = SerialService::list_ports().iter().map(|p| p.label().into()).collect();

    let port_list = Rc::new(VecModel::from(port_names.clone()));
    app.set_port_list(port_list.into());

    if !port_names.is_empty() && app.get_selected_port().is_empty() {
        app.set_selected_port(port_names[0].clone());
    }
}

fn update_log_display(app: &MainWindow, log: &SharedLog) {
    let text = log.lock().to_text(app.get_show_timestamp());
    app.set_log_text(text.into());
}
