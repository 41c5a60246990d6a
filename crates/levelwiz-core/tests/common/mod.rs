//! Scripted stand-in for a Marlin printer on the other end of the link.

#![allow(dead_code)]

use levelwiz_core::{Opener, SessionConfig, Transport, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct PrinterState {
    written: Vec<String>,
    queue: VecDeque<String>,
    /// Command prefix and the lines answered to it; first match wins.
    rules: Vec<(String, Vec<String>)>,
    silent: bool,
    unplugged: bool,
    closes: usize,
    /// Time each line takes to arrive.
    pace: Duration,
    /// Repeated forever once the queue is empty.
    chatter: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakePrinter(Arc<Mutex<PrinterState>>);

impl FakePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `lines` instead of a bare "ok".
    pub fn on(&self, prefix: &str, lines: &[&str]) -> &Self {
        self.0
            .lock()
            .rules
            .push((prefix.to_string(), lines.iter().map(|l| l.to_string()).collect()));
        self
    }

    pub fn clear_rules(&self) {
        self.0.lock().rules.clear();
    }

    /// Stop answering anything.
    pub fn go_silent(&self) {
        self.0.lock().silent = true;
    }

    pub fn wake_up(&self) {
        self.0.lock().silent = false;
    }

    /// Deliver each reply line `pace` after the previous one.
    pub fn pace(&self, pace: Duration) {
        self.0.lock().pace = pace;
    }

    /// Keep emitting `line` (auto-reports, echo spam) whenever nothing else is queued.
    pub fn chatter(&self, line: Option<&str>) {
        self.0.lock().chatter = line.map(str::to_string);
    }

    /// Every read and write fails from now on.
    pub fn unplug(&self) {
        self.0.lock().unplugged = true;
    }

    pub fn written(&self) -> Vec<String> {
        self.0.lock().written.clone()
    }

    pub fn clear_written(&self) {
        self.0.lock().written.clear();
    }

    pub fn closes(&self) -> usize {
        self.0.lock().closes
    }

    pub fn opener(&self) -> FakeOpener {
        FakeOpener {
            printer: self.clone(),
            refuse: None,
        }
    }
}

pub struct FakeLink {
    printer: FakePrinter,
}

impl Transport for FakeLink {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        let mut state = self.printer.0.lock();
        if state.unplugged {
            return Err(TransportError::Io("device unplugged".to_string()));
        }
        state.written.push(line.to_string());
        if state.silent {
            return Ok(());
        }
        let reply = state
            .rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, lines)| lines.clone())
            .unwrap_or_else(|| vec!["ok".to_string()]);
        state.queue.extend(reply);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        let (pace, queued, chatter) = {
            let mut state = self.printer.0.lock();
            if state.unplugged {
                return Err(TransportError::Closed);
            }
            (state.pace, state.queue.pop_front(), state.chatter.clone())
        };

        let from_queue = queued.is_some();
        match queued.or(chatter) {
            Some(line) if pace <= timeout => {
                thread::sleep(pace);
                Ok(Some(line))
            }
            Some(line) => {
                // not here yet; it arrives during a later read
                thread::sleep(timeout);
                if from_queue {
                    self.printer.0.lock().queue.push_front(line);
                }
                Ok(None)
            }
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.printer.0.lock().closes += 1;
    }
}

pub struct FakeOpener {
    printer: FakePrinter,
    pub refuse: Option<String>,
}

impl Opener for FakeOpener {
    type Transport = FakeLink;

    fn open(&mut self, port: &str, _baud: u32) -> Result<FakeLink, TransportError> {
        if let Some(reason) = &self.refuse {
            return Err(TransportError::Open {
                port: port.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(FakeLink {
            printer: self.printer.clone(),
        })
    }
}

/// Defaults with no boot wait, no homing and short timeouts.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        boot_settle: Duration::ZERO,
        home_on_connect: false,
        response_timeout: Duration::from_millis(100),
        init_timeout: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}
