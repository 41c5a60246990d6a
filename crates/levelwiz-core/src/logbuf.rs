use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Traffic log shared between the serial transport and the UI.
pub type SharedLog = Arc<Mutex<LogStore>>;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub elapsed: Duration,
    pub direction: Direction,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Direction {
    Rx,
    Tx,
    /// Host-side remark, e.g. port opened or closed.
    Note,
}

pub struct LogStore {
    started: Instant,
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    show_rx: bool,
    show_tx: bool,
    revision: u64,
}

impl LogStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            started: Instant::now(),
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
            show_rx: true,
            show_tx: true,
            revision: 0,
        }
    }

    pub fn shared(max_entries: usize) -> SharedLog {
        Arc::new(Mutex::new(Self::new(max_entries)))
    }

    pub fn set_filter(&mut self, show_rx: bool, show_tx: bool) {
        self.show_rx = show_rx;
        self.show_tx = show_tx;
        self.revision += 1;
    }

    pub fn push(&mut self, direction: Direction, text: impl Into<String>) {
        self.entries.push_back(LogEntry {
            elapsed: self.started.elapsed(),
            direction,
            text: text.into(),
        });
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
        self.revision += 1;
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.push(Direction::Note, text);
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bumped on every change, lets the UI skip re-rendering an unchanged log.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.revision += 1;
    }

    pub fn to_text(&self, show_timestamp: bool) -> String {
        let mut result = String::new();
        for entry in &self.entries {
            let prefix = match entry.direction {
                Direction::Rx if !self.show_rx => continue,
                Direction::Tx if !self.show_tx => continue,
                Direction::Rx => "<< ",
                Direction::Tx => ">> ",
                Direction::Note => "-- ",
            };

            if show_timestamp {
                let secs = entry.elapsed.as_secs();
                let millis = entry.elapsed.subsec_millis();
                result.push_str(&format!("[{secs:>5}.{millis:03}] "));
            }
            result.push_str(prefix);
            result.push_str(entry.text.trim_end());
            result.push('\n');
        }
        result
    }
}
