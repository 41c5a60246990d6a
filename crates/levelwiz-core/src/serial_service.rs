use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serialport::SerialPortInfo;
use std::io::{ErrorKind, Read, Write};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::encoding::TextEncoding;
use crate::logbuf::{Direction, SharedLog};
use crate::transport::{Opener, Transport, TransportError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Firmware lines are short; anything longer without a newline is flushed as-is.
const MAX_LINE_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, serial_number, manufacturer, product) = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => (
                "USB".to_string(),
                Some(usb.vid),
                Some(usb.pid),
                usb.serial_number.clone(),
                usb.manufacturer.clone(),
                usb.product.clone(),
            ),
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None, None, None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None, None, None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None, None, None),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            serial_number,
            manufacturer,
            product,
        }
    }
}

impl PortInfo {
    /// Name shown in port pickers, e.g. `/dev/ttyUSB0 (1A86:7523)`.
    pub fn label(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => format!("{} ({:04X}:{:04X})", self.port_name, vid, pid),
            _ => self.port_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineEnding {
    LF,
    CR,
    CRLF,
}

impl LineEnding {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineEnding::LF => b"\n",
            LineEnding::CR => b"\r",
            LineEnding::CRLF => b"\r\n",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub flow_control: serialport::FlowControl,
    pub line_ending: LineEnding,
    pub encoding: TextEncoding,
    /// How long `open` waits for the worker to report the port state.
    pub open_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115_200,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            flow_control: serialport::FlowControl::None,
            line_ending: LineEnding::LF,
            encoding: TextEncoding::Auto,
            open_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
enum SerialEvent {
    Opened,
    Line(String),
    Error(String),
    Closed,
}

enum Command {
    Send(Vec<u8>),
    Close,
}

/// Serial link backed by a worker thread that owns the port.
///
/// The worker splits incoming bytes into lines and forwards them over a
/// channel, so `read_line` can wait with a timeout without touching the
/// device itself.
pub struct SerialService {
    cfg: SerialConfig,
    tx_cmd: Sender<Command>,
    rx_evt: Receiver<SerialEvent>,
    worker: Option<JoinHandle<()>>,
    log: SharedLog,
}

impl SerialService {
    pub fn list_ports() -> Vec<PortInfo> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(PortInfo::from).collect(),
            Err(e) => {
                log::warn!("failed to enumerate serial ports: {e}");
                Vec::new()
            }
        }
    }

    pub fn open(cfg: SerialConfig, log: SharedLog) -> Result<Self, TransportError> {
        let (tx_cmd, rx_cmd) = unbounded::<Command>();
        let (tx_evt, rx_evt) = unbounded::<SerialEvent>();
        let worker_cfg = cfg.clone();
        let worker_log = log.clone();

        let worker = std::thread::Builder::new()
            .name(format!("serial {}", cfg.port_name))
            .spawn(move || run_worker(worker_cfg, rx_cmd, tx_evt, worker_log))
            .map_err(|e| TransportError::Open {
                port: cfg.port_name.clone(),
                reason: format!("cannot start serial worker: {e}"),
            })?;

        let mut service = Self {
            cfg,
            tx_cmd,
            rx_evt,
            worker: Some(worker),
            log,
        };

        let failure = match service.rx_evt.recv_timeout(service.cfg.open_timeout) {
            Ok(SerialEvent::Opened) => {
                log::info!("opened {} at {} baud", service.cfg.port_name, service.cfg.baud_rate);
                service
                    .log
                    .lock()
                    .note(format!("opened {} at {} baud", service.cfg.port_name, service.cfg.baud_rate));
                return Ok(service);
            }
            Ok(SerialEvent::Error(reason)) => reason,
            Ok(_) | Err(RecvTimeoutError::Disconnected) => "port closed while opening".to_string(),
            Err(RecvTimeoutError::Timeout) => format!("no response within {:?}", service.cfg.open_timeout),
        };

        if let Some(worker) = service.worker.take() {
            let _ = service.tx_cmd.send(Command::Close);
            let _ = worker.join();
        }
        Err(TransportError::Open {
            port: service.cfg.port_name.clone(),
            reason: failure,
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.cfg
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }
}

impl Transport for SerialService {
    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(self.cfg.line_ending.as_bytes());
        self.tx_cmd.send(Command::Send(data)).map_err(|_| TransportError::Closed)?;
        self.log.lock().push(Direction::Tx, line);
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx_evt.recv_timeout(remaining) {
                Ok(SerialEvent::Line(line)) => return Ok(Some(line)),
                Ok(SerialEvent::Opened) => continue,
                Ok(SerialEvent::Error(reason)) => {
                    self.close();
                    return Err(TransportError::Io(reason));
                }
                Ok(SerialEvent::Closed) | Err(RecvTimeoutError::Disconnected) => {
                    self.close();
                    return Err(TransportError::Closed);
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx_cmd.send(Command::Close);
            if worker.join().is_err() {
                log::error!("serial worker for {} panicked", self.cfg.port_name);
            }
            self.log.lock().note(format!("closed {}", self.cfg.port_name));
            log::info!("closed {}", self.cfg.port_name);
        }
    }
}

impl Drop for SerialService {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(cfg: SerialConfig, rx_cmd: Receiver<Command>, tx_evt: Sender<SerialEvent>, log: SharedLog) {
    let mut port = match serialport::new(&cfg.port_name, cfg.baud_rate)
        .data_bits(cfg.data_bits)
        .parity(cfg.parity)
        .stop_bits(cfg.stop_bits)
        .flow_control(cfg.flow_control)
        .timeout(POLL_INTERVAL)
        .open()
    {
        Ok(port) => port,
        Err(e) => {
            let _ = tx_evt.send(SerialEvent::Error(format!("open failed: {e}")));
            let _ = tx_evt.send(SerialEvent::Closed);
            return;
        }
    };
    let _ = tx_evt.send(SerialEvent::Opened);

    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match port.read(&mut buf) {
            Ok(n) if n > 0 => {
                pending.extend_from_slice(&buf[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    if !forward_line(&cfg, &raw, &tx_evt, &log) {
                        return;
                    }
                }
                if pending.len() > MAX_LINE_BYTES {
                    let raw: Vec<u8> = pending.drain(..).collect();
                    if !forward_line(&cfg, &raw, &tx_evt, &log) {
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
            Err(e) => {
                let _ = tx_evt.send(SerialEvent::Error(format!("read failed: {e}")));
                let _ = tx_evt.send(SerialEvent::Closed);
                return;
            }
        }

        loop {
            match rx_cmd.try_recv() {
                Ok(Command::Send(data)) => {
                    if let Err(e) = port.write_all(&data).and_then(|_| port.flush()) {
                        let _ = tx_evt.send(SerialEvent::Error(format!("write failed: {e}")));
                        let _ = tx_evt.send(SerialEvent::Closed);
                        return;
                    }
                }
                Ok(Command::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = tx_evt.send(SerialEvent::Closed);
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
    }
}

/// Returns false once nobody is listening any more.
fn forward_line(cfg: &SerialConfig, raw: &[u8], tx_evt: &Sender<SerialEvent>, log: &SharedLog) -> bool {
    let text = cfg.encoding.decode(raw);
    let text = text.trim_end_matches(['\r', '\n']);
    if text.trim().is_empty() {
        return true;
    }
    log.lock().push(Direction::Rx, text);
    tx_evt.send(SerialEvent::Line(text.to_string())).is_ok()
}

/// Opens [`SerialService`] links that share one traffic log.
pub struct SerialOpener {
    template: SerialConfig,
    log: SharedLog,
}

impl SerialOpener {
    pub fn new(template: SerialConfig, log: SharedLog) -> Self {
        Self { template, log }
    }

    pub fn log(&self) -> &SharedLog {
        &self.log
    }
}

impl Opener for SerialOpener {
    type Transport = SerialService;

    fn open(&mut self, port: &str, baud: u32) -> Result<SerialService, TransportError> {
        let cfg = SerialConfig {
            port_name: port.to_string(),
            baud_rate: baud,
            ..self.template.clone()
        };
        SerialService::open(cfg, self.log.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuf::LogStore;

    #[test]
    fn line_endings() {
        assert_eq!(LineEnding::LF.as_bytes(), b"\n");
        assert_eq!(LineEnding::CRLF.as_bytes(), b"\r\n");
    }

    #[test]
    fn port_label_includes_usb_ids() {
        let info = PortInfo {
            port_name: "/dev/ttyUSB0".to_string(),
            port_type: "USB".to_string(),
            vid: Some(0x1a86),
            pid: Some(0x7523),
            serial_number: None,
            manufacturer: None,
            product: None,
        };
        assert_eq!(info.label(), "/dev/ttyUSB0 (1A86:7523)");
    }

    #[test]
    fn opening_a_missing_port_fails() {
        let cfg = SerialConfig {
            port_name: "/dev/levelwiz-does-not-exist".to_string(),
            ..Default::default()
        };
        let log = LogStore::shared(16);
        let err = SerialService::open(cfg, log).err().expect("open should fail");
        assert!(matches!(err, TransportError::Open { .. }));
    }

    #[test]
    fn forwarded_lines_are_trimmed_and_logged() {
        let (tx, rx) = unbounded();
        let log = LogStore::shared(16);
        let cfg = SerialConfig::default();
        assert!(forward_line(&cfg, b"ok\r\n", &tx, &log));
        assert!(forward_line(&cfg, b"\r\n", &tx, &log));
        match rx.try_recv() {
            Ok(SerialEvent::Line(line)) => assert_eq!(line, "ok"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(log.lock().len(), 1);
    }
}
