use log::debug;
use serialport::{SerialPort, SerialPortInfo};
use std::io::{self, ErrorKind, Read};
use std::time::{Duration, Instant};

use crate::error::{ControlLine, SerialError};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Debug, Clone)]
pub struct PortInfo {
    pub port_name: String,
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (port_type, vid, pid, product) = match &info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                ("USB".to_string(), Some(usb.vid), Some(usb.pid), usb.product.clone())
            }
            serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None, None),
            serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None, None),
            serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None, None),
        };
        Self {
            port_name: info.port_name,
            port_type,
            vid,
            pid,
            product,
        }
    }
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.port_name, self.port_type)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " {vid:04X}:{pid:04X}")?;
        }
        if let Some(product) = &self.product {
            write!(f, " {product}")?;
        }
        Ok(())
    }
}

/// Ports the OS currently reports. Enumeration failures yield an empty list.
pub fn list_ports() -> Vec<PortInfo> {
    serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect()
}

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: serialport::DataBits,
    pub parity: serialport::Parity,
    pub stop_bits: serialport::StopBits,
    pub flow_control: serialport::FlowControl,
    /// Upper bound on a single line read, partial or not.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: serialport::DataBits::Eight,
            parity: serialport::Parity::None,
            stop_bits: serialport::StopBits::One,
            flow_control: serialport::FlowControl::None,
            timeout: Duration::from_secs(1),
        }
    }
}

impl SerialConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Default::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The handful of port operations the line reader relies on.
///
/// Control line levels may be set while the link is closed; they are applied
/// as soon as the link is opened again.
pub trait SerialLink {
    /// Port identifier, used in user-facing messages.
    fn name(&self) -> &str;

    /// Opens the port. An already open link is closed and opened again.
    fn open(&mut self) -> Result<(), SerialError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn set_dtr(&mut self, level: bool) -> Result<(), SerialError>;

    fn set_rts(&mut self, level: bool) -> Result<(), SerialError>;

    /// Reads up to and including the next `\n`.
    ///
    /// Returns whatever arrived before the read timeout elapsed, which is an
    /// empty buffer when the device stayed silent.
    fn read_line(&mut self) -> Result<Vec<u8>, SerialError>;
}

/// [`SerialLink`] backed by an OS serial port.
pub struct SerialPortLink {
    cfg: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
    dtr: Option<bool>,
    rts: Option<bool>,
}

impl SerialPortLink {
    /// Creates a closed link; nothing touches the device until [`SerialLink::open`].
    pub fn new(cfg: SerialConfig) -> Self {
        Self {
            cfg,
            port: None,
            pending: Vec::new(),
            dtr: None,
            rts: None,
        }
    }

    fn apply_control_lines(&mut self) -> Result<(), SerialError> {
        if let Some(level) = self.dtr {
            self.write_line_level(ControlLine::Dtr, level)?;
        }
        if let Some(level) = self.rts {
            self.write_line_level(ControlLine::Rts, level)?;
        }
        Ok(())
    }

    fn write_line_level(&mut self, line: ControlLine, level: bool) -> Result<(), SerialError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };
        let res = match line {
            ControlLine::Dtr => port.write_data_terminal_ready(level),
            ControlLine::Rts => port.write_request_to_send(level),
        };
        debug!("{}: {line} -> {level}", self.cfg.port_name);
        res.map_err(|source| SerialError::ControlLine {
            port: self.cfg.port_name.clone(),
            line,
            source,
        })
    }
}

impl SerialLink for SerialPortLink {
    fn name(&self) -> &str {
        &self.cfg.port_name
    }

    fn open(&mut self) -> Result<(), SerialError> {
        if self.port.is_some() {
            self.close();
        }
        let port = serialport::new(&self.cfg.port_name, self.cfg.baud_rate)
            .data_bits(self.cfg.data_bits)
            .parity(self.cfg.parity)
            .stop_bits(self.cfg.stop_bits)
            .flow_control(self.cfg.flow_control)
            .timeout(self.cfg.timeout)
            .open()
            .map_err(|source| SerialError::Open {
                port: self.cfg.port_name.clone(),
                source,
            })?;
        debug!("opened {} at {} baud", self.cfg.port_name, self.cfg.baud_rate);
        self.port = Some(port);

        if let Err(e) = self.apply_control_lines() {
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("closed {}", self.cfg.port_name);
        }
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn set_dtr(&mut self, level: bool) -> Result<(), SerialError> {
        self.dtr = Some(level);
        self.write_line_level(ControlLine::Dtr, level)
    }

    fn set_rts(&mut self, level: bool) -> Result<(), SerialError> {
        self.rts = Some(level);
        self.write_line_level(ControlLine::Rts, level)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, SerialError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| SerialError::NotOpen(self.cfg.port_name.clone()))?;

        read_until_newline(&mut **port, &mut self.pending, self.cfg.timeout).map_err(|source| {
            SerialError::Read {
                port: self.cfg.port_name.clone(),
                source,
            }
        })
    }
}

/// Pulls bytes from `port` until `pending` holds a `\n` or `timeout` has
/// passed since the call started, then hands back the line (or the partial
/// data) and keeps the rest in `pending`.
///
/// A read reporting zero bytes means the device went away.
fn read_until_newline<R: Read + ?Sized>(
    port: &mut R,
    pending: &mut Vec<u8>,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 4096];
    loop {
        if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            return Ok(pending.drain(..=pos).collect());
        }
        if Instant::now() >= deadline {
            return Ok(std::mem::take(pending));
        }
        match port.read(&mut buf) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "device reports readiness to read but returned no data",
                ))
            }
            Ok(n) => pending.extend_from_slice(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                return Ok(std::mem::take(pending));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud_rate, 115_200);
        assert_eq!(cfg.timeout, Duration::from_secs(1));
        assert_eq!(cfg.data_bits, serialport::DataBits::Eight);
        assert_eq!(cfg.parity, serialport::Parity::None);
    }

    #[test]
    fn config_builder() {
        let cfg = SerialConfig::new("/dev/ttyACM0")
            .with_baud_rate(9600)
            .with_timeout(Duration::from_millis(250));
        assert_eq!(cfg.port_name, "/dev/ttyACM0");
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.timeout, Duration::from_millis(250));
    }

    #[test]
    fn new_link_is_closed() {
        let link = SerialPortLink::new(SerialConfig::new("/dev/ttyUSB9"));
        assert!(!link.is_open());
        assert_eq!(link.name(), "/dev/ttyUSB9");
    }

    #[test]
    fn control_lines_are_recorded_while_closed() {
        let mut link = SerialPortLink::new(SerialConfig::new("/dev/ttyUSB9"));
        link.set_dtr(false).unwrap();
        link.set_rts(false).unwrap();
        assert_eq!(link.dtr, Some(false));
        assert_eq!(link.rts, Some(false));
        assert!(!link.is_open());
    }

    #[test]
    fn read_on_closed_link_fails() {
        let mut link = SerialPortLink::new(SerialConfig::new("/dev/ttyUSB9"));
        assert!(matches!(link.read_line(), Err(SerialError::NotOpen(name)) if name == "/dev/ttyUSB9"));
    }

    struct Dribble;

    impl Read for Dribble {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(Duration::from_millis(10));
            let n = buf.len().min(8);
            buf[..n].fill(b'x');
            Ok(n)
        }
    }

    struct Chunks(Vec<&'static [u8]>);

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(ErrorKind::TimedOut.into());
            }
            let chunk = self.0.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn unterminated_stream_returns_partial_line_at_timeout() {
        let mut pending = Vec::new();
        let start = Instant::now();
        let line = read_until_newline(&mut Dribble, &mut pending, Duration::from_millis(200)).unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!line.is_empty());
        assert!(line.iter().all(|&b| b == b'x'));
        assert!(pending.is_empty());
    }

    #[test]
    fn zero_byte_read_is_a_disconnect() {
        let err = read_until_newline(&mut io::empty(), &mut Vec::new(), Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn lines_are_split_and_leftovers_kept() {
        let mut port = Chunks(vec![b"boot: ok\nrst:", b"0x1\n"]);
        let mut pending = Vec::new();
        let timeout = Duration::from_secs(1);

        assert_eq!(read_until_newline(&mut port, &mut pending, timeout).unwrap(), b"boot: ok\n");
        assert_eq!(pending, b"rst:");
        assert_eq!(read_until_newline(&mut port, &mut pending, timeout).unwrap(), b"rst:0x1\n");
        assert_eq!(read_until_newline(&mut port, &mut pending, timeout).unwrap(), b"");
    }

    #[test]
    #[cfg(unix)]
    fn pty_flooded_without_newline_still_returns() {
        use std::io::Write;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let (mut master, mut slave) = serialport::TTYPort::pair().unwrap();
        slave.set_timeout(Duration::from_millis(500)).unwrap();
        master.set_timeout(Duration::from_millis(100)).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let _ = master.write_all(&[b'x'; 64]);
                    std::thread::sleep(Duration::from_millis(50));
                }
            })
        };

        let mut link = SerialPortLink::new(SerialConfig::new("pty").with_timeout(Duration::from_millis(500)));
        link.port = Some(Box::new(slave));

        let start = Instant::now();
        let line = link.read_line();
        let elapsed = start.elapsed();
        stop.store(true, Ordering::SeqCst);
        writer.join().unwrap();

        assert!(elapsed < Duration::from_secs(3), "read_line took {elapsed:?}");
        assert!(!line.unwrap().contains(&b'\n'));
    }

    #[test]
    fn port_info_display() {
        let info = PortInfo {
            port_name: "/dev/ttyUSB0".into(),
            port_type: "USB".into(),
            vid: Some(0x10c4),
            pid: Some(0xea60),
            product: Some("CP2102".into()),
        };
        assert_eq!(info.to_string(), "/dev/ttyUSB0 (USB) 10C4:EA60 CP2102");
    }
}
