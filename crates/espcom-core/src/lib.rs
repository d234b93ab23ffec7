//! Core functionalities: serial link, line decoding, reset-and-stream reader.

pub mod encoding;
pub mod error;
pub mod link;
pub mod reader;

pub use encoding::{decode_lossy, Decoded};
pub use error::{ControlLine, ReaderError, SerialError};
pub use link::{list_ports, PortInfo, SerialConfig, SerialLink, SerialPortLink, DEFAULT_BAUD_RATE};
pub use reader::{Exit, LineReader};
