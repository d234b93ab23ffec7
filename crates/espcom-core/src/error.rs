use std::io;

use thiserror::Error;

/// Failures of the serial connection itself.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("could not open port {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("could not set {line} on {port}: {source}")]
    ControlLine {
        port: String,
        line: ControlLine,
        #[source]
        source: serialport::Error,
    },

    #[error("read from {port} failed: {source}")]
    Read {
        port: String,
        #[source]
        source: io::Error,
    },

    #[error("port {0} is not open")]
    NotOpen(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    Dtr,
    Rts,
}

impl std::fmt::Display for ControlLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlLine::Dtr => write!(f, "DTR"),
            ControlLine::Rts => write!(f, "RTS"),
        }
    }
}

/// Why a [`LineReader`](crate::LineReader) stopped streaming.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error("could not write to output: {0}")]
    Output(#[source] io::Error),
}
