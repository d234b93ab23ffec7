//! Connection lifecycle and the streaming read loop.
//!
//! A [`LineReader`] moves its link through Closed -> Open (configured) ->
//! Open (streaming) -> Closed. Configuring pulses the board's reset by
//! deasserting DTR and RTS across a close/reopen before anything is read.

use crossbeam_channel::{Receiver, TryRecvError};
use log::{debug, error, info, trace, warn};
use std::convert::Infallible;
use std::io::Write;

use crate::encoding::{decode_lossy, Decoded};
use crate::error::{ReaderError, SerialError};
use crate::link::SerialLink;

/// How a run ended. Streaming never finishes on its own.
#[derive(Debug)]
pub enum Exit {
    Interrupted,
    Failed(ReaderError),
}

impl Exit {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Exit::Interrupted)
    }
}

enum Stop {
    Interrupted,
    Failed(ReaderError),
}

impl From<SerialError> for Stop {
    fn from(e: SerialError) -> Self {
        Stop::Failed(ReaderError::Serial(e))
    }
}

/// Streams decoded lines from a serial link to `out`.
///
/// The link is closed, with a confirmation written to `out`, when the run
/// ends or when the reader is dropped, whichever comes first.
pub struct LineReader<L: SerialLink, W: Write> {
    link: L,
    out: W,
    interrupts: Receiver<()>,
}

impl<L: SerialLink, W: Write> LineReader<L, W> {
    /// `interrupts` is polled between reads; any message on it ends the run.
    pub fn new(link: L, out: W, interrupts: Receiver<()>) -> Self {
        Self {
            link,
            out,
            interrupts,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Resets the device, then prints every line it sends until interrupted
    /// or until the connection fails. The link is closed before returning.
    pub fn run(&mut self) -> Exit {
        let exit = match self.stream() {
            Ok(never) => match never {},
            Err(Stop::Interrupted) => {
                info!("interrupted, closing {}", self.link.name());
                self.notice("Program interrupted. Closing the connection.");
                Exit::Interrupted
            }
            Err(Stop::Failed(ReaderError::Serial(e))) => {
                error!("{e}");
                self.notice(&format!("Error connecting to the serial port: {e}"));
                Exit::Failed(ReaderError::Serial(e))
            }
            Err(Stop::Failed(e)) => {
                error!("{e}");
                Exit::Failed(e)
            }
        };
        self.shutdown();
        exit
    }

    fn stream(&mut self) -> Result<Infallible, Stop> {
        self.configure()?;
        self.check_interrupt()?;

        let banner = self.link.read_line()?;
        self.emit(&decode_lossy(&banner))?;

        loop {
            self.check_interrupt()?;
            let line = self.link.read_line()?;
            if line.is_empty() {
                continue;
            }
            trace!("rx {} bytes", line.len());

            let decoded = Decoded::from_line(&line);
            if let Decoded::Raw(raw) = &decoded {
                warn!("{} bytes of non UTF-8 data", raw.len());
            }
            if let Some(text) = decoded.display() {
                self.emit(&text)?;
            }
        }
    }

    /// Open, close, drop DTR/RTS, open again.
    fn configure(&mut self) -> Result<(), SerialError> {
        self.link.open()?;
        if self.link.is_open() {
            self.link.close();
        }
        self.link.set_dtr(false)?;
        self.link.set_rts(false)?;
        self.link.open()?;
        debug!("{} configured, streaming", self.link.name());
        Ok(())
    }

    fn check_interrupt(&self) -> Result<(), Stop> {
        match self.interrupts.try_recv() {
            Ok(()) => Err(Stop::Interrupted),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(()),
        }
    }

    fn emit(&mut self, text: &str) -> Result<(), Stop> {
        writeln!(self.out, "{text}")
            .and_then(|()| self.out.flush())
            .map_err(|e| Stop::Failed(ReaderError::Output(e)))
    }

    /// Best effort: used on paths that are already ending.
    fn notice(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{text}").and_then(|()| self.out.flush()) {
            debug!("dropped message {text:?}: {e}");
        }
    }

    fn shutdown(&mut self) {
        if !self.link.is_open() {
            return;
        }
        self.link.close();
        let msg = format!("Connection to {} closed.", self.link.name());
        info!("{msg}");
        self.notice(&msg);
    }
}

impl<L: SerialLink, W: Write> Drop for LineReader<L, W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
