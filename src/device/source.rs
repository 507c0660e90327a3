//! Where device lines come from
//!
//! Every source is drained by its own reader thread that forwards complete
//! lines over a bounded channel, so the acquisition worker never blocks on
//! the device itself.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::decoder::latin1_to_string;
use crate::error::{DlsError, Result};

/// Lines buffered between the reader thread and the worker
const LINE_BUFFER: usize = 256;

pub enum DeviceSource {
    /// Device node already configured by the OS (baud, framing)
    Serial(PathBuf),
    /// Child process whose stdout carries the device lines
    Command { program: PathBuf, args: Vec<String> },
    /// Any byte stream, e.g. a recorded capture
    Reader(Box<dyn Read + Send>),
}

impl std::fmt::Debug for DeviceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial(path) => write!(f, "Serial({})", path.display()),
            Self::Command { program, args } => {
                write!(f, "Command({} {})", program.display(), args.join(" "))
            }
            Self::Reader(_) => write!(f, "Reader"),
        }
    }
}

impl DeviceSource {
    /// Parse a command line such as `picocom -q /dev/ttyACM0`; no quoting
    pub fn command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = PathBuf::from(parts.next()?);
        Some(Self::Command {
            program,
            args: parts.map(str::to_string).collect(),
        })
    }
}

/// What end-of-stream means for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EofPolicy {
    /// A serial device never ends on its own; EOF means it went away
    Disconnect,
    /// The stream ending is the normal end of the session
    EndOfStream,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Line(String),
    Eof,
    Failed(String),
}

/// An opened source: the line channel plus whatever must be torn down
pub struct OpenSource {
    pub lines: Receiver<LineEvent>,
    pub eof: EofPolicy,
    child: Option<Child>,
}

impl std::fmt::Debug for OpenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSource")
            .field("eof", &self.eof)
            .field("pending", &self.lines.len())
            .field("child", &self.child.as_ref().map(Child::id))
            .finish()
    }
}

impl OpenSource {
    /// Kill the child process, if any
    ///
    /// Serial and reader sources have no handle to release here. Their
    /// reader thread stays blocked in `read` until the next line arrives,
    /// which is then discarded and the thread exits; until then the device
    /// node remains open.
    pub fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("Device command already exited: {}", e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for OpenSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Forward lines from `reader` until EOF, a read error, or the receiver is gone
///
/// The receiver going away is only noticed on the next send, so one line
/// read after that point is dropped.
fn spawn_line_reader<R: Read + Send + 'static>(
    reader: R,
    tx: Sender<LineEvent>,
) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("dls-line-reader".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let event = match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => LineEvent::Eof,
                    Ok(_) => LineEvent::Line(latin1_to_string(&buf)),
                    Err(e) => LineEvent::Failed(e.to_string()),
                };
                let last = !matches!(event, LineEvent::Line(_));
                // Receiver gone means the session is over
                if tx.send(event).is_err() || last {
                    break;
                }
            }
        })?;
    Ok(handle)
}

fn spawn_stderr_logger<R: Read + Send + 'static>(stderr: R) {
    let spawned = thread::Builder::new()
        .name("dls-device-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                if !line.trim().is_empty() {
                    info!("[device] {}", line.trim());
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Could not forward device stderr: {}", e);
    }
}

/// Open a source and start its reader thread
pub fn open(source: DeviceSource) -> Result<OpenSource> {
    let (tx, rx) = bounded(LINE_BUFFER);

    match source {
        DeviceSource::Serial(path) => {
            info!("Opening device node {}", path.display());
            let file = File::open(&path).map_err(|e| {
                DlsError::DeviceError(format!("cannot open {}: {}", path.display(), e))
            })?;
            spawn_line_reader(file, tx)?;
            Ok(OpenSource {
                lines: rx,
                eof: EofPolicy::Disconnect,
                child: None,
            })
        }
        DeviceSource::Command { program, args } => {
            info!("Executing: {} {}", program.display(), args.join(" "));
            let mut child = Command::new(&program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| {
                    DlsError::DeviceError(format!("cannot start {}: {}", program.display(), e))
                })?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| DlsError::DeviceError("device command has no stdout".to_string()))?;
            if let Some(stderr) = child.stderr.take() {
                spawn_stderr_logger(stderr);
            }
            spawn_line_reader(stdout, tx)?;
            Ok(OpenSource {
                lines: rx,
                eof: EofPolicy::EndOfStream,
                child: Some(child),
            })
        }
        DeviceSource::Reader(reader) => {
            spawn_line_reader(reader, tx)?;
            Ok(OpenSource {
                lines: rx,
                eof: EofPolicy::EndOfStream,
                child: None,
            })
        }
    }
}
