//! Acquisition session
//!
//! One dedicated worker thread per measurement. The worker pulls lines from
//! the source's reader thread with a timeout, decodes them, appends accepted
//! frames to the session's assembler and (optionally) to the raw table, and
//! publishes progress once per interval. Stopping is cooperative: the flag is
//! checked every iteration, so the worker exits within one read timeout.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::source::{self, DeviceSource, EofPolicy, LineEvent};
use super::state::AcquisitionStats;
use crate::decoder::{FrameDecoder, FrameLayout, TimeSeriesAssembler};
use crate::error::{DlsError, Result};
use crate::report::RawTableWriter;

type RawSink = RawTableWriter<Box<dyn Write + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub batch_len: usize,
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_len: 1600,
            read_timeout: Duration::from_millis(1000),
        }
    }
}

/// Published by the worker once per reporting interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub elapsed: Duration,
    /// Share of the requested duration already spent, 0..=1
    pub fraction: f64,
    pub frames_accepted: u64,
    pub lines_rejected: u64,
}

/// Cloneable stop switch, usable from any thread
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Single-use acquisition controller
pub struct AcquisitionSession {
    config: SessionConfig,
    source: Option<DeviceSource>,
    raw_sink: Option<RawSink>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    stats: Arc<AcquisitionStats>,
    worker: Option<JoinHandle<Result<TimeSeriesAssembler>>>,
    started: bool,
}

impl AcquisitionSession {
    pub fn new(config: SessionConfig, source: DeviceSource) -> Self {
        Self {
            config,
            source: Some(source),
            raw_sink: None,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(AcquisitionStats::new()),
            worker: None,
            started: false,
        }
    }

    /// Mirror every accepted sample into a raw table written to `out`
    pub fn with_raw_sink<W: Write + Send + 'static>(mut self, out: W) -> Result<Self> {
        let out: Box<dyn Write + Send> = Box::new(out);
        self.raw_sink = Some(RawTableWriter::new(out)?);
        Ok(self)
    }

    /// Start acquiring for at most `duration`, reporting every `interval`
    pub fn start(&mut self, duration: Duration, interval: Duration) -> Result<Receiver<SessionProgress>> {
        if self.started {
            return Err(DlsError::InvalidConfig("session already started".to_string()));
        }
        if duration.is_zero() || interval.is_zero() {
            return Err(DlsError::InvalidConfig(
                "duration and interval must be positive".to_string(),
            ));
        }
        if self.config.batch_len == 0 || self.config.read_timeout.is_zero() {
            return Err(DlsError::InvalidConfig(
                "batch length and read timeout must be positive".to_string(),
            ));
        }
        let source = self
            .source
            .take()
            .ok_or_else(|| DlsError::InvalidConfig("session has no source".to_string()))?;
        self.started = true;

        info!("===========================================");
        info!("  Starting acquisition");
        info!("===========================================");
        info!("  Source: {:?}", source);
        info!("  Batch length: {}", self.config.batch_len);
        info!("  Duration: {:.1} s", duration.as_secs_f64());

        let opened = source::open(source)?;
        let (progress_tx, progress_rx) = bounded(64);

        let worker = Worker {
            config: self.config,
            duration,
            interval,
            stop_requested: self.stop_requested.clone(),
            stats: self.stats.clone(),
            raw_sink: self.raw_sink.take(),
            progress_tx,
        };
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("dls-acquire".to_string())
            .spawn(move || {
                let result = worker.run(opened);
                running.store(false, Ordering::SeqCst);
                if let Err(e) = &result {
                    error!("Acquisition failed: {}", e);
                }
                result
            });
        match handle {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        Ok(progress_rx)
    }

    /// Ask the worker to finish; returns immediately
    pub fn stop(&self) {
        info!("Stopping acquisition...");
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_requested.clone())
    }

    pub fn stats(&self) -> &Arc<AcquisitionStats> {
        &self.stats
    }

    /// Block until the worker exits and hand over the assembled series
    pub fn wait(&mut self) -> Result<TimeSeriesAssembler> {
        let handle = self
            .worker
            .take()
            .ok_or_else(|| DlsError::InvalidConfig("session was not started".to_string()))?;
        handle
            .join()
            .map_err(|_| DlsError::DeviceError("acquisition worker panicked".to_string()))?
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

struct Worker {
    config: SessionConfig,
    duration: Duration,
    interval: Duration,
    stop_requested: Arc<AtomicBool>,
    stats: Arc<AcquisitionStats>,
    raw_sink: Option<RawSink>,
    progress_tx: Sender<SessionProgress>,
}

impl Worker {
    fn run(mut self, mut source: source::OpenSource) -> Result<TimeSeriesAssembler> {
        let decoder = FrameDecoder::new(FrameLayout::new(self.config.batch_len));
        let mut assembler = TimeSeriesAssembler::new(self.config.batch_len);

        let started = Instant::now();
        let mut last_report = started;

        let outcome = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                info!("Stop requested after {:.2} s", started.elapsed().as_secs_f64());
                break Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= self.duration {
                break Ok(());
            }
            let wait = self.config.read_timeout.min(self.duration - elapsed);

            match source.lines.recv_timeout(wait) {
                Ok(LineEvent::Line(line)) => {
                    if let Err(e) = self.handle_line(&decoder, &mut assembler, &line) {
                        break Err(e);
                    }
                }
                Ok(LineEvent::Eof) | Err(RecvTimeoutError::Disconnected) => {
                    break match source.eof {
                        EofPolicy::Disconnect => {
                            Err(DlsError::DeviceError("device disconnected".to_string()))
                        }
                        EofPolicy::EndOfStream => {
                            info!("Device stream ended");
                            Ok(())
                        }
                    };
                }
                Ok(LineEvent::Failed(e)) => {
                    break Err(DlsError::DeviceError(format!("device read failed: {}", e)));
                }
                Err(RecvTimeoutError::Timeout) => {
                    trace!("No line within {:?}", wait);
                }
            }

            if last_report.elapsed() >= self.interval {
                self.report(started.elapsed());
                last_report = Instant::now();
            }
        };

        source.close();
        self.report(started.elapsed());
        info!("Acquisition stopped. {}", self.stats.summary());

        outcome.map(|_| assembler)
    }

    fn handle_line(
        &mut self,
        decoder: &FrameDecoder,
        assembler: &mut TimeSeriesAssembler,
        line: &str,
    ) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        self.stats.record_line();

        let appended = match decoder.decode(line) {
            Ok(frame) => assembler.append(&frame),
            Err(e) => Err(e),
        };
        match appended {
            Ok(samples) => {
                self.stats.record_frame(samples.len());
                if let Some(sink) = self.raw_sink.as_mut() {
                    sink.write_samples(samples)?;
                }
            }
            Err(e) => {
                self.stats.record_malformed();
                debug!("Line skipped: {}", e);
            }
        }
        Ok(())
    }

    fn report(&self, elapsed: Duration) {
        let progress = SessionProgress {
            elapsed,
            fraction: (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0),
            frames_accepted: self.stats.get_frames(),
            lines_rejected: self.stats.get_malformed(),
        };
        debug!(
            "[Stats] {:.0}% | {}",
            progress.fraction * 100.0,
            self.stats.summary()
        );
        if self.progress_tx.try_send(progress).is_err() {
            warn!("Progress channel full, dropping update");
        }
    }
}
