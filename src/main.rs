//! DLS Capture - instrument acquisition and particle sizing
//!
//! Acquires photon-intensity batches from the DLS board (or replays a
//! recorded raw table), recovers the size spectrum of every replicate
//! dataset and writes the artifact tables plus a run summary.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dls_capture::config::Config;
use dls_capture::decoder::TimeSeriesAssembler;
use dls_capture::device::AcquisitionSession;
use dls_capture::pipeline;
use dls_capture::report::{tables, write_run, RunSummary};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dls_capture=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("===========================================");
    info!("   DLS Capture");
    info!("   photon correlation particle sizing");
    info!("===========================================");

    let config = Config::from_env();
    config.validate().context("Invalid configuration")?;

    let p = &config.pipeline;
    info!("Configuration:");
    info!("  Output dir: {}", config.output_dir.display());
    info!("  Batch length: {}", config.batch_len);
    info!("  Wavelength: {} nm", p.optics.wavelength_nm);
    info!("  Angle: {} deg", p.optics.angle_deg);
    info!("  Refractive index: {}", p.optics.refractive_index);
    match config.sample {
        Some(sample) => info!("  Sample: {:?} ({} cP)", sample, p.optics.viscosity_cp),
        None => info!("  Viscosity: {} cP", p.optics.viscosity_cp),
    }
    info!("  Datasets: {} ({:?} mode)", p.correlation.datasets, p.correlation.mode);

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let measured_at = chrono::Utc::now();
    let series = match &config.input {
        Some(input) => load_recording(input, config.batch_len).await?,
        None => acquire(&config).await?,
    };
    let batches = series.batches().len();
    info!("Session holds {} batch(es), {} samples", batches, series.samples().len());

    let pipeline_config = config.pipeline.clone();
    let output = tokio::task::spawn_blocking(move || pipeline::run(&series, &pipeline_config))
        .await
        .context("Analysis task panicked")?
        .context("Analysis failed")?;

    for size in &output.result.datasets {
        info!("  Dataset {}: {:.2} nm", size.dataset, size.diameter_nm);
    }
    if !output.result.excluded.is_empty() {
        warn!("  Excluded datasets: {:?}", output.result.excluded);
    }

    let summary = RunSummary::new(&output, batches, measured_at);
    write_run(&config.output_dir, &output, &summary).context("Failed to write artifacts")?;

    info!("===========================================");
    info!("  Average diameter: {:.2} nm", output.result.average_diameter_nm);
    info!("===========================================");
    Ok(())
}

/// Rebuild a session from a raw table written by an earlier run
async fn load_recording(path: &Path, batch_len: usize) -> Result<TimeSeriesAssembler> {
    info!("Replaying {}", path.display());
    let path = path.to_path_buf();
    let series = tokio::task::spawn_blocking(move || {
        let samples = tables::read_raw_table_file(&path)?;
        TimeSeriesAssembler::from_samples(samples, batch_len)
    })
    .await
    .context("Replay task panicked")?
    .context("Failed to read recording")?;
    Ok(series)
}

/// Run one acquisition session until its duration elapses, the stream ends,
/// or Ctrl+C
async fn acquire(config: &Config) -> Result<TimeSeriesAssembler> {
    let source = config
        .device_source()
        .context("No acquisition source configured")?;

    let raw_path = config.output_dir.join(tables::RAW_TABLE);
    let raw_file = File::create(&raw_path)
        .with_context(|| format!("Failed to create {}", raw_path.display()))?;

    let mut session = AcquisitionSession::new(config.session_config(), source)
        .with_raw_sink(BufWriter::new(raw_file))?;
    let progress = session.start(config.duration(), config.interval())?;

    info!("  Press Ctrl+C to stop early.");

    let stop = session.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received");
            stop.stop();
        }
    });

    let series = tokio::task::spawn_blocking(move || {
        for p in progress.iter() {
            info!(
                "[Progress] {:>3.0}% | {:.1} s | frames={} rejected={}",
                p.fraction * 100.0,
                p.elapsed.as_secs_f64(),
                p.frames_accepted,
                p.lines_rejected
            );
        }
        session.wait()
    })
    .await
    .context("Acquisition task panicked")?
    .context("Acquisition failed")?;

    ctrl_c.abort();
    info!("Raw table: {}", raw_path.display());
    Ok(series)
}
