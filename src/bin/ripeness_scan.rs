//! ripeness_scan - run the avocado ripeness detection loop
//!
//! Scans for a fixed time (or until Ctrl-C), logging each published cycle.
//! With `--capture` the best detection is frozen at the end and the result is
//! printed as JSON. The photo is copied to `--photo-out` (or a kept temp file)
//! before the camera's scratch storage is dropped.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use ripeness_scan::detect::best_detection;
use ripeness_scan::ingest::Snapshot;
use ripeness_scan::ripeness::overlay_color;
use ripeness_scan::{
    open_camera, CaptureOutcome, DetectionBoard, InferenceLoop, LoopConfig, Pipeline, ScanConfig,
    ScanSession, ScanUpdate, SessionSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "RIPENESS_CONFIG")]
    config: Option<PathBuf>,
    /// Scan duration in seconds; 0 runs until Ctrl-C.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Camera source override (stub://<name> or an image directory).
    #[arg(long)]
    camera: Option<String>,
    /// Freeze the best detection when the scan ends and print it as JSON.
    #[arg(long)]
    capture: bool,
    /// Where to keep the captured photo; a temp file is kept otherwise.
    #[arg(long, requires = "capture")]
    photo_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = ScanConfig::load_from(args.config.as_deref())?;
    if let Some(camera) = args.camera.filter(|c| !c.trim().is_empty()) {
        cfg.camera.source = camera;
    }

    let pipeline = Pipeline::open(&cfg)?;
    let camera = open_camera(&cfg.camera)?;
    let (tx, rx) = mpsc::channel::<ScanUpdate>();
    let board = DetectionBoard::new();
    let inference = InferenceLoop::new(
        pipeline,
        camera.clone(),
        LoopConfig::from_config(&cfg),
        (tx, board.clone()),
    );
    let mut session = ScanSession::new(
        inference,
        board,
        camera,
        SessionSettings::from_config(&cfg),
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    session.start()?;
    log::info!(
        "ripeness_scan running: model={} camera={}",
        cfg.model.path,
        cfg.camera.source
    );

    let deadline = (args.seconds > 0).then(|| Instant::now() + Duration::from_secs(args.seconds));
    let mut cycles = 0u64;
    while !stop.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(update) => {
                cycles += 1;
                let best = best_detection(&update.detections)
                    .map(|d| format!("{} {:.2}", d.class_label, d.confidence))
                    .unwrap_or_else(|| "-".to_string());
                log::info!(
                    "cycle #{}: {} detections, best={}, fps={:.1}, latency={}ms",
                    cycles,
                    update.detections.len(),
                    best,
                    update.stats.fps,
                    update.stats.latency_millis()
                );
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if args.capture && !stop.load(Ordering::SeqCst) {
        match session.capture()? {
            CaptureOutcome::Captured => {
                if let Some(result) = session.finish()? {
                    // The camera's scratch copy goes away with the camera.
                    let photo = result.persist_photo(args.photo_out.as_deref())?;
                    Snapshot {
                        path: result.photo.clone(),
                        ephemeral: true,
                    }
                    .discard();
                    let info = result.class_info();
                    let shown = result.container_detections(cfg.display.result_container);
                    let overlay: Vec<_> = shown
                        .iter()
                        .map(|d| {
                            serde_json::json!({
                                "detection": d,
                                "color": overlay_color(&d.class_label, d.confidence),
                            })
                        })
                        .collect();
                    let report = serde_json::json!({
                        "photo": photo,
                        "photo_size": result.photo_size,
                        "best": result.best,
                        "ripeness": info,
                        "detections": result.detections,
                        "container": cfg.display.result_container,
                        "container_detections": overlay,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
            CaptureOutcome::NoDetections { notice } | CaptureOutcome::Failed { notice } => {
                log::warn!("{}", notice);
            }
        }
    }

    session.stop()?;
    log::info!("ripeness_scan stopped after {} cycles", cycles);
    Ok(())
}
