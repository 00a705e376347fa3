//! Inference loop scheduler.
//!
//! While armed, a single worker thread runs one pipeline cycle after another
//! and publishes each result. Disarming stores a flag the worker checks at the
//! top of every cycle and inside its sleeps, then joins the worker: at most
//! one in-flight cycle completes after the request, and two cycles never
//! overlap on the camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::config::ScanConfig;
use crate::detect::{Detection, InferenceStats};
use crate::ingest::SharedCamera;
use crate::mapping::Size;
use crate::pipeline::Pipeline;

const SLEEP_SLICE: Duration = Duration::from_millis(25);

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub snapshot_quality: u8,
    pub screen: Size,
    /// Pause between successful cycles.
    pub cycle_delay: Duration,
    /// Pause after a failed cycle.
    pub failure_backoff: Duration,
    /// Stop after this many failures in a row. `None` never stops.
    pub max_consecutive_failures: Option<u32>,
}

impl LoopConfig {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            snapshot_quality: config.camera.snapshot_quality,
            screen: config.display.screen,
            cycle_delay: config.timing.cycle_delay,
            failure_backoff: config.timing.failure_backoff,
            max_consecutive_failures: config.timing.max_consecutive_failures,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// Frames per second from the wall-clock gap between consecutive publishes.
#[derive(Clone, Debug)]
pub struct FpsMeter {
    started: Instant,
    last: Option<Instant>,
}

impl FpsMeter {
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            last: None,
        }
    }

    /// Record a publish at `now`. The first one is measured from loop start.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let since = self.last.unwrap_or(self.started);
        self.last = Some(now);
        let delta = now.saturating_duration_since(since).as_secs_f32();
        if delta > 0.0 {
            1.0 / delta
        } else {
            0.0
        }
    }
}

/// One published cycle.
#[derive(Clone, Debug)]
pub struct ScanUpdate {
    pub detections: Arc<Vec<Detection>>,
    pub stats: InferenceStats,
}

/// Receiver of per-cycle results.
pub trait Publish: Send {
    fn publish(&self, detections: Arc<Vec<Detection>>, stats: InferenceStats);
}

impl Publish for mpsc::Sender<ScanUpdate> {
    fn publish(&self, detections: Arc<Vec<Detection>>, stats: InferenceStats) {
        // A dropped receiver only means nobody is watching.
        let _ = self.send(ScanUpdate { detections, stats });
    }
}

impl<A: Publish, B: Publish> Publish for (A, B) {
    fn publish(&self, detections: Arc<Vec<Detection>>, stats: InferenceStats) {
        self.0.publish(detections.clone(), stats);
        self.1.publish(detections, stats);
    }
}

/// Latest published detection list and stats.
///
/// The list is swapped wholesale on every publish, so readers always see one
/// cycle's complete output.
#[derive(Clone, Debug, Default)]
pub struct DetectionBoard {
    inner: Arc<Mutex<BoardState>>,
}

#[derive(Debug, Default)]
struct BoardState {
    detections: Arc<Vec<Detection>>,
    stats: InferenceStats,
}

impl DetectionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Arc<Vec<Detection>> {
        match self.inner.lock() {
            Ok(state) => state.detections.clone(),
            Err(poisoned) => poisoned.into_inner().detections.clone(),
        }
    }

    pub fn stats(&self) -> InferenceStats {
        match self.inner.lock() {
            Ok(state) => state.stats,
            Err(poisoned) => poisoned.into_inner().stats,
        }
    }

    pub fn clear(&self) {
        self.replace(Arc::new(Vec::new()), InferenceStats::default());
    }

    fn replace(&self, detections: Arc<Vec<Detection>>, stats: InferenceStats) {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.detections = detections;
        state.stats = stats;
    }
}

impl Publish for DetectionBoard {
    fn publish(&self, detections: Arc<Vec<Detection>>, stats: InferenceStats) {
        self.replace(detections, stats);
    }
}

/// Arm/disarm control over a detection loop.
pub trait LoopControl {
    fn arm(&mut self) -> Result<()>;
    fn disarm(&mut self) -> Result<()>;
    fn state(&self) -> LoopState;
}

pub struct InferenceLoop<P> {
    pipeline: Arc<Mutex<Pipeline>>,
    camera: SharedCamera,
    config: LoopConfig,
    publisher: P,
    armed: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl<P: Publish + Clone + 'static> InferenceLoop<P> {
    pub fn new(pipeline: Pipeline, camera: SharedCamera, config: LoopConfig, publisher: P) -> Self {
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            camera,
            config,
            publisher,
            armed: Arc::new(AtomicBool::new(false)),
            join: None,
        }
    }

    pub fn camera(&self) -> &SharedCamera {
        &self.camera
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Start the worker. Arming a running loop is a no-op.
    pub fn arm(&mut self) -> Result<()> {
        if self.state() == LoopState::Running {
            return Ok(());
        }
        // Reap a worker that stopped on its own.
        self.join_worker()?;

        self.armed.store(true, Ordering::SeqCst);
        let pipeline = self.pipeline.clone();
        let camera = self.camera.clone();
        let config = self.config.clone();
        let publisher = self.publisher.clone();
        let armed = self.armed.clone();
        let join = std::thread::Builder::new()
            .name("inference-loop".to_string())
            .spawn(move || run_loop(pipeline, camera, config, publisher, armed))
            .map_err(|e| {
                self.armed.store(false, Ordering::SeqCst);
                anyhow!("failed to spawn inference loop: {}", e)
            })?;
        self.join = Some(join);
        log::info!("inference loop armed");
        Ok(())
    }

    /// Stop the worker and wait for its current cycle to finish.
    pub fn disarm(&mut self) -> Result<()> {
        let was_running = self.join.is_some();
        self.armed.store(false, Ordering::SeqCst);
        self.join_worker()?;
        if was_running {
            log::info!("inference loop disarmed");
        }
        Ok(())
    }

    pub fn state(&self) -> LoopState {
        if self.join.is_some() && self.armed.load(Ordering::SeqCst) {
            LoopState::Running
        } else {
            LoopState::Idle
        }
    }

    fn join_worker(&mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("inference loop thread panicked"))?;
        }
        Ok(())
    }
}

impl<P: Publish + Clone + 'static> LoopControl for InferenceLoop<P> {
    fn arm(&mut self) -> Result<()> {
        InferenceLoop::arm(self)
    }

    fn disarm(&mut self) -> Result<()> {
        InferenceLoop::disarm(self)
    }

    fn state(&self) -> LoopState {
        InferenceLoop::state(self)
    }
}

impl<P> Drop for InferenceLoop<P> {
    fn drop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("inference loop thread panicked");
            }
        }
    }
}

fn run_loop<P: Publish>(
    pipeline: Arc<Mutex<Pipeline>>,
    camera: SharedCamera,
    config: LoopConfig,
    publisher: P,
    armed: Arc<AtomicBool>,
) {
    let mut fps = FpsMeter::new(Instant::now());
    let mut failures: u32 = 0;

    while armed.load(Ordering::SeqCst) {
        let cycle_start = Instant::now();
        let result = match pipeline.lock() {
            Ok(mut pipeline) => {
                pipeline.run_cycle(&camera, config.snapshot_quality, config.screen)
            }
            Err(_) => {
                log::error!("pipeline lock poisoned; inference loop stopped");
                break;
            }
        };

        match result {
            Ok(output) => {
                failures = 0;
                let stats = InferenceStats {
                    fps: fps.tick(Instant::now()),
                    latency: output.decoded_at.saturating_duration_since(cycle_start),
                };
                publisher.publish(Arc::new(output.detections), stats);
                pause(&armed, config.cycle_delay);
            }
            Err(err) => {
                failures += 1;
                log::warn!("inference cycle failed: {:#}", err);
                if let Some(max) = config.max_consecutive_failures {
                    if failures >= max {
                        log::error!(
                            "inference loop stopped after {} consecutive failures",
                            failures
                        );
                        break;
                    }
                }
                pause(&armed, config.failure_backoff);
            }
        }
    }
    armed.store(false, Ordering::SeqCst);
}

// Sleep in short slices so a disarm is observed promptly.
fn pause(armed: &AtomicBool, total: Duration) {
    if total.is_zero() {
        std::thread::yield_now();
        return;
    }
    let deadline = Instant::now() + total;
    while armed.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubRuntime};
    use crate::ingest::{shared, SyntheticCamera};
    use crate::ripeness::default_labels;

    fn test_config() -> ScanConfig {
        let mut config = ScanConfig::default();
        config.model.input_size = 32;
        config.detection.min_box_area = 0.0;
        config
    }

    fn loop_config() -> LoopConfig {
        LoopConfig {
            snapshot_quality: 30,
            screen: Size::new(64.0, 48.0),
            cycle_delay: Duration::from_millis(1),
            failure_backoff: Duration::from_millis(5),
            max_consecutive_failures: None,
        }
    }

    fn pipeline(runtime: StubRuntime) -> Pipeline {
        Pipeline::new(Box::new(runtime), default_labels(), &test_config()).unwrap()
    }

    fn wait_for_idle<P: Publish + Clone + 'static>(lp: &InferenceLoop<P>) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if lp.state() == LoopState::Idle {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn fps_is_reciprocal_of_publish_gap() {
        let start = Instant::now();
        let mut meter = FpsMeter::new(start);
        let first = meter.tick(start + Duration::from_millis(100));
        let second = meter.tick(start + Duration::from_millis(150));
        assert!((first - 10.0).abs() < 1e-3);
        assert!((second - 20.0).abs() < 1e-3);
        assert_eq!(meter.tick(start + Duration::from_millis(150)), 0.0);
    }

    #[test]
    fn board_is_replaced_wholesale() {
        let board = DetectionBoard::new();
        let det = Detection {
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            confidence: 0.7,
            class_label: "Matang".to_string(),
            class_index: 2,
        };
        board.publish(Arc::new(vec![det.clone(), det]), InferenceStats::default());
        assert_eq!(board.latest().len(), 2);
        board.publish(Arc::new(Vec::new()), InferenceStats::default());
        assert!(board.latest().is_empty());
    }

    #[test]
    fn armed_loop_publishes_detections_and_stats() -> Result<()> {
        let runtime =
            StubRuntime::empty(32, 5, 4).with_candidate(0, (16.0, 16.0), (8.0, 8.0), 2, 0.9);
        let camera = shared(SyntheticCamera::new("stub://test", 64, 48)?);
        let (tx, rx) = mpsc::channel::<ScanUpdate>();
        let board = DetectionBoard::new();
        let mut lp = InferenceLoop::new(pipeline(runtime), camera, loop_config(), (tx, board.clone()));

        assert_eq!(lp.state(), LoopState::Idle);
        lp.arm()?;
        assert_eq!(lp.state(), LoopState::Running);

        let first = rx.recv_timeout(Duration::from_secs(5))?;
        let second = rx.recv_timeout(Duration::from_secs(5))?;
        assert_eq!(first.detections.len(), 1);
        assert_eq!(first.detections[0].confidence, 0.9);
        assert!(first.stats.fps > 0.0);
        assert!(second.stats.fps > 0.0);

        lp.disarm()?;
        assert_eq!(lp.state(), LoopState::Idle);
        assert_eq!(board.latest().len(), 1);

        // Nothing is published once the worker has been joined.
        while rx.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn loop_survives_sporadic_failures() -> Result<()> {
        let mut camera = SyntheticCamera::new("stub://test", 32, 32)?;
        camera.fail_next(2);
        let runtime = StubRuntime::empty(32, 5, 4).fail_next(2);
        let (tx, rx) = mpsc::channel::<ScanUpdate>();
        let mut lp = InferenceLoop::new(pipeline(runtime), shared(camera), loop_config(), tx);

        lp.arm()?;
        let update = rx.recv_timeout(Duration::from_secs(5))?;
        assert!(update.detections.is_empty());
        assert_eq!(lp.state(), LoopState::Running);
        lp.disarm()?;
        Ok(())
    }

    #[test]
    fn repeated_failures_stop_the_loop_when_capped() -> Result<()> {
        let runtime = StubRuntime::empty(32, 5, 4).fail_next(1000);
        let camera = shared(SyntheticCamera::new("stub://test", 32, 32)?);
        let mut config = loop_config();
        config.failure_backoff = Duration::from_millis(1);
        config.max_consecutive_failures = Some(3);
        let (tx, rx) = mpsc::channel::<ScanUpdate>();
        let mut lp = InferenceLoop::new(pipeline(runtime), camera, config, tx);

        lp.arm()?;
        assert!(wait_for_idle(&lp));
        assert!(rx.try_recv().is_err());

        // Re-arming after a self-stop starts a fresh worker.
        lp.arm()?;
        lp.disarm()?;
        Ok(())
    }

    #[test]
    fn arming_twice_keeps_one_worker() -> Result<()> {
        let camera = shared(SyntheticCamera::new("stub://test", 32, 32)?);
        let (tx, _rx) = mpsc::channel::<ScanUpdate>();
        let mut lp = InferenceLoop::new(
            pipeline(StubRuntime::empty(32, 5, 4)),
            camera,
            loop_config(),
            tx,
        );
        lp.arm()?;
        lp.arm()?;
        assert_eq!(lp.state(), LoopState::Running);
        drop(lp);
        Ok(())
    }
}
