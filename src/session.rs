//! Scan session: continuous scanning, freeze-capture of the best detection,
//! and back.
//!
//! ```text
//! Idle --start--> Scanning --capture--> Capturing --ok--> Result
//!                    ^                      |                |
//!                    +------- failed -------+                |
//!                    +----------- retake / finish -----------+
//! ```

use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::ScanConfig;
use crate::detect::{best_detection, Detection};
use crate::ingest::{self, SharedCamera, Snapshot};
use crate::mapping::{CoverFit, Size};
use crate::ripeness::{self, ClassInfo};
use crate::scheduler::{DetectionBoard, LoopControl};

pub const NO_DETECTIONS_NOTICE: &str =
    "No avocado detected. Point the camera at the fruit and try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scanning,
    Capturing,
    Result,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub capture_quality: u8,
    /// Pause after disarming so a pending preview frame can settle.
    pub capture_settle: Duration,
    pub screen: Size,
}

impl SessionSettings {
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            capture_quality: config.camera.capture_quality,
            capture_settle: config.timing.capture_settle,
            screen: config.display.screen,
        }
    }
}

/// What the user sees once a capture is frozen.
#[derive(Clone, Debug, Serialize)]
pub struct CapturedResult {
    pub photo: PathBuf,
    pub photo_size: Size,
    /// Screen the detections were published for.
    pub screen: Size,
    pub best: Detection,
    pub detections: Vec<Detection>,
}

impl CapturedResult {
    /// Detections placed over the photo shown with cover fit in `container`.
    /// Boxes falling outside the visible crop are left out.
    pub fn container_detections(&self, container: Size) -> Vec<Detection> {
        CoverFit::new(self.photo_size, container).visible_detections(&self.detections, self.screen)
    }

    pub fn class_info(&self) -> &'static ClassInfo {
        ripeness::class_info(&self.best.class_label)
    }

    /// Copy the photo out of the camera's scratch storage so it outlives the
    /// camera. Without `dest` a kept temp file is created.
    pub fn persist_photo(&self, dest: Option<&Path>) -> Result<PathBuf> {
        let target = match dest {
            Some(dest) => dest.to_path_buf(),
            None => {
                let suffix = self
                    .photo
                    .extension()
                    .map(|ext| format!(".{}", ext.to_string_lossy()))
                    .unwrap_or_default();
                tempfile::Builder::new()
                    .prefix("ripeness-capture-")
                    .suffix(&suffix)
                    .tempfile()
                    .context("failed to create photo file")?
                    .into_temp_path()
                    .keep()
                    .context("failed to keep photo file")?
            }
        };
        std::fs::copy(&self.photo, &target).with_context(|| {
            format!(
                "failed to copy photo {} to {}",
                self.photo.display(),
                target.display()
            )
        })?;
        Ok(target)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured,
    /// Nothing to capture; state unchanged.
    NoDetections { notice: String },
    /// The snapshot failed; scanning resumed.
    Failed { notice: String },
}

pub struct ScanSession<L: LoopControl> {
    control: L,
    board: DetectionBoard,
    camera: SharedCamera,
    settings: SessionSettings,
    state: SessionState,
    result: Option<CapturedResult>,
    transitions: Option<Sender<SessionState>>,
    paused: bool,
}

impl<L: LoopControl> ScanSession<L> {
    /// `board` must be fed by the loop behind `control`.
    pub fn new(
        control: L,
        board: DetectionBoard,
        camera: SharedCamera,
        settings: SessionSettings,
    ) -> Self {
        Self {
            control,
            board,
            camera,
            settings,
            state: SessionState::Idle,
            result: None,
            transitions: None,
            paused: false,
        }
    }

    /// Publish every state change on `tx`.
    pub fn with_transitions(mut self, tx: Sender<SessionState>) -> Self {
        self.transitions = Some(tx);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn result(&self) -> Option<&CapturedResult> {
        self.result.as_ref()
    }

    pub fn latest_detections(&self) -> Vec<Detection> {
        self.board.latest().as_ref().clone()
    }

    /// Begin scanning. Asks for camera permission if it is still undecided.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SessionState::Scanning => return Ok(()),
            SessionState::Idle => {}
            other => return Err(anyhow!("cannot start scanning from {:?}", other)),
        }
        ingest::ensure_authorized(&self.camera)?;
        self.board.clear();
        self.control.arm()?;
        self.paused = false;
        self.transition(SessionState::Scanning);
        Ok(())
    }

    /// Freeze the best of the last published detections.
    ///
    /// Refused while paused. Any failure after the scan was frozen rolls the
    /// session back to scanning and is reported as `CaptureOutcome::Failed`.
    pub fn capture(&mut self) -> Result<CaptureOutcome> {
        if self.state != SessionState::Scanning {
            return Err(anyhow!("capture needs an active scan, session is {:?}", self.state));
        }
        if self.paused {
            return Err(anyhow!("capture is not available while the scan is paused"));
        }
        let detections = self.board.latest();
        let best = match best_detection(&detections) {
            Some(best) => best.clone(),
            None => {
                return Ok(CaptureOutcome::NoDetections {
                    notice: NO_DETECTIONS_NOTICE.to_string(),
                })
            }
        };

        self.transition(SessionState::Capturing);
        if let Err(err) = self.control.disarm() {
            return Ok(self.roll_back_capture(err.context("failed to stop inference loop")));
        }
        if !self.settings.capture_settle.is_zero() {
            std::thread::sleep(self.settings.capture_settle);
        }

        let (photo, photo_size) = match self.take_photo() {
            Ok(photo) => photo,
            Err(err) => return Ok(self.roll_back_capture(err)),
        };

        self.board.clear();
        self.result = Some(CapturedResult {
            photo: photo.path,
            photo_size,
            screen: self.settings.screen,
            best,
            detections: detections.as_ref().clone(),
        });
        self.transition(SessionState::Result);
        Ok(CaptureOutcome::Captured)
    }

    fn roll_back_capture(&mut self, err: anyhow::Error) -> CaptureOutcome {
        log::warn!("capture failed: {:#}", err);
        if let Err(arm_err) = self.control.arm() {
            log::error!("failed to restart inference loop: {:#}", arm_err);
        }
        self.transition(SessionState::Scanning);
        CaptureOutcome::Failed {
            notice: format!("Capture failed: {}", err),
        }
    }

    /// Drop the frozen result and its photo, then scan again.
    pub fn retake(&mut self) -> Result<()> {
        if let Some(result) = self.leave_result()? {
            Snapshot {
                path: result.photo,
                ephemeral: true,
            }
            .discard();
        }
        Ok(())
    }

    /// Hand the frozen result to the caller, then scan again.
    pub fn finish(&mut self) -> Result<Option<CapturedResult>> {
        self.leave_result()
    }

    /// App went to the background: stop the loop but keep the session.
    pub fn pause(&mut self) -> Result<()> {
        if self.state == SessionState::Scanning && !self.paused {
            self.control.disarm()?;
            self.paused = true;
            log::info!("scan paused");
        }
        Ok(())
    }

    /// Back in the foreground. A shown result stays frozen.
    pub fn resume(&mut self) -> Result<()> {
        if self.paused {
            self.paused = false;
            if self.state == SessionState::Scanning {
                self.control.arm()?;
                log::info!("scan resumed");
            }
        }
        Ok(())
    }

    /// Stop scanning and return to idle.
    pub fn stop(&mut self) -> Result<()> {
        self.control.disarm()?;
        self.paused = false;
        self.result = None;
        self.board.clear();
        self.transition(SessionState::Idle);
        Ok(())
    }

    fn take_photo(&self) -> Result<(Snapshot, Size)> {
        let snapshot = ingest::take_snapshot(&self.camera, self.settings.capture_quality)?;
        match image::image_dimensions(&snapshot.path) {
            Ok((width, height)) => Ok((snapshot, Size::new(width as f32, height as f32))),
            Err(err) => {
                snapshot.discard();
                Err(anyhow::Error::new(err)
                    .context(format!("unreadable photo {}", snapshot.path.display())))
            }
        }
    }

    fn leave_result(&mut self) -> Result<Option<CapturedResult>> {
        if self.state != SessionState::Result {
            return Err(anyhow!("no captured result, session is {:?}", self.state));
        }
        let result = self.result.take();
        self.board.clear();
        self.control.arm()?;
        self.transition(SessionState::Scanning);
        Ok(result)
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        log::info!("scan session {:?} -> {:?}", self.state, next);
        self.state = next;
        if let Some(tx) = &self.transitions {
            if tx.send(next).is_err() {
                log::debug!("session state receiver dropped");
            }
        }
    }
}

impl<L: LoopControl> Drop for ScanSession<L> {
    fn drop(&mut self) {
        if let Err(err) = self.control.disarm() {
            log::error!("failed to stop inference loop: {:#}", err);
        }
    }
}
