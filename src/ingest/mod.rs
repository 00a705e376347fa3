//! Still-snapshot camera sources.
//!
//! The pipeline only ever asks a camera for two things: its authorization
//! state and "take a snapshot now". Sources:
//! - Synthetic camera (`stub://`), generated frames for tests and demos
//! - Local image directory, replayed in name order
//!
//! The live preview surface is not managed here.
//!
//! A camera is one shared, mutably-accessed resource. `SharedCamera` wraps it
//! in a mutex so exactly one snapshot request is in flight at a time.

pub mod file;
pub mod synthetic;

pub use file::DirectoryCamera;
pub use synthetic::SyntheticCamera;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::CameraSettings;

/// Camera permission state as reported by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Authorization {
    Granted,
    Denied,
    NotDetermined,
}

/// A snapshot written to local storage by the camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    /// Owned by the consumer, which deletes it once read.
    pub ephemeral: bool,
}

impl Snapshot {
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("failed to read snapshot {}", self.path.display()))
    }

    /// Remove an ephemeral snapshot. Non-ephemeral snapshots are left alone.
    pub fn discard(&self) {
        if !self.ephemeral {
            return;
        }
        if let Err(err) = std::fs::remove_file(&self.path) {
            log::debug!("snapshot {} not removed: {}", self.path.display(), err);
        }
    }
}

pub trait Camera: Send {
    fn name(&self) -> &str;

    fn authorization(&self) -> Authorization;

    /// Ask for access; returns the resulting state.
    fn request_permission(&mut self) -> Result<Authorization>;

    /// Encode the current frame at `quality` (1..=100) and write it to disk.
    fn take_snapshot(&mut self, quality: u8) -> Result<Snapshot>;
}

pub type SharedCamera = Arc<Mutex<dyn Camera>>;

pub fn shared<C: Camera + 'static>(camera: C) -> SharedCamera {
    Arc::new(Mutex::new(camera))
}

/// Open the camera named by the settings.
pub fn open_camera(settings: &CameraSettings) -> Result<SharedCamera> {
    if settings.source.starts_with("stub://") {
        let camera = SyntheticCamera::new(&settings.source, settings.width, settings.height)?;
        log::info!("camera {} opened (synthetic)", settings.source);
        return Ok(shared(camera));
    }
    if settings.source.contains("://") {
        return Err(anyhow!(
            "camera source {} is not supported; use stub:// or a local directory",
            settings.source
        ));
    }
    let camera = DirectoryCamera::open(Path::new(&settings.source))?;
    Ok(shared(camera))
}

/// Take one snapshot through the shared handle, refusing when access is not
/// granted.
pub fn take_snapshot(camera: &SharedCamera, quality: u8) -> Result<Snapshot> {
    let mut camera = camera
        .lock()
        .map_err(|_| anyhow!("camera lock poisoned"))?;
    match camera.authorization() {
        Authorization::Granted => {}
        state => {
            return Err(anyhow!(
                "camera {} is not authorized ({:?})",
                camera.name(),
                state
            ))
        }
    }
    camera.take_snapshot(quality)
}

/// Make sure the camera may be used, asking once if undecided.
pub fn ensure_authorized(camera: &SharedCamera) -> Result<()> {
    let mut camera = camera
        .lock()
        .map_err(|_| anyhow!("camera lock poisoned"))?;
    let state = match camera.authorization() {
        Authorization::NotDetermined => camera.request_permission()?,
        state => state,
    };
    if state != Authorization::Granted {
        return Err(anyhow!("camera {} permission denied", camera.name()));
    }
    Ok(())
}
