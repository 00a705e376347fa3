//! Local image directory camera.
//!
//! Replays the `.jpg`, `.jpeg` and `.png` files of a local directory in name
//! order, wrapping around at the end. Each file is re-encoded as a JPEG at the
//! requested quality so snapshot size tracks the quality knob like a real
//! camera.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use tempfile::TempDir;

use super::{Authorization, Camera, Snapshot};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct DirectoryCamera {
    name: String,
    frames: Vec<PathBuf>,
    next: usize,
    dir: TempDir,
    snapshots_taken: u64,
}

impl DirectoryCamera {
    pub fn open(path: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("failed to read camera directory {}", path.display()))?;
        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry?;
            let candidate = entry.path();
            if candidate.is_file() && is_image(&candidate) {
                frames.push(candidate);
            }
        }
        if frames.is_empty() {
            return Err(anyhow!("no images found in {}", path.display()));
        }
        frames.sort();

        let dir = tempfile::Builder::new()
            .prefix("ripeness-snapshots")
            .tempdir()
            .context("failed to create snapshot directory")?;
        log::info!(
            "camera {} opened ({} images)",
            path.display(),
            frames.len()
        );
        Ok(Self {
            name: path.display().to_string(),
            frames,
            next: 0,
            dir,
            snapshots_taken: 0,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl Camera for DirectoryCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorization(&self) -> Authorization {
        Authorization::Granted
    }

    fn request_permission(&mut self) -> Result<Authorization> {
        Ok(Authorization::Granted)
    }

    fn take_snapshot(&mut self, quality: u8) -> Result<Snapshot> {
        let source = &self.frames[self.next % self.frames.len()];
        self.next = (self.next + 1) % self.frames.len();

        let frame = image::open(source)
            .with_context(|| format!("failed to open {}", source.display()))?
            .into_rgb8();

        self.snapshots_taken += 1;
        let path = self
            .dir
            .path()
            .join(format!("snapshot-{:06}.jpg", self.snapshots_taken));
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
            .encode_image(&frame)
            .context("failed to encode snapshot")?;
        writer.flush().context("failed to write snapshot")?;

        Ok(Snapshot {
            path,
            ephemeral: true,
        })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
