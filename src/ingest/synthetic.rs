//! Synthetic camera (`stub://`).
//!
//! Paints a fruit-like disc over a soft background, jittered per frame, and
//! writes it as a JPEG into a private temporary directory.

use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand::Rng;
use tempfile::TempDir;

use super::{Authorization, Camera, Snapshot};

pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    authorization: Authorization,
    dir: TempDir,
    snapshots_taken: u64,
    failures_remaining: u32,
}

impl SyntheticCamera {
    pub fn new(name: &str, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic camera needs a non-empty frame size"));
        }
        let dir = tempfile::Builder::new()
            .prefix("ripeness-snapshots")
            .tempdir()
            .context("failed to create snapshot directory")?;
        Ok(Self {
            name: name.to_string(),
            width,
            height,
            authorization: Authorization::Granted,
            dir,
            snapshots_taken: 0,
            failures_remaining: 0,
        })
    }

    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = authorization;
        self
    }

    /// Make the next `count` snapshot requests fail.
    pub fn fail_next(&mut self, count: u32) {
        self.failures_remaining = count;
    }

    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken
    }

    fn render(&self) -> RgbImage {
        let mut rng = rand::thread_rng();
        let (w, h) = (self.width as f32, self.height as f32);
        let radius = w.min(h) * rng.gen_range(0.18..0.24);
        let cx = w / 2.0 + rng.gen_range(-0.03..0.03) * w;
        let cy = h / 2.0 + rng.gen_range(-0.03..0.03) * h;
        let shade: u8 = rng.gen_range(60..110);

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let dx = x as f32 - cx;
            let dy = (y as f32 - cy) * 0.8;
            if dx * dx + dy * dy <= radius * radius {
                Rgb([shade / 2, shade, shade / 3])
            } else {
                let tone = 170 + ((y * 60) / self.height.max(1)) as u8;
                Rgb([tone, tone, tone.saturating_sub(10)])
            }
        })
    }
}

impl Camera for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn authorization(&self) -> Authorization {
        self.authorization
    }

    fn request_permission(&mut self) -> Result<Authorization> {
        if self.authorization == Authorization::NotDetermined {
            self.authorization = Authorization::Granted;
        }
        Ok(self.authorization)
    }

    fn take_snapshot(&mut self, quality: u8) -> Result<Snapshot> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(anyhow!("synthetic camera {} failure injected", self.name));
        }
        self.snapshots_taken += 1;
        let path = self
            .dir
            .path()
            .join(format!("snapshot-{:06}.jpg", self.snapshots_taken));
        let frame = self.render();

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
