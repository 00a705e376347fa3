//! Snapshot preprocessing.
//!
//! Decodes a compressed snapshot, cuts the largest centered square out of it,
//! resamples that square to the model resolution and hands back interleaved
//! RGB bytes together with the crop geometry the mapper needs later.
//!
//! A snapshot that cannot be decoded never fails the cycle: the caller gets a
//! mid-gray frame of the right shape instead.

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use image::GenericImageView;

/// Fill value used when a snapshot cannot be decoded.
pub const FALLBACK_GRAY: u8 = 128;

/// Preprocessed frame plus the geometry of the crop it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeResult {
    /// `target × target × 3` RGB bytes, row-major, interleaved.
    pub pixels: Vec<u8>,
    pub crop_offset_x: u32,
    pub crop_offset_y: u32,
    /// Side of the square crop, `min(source_width, source_height)`.
    pub crop_size: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl DecodeResult {
    /// Neutral frame standing in for an undecodable snapshot. Its geometry is
    /// the identity so downstream mapping stays well defined.
    pub fn gray(target_size: u32) -> Self {
        let len = (target_size as usize) * (target_size as usize) * 3;
        Self {
            pixels: vec![FALLBACK_GRAY; len],
            crop_offset_x: 0,
            crop_offset_y: 0,
            crop_size: target_size,
            source_width: target_size,
            source_height: target_size,
        }
    }
}

/// Decode, center-crop and resize, propagating decode errors.
pub fn try_decode_center_crop(bytes: &[u8], target_size: u32) -> Result<DecodeResult> {
    if target_size == 0 {
        return Err(anyhow!("target size must be greater than zero"));
    }
    if bytes.is_empty() {
        return Err(anyhow!("snapshot is empty"));
    }

    let image = image::load_from_memory(bytes).context("decode snapshot")?;
    let (source_width, source_height) = image.dimensions();
    if source_width == 0 || source_height == 0 {
        return Err(anyhow!(
            "snapshot has no pixels ({}x{})",
            source_width,
            source_height
        ));
    }

    let crop_size = source_width.min(source_height);
    let crop_offset_x = center_offset(source_width, crop_size);
    let crop_offset_y = center_offset(source_height, crop_size);

    log::debug!(
        "center crop {}x{} -> [{},{} {}x{}] -> {}x{}",
        source_width,
        source_height,
        crop_offset_x,
        crop_offset_y,
        crop_size,
        crop_size,
        target_size,
        target_size
    );

    let pixels = image
        .crop_imm(crop_offset_x, crop_offset_y, crop_size, crop_size)
        .resize_exact(target_size, target_size, FilterType::Triangle)
        .into_rgb8()
        .into_raw();

    Ok(DecodeResult {
        pixels,
        crop_offset_x,
        crop_offset_y,
        crop_size,
        source_width,
        source_height,
    })
}

/// Decode, center-crop and resize; an undecodable snapshot becomes a gray
/// frame and a warning.
pub fn decode_center_crop(bytes: &[u8], target_size: u32) -> DecodeResult {
    match try_decode_center_crop(bytes, target_size) {
        Ok(result) => result,
        Err(err) => {
            log::warn!("snapshot decode failed, using gray frame: {:#}", err);
            DecodeResult::gray(target_size)
        }
    }
}

/// Scale bytes into `[0, 1]`. No mean or deviation shift.
pub fn normalize(pixels: &[u8]) -> Vec<f32> {
    pixels.iter().map(|&p| p as f32 / 255.0).collect()
}

// Half-pixel overflow rounds toward the far edge.
fn center_offset(length: u32, crop: u32) -> u32 {
    (length - crop + 1) / 2
}
