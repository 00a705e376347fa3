//! Coordinate mapping between model, source, screen and container spaces.
//!
//! Live overlay: model input pixels -> crop-local pixels -> source pixels ->
//! screen points. The screen is assumed to show the entire source frame with a
//! plain non-cropping scale; when the preview applies its own cover crop the
//! overlay drifts proportionally.
//!
//! Still result: screen points -> photo pixels -> the "cover" displayed size
//! of the photo inside a fixed container -> container points, minus the half
//! overflow the cover fit crops away, clipped to the container.
//!
//! Every function here is pure.

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, Detection};
use crate::preprocess::DecodeResult;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Height over width.
    pub fn aspect(&self) -> f32 {
        self.height / self.width
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Where the model input square sits inside the source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropGeometry {
    pub offset_x: f32,
    pub offset_y: f32,
    pub crop_size: f32,
    pub source: Size,
}

impl CropGeometry {
    /// A square source used as-is.
    pub fn identity(side: f32) -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            crop_size: side,
            source: Size::new(side, side),
        }
    }
}

impl From<&DecodeResult> for CropGeometry {
    fn from(decoded: &DecodeResult) -> Self {
        Self {
            offset_x: decoded.crop_offset_x as f32,
            offset_y: decoded.crop_offset_y as f32,
            crop_size: decoded.crop_size as f32,
            source: Size::new(decoded.source_width as f32, decoded.source_height as f32),
        }
    }
}

/// Model-space box to source pixels (crop scale, then crop offset).
pub fn map_to_source(bbox: BoundingBox, model_input_size: u32, crop: &CropGeometry) -> BoundingBox {
    if model_input_size == 0 {
        return BoundingBox::default();
    }
    let to_crop = crop.crop_size / model_input_size as f32;
    BoundingBox::new(
        bbox.x * to_crop + crop.offset_x,
        bbox.y * to_crop + crop.offset_y,
        bbox.width * to_crop,
        bbox.height * to_crop,
    )
}

/// Model-space box to screen points through the crop and source stages.
pub fn map_center_crop(
    bbox: BoundingBox,
    model_input_size: u32,
    crop: &CropGeometry,
    screen: Size,
) -> BoundingBox {
    if crop.source.is_degenerate() || screen.is_degenerate() {
        return BoundingBox::default();
    }
    let source = map_to_source(bbox, model_input_size, crop);
    let sx = screen.width / crop.source.width;
    let sy = screen.height / crop.source.height;
    BoundingBox::new(
        source.x * sx,
        source.y * sy,
        source.width * sx,
        source.height * sy,
    )
}

/// Map a whole detection list for the live overlay. Confidence and class
/// travel unchanged.
pub fn scale_detections_center_crop(
    detections: &[Detection],
    model_input_size: u32,
    crop: &CropGeometry,
    screen: Size,
) -> Vec<Detection> {
    detections
        .iter()
        .map(|det| det.with_bbox(map_center_crop(det.bbox, model_input_size, crop, screen)))
        .collect()
}

/// "Cover" placement of a photo inside a fixed-aspect container.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoverFit {
    photo: Size,
    container: Size,
    displayed: Size,
    offset_x: f32,
    offset_y: f32,
}

impl CoverFit {
    pub fn new(photo: Size, container: Size) -> Self {
        let mut fit = Self {
            photo,
            container,
            displayed: Size::default(),
            offset_x: 0.0,
            offset_y: 0.0,
        };
        if photo.is_degenerate() || container.is_degenerate() {
            return fit;
        }

        if photo.aspect() > container.aspect() {
            // Taller than the container: width fills, vertical overflow.
            fit.displayed = Size::new(container.width, container.width * photo.aspect());
            fit.offset_y = (fit.displayed.height - container.height) / 2.0;
        } else {
            fit.displayed = Size::new(container.height / photo.aspect(), container.height);
            fit.offset_x = (fit.displayed.width - container.width) / 2.0;
        }
        fit
    }

    /// Size of the photo before the container crops it.
    pub fn displayed_size(&self) -> Size {
        self.displayed
    }

    /// Overflow cropped from the left and top edges.
    pub fn crop_offset(&self) -> (f32, f32) {
        (self.offset_x, self.offset_y)
    }

    pub fn container(&self) -> Size {
        self.container
    }

    /// Screen-space box captured at freeze time to container points.
    ///
    /// The result is clipped to the container, so width and height are never
    /// negative; a box outside the visible crop comes back with zero area.
    pub fn map(&self, bbox: BoundingBox, screen: Size) -> BoundingBox {
        if self.displayed.is_degenerate() || screen.is_degenerate() {
            return BoundingBox::default();
        }

        let to_photo_x = self.photo.width / screen.width;
        let to_photo_y = self.photo.height / screen.height;
        let to_displayed_x = self.displayed.width / self.photo.width;
        let to_displayed_y = self.displayed.height / self.photo.height;

        let left = bbox.x * to_photo_x * to_displayed_x - self.offset_x;
        let top = bbox.y * to_photo_y * to_displayed_y - self.offset_y;
        let right = bbox.right() * to_photo_x * to_displayed_x - self.offset_x;
        let bottom = bbox.bottom() * to_photo_y * to_displayed_y - self.offset_y;

        let left = clip(left, self.container.width);
        let top = clip(top, self.container.height);
        let right = clip(right, self.container.width);
        let bottom = clip(bottom, self.container.height);

        BoundingBox::new(left, top, (right - left).max(0.0), (bottom - top).max(0.0))
    }

    /// Map every detection and keep only those still visible.
    pub fn visible_detections(&self, detections: &[Detection], screen: Size) -> Vec<Detection> {
        detections
            .iter()
            .map(|det| det.with_bbox(self.map(det.bbox, screen)))
            .filter(|det| !det.bbox.is_empty())
            .collect()
    }
}

fn clip(value: f32, limit: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.max(0.0).min(limit)
}
