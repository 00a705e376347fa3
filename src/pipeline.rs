//! One detection cycle: acquire, preprocess, infer, decode, suppress, map.

use std::time::Instant;

use anyhow::{anyhow, Context, Result};

use crate::config::ScanConfig;
use crate::detect::{
    apply_nms, filter_min_area, load_labels, open_runtime, DecodeOptions, Decoder, Detection,
    ModelRuntime, OutputLayout,
};
use crate::ingest::{self, SharedCamera};
use crate::mapping::{scale_detections_center_crop, CropGeometry, Size};
use crate::preprocess::{decode_center_crop, normalize};
use crate::ripeness;

/// Result of one cycle.
#[derive(Clone, Debug)]
pub struct CycleOutput {
    /// Detections in screen points.
    pub detections: Vec<Detection>,
    pub crop: CropGeometry,
    /// When decoding (and suppression) finished.
    pub decoded_at: Instant,
}

/// Loaded model, labels and decoder. Read-only between cycles apart from the
/// decoder's one-shot mismatch report.
pub struct Pipeline {
    runtime: Box<dyn ModelRuntime>,
    decoder: Decoder,
    input_size: u32,
    iou_threshold: f32,
    min_box_area: f32,
}

impl Pipeline {
    /// Load labels and model as configured.
    pub fn open(config: &ScanConfig) -> Result<Self> {
        let labels = match &config.model.labels_path {
            Some(path) => load_labels(path)?,
            None => ripeness::default_labels(),
        };
        let runtime = open_runtime(&config.model, labels.len())
            .with_context(|| format!("failed to load model {}", config.model.path))?;
        Self::new(runtime, labels, config)
    }

    /// Bind a loaded runtime to its labels. The output layout comes from the
    /// runtime's declared shape; any disagreement with the labels is a
    /// configuration error.
    pub fn new(
        mut runtime: Box<dyn ModelRuntime>,
        labels: Vec<String>,
        config: &ScanConfig,
    ) -> Result<Self> {
        let input_size = runtime.input_size();
        if input_size != config.model.input_size {
            return Err(anyhow!(
                "model input is {}x{} but {} is configured",
                input_size,
                input_size,
                config.model.input_size
            ));
        }
        let layout = OutputLayout::from_shape(runtime.output_shape(), labels.len())
            .context("model output does not match the label file")?;
        let decoder = Decoder::new(
            layout,
            labels,
            DecodeOptions {
                confidence_threshold: config.detection.confidence_threshold,
                input_size,
                units: config.model.box_units,
            },
        )?;
        runtime.warm_up().context("model warm-up failed")?;

        log::info!(
            "pipeline ready: {} on {}, input {}x{}, {} classes x {} boxes",
            runtime.name(),
            runtime.delegate(),
            input_size,
            input_size,
            layout.num_classes,
            layout.num_boxes
        );

        Ok(Self {
            runtime,
            decoder,
            input_size,
            iou_threshold: config.detection.iou_threshold,
            min_box_area: config.detection.min_box_area,
        })
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn labels(&self) -> &[String] {
        self.decoder.labels()
    }

    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Detect on encoded image bytes. Boxes stay in model input pixels.
    ///
    /// Undecodable bytes are replaced by a gray frame; only a runtime failure
    /// is an error.
    pub fn detect(&mut self, bytes: &[u8]) -> Result<(Vec<Detection>, CropGeometry)> {
        let decoded = decode_center_crop(bytes, self.input_size);
        let crop = CropGeometry::from(&decoded);
        let input = normalize(&decoded.pixels);
        let output = self.runtime.run(&input).context("inference failed")?;
        let candidates = self.decoder.decode(&output);
        let kept = apply_nms(candidates, self.iou_threshold);
        Ok((filter_min_area(kept, self.min_box_area), crop))
    }

    /// Run one full cycle against the camera and map the result to `screen`.
    pub fn run_cycle(
        &mut self,
        camera: &SharedCamera,
        quality: u8,
        screen: Size,
    ) -> Result<CycleOutput> {
        let snapshot = ingest::take_snapshot(camera, quality)?;
        let bytes = snapshot.read();
        snapshot.discard();
        let (detections, crop) = self.detect(&bytes?)?;
        let decoded_at = Instant::now();

        let detections =
            scale_detections_center_crop(&detections, self.input_size, &crop, screen);
        log::debug!(
            "cycle: {} detections, crop [{},{} {}] of {}x{}",
            detections.len(),
            crop.offset_x,
            crop.offset_y,
            crop.crop_size,
            crop.source.width,
            crop.source.height
        );
        Ok(CycleOutput {
            detections,
            crop,
            decoded_at,
        })
    }
}
