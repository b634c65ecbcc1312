#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Frames are resized to the model input, normalised to 0..1, and the
/// `[1, 4 + classes, anchors]` output is decoded into boxes in frame space.
/// The model file is read once at construction; inference does no I/O.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    width: u32,
    height: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let resized = if frame.dimensions() == (self.width, self.height) {
            frame.image().clone()
        } else {
            imageops::resize(frame.image(), self.width, self.height, FilterType::Triangle)
        };
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        )
        .into_tensor()
    }

    fn decode(&self, output: &Tensor, frame_w: u32, frame_h: u32) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .map_err(|_| anyhow!("expected [1, 4 + classes, anchors] output"))?;
        let (batch, channels, anchors) = view.dim();
        if batch != 1 || channels < 5 {
            return Err(anyhow!(
                "unexpected detector output shape [{}, {}, {}]",
                batch,
                channels,
                anchors
            ));
        }

        let sx = frame_w as f32 / self.width as f32;
        let sy = frame_h as f32 / self.height as f32;
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let (class, score) = (4..channels)
                .map(|c| (c - 4, view[[0, c, i]]))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score.is_nan() || score < self.confidence_threshold {
                continue;
            }
            let bbox = BoundingBox::from_center(
                view[[0, 0, i]] * sx,
                view[[0, 1, i]] * sy,
                view[[0, 2, i]] * sx,
                view[[0, 3, i]] * sy,
            );
            candidates.push(Detection::new(bbox, class as i64, score.min(1.0)));
        }
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, frame.width(), frame.height())
    }
}
