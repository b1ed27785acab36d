#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::{imageops, ImageBuffer, Rgb};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

type Plan = TypedRunnableModel<TypedModel>;

/// Decoding parameters for a YOLO-style detection head.
#[derive(Clone, Debug)]
pub struct YoloParams {
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Class names indexed by model class id.
    pub class_names: Vec<String>,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            iou_threshold: 0.45,
            max_detections: 100,
            class_names: vec!["ambulance".to_string()],
        }
    }
}

/// Tract-based backend for YOLOv8-style ONNX exports.
///
/// The model is expected to take `[1, 3, S, S]` RGB in 0..1 and return
/// `[1, 4 + classes, anchors]` rows of `cx, cy, w, h, score_0 .. score_n`.
/// The optimized plan is shared, so cloning the backend is cheap and does not
/// reload the model.
#[derive(Clone)]
pub struct TractBackend {
    model: Arc<Plan>,
    params: Arc<YoloParams>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn load<P: AsRef<Path>>(model_path: P, params: YoloParams) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = params.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        log::info!(
            "loaded detector model {} ({} classes, input {}px)",
            model_path.display(),
            params.class_names.len(),
            params.input_size
        );

        Ok(Self {
            model: Arc::new(model),
            params: Arc::new(params),
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let size = self.params.input_size;
        let source: ImageBuffer<Rgb<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.width(), frame.height(), frame.pixels())
                .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = imageops::resize(&source, size, size, imageops::FilterType::Triangle);

        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(
        &self,
        outputs: TVec<TValue>,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[1] < 5 {
            return Err(anyhow!("unexpected detector output shape {:?}", shape));
        }
        let classes = shape[1] - 4;
        let anchors = shape[2];

        let scale_x = frame.width() as f32 / self.params.input_size as f32;
        let scale_y = frame.height() as f32 / self.params.input_size as f32;

        let mut candidates: Vec<(usize, f32, BoundingBox)> = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (0..classes)
                .map(|c| (c, view[[0, 4 + c, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, item| {
                    if item.1 > best.1 {
                        item
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < confidence_threshold {
                continue;
            }
            let cx = view[[0, 0, anchor]] * scale_x;
            let cy = view[[0, 1, anchor]] * scale_y;
            let w = view[[0, 2, anchor]] * scale_x;
            let h = view[[0, 3, anchor]] * scale_y;
            let region = BoundingBox::from_corners(
                (cx - w / 2.0).max(0.0),
                (cy - h / 2.0).max(0.0),
                (cx + w / 2.0).min(frame.width() as f32),
                (cy + h / 2.0).min(frame.height() as f32),
            );
            candidates.push((class_id, score, region));
        }

        let kept = non_max_suppression(
            candidates,
            self.params.iou_threshold,
            self.params.max_detections,
        );
        Ok(kept
            .into_iter()
            .map(|(class_id, score, region)| {
                let label = self
                    .params
                    .class_names
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class{class_id}"));
                Detection::new(label, score, region)
            })
            .collect())
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.params.input_size as usize;
        let blank = Tensor::zero::<f32>(&[1, 3, size, size])?;
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(
    mut candidates: Vec<(usize, f32, BoundingBox)>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<(usize, f32, BoundingBox)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.0 == candidate.0 && k.2.iou(&candidate.2) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
