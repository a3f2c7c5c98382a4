#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract-based object detector for exported ONNX detection heads.
///
/// Expects a `[1, 3, H, W]` float input and a `[1, N, 6]` output whose rows are
/// `x1, y1, x2, y2, confidence, class` in model-input pixels. Only rows of
/// `target_class` are reported. Frames of another size are resized first and
/// boxes are scaled back to frame coordinates.
pub struct TractObjectDetector {
    model: Mutex<Plan>,
    width: u32,
    height: u32,
    target_class: u32,
}

impl TractObjectDetector {
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
            model: Mutex::new(model),
            width,
            height,
            target_class: 0,
        })
    }

    /// Override the reported class index (defaults to 0).
    pub fn with_target_class(mut self, class: u32) -> Self {
        self.target_class = class;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let image = if frame.width != self.width || frame.height != self.height {
            image::imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        } else {
            image
        };

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn extract_boxes(&self, frame: &Frame, outputs: TVec<TValue>) -> Result<Vec<BoundingBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = rows.shape();
        if shape.len() != 3 || shape[2] < 6 {
            return Err(anyhow!("unexpected detection output shape {:?}", shape));
        }

        let sx = frame.width as f32 / self.width as f32;
        let sy = frame.height as f32 / self.height as f32;
        let mut boxes = Vec::new();
        for n in 0..shape[1] {
            let class = rows[[0, n, 5]];
            if class.round() as i64 != self.target_class as i64 {
                continue;
            }
            boxes.push(BoundingBox {
                x1: rows[[0, n, 0]] * sx,
                y1: rows[[0, n, 1]] * sy,
                x2: rows[[0, n, 2]] * sx,
                y2: rows[[0, n, 3]] * sy,
                confidence: rows[[0, n, 4]],
            });
        }
        Ok(boxes)
    }
}

impl ObjectDetector for TractObjectDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&self, frame: &Frame, threshold: f32) -> Result<Vec<BoundingBox>> {
        let input = self.build_input(frame)?;
        let outputs = {
            let model = self
                .model
                .lock()
                .map_err(|_| anyhow!("tract model lock poisoned"))?;
            model
                .run(tvec!(input.into()))
                .context("ONNX inference failed")?
        };
        let mut boxes = self.extract_boxes(frame, outputs)?;
        boxes.retain(|b| b.confidence >= threshold);
        Ok(boxes)
    }

    /// One blank inference so the first real frame does not pay plan setup.
    fn warm_up(&self) -> Result<()> {
        let pixels = vec![0u8; (self.width as usize) * (self.height as usize) * 3];
        let blank = Frame::from_rgb(pixels, self.width, self.height, 0)?;
        self.detect(&blank, 1.0).map(|_| ())
    }
}
