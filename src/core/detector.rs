use crate::common::config::DetectorConfig;
use crate::common::{Config, FaceAuthError, Result};
use crate::core::capability::{FaceDetector, FaceRegion, Frame};
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::path::Path;
use std::sync::Arc;

/// Corner-form box in detector input space.
#[derive(Debug, Clone)]
struct RawBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// YOLO-style single-class face detector running on ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Session,
    _environment: Arc<Environment>,
    config: DetectorConfig,
}

pub(crate) fn build_session(
    name: &str,
    model_path: &Path,
    optimization_level: u32,
) -> Result<(Session, Arc<Environment>)> {
    let environment = Arc::new(
        Environment::builder()
            .with_name(name)
            .build()
            .map_err(|e| FaceAuthError::Model(format!("Failed to create environment: {}", e)))?
    );

    if !model_path.exists() {
        return Err(FaceAuthError::Model(
            format!("Model for {} not found at: {:?}", name, model_path)
        ));
    }

    let opt_level = match optimization_level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    };
    let session = SessionBuilder::new(&environment)?
        .with_optimization_level(opt_level)?
        .with_model_from_file(model_path)?;

    Ok((session, environment))
}

impl OnnxFaceDetector {
    pub fn new(config: &Config) -> Result<Self> {
        let (session, environment) = build_session(
            "face_detector",
            &config.models.detector_path,
            config.embedder.optimization_level,
        )?;
        tracing::info!("Face detector loaded from {}", config.models.detector_path.display());

        Ok(Self {
            session,
            _environment: environment,
            config: config.detector.clone(),
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        let norm_factor = 1.0 / 255.0;
        for (x, y, pixel) in gray.enumerate_pixels() {
            let value = pixel[0] as f32 * norm_factor;
            let (x, y) = (x as usize, y as usize);
            array[[0, 0, y, x]] = value;
            array[[0, 1, y, x]] = value;
            array[[0, 2, y, x]] = value;
        }

        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<RawBox>> {
        let mut boxes = Vec::new();

        let Some(first) = outputs.first() else {
            return Ok(boxes);
        };
        let output = first.try_extract::<f32>()?.view().to_owned();
        let shape = output.shape().to_vec();
        let values: Vec<f32> = output.iter().copied().collect();

        // [1, N, 5+] or transposed [1, 5+, N]
        let (num_predictions, prediction_length, is_transposed) = if shape.len() >= 3 {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        } else if shape.len() == 2 {
            (shape[0], shape[1], false)
        } else {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Ok(boxes);
        };

        if prediction_length < 5 {
            tracing::warn!("Detector output has no confidence column: {:?}", shape);
            return Ok(boxes);
        }

        let input_width = self.config.input_width as f32;
        let input_height = self.config.input_height as f32;

        for i in 0..num_predictions {
            let at = |field: usize| {
                if is_transposed {
                    values[field * num_predictions + i]
                } else {
                    values[i * prediction_length + field]
                }
            };
            let (cx, cy, w, h, confidence) = (at(0), at(1), at(2), at(3), at(4));

            if confidence <= 0.001 {
                continue;
            }

            // Normalized coordinates are scaled up to input pixels
            let (sx, sy) = if cx > 1.0 || cy > 1.0 || w > 1.0 || h > 1.0 {
                (1.0, 1.0)
            } else {
                (input_width, input_height)
            };
            let (cx, cy, w, h) = (cx * sx, cy * sy, w * sx, h * sy);

            let x1 = (cx - w / 2.0).max(0.0);
            let y1 = (cy - h / 2.0).max(0.0);
            let x2 = (cx + w / 2.0).min(input_width);
            let y2 = (cy + h / 2.0).min(input_height);

            if x2 > x1 && y2 > y1 {
                boxes.push(RawBox { x1, y1, x2, y2, confidence });
            }
        }

        Ok(boxes)
    }
}

/// Suppresses overlapping boxes, keeping the most confident of each cluster.
fn apply_nms(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|kept| calculate_iou(kept, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn calculate_iou(box1: &RawBox, box2: &RawBox) -> f32 {
    let x1 = box1.x1.max(box2.x1);
    let y1 = box1.y1.max(box2.y1);
    let x2 = box1.x2.min(box2.x2);
    let y2 = box1.y2.min(box2.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1.x2 - box1.x1) * (box1.y2 - box1.y1);
    let area2 = (box2.x2 - box2.x1) * (box2.y2 - box2.y1);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Maps input-space boxes to frame regions and drops weak or small faces.
fn finalize(
    boxes: Vec<RawBox>,
    config: &DetectorConfig,
    frame_width: f32,
    frame_height: f32,
) -> Vec<FaceRegion> {
    let scale_x = frame_width / config.input_width as f32;
    let scale_y = frame_height / config.input_height as f32;

    let mut regions: Vec<FaceRegion> = apply_nms(boxes, config.iou_threshold)
        .into_iter()
        .filter(|b| b.confidence >= config.confidence)
        .map(|b| FaceRegion {
            x: b.x1 * scale_x,
            y: b.y1 * scale_y,
            width: (b.x2 - b.x1) * scale_x,
            height: (b.y2 - b.y1) * scale_y,
            confidence: b.confidence,
        })
        .filter(|r| r.width >= config.min_face_size && r.height >= config.min_face_size)
        .collect();

    regions.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    regions
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>> {
        let frame_width = frame.width() as f32;
        let frame_height = frame.height() as f32;

        let img_array = if frame.width() == self.config.input_width
            && frame.height() == self.config.input_height
        {
            self.image_to_array(frame)
        } else {
            let resized = frame.resize_exact(
                self.config.input_width,
                self.config.input_height,
                FilterType::Nearest,
            );
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(img_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let boxes = self.parse_detections(&outputs)?;
        Ok(finalize(boxes, &self.config, frame_width, frame_height))
    }
}
