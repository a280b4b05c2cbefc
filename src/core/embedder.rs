use crate::common::config::EmbedderConfig;
use crate::common::{Config, FaceAuthError, Result};
use crate::core::capability::{Embedder, Frame};
use crate::core::detector::build_session;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, Session, Value};
use std::sync::Arc;

/// ArcFace-style embedding network running on ONNX Runtime.
pub struct OnnxEmbedder {
    session: Session,
    _environment: Arc<Environment>,
    config: EmbedderConfig,
}

impl OnnxEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let (session, environment) = build_session(
            "face_embedder",
            &config.models.embedder_path,
            config.embedder.optimization_level,
        )?;
        tracing::info!("Face embedder loaded from {}", config.models.embedder_path.display());

        Ok(Self {
            session,
            _environment: environment,
            config: config.embedder.clone(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }
}

/// Builds the NCHW input tensor: `(pixel - mean) / std` per channel.
fn preprocess(img: &DynamicImage, config: &EmbedderConfig) -> Array4<f32> {
    let size = config.input_size;
    let resized = img.resize_exact(size, size, FilterType::Triangle);
    let size = size as usize;
    let (mean, std) = (config.normalization_mean, config.normalization_std);

    if config.channels == 1 {
        let gray = resized.to_luma8();
        let mut array = Array4::<f32>::zeros((1, 1, size, size));
        for (x, y, pixel) in gray.enumerate_pixels() {
            array[[0, 0, y as usize, x as usize]] = (pixel[0] as f32 - mean) / std;
        }
        array
    } else {
        let rgb = resized.to_rgb8();
        let mut array = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                array[[0, c, y, x]] = (pixel[c] as f32 - mean) / std;
            }
        }
        array
    }
}

fn l2_normalize(mut values: Vec<f32>) -> Result<Vec<f32>> {
    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return Err(FaceAuthError::Model("Embedder produced a degenerate vector".into()));
    }
    for v in &mut values {
        *v /= norm;
    }
    Ok(values)
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, face: &Frame) -> Result<Vec<f32>> {
        let input_array = preprocess(face, &self.config);
        let cow_array = CowArray::from(input_array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;

        let outputs = self.session.run(vec![input_tensor])?;
        let first = outputs
            .first()
            .ok_or_else(|| FaceAuthError::Model("Embedder returned no outputs".into()))?;
        let embedding = first.try_extract::<f32>()?.view().to_owned().into_raw_vec();

        if embedding.len() != self.config.dimension {
            return Err(FaceAuthError::Model(format!(
                "Embedder output has {} values, expected {}",
                embedding.len(),
                self.config.dimension
            )));
        }

        l2_normalize(embedding)
    }
}
