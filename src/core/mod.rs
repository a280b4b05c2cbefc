pub mod capability;
pub mod detector;
pub mod embedder;
pub mod engine;
pub mod signature;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{CameraSource, Embedder, FaceDetector, FaceRegion, Frame, FrameSource};
pub use detector::OnnxFaceDetector;
pub use embedder::OnnxEmbedder;
pub use engine::{extract_one, verify, ExtractError, FaceSelection, Verdict, VerifyPolicy};
pub use signature::Signature;
