pub mod camera;
pub mod common;
pub mod core;
pub mod enroll;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use common::{Config, FaceAuthError, Paths, Result};
pub use core::{CameraSource, Embedder, FaceDetector, FaceRegion, Frame, FrameSource, Signature};
pub use service::protocol;
pub use storage::SignatureStore;
