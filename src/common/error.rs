use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceAuthError {
    #[error("Invalid username '{username}': {reason}")]
    InvalidUsername { username: String, reason: &'static str },

    #[error("User not enrolled: {0}")]
    NotEnrolled(String),

    #[error("Corrupt signature data in {path}: {message}")]
    CorruptData { path: PathBuf, message: String },

    #[error("Signature storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write signature {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Insufficient samples: collected {collected} of {required}")]
    InsufficientSamples { collected: usize, required: usize },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FaceAuthError>;
