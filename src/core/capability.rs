//! Narrow interfaces to the swappable collaborators: detector, embedder, camera.

use crate::common::Result;
use image::DynamicImage;

pub type Frame = DynamicImage;

/// A detected face's bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    /// Pixel rectangle `(x, y, width, height)` clamped to a `frame_width` x `frame_height` frame.
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x.max(0.0).min(frame_width as f32);
        let y1 = self.y.max(0.0).min(frame_height as f32);
        let x2 = (self.x + self.width).max(0.0).min(frame_width as f32);
        let y2 = (self.y + self.height).max(0.0).min(frame_height as f32);

        let width = (x2 - x1) as u32;
        let height = (y2 - y1) as u32;
        if width == 0 || height == 0 {
            return None;
        }
        Some((x1 as u32, y1 as u32, width, height))
    }
}

pub trait FaceDetector {
    /// Returns every face found in `frame`, possibly none.
    fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>>;
}

pub trait Embedder {
    /// Maps a cropped face to a fixed-length vector.
    fn embed(&self, face: &Frame) -> Result<Vec<f32>>;
}

/// An open camera. Dropping the handle closes the device.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame>;
}

pub trait CameraSource {
    type Handle: FrameSource;

    fn open(&self) -> Result<Self::Handle>;
}
