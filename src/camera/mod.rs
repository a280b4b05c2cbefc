pub mod v4l2;

pub use v4l2::{PixelFormat, V4l2Camera, V4l2Handle};
