use crate::common::config::CameraConfig;
use crate::common::{FaceAuthError, Result};
use crate::core::capability::{CameraSource, Frame, FrameSource};
use image::{DynamicImage, ImageBuffer, Luma};
use std::io;
use std::time::Duration;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

const STREAM_BUFFERS: u32 = 4;

/// Pixel layouts we know how to turn into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Grey,
    Yuyv,
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: &FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"GREY" | b"Y8  " => Some(PixelFormat::Grey),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"MJPG" => Some(PixelFormat::Mjpg),
            _ => None,
        }
    }
}

/// Opens `/dev/video<index>` on demand. Nothing is held between opens.
#[derive(Debug, Clone)]
pub struct V4l2Camera {
    config: CameraConfig,
}

impl V4l2Camera {
    pub fn new(config: &CameraConfig) -> Self {
        Self { config: config.clone() }
    }

    pub fn device_index(&self) -> u32 {
        self.config.device_index
    }
}

/// An open, streaming capture device. Dropping it stops the stream and closes the device.
pub struct V4l2Handle {
    // Declared first so the stream is torn down before the device.
    stream: v4l::io::mmap::Stream<'static>,
    _device: Device,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_timeout_ms: u64,
}

impl CameraSource for V4l2Camera {
    type Handle = V4l2Handle;

    fn open(&self) -> Result<V4l2Handle> {
        let index = self.config.device_index;
        let device = Device::new(index as usize).map_err(|e| {
            FaceAuthError::CameraUnavailable(format!("Failed to open camera {}: {}", index, e))
        })?;

        let caps = device.query_caps().map_err(|e| {
            FaceAuthError::CameraUnavailable(format!("Failed to query capabilities: {}", e))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support video capture", index, caps.card);
        }

        let mut fmt = device
            .format()
            .map_err(|e| FaceAuthError::CameraUnavailable(format!("Failed to get format: {}", e)))?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;

        // Keep native GREY (IR sensors) or YUYV, otherwise ask for MJPG
        if PixelFormat::from_fourcc(&fmt.fourcc).is_none() {
            fmt.fourcc = FourCC::new(b"MJPG");
        }
        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let actual = device.format().map_err(|e| {
            FaceAuthError::CameraUnavailable(format!("Failed to get final format: {}", e))
        })?;
        let format = PixelFormat::from_fourcc(&actual.fourcc).ok_or_else(|| {
            FaceAuthError::CameraUnavailable(format!(
                "Unsupported pixel format {:?}",
                actual.fourcc.str().unwrap_or("????")
            ))
        })?;

        if actual.width != self.config.width || actual.height != self.config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, self.config.width, self.config.height
            );
        }
        tracing::debug!(
            "Camera {} ({}) streaming {}x{} {:?}",
            index, caps.card, actual.width, actual.height, format
        );

        let mut stream = v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| FaceAuthError::CameraUnavailable(format!("Failed to create stream: {}", e)))?;
        // DQBUF polls the device with this timeout instead of blocking forever.
        stream.set_timeout(self.config.frame_timeout());

        // Let exposure and IR emitters settle
        for i in 0..self.config.warmup_frames {
            stream.next().map_err(|e| {
                FaceAuthError::CameraUnavailable(format!(
                    "Warmup frame {}: {}", i, describe_read_error(&e, self.config.frame_timeout_ms)
                ))
            })?;
            std::thread::sleep(Duration::from_millis(self.config.warmup_delay_ms));
        }

        Ok(V4l2Handle {
            stream,
            _device: device,
            frame_timeout_ms: self.config.frame_timeout_ms,
            format,
            width: actual.width,
            height: actual.height,
        })
    }
}

impl FrameSource for V4l2Handle {
    fn read_frame(&mut self) -> Result<Frame> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| FaceAuthError::Camera(describe_read_error(&e, self.frame_timeout_ms)))?;

        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used == 0 { buf } else { &buf[..used] };
        decode_frame(self.format, data, self.width, self.height)
    }
}

fn describe_read_error(error: &io::Error, timeout_ms: u64) -> String {
    if error.kind() == io::ErrorKind::TimedOut {
        format!("no frame within {} ms", timeout_ms)
    } else {
        format!("failed to capture: {}", error)
    }
}

pub(crate) fn decode_frame(format: PixelFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    match format {
        PixelFormat::Grey => grey_to_image(data, width, height),
        PixelFormat::Yuyv => yuyv_to_image(data, width, height),
        PixelFormat::Mjpg => Ok(image::load_from_memory(data)?),
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height) as usize;
    if data.len() < len {
        return Err(FaceAuthError::Camera(format!(
            "Short GREY frame: {} bytes for {}x{}", data.len(), width, height
        )));
    }
    let img_buffer = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..len].to_vec())
        .ok_or_else(|| FaceAuthError::Camera("Failed to create grayscale image buffer".into()))?;

    Ok(DynamicImage::ImageLuma8(img_buffer))
}

/// YUYV packs Y0 U Y1 V; the luma plane is every even byte.
fn yuyv_to_image(data: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let len = (width * height) as usize;
    if data.len() < len * 2 {
        return Err(FaceAuthError::Camera(format!(
            "Short YUYV frame: {} bytes for {}x{}", data.len(), width, height
        )));
    }
    let luma: Vec<u8> = data.iter().step_by(2).take(len).copied().collect();
    grey_to_image(&luma, width, height)
}
