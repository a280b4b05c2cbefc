//! Scripted collaborators for exercising the capture loop without hardware.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use image::{DynamicImage, GrayImage};

use crate::common::{FaceAuthError, Result};
use crate::core::capability::{
    CameraSource, Embedder, FaceDetector, FaceRegion, Frame, FrameSource,
};
use crate::core::signature::Signature;

pub const TEST_DIMENSION: usize = 4;

pub fn blank_frame() -> Frame {
    DynamicImage::ImageLuma8(GrayImage::new(64, 64))
}

/// The enrolled signature every scripted score is measured against.
pub fn target_signature() -> Signature {
    let mut values = vec![0.0; TEST_DIMENSION];
    values[0] = 1.0;
    Signature::from_normalized(values).unwrap()
}

/// A unit vector whose cosine with [`target_signature`] is `score`.
pub fn vector_with_score(score: f64) -> Vec<f32> {
    let mut values = vec![0.0; TEST_DIMENSION];
    values[0] = score as f32;
    values[1] = (1.0 - score * score).max(0.0).sqrt() as f32;
    values
}

pub struct TestHandle {
    failing_reads: usize,
    stalled: bool,
    delay: Duration,
    reads: Rc<Cell<usize>>,
}

impl TestHandle {
    pub fn new() -> Self {
        Self { failing_reads: 0, stalled: false, delay: Duration::ZERO, reads: Rc::new(Cell::new(0)) }
    }

    /// The first `count` reads fail.
    pub fn failing_reads(mut self, count: usize) -> Self {
        self.failing_reads = count;
        self
    }

    /// Every read waits out `frame_timeout` and then fails, like a camera that stopped streaming.
    pub fn stalled(mut self, frame_timeout: Duration) -> Self {
        self.stalled = true;
        self.delay = frame_timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl FrameSource for TestHandle {
    fn read_frame(&mut self) -> Result<Frame> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = self.reads.get() + 1;
        self.reads.set(n);
        if self.stalled {
            return Err(FaceAuthError::Camera(format!("no frame within {} ms", self.delay.as_millis())));
        }
        if n <= self.failing_reads {
            return Err(FaceAuthError::Camera("scripted read failure".into()));
        }
        Ok(blank_frame())
    }
}

#[derive(Default)]
pub struct TestCamera {
    pub open_fails: bool,
    pub failing_reads: usize,
    opens: Cell<usize>,
}

impl TestCamera {
    pub fn unavailable() -> Self {
        Self { open_fails: true, ..Self::default() }
    }

    pub fn opens(&self) -> usize {
        self.opens.get()
    }
}

impl CameraSource for TestCamera {
    type Handle = TestHandle;

    fn open(&self) -> Result<TestHandle> {
        self.opens.set(self.opens.get() + 1);
        if self.open_fails {
            return Err(FaceAuthError::CameraUnavailable("scripted open failure".into()));
        }
        Ok(TestHandle::new().failing_reads(self.failing_reads))
    }
}

/// Returns the scripted number of faces per call; the last entry repeats.
pub struct ScriptedDetector {
    script: RefCell<VecDeque<usize>>,
    last: Cell<usize>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<usize>) -> Self {
        Self { script: RefCell::new(script.into()), last: Cell::new(0) }
    }

    pub fn always(faces: usize) -> Self {
        Self::new(vec![faces])
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>> {
        let count = match self.script.borrow_mut().pop_front() {
            Some(count) => {
                self.last.set(count);
                count
            }
            None => self.last.get(),
        };
        Ok((0..count)
            .map(|i| FaceRegion::new(4.0 + i as f32 * 20.0, 4.0, 16.0, 16.0))
            .collect())
    }
}

/// Returns the scripted vectors in order; the last entry repeats.
pub struct ScriptedEmbedder {
    script: RefCell<VecDeque<Vec<f32>>>,
    last: RefCell<Vec<f32>>,
    calls: Cell<usize>,
}

impl ScriptedEmbedder {
    pub fn new(script: Vec<Vec<f32>>) -> Self {
        let last = script.first().cloned().unwrap_or_else(|| vector_with_score(0.0));
        Self { script: RefCell::new(script.into()), last: RefCell::new(last), calls: Cell::new(0) }
    }

    pub fn constant(values: Vec<f32>) -> Self {
        Self::new(vec![values])
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Embedder for ScriptedEmbedder {
    fn embed(&self, _face: &Frame) -> Result<Vec<f32>> {
        self.calls.set(self.calls.get() + 1);
        if let Some(next) = self.script.borrow_mut().pop_front() {
            *self.last.borrow_mut() = next;
        }
        Ok(self.last.borrow().clone())
    }
}

pub struct PanickingDetector;

impl FaceDetector for PanickingDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<FaceRegion>> {
        panic!("detector blew up");
    }
}
