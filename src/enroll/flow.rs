use std::path::{Path, PathBuf};

use crate::common::config::EnrollmentConfig;
use crate::common::{FaceAuthError, Result};
use crate::core::capability::{CameraSource, Embedder, FaceDetector, FrameSource};
use crate::core::engine::extract_one;
use crate::core::signature::Signature;
use crate::storage::{validate_username, SignatureStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAction {
    Capture,
    Cancel,
    /// No input yet; keep previewing.
    Wait,
}

/// Progress reported back to whoever drives the session.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollEvent<'a> {
    Started { username: &'a str, required: usize },
    /// Faces in the latest preview frame, `None` when the frame could not be read or scanned.
    Preview { faces: Option<usize> },
    SampleAccepted { collected: usize, required: usize },
    SampleRejected { reason: String, consecutive_failures: usize },
    Completed { path: &'a Path },
}

/// Source of user confirmations for each capture.
pub trait CapturePrompt {
    /// Polls for input between preview frames. Must not block for long;
    /// return `Wait` when nothing was pressed and `None` once input is exhausted.
    fn next_action(&mut self) -> Result<Option<PromptAction>>;

    fn notify(&mut self, event: &EnrollEvent<'_>);
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    Enrolled { path: PathBuf, samples: usize },
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
pub struct EnrollOptions {
    pub samples: usize,
    pub max_failed_captures: usize,
}

impl EnrollOptions {
    pub fn from_config(config: &EnrollmentConfig) -> Self {
        Self {
            samples: config.samples,
            max_failed_captures: config.max_failed_captures,
        }
    }
}

/// Collects `options.samples` confirmed captures, averages them and stores the result.
///
/// Frames are read and scanned continuously while waiting for input so the
/// stream never serves a stale buffer; a confirmed capture reads a fresh frame.
/// Cancellation writes nothing. Running out of input or hitting the
/// consecutive-failure cap ends with `InsufficientSamples`.
pub fn enroll<C, D, E, P>(
    username: &str,
    store: &SignatureStore,
    camera: &C,
    detector: &D,
    embedder: &E,
    prompt: &mut P,
    options: EnrollOptions,
) -> Result<EnrollOutcome>
where
    C: CameraSource + ?Sized,
    D: FaceDetector + ?Sized,
    E: Embedder + ?Sized,
    P: CapturePrompt + ?Sized,
{
    validate_username(username)?;
    if options.samples == 0 {
        return Err(FaceAuthError::Config("Enrollment needs at least one sample".into()));
    }

    let required = options.samples;
    let mut handle = camera.open()?;
    prompt.notify(&EnrollEvent::Started { username, required });

    let mut samples: Vec<Signature> = Vec::with_capacity(required);
    let mut consecutive_failures = 0usize;

    while samples.len() < required {
        let faces = match handle.read_frame() {
            Ok(frame) => detector.detect(&frame).ok().map(|regions| regions.len()),
            Err(e) => {
                tracing::debug!("Preview frame unavailable: {}", e);
                None
            }
        };
        prompt.notify(&EnrollEvent::Preview { faces });

        match prompt.next_action()? {
            Some(PromptAction::Capture) => {}
            Some(PromptAction::Wait) => continue,
            Some(PromptAction::Cancel) => {
                tracing::info!("Enrollment for {} cancelled", username);
                return Ok(EnrollOutcome::Cancelled);
            }
            None => break,
        }

        match extract_one(&mut handle, detector, embedder) {
            Ok(sample) => {
                consecutive_failures = 0;
                samples.push(sample);
                tracing::debug!("Sample {}/{} accepted", samples.len(), required);
                prompt.notify(&EnrollEvent::SampleAccepted { collected: samples.len(), required });
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::debug!("Sample rejected: {}", e);
                prompt.notify(&EnrollEvent::SampleRejected {
                    reason: e.to_string(),
                    consecutive_failures,
                });
                if consecutive_failures >= options.max_failed_captures {
                    tracing::warn!("Giving up after {} failed captures", consecutive_failures);
                    break;
                }
            }
        }
    }

    if samples.len() < required {
        return Err(FaceAuthError::InsufficientSamples { collected: samples.len(), required });
    }
    // Camera is released before touching the store.
    drop(handle);

    let signature = Signature::average(&samples)?;
    let path = store.save(username, &signature)?;
    prompt.notify(&EnrollEvent::Completed { path: &path });

    Ok(EnrollOutcome::Enrolled { path, samples: samples.len() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::capability::{FaceRegion, Frame};
    use crate::core::testing::{ScriptedDetector, ScriptedEmbedder, TestCamera};
    use image::{DynamicImage, GrayImage, Luma};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;
    use tempfile::tempdir;

    #[derive(Default)]
    struct ScriptedPrompt {
        actions: VecDeque<PromptAction>,
        accepted: usize,
        rejected: usize,
        completed: bool,
    }

    impl ScriptedPrompt {
        fn new(actions: &[PromptAction]) -> Self {
            Self { actions: actions.iter().copied().collect(), ..Self::default() }
        }

        fn captures(n: usize) -> Self {
            Self::new(&vec![PromptAction::Capture; n])
        }
    }

    impl CapturePrompt for ScriptedPrompt {
        fn next_action(&mut self) -> Result<Option<PromptAction>> {
            Ok(self.actions.pop_front())
        }

        fn notify(&mut self, event: &EnrollEvent<'_>) {
            match event {
                EnrollEvent::SampleAccepted { .. } => self.accepted += 1,
                EnrollEvent::SampleRejected { .. } => self.rejected += 1,
                EnrollEvent::Completed { .. } => self.completed = true,
                EnrollEvent::Started { .. } | EnrollEvent::Preview { .. } => {}
            }
        }
    }

    fn options(samples: usize) -> EnrollOptions {
        EnrollOptions { samples, max_failed_captures: 20 }
    }

    #[test]
    fn identical_samples_are_stored_unchanged() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::default();
        let detector = ScriptedDetector::always(1);
        let embedder = ScriptedEmbedder::constant(vec![0.5, -0.5, 0.5, 0.5]);
        let mut prompt = ScriptedPrompt::captures(5);

        let outcome =
            enroll("alice", &store, &camera, &detector, &embedder, &mut prompt, options(5)).unwrap();

        assert_eq!(
            outcome,
            EnrollOutcome::Enrolled { path: dir.path().join("alice.sig"), samples: 5 }
        );
        assert_eq!(prompt.accepted, 5);
        assert!(prompt.completed);

        let stored = store.load("alice").unwrap();
        let expected = [0.5f32, -0.5, 0.5, 0.5];
        for (a, b) in stored.as_slice().iter().zip(expected) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn cancel_persists_nothing() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::default();
        let detector = ScriptedDetector::always(1);
        let embedder = ScriptedEmbedder::constant(vec![1.0, 0.0, 0.0, 0.0]);
        let mut prompt = ScriptedPrompt::new(&[
            PromptAction::Capture,
            PromptAction::Capture,
            PromptAction::Cancel,
        ]);

        let outcome =
            enroll("alice", &store, &camera, &detector, &embedder, &mut prompt, options(5)).unwrap();

        assert_eq!(outcome, EnrollOutcome::Cancelled);
        assert!(!store.is_enrolled("alice").unwrap());
    }

    #[test]
    fn exhausted_input_is_insufficient() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::default();
        let detector = ScriptedDetector::always(1);
        let embedder = ScriptedEmbedder::constant(vec![1.0, 0.0, 0.0, 0.0]);
        let mut prompt = ScriptedPrompt::captures(3);

        let err = enroll("alice", &store, &camera, &detector, &embedder, &mut prompt, options(5))
            .unwrap_err();

        assert!(matches!(err, FaceAuthError::InsufficientSamples { collected: 3, required: 5 }));
        assert!(!store.is_enrolled("alice").unwrap());
    }

    #[test]
    fn rejected_captures_do_not_count() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::default();
        // each round scans a preview frame, then the captured one:
        // no face, two faces, then one face from here on
        let detector = ScriptedDetector::new(vec![0, 0, 2, 2, 1]);
        let embedder = ScriptedEmbedder::constant(vec![0.0, 1.0, 0.0, 0.0]);
        let mut prompt = ScriptedPrompt::captures(5);

        let outcome =
            enroll("alice", &store, &camera, &detector, &embedder, &mut prompt, options(3)).unwrap();

        assert!(matches!(outcome, EnrollOutcome::Enrolled { samples: 3, .. }));
        assert_eq!(prompt.rejected, 2);
        assert_eq!(prompt.accepted, 3);
        assert_eq!(embedder.calls(), 3);
    }

    #[test]
    fn consecutive_failures_end_the_session() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::default();
        let detector = ScriptedDetector::always(0);
        let embedder = ScriptedEmbedder::constant(vec![1.0, 0.0, 0.0, 0.0]);
        let mut prompt = ScriptedPrompt::captures(100);

        let err = enroll(
            "alice", &store, &camera, &detector, &embedder, &mut prompt,
            EnrollOptions { samples: 2, max_failed_captures: 4 },
        )
        .unwrap_err();

        assert!(matches!(err, FaceAuthError::InsufficientSamples { collected: 0, required: 2 }));
        assert_eq!(prompt.rejected, 4);
    }

    #[test]
    fn invalid_username_never_opens_camera() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::default();
        let detector = ScriptedDetector::always(1);
        let embedder = ScriptedEmbedder::constant(vec![1.0, 0.0, 0.0, 0.0]);
        let mut prompt = ScriptedPrompt::captures(5);

        let err = enroll("../root", &store, &camera, &detector, &embedder, &mut prompt, options(1))
            .unwrap_err();

        assert!(matches!(err, FaceAuthError::InvalidUsername { .. }));
        assert_eq!(camera.opens(), 0);
    }

    #[test]
    fn unavailable_camera_is_reported() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let camera = TestCamera::unavailable();
        let detector = ScriptedDetector::always(1);
        let embedder = ScriptedEmbedder::constant(vec![1.0, 0.0, 0.0, 0.0]);
        let mut prompt = ScriptedPrompt::captures(5);

        let err = enroll("alice", &store, &camera, &detector, &embedder, &mut prompt, options(1))
            .unwrap_err();
        assert!(matches!(err, FaceAuthError::CameraUnavailable(_)));
    }

    /// Every frame is filled with its 1-based read number.
    struct NumberedCamera {
        reads: Rc<Cell<u8>>,
    }

    struct NumberedHandle {
        reads: Rc<Cell<u8>>,
    }

    impl FrameSource for NumberedHandle {
        fn read_frame(&mut self) -> Result<Frame> {
            let n = self.reads.get() + 1;
            self.reads.set(n);
            Ok(DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([n]))))
        }
    }

    impl CameraSource for NumberedCamera {
        type Handle = NumberedHandle;

        fn open(&self) -> Result<NumberedHandle> {
            Ok(NumberedHandle { reads: Rc::clone(&self.reads) })
        }
    }

    struct FrameNumberEmbedder {
        embedded: RefCell<Vec<u8>>,
    }

    impl Embedder for FrameNumberEmbedder {
        fn embed(&self, face: &Frame) -> Result<Vec<f32>> {
            self.embedded.borrow_mut().push(face.to_luma8().get_pixel(0, 0)[0]);
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
    }

    struct WatchingPrompt {
        actions: VecDeque<PromptAction>,
        reads: Rc<Cell<u8>>,
        reads_at_capture: Vec<u8>,
        previews: Vec<Option<usize>>,
    }

    impl CapturePrompt for WatchingPrompt {
        fn next_action(&mut self) -> Result<Option<PromptAction>> {
            let action = self.actions.pop_front();
            if action == Some(PromptAction::Capture) {
                self.reads_at_capture.push(self.reads.get());
            }
            Ok(action)
        }

        fn notify(&mut self, event: &EnrollEvent<'_>) {
            if let EnrollEvent::Preview { faces } = event {
                self.previews.push(*faces);
            }
        }
    }

    struct FirstFrameDetector;

    impl FaceDetector for FirstFrameDetector {
        fn detect(&self, frame: &Frame) -> Result<Vec<FaceRegion>> {
            if frame.to_luma8().get_pixel(0, 0)[0] == 1 {
                return Ok(Vec::new());
            }
            Ok(vec![FaceRegion::new(4.0, 4.0, 16.0, 16.0)])
        }
    }

    #[test]
    fn capture_uses_a_frame_read_after_confirmation() {
        let dir = tempdir().unwrap();
        let store = SignatureStore::new(dir.path(), 4);
        let reads = Rc::new(Cell::new(0u8));
        let camera = NumberedCamera { reads: Rc::clone(&reads) };
        let embedder = FrameNumberEmbedder { embedded: RefCell::new(Vec::new()) };
        let mut prompt = WatchingPrompt {
            actions: [
                PromptAction::Wait,
                PromptAction::Wait,
                PromptAction::Capture,
                PromptAction::Wait,
                PromptAction::Capture,
            ]
            .into_iter()
            .collect(),
            reads: Rc::clone(&reads),
            reads_at_capture: Vec::new(),
            previews: Vec::new(),
        };

        let outcome = enroll(
            "alice", &store, &camera, &FirstFrameDetector, &embedder, &mut prompt, options(2),
        )
        .unwrap();

        assert!(matches!(outcome, EnrollOutcome::Enrolled { samples: 2, .. }));
        // previews keep draining the stream while the user decides
        assert_eq!(prompt.previews, vec![Some(0), Some(1), Some(1), Some(1), Some(1)]);
        let embedded = embedder.embedded.borrow();
        assert_eq!(embedded.len(), 2);
        for (frame, reads_before) in embedded.iter().zip(&prompt.reads_at_capture) {
            assert!(frame > reads_before, "frame {} was read before capture at {}", frame, reads_before);
        }
    }
}
