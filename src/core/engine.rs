//! Capture-and-match loop shared by verification and enrollment.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::common::config::AuthConfig;
use crate::common::FaceAuthError;
use crate::core::capability::{Embedder, FaceDetector, FaceRegion, FrameSource};
use crate::core::signature::Signature;

/// How many faces a frame held, as far as a capture attempt cares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaceSelection {
    Single(FaceRegion),
    NoFace,
    Ambiguous(usize),
}

impl FaceSelection {
    pub fn from_regions(regions: &[FaceRegion]) -> Self {
        match regions {
            [] => FaceSelection::NoFace,
            [only] => FaceSelection::Single(*only),
            many => FaceSelection::Ambiguous(many.len()),
        }
    }
}

/// Why a single capture attempt produced no signature. Always recoverable.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read frame: {0}")]
    Frame(#[source] FaceAuthError),

    #[error("face detection failed: {0}")]
    Detection(#[source] FaceAuthError),

    #[error("no face detected")]
    NoFace,

    #[error("{0} faces detected, need exactly one")]
    AmbiguousFaces(usize),

    #[error("face region lies outside the frame")]
    EmptyRegion,

    #[error("embedding failed: {0}")]
    Embedding(#[source] FaceAuthError),
}

/// Reads one frame and turns its only face into a signature.
pub fn extract_one<H, D, E>(camera: &mut H, detector: &D, embedder: &E) -> Result<Signature, ExtractError>
where
    H: FrameSource + ?Sized,
    D: FaceDetector + ?Sized,
    E: Embedder + ?Sized,
{
    let frame = camera.read_frame().map_err(ExtractError::Frame)?;
    let regions = detector.detect(&frame).map_err(ExtractError::Detection)?;

    let region = match FaceSelection::from_regions(&regions) {
        FaceSelection::Single(region) => region,
        FaceSelection::NoFace => return Err(ExtractError::NoFace),
        FaceSelection::Ambiguous(count) => return Err(ExtractError::AmbiguousFaces(count)),
    };

    let (x, y, width, height) = region
        .clamped(frame.width(), frame.height())
        .ok_or(ExtractError::EmptyRegion)?;
    let face = frame.crop_imm(x, y, width, height);

    let raw = embedder.embed(&face).map_err(ExtractError::Embedding)?;
    // Embedders promise unit vectors; normalize anyway.
    Signature::from_raw(raw).map_err(ExtractError::Embedding)
}

#[derive(Debug, Clone)]
pub struct VerifyPolicy {
    pub threshold: f64,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub attempt_interval: Duration,
}

impl VerifyPolicy {
    pub fn from_config(auth: &AuthConfig) -> Self {
        Self {
            threshold: auth.similarity_threshold,
            timeout: auth.timeout(),
            max_attempts: auth.max_attempts,
            attempt_interval: auth.attempt_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub accepted: bool,
    pub best_score: f64,
    pub attempts: u32,
    pub scored_attempts: u32,
}

/// Samples frames until a score reaches the threshold or the budget runs out.
///
/// The time budget is checked before every attempt, so the loop overruns
/// `policy.timeout` by at most one in-flight attempt, whose frame read is
/// itself bounded by the camera's frame timeout. Acceptance needs at
/// least one computed score; `best_score` is 0.0 when none was computed.
pub fn verify<H, D, E>(
    camera: &mut H,
    detector: &D,
    embedder: &E,
    target: &Signature,
    policy: &VerifyPolicy,
) -> Verdict
where
    H: FrameSource + ?Sized,
    D: FaceDetector + ?Sized,
    E: Embedder + ?Sized,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut scored_attempts = 0u32;
    let mut best: Option<f64> = None;

    while attempts < policy.max_attempts && start.elapsed() < policy.timeout {
        attempts += 1;

        match extract_one(camera, detector, embedder) {
            Ok(live) if live.dimension() != target.dimension() => {
                tracing::warn!(
                    "Embedding dimension {} does not match enrolled {}",
                    live.dimension(),
                    target.dimension()
                );
            }
            Ok(live) => {
                let score = live.cosine(target);
                scored_attempts += 1;
                let best_so_far = best.map_or(score, |b| b.max(score));
                best = Some(best_so_far);

                tracing::debug!(
                    "Attempt {}: score {:.3} (best {:.3})",
                    attempts, score, best_so_far
                );

                if score >= policy.threshold {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Attempt {} skipped: {}", attempts, e);
            }
        }

        if !policy.attempt_interval.is_zero() && attempts < policy.max_attempts {
            let remaining = policy.timeout.saturating_sub(start.elapsed());
            std::thread::sleep(policy.attempt_interval.min(remaining));
        }
    }

    let best_score = best.unwrap_or(0.0);
    Verdict {
        accepted: best.is_some() && best_score >= policy.threshold,
        best_score,
        attempts,
        scored_attempts,
    }
}
