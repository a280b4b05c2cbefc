use face_unlock::camera::V4l2Camera;
use face_unlock::common::{init_logging, Config, Paths};
use face_unlock::core::{CameraSource, FaceDetector, FrameSource, OnnxEmbedder, OnnxFaceDetector};
use face_unlock::enroll::{enroll, EnrollOptions, EnrollOutcome, TerminalPrompt};
use face_unlock::storage::SignatureStore;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faceunlock")]
#[command(about = "Enroll and manage faces for face unlock")]
struct Cli {
    /// Enable development mode (local config, storage and socket)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture samples and store a face signature
    Enroll {
        username: String,
        /// Number of samples to capture
        #[arg(short, long)]
        samples: Option<usize>,
    },
    /// Delete a stored face signature
    Remove {
        username: String,
    },
    /// Capture one frame, run detection and save an annotated image
    TestCamera {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = Paths::new(cli.dev);
    let config = Config::for_run_mode(&paths, cli.config.as_deref())?;
    let store = SignatureStore::new(&config.storage.data_dir, config.embedder.dimension);

    match cli.command {
        Commands::Enroll { username, samples } => {
            let mut options = EnrollOptions::from_config(&config.enrollment);
            if let Some(samples) = samples {
                options.samples = samples;
            }

            let detector = OnnxFaceDetector::new(&config)?;
            let embedder = OnnxEmbedder::new(&config)?;
            let camera = V4l2Camera::new(&config.camera);

            let outcome = {
                let mut prompt = TerminalPrompt::new()?;
                enroll(&username, &store, &camera, &detector, &embedder, &mut prompt, options)
            };

            match outcome {
                Ok(EnrollOutcome::Enrolled { path, samples }) => {
                    println!("✅ Enrolled '{}' from {} samples ({})", username, samples, path.display());
                }
                Ok(EnrollOutcome::Cancelled) => {
                    println!("Enrollment cancelled, nothing was saved");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("❌ Enrollment failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Remove { username } => {
            if store.remove(&username)? {
                println!("Removed signature for '{}'", username);
            } else {
                println!("'{}' was not enrolled", username);
            }
        }
        Commands::TestCamera { output } => {
            test_camera(&config, &paths, output)?;
        }
    }

    Ok(())
}

fn test_camera(config: &Config, paths: &Paths, output: Option<PathBuf>) -> Result<()> {
    let camera = V4l2Camera::new(&config.camera);
    println!("Opening /dev/video{}...", camera.device_index());
    let mut handle = camera.open()?;
    let frame = handle.read_frame()?;
    drop(handle);
    println!("Captured {}x{} frame", frame.width(), frame.height());

    let detector = OnnxFaceDetector::new(config)?;
    let faces = detector.detect(&frame)?;
    println!("Detected {} face(s)", faces.len());

    let mut annotated = frame.to_rgb8();
    for face in &faces {
        if let Some((x, y, w, h)) = face.clamped(annotated.width(), annotated.height()) {
            println!("  {}x{} at ({}, {}), confidence {:.2}", w, h, x, y, face.confidence);
            draw_hollow_rect_mut(
                &mut annotated,
                Rect::at(x as i32, y as i32).of_size(w, h),
                Rgb([0, 255, 0]),
            );
        }
    }

    let path = output.unwrap_or_else(|| paths.capture_path("camera_test"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    annotated
        .save(&path)
        .with_context(|| format!("Failed to save {}", path.display()))?;
    println!("Saved {}", path.display());
    Ok(())
}
