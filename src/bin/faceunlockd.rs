use face_unlock::camera::V4l2Camera;
use face_unlock::common::{init_logging, Config, Paths};
use face_unlock::core::{OnnxEmbedder, OnnxFaceDetector};
use face_unlock::service::{DaemonListener, ServiceContext, ShutdownSignal};
use face_unlock::storage::SignatureStore;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "faceunlockd")]
#[command(about = "Face unlock verification daemon")]
struct Args {
    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run in development mode (local storage, socket in /tmp)
    #[arg(long)]
    dev: bool,

    /// Debug logging (also FACEUNLOCK_VERBOSE=1)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let paths = Paths::new(args.dev);
    tracing::info!("Starting faceunlockd (dev_mode: {})", paths.is_development());
    let config = Config::for_run_mode(&paths, args.config.as_deref())?;

    // Models load once; the camera opens per request
    let detector = OnnxFaceDetector::new(&config)?;
    let embedder = OnnxEmbedder::new(&config)?;
    let camera = V4l2Camera::new(&config.camera);
    let store = SignatureStore::new(&config.storage.data_dir, embedder.dimension());
    tracing::info!("Signatures in {}", store.data_dir().display());

    let shutdown = ShutdownSignal::new();
    shutdown
        .install_handlers()
        .context("Failed to install signal handlers")?;

    let listener = DaemonListener::bind(&config.service.socket_path)
        .with_context(|| format!("Failed to bind {}", config.service.socket_path.display()))?;

    let context = ServiceContext::new(config, store, camera, detector, embedder);
    context.serve(&listener, &shutdown)?;

    drop(listener);
    tracing::info!("faceunlockd stopped");
    Ok(())
}
