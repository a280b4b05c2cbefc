use tracing::Level;

pub const VERBOSE_ENV: &str = "FACEUNLOCK_VERBOSE";

/// Verbose logging is on when requested by flag or by `FACEUNLOCK_VERBOSE=1`.
pub fn verbose_requested(flag: bool) -> bool {
    flag || std::env::var(VERBOSE_ENV).map(|v| v == "1").unwrap_or(false)
}

pub fn init_logging(verbose: bool) {
    let level = if verbose_requested(verbose) { Level::DEBUG } else { Level::INFO };

    // A second init (tests, embedding) is not an error worth surfacing.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init();
}
