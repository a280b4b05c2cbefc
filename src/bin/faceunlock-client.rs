use face_unlock::common::{init_logging, Config, Paths};
use face_unlock::service::VerifyClient;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "faceunlock-client")]
#[command(about = "Ask the face unlock daemon to verify a user")]
struct Args {
    /// User to verify (defaults to $USER)
    username: Option<String>,

    /// Socket path, overriding the config
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Seconds to wait for the daemon
    #[arg(long, default_value = "15")]
    timeout: u64,

    #[arg(long)]
    dev: bool,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let username = match args.username {
        Some(name) => name,
        None => std::env::var("USER").context("No username given and $USER is not set")?,
    };

    let socket = match args.socket {
        Some(socket) => socket,
        None => Config::for_run_mode(&Paths::new(args.dev), None)?.service.socket_path,
    };

    let client = VerifyClient::new(socket, Duration::from_secs(args.timeout));
    let response = client.verify(&username)?;

    match (&response.error, response.confidence) {
        (Some(error), _) => println!("{}: error: {}", username, error),
        (None, Some(confidence)) => println!(
            "{}: {} (confidence {:.3})",
            username,
            if response.ok { "verified" } else { "rejected" },
            confidence
        ),
        (None, None) => println!("{}: ok={}", username, response.ok),
    }

    if !response.ok {
        std::process::exit(1);
    }
    Ok(())
}
