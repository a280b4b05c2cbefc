#[macro_use]
extern crate pamsm;

use face_unlock::common::paths::system_socket_path;
use face_unlock::protocol::Response;
use face_unlock::service::VerifyClient;
use pamsm::{Pam, PamError, PamFlags, PamLibExt, PamServiceModule};
use std::path::PathBuf;
use std::time::Duration;

/// How long we wait for the daemon by default, a little over its own capture budget.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
struct ModuleArgs {
    timeout: Duration,
    socket: PathBuf,
}

impl ModuleArgs {
    /// Understands `timeout=<secs>` and `socket=<path>`; anything else is ignored.
    fn parse(args: &[String]) -> Self {
        let mut parsed = Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            socket: system_socket_path(),
        };

        for arg in args {
            if let Some(secs) = arg.strip_prefix("timeout=").and_then(|v| v.parse::<u64>().ok()) {
                if secs > 0 {
                    parsed.timeout = Duration::from_secs(secs);
                }
            } else if let Some(path) = arg.strip_prefix("socket=") {
                if !path.is_empty() {
                    parsed.socket = PathBuf::from(path);
                }
            }
        }
        parsed
    }
}

/// Only a definite answer from the daemon counts; everything else falls through.
fn pam_result(response: face_unlock::Result<Response>) -> PamError {
    match response {
        Ok(Response { ok: true, .. }) => PamError::SUCCESS,
        Ok(Response { error: None, .. }) => PamError::AUTH_ERR,
        Ok(Response { error: Some(_), .. }) | Err(_) => PamError::IGNORE,
    }
}

pub struct FaceUnlockPam;

impl PamServiceModule for FaceUnlockPam {
    fn authenticate(pamh: Pam, _flags: PamFlags, args: Vec<String>) -> PamError {
        let args = ModuleArgs::parse(&args);

        let username = match pamh.get_cached_user() {
            Ok(Some(user)) => match user.to_str() {
                Ok(user) => user.to_string(),
                Err(_) => return PamError::USER_UNKNOWN,
            },
            Ok(None) | Err(_) => return PamError::USER_UNKNOWN,
        };

        let client = VerifyClient::new(args.socket, args.timeout);
        pam_result(client.verify(&username))
    }

    fn setcred(_pamh: Pam, _flags: PamFlags, _args: Vec<String>) -> PamError {
        PamError::SUCCESS
    }
}

pam_module!(FaceUnlockPam);
