use crate::common::{FaceAuthError, Result};
use crate::service::protocol::{self, Response};
use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on a response line.
const MAX_RESPONSE_BYTES: usize = 4096;

/// One-shot verification client for the daemon socket.
#[derive(Debug, Clone)]
pub struct VerifyClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl VerifyClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { socket_path: socket_path.into(), timeout }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sends `{"user": username}` and waits for the daemon's answer.
    pub fn verify(&self, username: &str) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            FaceAuthError::Other(anyhow::anyhow!(
                "Failed to connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let request = protocol::encode_request(username)
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("Failed to encode request: {}", e)))?;
        stream.write_all(&request)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;

        let mut reply = Vec::new();
        Read::by_ref(&mut stream)
            .take(MAX_RESPONSE_BYTES as u64)
            .read_to_end(&mut reply)?;

        let line = reply.split(|&b| b == b'\n').next().unwrap_or_default();
        let response = protocol::decode_response(line)
            .map_err(|e| FaceAuthError::Other(anyhow::anyhow!("Invalid response: {}", e)))?;
        tracing::debug!("Daemon replied {:?}", response);
        Ok(response)
    }
}
