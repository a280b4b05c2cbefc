use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::common::{Config, FaceAuthError};
use crate::core::capability::{CameraSource, Embedder, FaceDetector};
use crate::core::engine::{verify, Verdict, VerifyPolicy};
use crate::service::lock::CameraLock;
use crate::service::protocol::{self, ErrorCode, Response};
use crate::service::shutdown::ShutdownSignal;
use crate::storage::SignatureStore;

#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

pub fn get_peer_credentials(stream: &UnixStream) -> io::Result<PeerCredentials> {
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut cred_len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: cred is a properly sized, writable ucred for SO_PEERCRED.
    let ret = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut cred_len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(PeerCredentials {
        pid: cred.pid as u32,
        uid: cred.uid as u32,
        gid: cred.gid as u32,
    })
}

/// Bound daemon socket. The socket file is removed when this is dropped.
pub struct DaemonListener {
    listener: UnixListener,
    path: PathBuf,
}

impl DaemonListener {
    /// Replaces any stale socket at `path` and opens it to all local users.
    pub fn bind(path: &Path) -> io::Result<Self> {
        if path.exists() {
            tracing::debug!("Removing stale socket {}", path.display());
            fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        let guard = Self { listener, path: path.to_path_buf() };
        // Any local user may ask; the camera decides.
        fs::set_permissions(path, fs::Permissions::from_mode(0o666))?;

        tracing::info!("Listening on {}", path.display());
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn listener(&self) -> &UnixListener {
        &self.listener
    }
}

impl Drop for DaemonListener {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::info!("Removed socket {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove socket {}: {}", self.path.display(), e),
        }
    }
}

/// Sets the remaining time as the socket timeout before every read.
struct DeadlineReader<'a> {
    stream: &'a UnixStream,
    deadline: Instant,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "request deadline passed"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

/// Everything a request handler needs, built once at startup.
pub struct ServiceContext<C, D, E> {
    pub config: Config,
    pub store: SignatureStore,
    pub camera: C,
    pub detector: D,
    pub embedder: E,
    pub lock: CameraLock,
}

impl<C, D, E> ServiceContext<C, D, E>
where
    C: CameraSource,
    D: FaceDetector,
    E: Embedder,
{
    pub fn new(config: Config, store: SignatureStore, camera: C, detector: D, embedder: E) -> Self {
        Self {
            config,
            store,
            camera,
            detector,
            embedder,
            lock: CameraLock::new(),
        }
    }

    /// Accepts and serves one connection at a time until `shutdown` is triggered.
    pub fn serve(&self, listener: &DaemonListener, shutdown: &ShutdownSignal) -> io::Result<()> {
        let listener = listener.listener();
        listener.set_nonblocking(true)?;
        let poll_interval = self.config.service.accept_poll_interval();

        while !shutdown.is_triggered() {
            match listener.accept() {
                Ok((mut stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        tracing::error!("Dropping connection, cannot make it blocking: {}", e);
                        continue;
                    }
                    if let Err(e) = self.handle_connection(&mut stream) {
                        tracing::error!("Client error: {}", e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(poll_interval);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                    std::thread::sleep(poll_interval);
                }
            }
        }

        tracing::info!("Shutdown requested, leaving accept loop");
        Ok(())
    }

    /// Reads one request, answers it, and returns. The caller closes the stream.
    pub fn handle_connection(&self, stream: &mut UnixStream) -> io::Result<()> {
        match get_peer_credentials(stream) {
            Ok(peer) => tracing::info!(
                "Connection from UID: {}, GID: {}, PID: {}",
                peer.uid, peer.gid, peer.pid
            ),
            Err(e) => tracing::warn!("Could not read peer credentials: {}", e),
        }

        if let Err(e) = stream.set_write_timeout(Some(self.config.service.write_timeout())) {
            tracing::warn!("Could not set write timeout: {}", e);
        }

        let response = match self.read_request(stream) {
            Ok(frame) => self.respond(&frame),
            Err(code) => {
                tracing::info!("Rejected request: {}", code);
                Response::error(code)
            }
        };

        let bytes = protocol::encode_response(&response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        stream.write_all(&bytes)?;
        stream.flush()
    }

    fn read_request(&self, stream: &UnixStream) -> Result<Vec<u8>, ErrorCode> {
        let mut reader = DeadlineReader {
            stream,
            deadline: Instant::now() + self.config.service.read_timeout(),
        };
        protocol::read_frame(&mut reader, self.config.service.max_request_bytes)
    }

    /// Turns a framed request into a response. Panics become `Internal error`.
    pub fn respond(&self, frame: &[u8]) -> Response {
        match catch_unwind(AssertUnwindSafe(|| self.process(frame))) {
            Ok(Ok(verdict)) => Response::verdict(verdict.accepted, verdict.best_score),
            Ok(Err(code)) => Response::error(code),
            Err(_) => {
                tracing::error!("Request handler panicked");
                Response::error(ErrorCode::InternalError)
            }
        }
    }

    fn process(&self, frame: &[u8]) -> Result<Verdict, ErrorCode> {
        let user = protocol::parse_request(frame)?;
        tracing::info!("Processing verification request for user: {}", user);

        let _guard = self.lock.try_acquire().ok_or_else(|| {
            tracing::warn!("Camera busy, rejecting request for {}", user);
            ErrorCode::Busy
        })?;

        let target = self.store.load(&user).map_err(|e| match e {
            FaceAuthError::NotEnrolled(_) => ErrorCode::NotEnrolled,
            FaceAuthError::InvalidUsername { .. } => ErrorCode::InvalidUsername,
            other => {
                tracing::error!("Failed to load signature for {}: {}", user, other);
                ErrorCode::InternalError
            }
        })?;

        let mut camera = self.camera.open().map_err(|e| {
            tracing::error!("Failed to open camera: {}", e);
            ErrorCode::CameraUnavailable
        })?;

        let policy = VerifyPolicy::from_config(&self.config.auth);
        let verdict = verify(&mut camera, &self.detector, &self.embedder, &target, &policy);
        drop(camera);

        tracing::info!(
            "Verification for {}: ok={} best={:.3} attempts={} scored={}",
            user, verdict.accepted, verdict.best_score, verdict.attempts, verdict.scored_attempts
        );
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signature::Signature;
    use crate::core::testing::{
        target_signature, vector_with_score, PanickingDetector, ScriptedDetector, ScriptedEmbedder,
        TestCamera, TEST_DIMENSION,
    };
    use std::net::Shutdown;
    use tempfile::{tempdir, TempDir};

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.auth.max_attempts = 5;
        config.auth.timeout_seconds = 2.0;
        config.service.read_timeout_seconds = 0.3;
        config.service.max_request_bytes = 64;
        config
    }

    fn context_with<D: FaceDetector>(
        dir: &TempDir,
        camera: TestCamera,
        detector: D,
        score: f64,
    ) -> ServiceContext<TestCamera, D, ScriptedEmbedder> {
        let config = test_config(dir);
        let store = SignatureStore::new(dir.path(), TEST_DIMENSION);
        store.save("alice", &target_signature()).unwrap();
        let embedder = ScriptedEmbedder::constant(vector_with_score(score));
        ServiceContext::new(config, store, camera, detector, embedder)
    }

    fn context(
        dir: &TempDir,
        score: f64,
    ) -> ServiceContext<TestCamera, ScriptedDetector, ScriptedEmbedder> {
        context_with(dir, TestCamera::default(), ScriptedDetector::always(1), score)
    }

    fn round_trip<C, D, E>(ctx: &ServiceContext<C, D, E>, request: &[u8], close_write: bool) -> String
    where
        C: CameraSource,
        D: FaceDetector,
        E: Embedder,
    {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        client.write_all(request).unwrap();
        if close_write {
            client.shutdown(Shutdown::Write).unwrap();
        }

        ctx.handle_connection(&mut server).unwrap();
        drop(server);

        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        reply
    }

    #[test]
    fn matching_face_is_accepted() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);
        let reply = round_trip(&ctx, b"{\"user\":\"alice\"}\n", false);
        assert_eq!(reply, "{\"ok\":true,\"confidence\":0.9}\n");
        assert!(!ctx.lock.is_held());
    }

    #[test]
    fn weak_match_is_rejected_with_best_score() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.3);
        let reply = round_trip(&ctx, b"{\"user\":\"alice\"}", true);
        assert_eq!(reply, "{\"ok\":false,\"confidence\":0.3}\n");
        assert_eq!(ctx.camera.opens(), 1);
    }

    #[test]
    fn unenrolled_user() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);
        let reply = round_trip(&ctx, b"{\"user\":\"bob\"}\n", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Not enrolled\"}\n");
        assert_eq!(ctx.camera.opens(), 0);
    }

    #[test]
    fn malformed_requests() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);

        let cases: [(&[u8], &str); 5] = [
            (b"", "Empty request"),
            (b"hello\n", "Invalid JSON"),
            (b"{}\n", "No username"),
            (b"{\"user\":\"../etc\"}\n", "Invalid username"),
            (&[b'x'; 65], "Request too large"),
        ];
        for (request, expected) in cases {
            let reply = round_trip(&ctx, request, true);
            assert_eq!(reply, format!("{{\"ok\":false,\"error\":\"{}\"}}\n", expected));
        }
        assert_eq!(ctx.camera.opens(), 0);
    }

    #[test]
    fn silent_client_times_out() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);

        let start = Instant::now();
        let reply = round_trip(&ctx, b"{\"user\":", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Timeout\"}\n");
        assert!(start.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn busy_camera_fails_fast() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);
        let _held = ctx.lock.try_acquire().unwrap();

        let reply = round_trip(&ctx, b"{\"user\":\"alice\"}\n", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Camera busy\"}\n");
        assert_eq!(ctx.camera.opens(), 0);
    }

    #[test]
    fn camera_failure_releases_lock() {
        let dir = tempdir().unwrap();
        let ctx = context_with(&dir, TestCamera::unavailable(), ScriptedDetector::always(1), 0.9);

        let reply = round_trip(&ctx, b"{\"user\":\"alice\"}\n", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Camera unavailable\"}\n");
        assert!(!ctx.lock.is_held());
    }

    #[test]
    fn corrupt_signature_is_internal_error() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);
        fs::write(dir.path().join("alice.sig"), b"garbage").unwrap();

        let reply = round_trip(&ctx, b"{\"user\":\"alice\"}\n", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Internal error\"}\n");
    }

    #[test]
    fn panic_becomes_internal_error() {
        let dir = tempdir().unwrap();
        let ctx = context_with(&dir, TestCamera::default(), PanickingDetector, 0.9);

        let reply = round_trip(&ctx, b"{\"user\":\"alice\"}\n", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Internal error\"}\n");
        assert!(!ctx.lock.is_held());

        // the daemon keeps serving afterwards
        let reply = round_trip(&ctx, b"{\"user\":\"bob\"}\n", false);
        assert_eq!(reply, "{\"ok\":false,\"error\":\"Not enrolled\"}\n");
    }

    #[test]
    fn no_face_reports_zero_confidence() {
        let dir = tempdir().unwrap();
        let ctx = context_with(&dir, TestCamera::default(), ScriptedDetector::always(2), 0.9);
        let response = ctx.respond(b"{\"user\":\"alice\"}");
        assert_eq!(response, Response::verdict(false, 0.0));
    }

    #[test]
    fn enrolled_signature_is_reloaded_per_request() {
        let dir = tempdir().unwrap();
        let ctx = context(&dir, 0.9);
        assert!(ctx.respond(b"{\"user\":\"alice\"}").ok);

        let orthogonal = Signature::from_raw(vec![0.0, 0.0, 1.0, 0.0]).unwrap();
        ctx.store.save("alice", &orthogonal).unwrap();
        let response = ctx.respond(b"{\"user\":\"alice\"}");
        assert!(!response.ok);
        assert_eq!(response.confidence, Some(0.0));
    }

    #[test]
    fn accept_loop_outlives_a_client_that_hangs_up() {
        let dir = tempdir().unwrap();
        let mut ctx = context(&dir, 0.9);
        ctx.config.service.accept_poll_interval_ms = 5;
        let path = dir.path().join("faceunlock.sock");
        let listener = DaemonListener::bind(&path).unwrap();
        let shutdown = ShutdownSignal::new();

        let client = {
            let path = path.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || {
                drop(UnixStream::connect(&path).unwrap());

                let mut stream = UnixStream::connect(&path).unwrap();
                stream.write_all(b"{\"user\":\"alice\"}\n").unwrap();
                let mut reply = String::new();
                stream.read_to_string(&mut reply).unwrap();
                shutdown.trigger();
                reply
            })
        };

        ctx.serve(&listener, &shutdown).unwrap();
        assert_eq!(client.join().unwrap(), "{\"ok\":true,\"confidence\":0.9}\n");
    }

    #[test]
    fn listener_cleans_up_socket_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run/faceunlock.sock");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"stale").unwrap();

        let listener = DaemonListener::bind(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        drop(listener);
        assert!(!path.exists());
    }
}
