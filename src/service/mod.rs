pub mod client;
pub mod lock;
pub mod protocol;
pub mod server;
pub mod shutdown;

pub use client::VerifyClient;
pub use lock::{CameraGuard, CameraLock};
pub use protocol::{ErrorCode, Request, Response};
pub use server::{DaemonListener, ServiceContext};
pub use shutdown::ShutdownSignal;
