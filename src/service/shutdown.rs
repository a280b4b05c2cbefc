use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static SIGNAL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Cooperative stop flag checked by the accept loop between connections.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Routes SIGINT and SIGTERM to this signal. Only the first call per process installs handlers.
    pub fn install_handlers(&self) -> std::io::Result<()> {
        if SIGNAL_FLAG.set(self.0.clone()).is_err() {
            tracing::warn!("Signal handlers already installed");
            return Ok(());
        }

        for signal in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: the handler only performs an atomic store.
            unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
                libc::sigemptyset(&mut action.sa_mask);
                action.sa_flags = 0;
                if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }
}

extern "C" fn handle_signal(_signal: libc::c_int) {
    if let Some(flag) = SIGNAL_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}
