use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking exclusivity flag for the camera.
#[derive(Debug, Default)]
pub struct CameraLock {
    held: AtomicBool,
}

/// Releases the lock when dropped, including during unwinding.
#[derive(Debug)]
pub struct CameraGuard<'a> {
    lock: &'a CameraLock,
}

impl CameraLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lock if it is free. Never waits.
    pub fn try_acquire(&self) -> Option<CameraGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| CameraGuard { lock: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for CameraGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
