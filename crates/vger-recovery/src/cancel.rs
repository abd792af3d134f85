use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, RecoveryError};

/// Cooperative cancellation flag shared between the signal handler and
/// long-running scans.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A cancellation source backed by a `'static` atomic.
#[derive(Debug, Clone, Copy)]
pub struct StaticCancel(&'static AtomicBool);

impl StaticCancel {
    /// Wrap a process-wide flag (e.g. one set from a signal handler).
    pub fn new(flag: &'static AtomicBool) -> Self {
        Self(flag)
    }
}

/// Anything that can be polled for a stop request.
pub trait Cancellation: Send + Sync {
    fn is_cancelled(&self) -> bool;

    /// Return `Interrupted` once a stop was requested.
    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RecoveryError::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Cancellation for CancelFlag {
    fn is_cancelled(&self) -> bool {
        CancelFlag::is_cancelled(self)
    }
}

impl Cancellation for StaticCancel {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Never cancels. Used by tests and one-shot library calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}
