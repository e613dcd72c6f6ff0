//! Execution-context lock for the embedded runtime.
//!
//! The embedded runtime exposes exactly one execution context. Every operation
//! that touches it (script execution, attribute access, error translation,
//! releasing handles) must hold an [`ExecutionGuard`] for its whole duration.
//!
//! The lock is reentrant: higher layers acquire it and then call into lower
//! layers that acquire it again on the same thread. The guard is released on
//! every exit path, including unwinding, because release happens in `Drop`.

use std::cell::RefCell;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// The single serialization point for all runtime access.
#[derive(Default)]
pub struct ExecutionLock {
    inner: ReentrantMutex<RefCell<usize>>,
}

/// Scoped ownership of the execution context.
///
/// Nested guards on the owning thread are cheap; the context is handed to
/// another thread only once the outermost guard is dropped.
pub struct ExecutionGuard<'a> {
    guard: ReentrantMutexGuard<'a, RefCell<usize>>,
}

impl ExecutionLock {
    /// Create an unlocked execution context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the execution context is available, then take it.
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        let guard = self.inner.lock();
        *guard.borrow_mut() += 1;
        ExecutionGuard { guard }
    }

    /// Whether any thread currently holds the context.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl ExecutionGuard<'_> {
    /// Nesting depth of the current owner, 1 for the outermost guard.
    pub fn depth(&self) -> usize {
        *self.guard.borrow()
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        *self.guard.borrow_mut() -= 1;
    }
}

impl std::fmt::Debug for ExecutionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}
