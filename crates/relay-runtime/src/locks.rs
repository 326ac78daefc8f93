//! The two externally owned locks the scheduler coordinates with.
//!
//! - [`SessionLock`] guards the session table and its pollable descriptors.
//! - [`GlobalLock`] guards relay state touched by every engine pass.
//!
//! A thread must never hold both. Each lock records in thread-local state
//! whether the current thread holds it; acquiring one while holding the other
//! panics in debug builds, and [`session_lock_held`] / [`global_lock_held`]
//! let tests and engines assert the discipline directly.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

thread_local! {
    static SESSION_HELD: Cell<bool> = const { Cell::new(false) };
    static GLOBAL_HELD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread holds a session-table lock.
#[must_use]
pub fn session_lock_held() -> bool {
    SESSION_HELD.with(Cell::get)
}

/// Whether the current thread holds a global relay-state lock.
#[must_use]
pub fn global_lock_held() -> bool {
    GLOBAL_HELD.with(Cell::get)
}

/// Identifies one of the two lock roles.
pub trait LockRole {
    /// Name used in diagnostics.
    const NAME: &'static str;
    /// Mark the role as held or released on this thread.
    fn set_held(held: bool);
    /// Whether the conflicting role is held on this thread.
    fn conflicting_held() -> bool;
}

/// Role marker for the session-table lock.
#[derive(Debug)]
pub enum SessionRole {}

/// Role marker for the global relay-state lock.
#[derive(Debug)]
pub enum GlobalRole {}

impl LockRole for SessionRole {
    const NAME: &'static str = "session";

    fn set_held(held: bool) {
        SESSION_HELD.with(|c| c.set(held));
    }

    fn conflicting_held() -> bool {
        global_lock_held()
    }
}

impl LockRole for GlobalRole {
    const NAME: &'static str = "global";

    fn set_held(held: bool) {
        GLOBAL_HELD.with(|c| c.set(held));
    }

    fn conflicting_held() -> bool {
        session_lock_held()
    }
}

/// Mutex that tracks its holder to enforce the non-nesting rule.
#[derive(Debug)]
pub struct RoleLock<T, R: LockRole> {
    inner: Mutex<T>,
    _role: PhantomData<R>,
}

/// Lock over the session table.
pub type SessionLock<T> = RoleLock<T, SessionRole>;

/// Lock over the relay state shared by all engine passes.
pub type GlobalLock<T> = RoleLock<T, GlobalRole>;

impl<T, R: LockRole> RoleLock<T, R> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            _role: PhantomData,
        }
    }

    /// Acquire the lock.
    ///
    /// A poisoned lock is recovered: the guarded data belongs to external
    /// collaborators, which own its consistency.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the current thread holds the other lock.
    pub fn lock(&self) -> RoleGuard<'_, T, R> {
        debug_assert!(
            !R::conflicting_held(),
            "{} lock acquired while the other relay lock is held",
            R::NAME
        );
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        R::set_held(true);
        RoleGuard {
            guard,
            _role: PhantomData,
        }
    }

    /// Consume the lock and return the guarded value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped ownership of a [`RoleLock`].
#[derive(Debug)]
pub struct RoleGuard<'a, T, R: LockRole> {
    guard: MutexGuard<'a, T>,
    _role: PhantomData<R>,
}

impl<T, R: LockRole> Deref for RoleGuard<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: LockRole> DerefMut for RoleGuard<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, R: LockRole> Drop for RoleGuard<'_, T, R> {
    fn drop(&mut self) {
        R::set_held(false);
    }
}
