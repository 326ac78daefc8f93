//! Session table and descriptor readiness polling.
//!
//! Each session owns one primary (media) and one secondary (control)
//! descriptor. The scheduler polls them with a zero timeout under the session
//! lock; the engine later reads the readiness flags left in `revents`.

use crate::locks::{RoleGuard, SessionLock, SessionRole};
use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Readiness polling failures.
#[derive(Debug, Error)]
pub enum PollError {
    /// The call was interrupted by a signal before completing.
    #[error("poll interrupted")]
    Interrupted,
    /// Any other OS error.
    #[error("poll failed: {0}")]
    Os(#[source] io::Error),
}

impl From<io::Error> for PollError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Interrupted {
            PollError::Interrupted
        } else {
            PollError::Os(err)
        }
    }
}

/// Polls a descriptor set for readiness without waiting.
pub trait DescriptorPoller: Send + Sync {
    /// Update `revents` of every entry and return how many are ready.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Interrupted`] when a signal interrupted the call.
    fn poll(&self, fds: &mut [libc::pollfd]) -> Result<usize, PollError>;
}

/// Poller backed by `poll(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysPoller;

impl DescriptorPoller for SysPoller {
    #[allow(unsafe_code)]
    fn poll(&self, fds: &mut [libc::pollfd]) -> Result<usize, PollError> {
        if fds.is_empty() {
            return Ok(0);
        }
        let nfds = libc::nfds_t::try_from(fds.len())
            .map_err(|_| PollError::Os(io::Error::from(io::ErrorKind::InvalidInput)))?;

        // SAFETY: `fds` is a valid, exclusively borrowed slice of `nfds` pollfd
        // entries for the duration of the call.
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), nfds, 0) };
        if ready < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(usize::try_from(ready).unwrap_or(0))
    }
}

fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Pollable descriptors of all registered sessions.
#[derive(Default)]
pub struct SessionTable {
    primary: Vec<libc::pollfd>,
    secondary: Vec<libc::pollfd>,
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("sessions", &self.primary.len())
            .finish()
    }
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session by its primary and secondary descriptors.
    ///
    /// Returns the session's slot.
    pub fn add_session(&mut self, primary: RawFd, secondary: RawFd) -> usize {
        self.primary.push(pollfd(primary));
        self.secondary.push(pollfd(secondary));
        self.primary.len() - 1
    }

    /// Remove the session at `slot`; the last session takes its place.
    pub fn remove_session(&mut self, slot: usize) -> bool {
        if slot >= self.primary.len() {
            return false;
        }
        self.primary.swap_remove(slot);
        self.secondary.swap_remove(slot);
        true
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Primary descriptors with their last readiness.
    #[must_use]
    pub fn primary(&self) -> &[libc::pollfd] {
        &self.primary
    }

    /// Secondary descriptors with their last readiness.
    #[must_use]
    pub fn secondary(&self) -> &[libc::pollfd] {
        &self.secondary
    }
}

/// Session table guarded by the session lock, plus the poller used on it.
pub struct SessionRegistry {
    table: SessionLock<SessionTable>,
    poller: Box<dyn DescriptorPoller>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry polled with `poll(2)`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_poller(Box::new(SysPoller))
    }

    /// Create an empty registry with a custom poller.
    #[must_use]
    pub fn with_poller(poller: Box<dyn DescriptorPoller>) -> Self {
        Self {
            table: SessionLock::new(SessionTable::new()),
            poller,
        }
    }

    /// Acquire the session lock.
    pub fn lock(&self) -> RoleGuard<'_, SessionTable, SessionRole> {
        self.table.lock()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Refresh readiness of session descriptors.
    ///
    /// Primary descriptors are always polled; secondary descriptors only when
    /// `include_secondary` is set. The session lock is released before
    /// returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the first poll failure, secondary set first. The primary set
    /// is polled even when the secondary poll fails. [`PollError::Interrupted`]
    /// from either set is reported as such.
    pub fn poll_ready(&self, include_secondary: bool) -> Result<usize, PollError> {
        let mut table = self.lock();
        if table.is_empty() {
            return Ok(0);
        }

        let secondary = if include_secondary {
            self.poller.poll(&mut table.secondary)
        } else {
            Ok(0)
        };
        let primary = self.poller.poll(&mut table.primary);
        Ok(secondary? + primary?)
    }
}
