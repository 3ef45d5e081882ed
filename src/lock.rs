//! Async mutual exclusion with strict arrival-order hand-off.
//!
//! [`FifoMutex`] keeps an explicit wait queue and an owned holder slot. A
//! release never reopens the lock to a race: it pops the oldest waiter and
//! hands the lock over directly. [`PathLocks`] builds on it to serialize the
//! check-then-create critical section of every directory segment shared by
//! concurrently organized books.

use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::fs::FileSystem;

#[derive(Debug, Default)]
struct LockState {
    /// Ticket of the current holder, `None` when the lock is free.
    holder: Option<u64>,
    next_ticket: u64,
    waiters: VecDeque<(u64, oneshot::Sender<ReleaseHandle>)>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LockState>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        // A poisoned state still holds a consistent queue; keep using it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A FIFO async mutex.
///
/// `acquire` resolves in exactly the order callers arrived. The returned
/// [`ReleaseHandle`] releases on [`release`](ReleaseHandle::release) or on
/// drop, whichever comes first; further releases are no-ops.
#[derive(Debug, Clone, Default)]
pub struct FifoMutex {
    shared: Arc<Shared>,
}

/// Proof of holding a [`FifoMutex`].
#[derive(Debug)]
#[must_use = "the lock is released as soon as the handle is dropped"]
pub struct ReleaseHandle {
    shared: Arc<Shared>,
    ticket: u64,
    released: bool,
}

impl FifoMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock is handed to this caller.
    pub async fn acquire(&self) -> ReleaseHandle {
        loop {
            let receiver = {
                let mut state = self.shared.lock_state();
                let ticket = state.next_ticket;
                state.next_ticket += 1;

                if state.holder.is_none() && state.waiters.is_empty() {
                    state.holder = Some(ticket);
                    return ReleaseHandle {
                        shared: Arc::clone(&self.shared),
                        ticket,
                        released: false,
                    };
                }

                let (sender, receiver) = oneshot::channel();
                state.waiters.push_back((ticket, sender));
                receiver
            };

            // A sender only disappears unsent if the queue entry was discarded;
            // queue up again rather than fail.
            if let Ok(handle) = receiver.await {
                return handle;
            }
        }
    }

    /// Acquires the lock only if nobody holds it and nobody is queued.
    pub fn try_acquire(&self) -> Option<ReleaseHandle> {
        let mut state = self.shared.lock_state();
        if state.holder.is_some() || !state.waiters.is_empty() {
            return None;
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.holder = Some(ticket);
        Some(ReleaseHandle {
            shared: Arc::clone(&self.shared),
            ticket,
            released: false,
        })
    }

    /// Whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.shared.lock_state().holder.is_some()
    }

    /// Number of callers waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.shared.lock_state().waiters.len()
    }
}

impl ReleaseHandle {
    /// Releases the lock. Calling this more than once has no effect.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let mut state = self.shared.lock_state();
        if state.holder != Some(self.ticket) {
            return;
        }

        // Hand the lock to the oldest waiter still listening. A waiter whose
        // future was dropped while queued refuses the handle; skip it.
        while let Some((ticket, sender)) = state.waiters.pop_front() {
            state.holder = Some(ticket);
            let handle = ReleaseHandle {
                shared: Arc::clone(&self.shared),
                ticket,
                released: false,
            };
            match sender.send(handle) {
                Ok(()) => return,
                Err(mut refused) => {
                    // Do not let the refused handle re-enter release on drop.
                    refused.released = true;
                }
            }
        }
        state.holder = None;
    }

    /// Whether this handle has already released its lock.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Per-path FIFO locks for directory creation.
///
/// Two books sharing an output root must not race on `mkdir` for a common
/// ancestor. Each path segment gets its own [`FifoMutex`]; the existence
/// check and the creation happen while holding it.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, FifoMutex>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding `path`, creating it on first use.
    pub fn lock_for(&self, path: &Path) -> FifoMutex {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Creates `path` and every missing ancestor, one locked segment at a time.
    ///
    /// Idempotent: an existing directory is left untouched, and a directory
    /// created concurrently by another process is accepted.
    ///
    /// # Errors
    ///
    /// * [`Error::OutputPathUnwritable`] - a segment could not be created, or
    ///   exists and is not a directory
    pub async fn create_dir_all(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let mut segments: Vec<&Path> = path.ancestors().collect();
        segments.reverse();

        for segment in segments {
            if segment.as_os_str().is_empty() || segment.parent().is_none() {
                // Relative-path anchor or filesystem root.
                continue;
            }

            let lock = self.lock_for(segment);
            let mut handle = lock.acquire().await;

            let outcome = if fs.is_dir(segment).await {
                Ok(())
            } else {
                match fs.create_dir(segment).await {
                    Ok(()) => {
                        log::debug!("Created directory {}", segment.display());
                        Ok(())
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        if fs.is_dir(segment).await {
                            Ok(())
                        } else {
                            Err(Error::OutputPathUnwritable(segment.to_path_buf(), e))
                        }
                    }
                    Err(e) => Err(Error::OutputPathUnwritable(segment.to_path_buf(), e)),
                }
            };

            handle.release();
            outcome?;
        }

        Ok(())
    }
}
