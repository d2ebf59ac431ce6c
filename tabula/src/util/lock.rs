use std::{
    fmt,
    sync::{
        atomic::{self, AtomicU64},
        Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{Error, ExecResult};

/// Identifies a logical call chain, i.e., one top-level run and everything it
/// calls into, possibly across nested runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChainId(u64);

impl ChainId {
    pub fn next() -> ChainId {
        static CHAIN_ID: AtomicU64 = AtomicU64::new(1);
        ChainId(CHAIN_ID.fetch_add(1, atomic::Ordering::AcqRel))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct State {
    owner: Option<ChainId>,
    depth: usize,
}

/// A reentrant async mutex.
///
/// The owning chain may acquire the lock again without waiting. Other chains
/// queue on a semaphore, which grants the permit in FIFO order. A waiter
/// whose token is cancelled leaves the queue without affecting the others.
#[derive(Debug)]
pub struct AsyncLock {
    state: Mutex<State>,
    permits: Semaphore,
}

impl Default for AsyncLock {
    fn default() -> AsyncLock {
        AsyncLock::new()
    }
}

impl AsyncLock {
    pub fn new() -> AsyncLock {
        AsyncLock {
            state: Mutex::new(State::default()),
            permits: Semaphore::new(1),
        }
    }

    /// Acquires the lock for `chain`, waiting until it is free or `cancel` is
    /// triggered.
    pub async fn lock(&self, chain: ChainId, cancel: &CancellationToken) -> ExecResult<AsyncLockGuard<'_>> {
        {
            let mut state = self.state();
            if state.owner == Some(chain) {
                state.depth += 1;
                trace!(%chain, depth = state.depth, "reentered lock");
                return Ok(AsyncLockGuard { lock: self });
            }
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.permits.acquire() => {
                permit.map_err(|_| Error::ExecError("lock is closed".into()))?
            }
        };
        // Released by hand once the depth drops to zero.
        permit.forget();

        let mut state = self.state();
        state.owner = Some(chain);
        state.depth = 1;
        trace!(%chain, "acquired lock");
        Ok(AsyncLockGuard { lock: self })
    }

    /// Returns `true` if some chain holds the lock.
    pub fn is_locked(&self) -> bool {
        self.state().owner.is_some()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases one level of an [`AsyncLock`] when dropped.
#[must_use]
pub struct AsyncLockGuard<'a> {
    lock: &'a AsyncLock,
}

impl Drop for AsyncLockGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.owner = None;
            self.lock.permits.add_permits(1);
        }
    }
}
