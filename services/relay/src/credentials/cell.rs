//! Double-Checked Refresh Cell
//!
//! Holds the currently active value of a cache as an `Arc` snapshot.
//! Readers clone the snapshot under a read lock that is never held across
//! an await, so a valid value is returned without waiting on a refresh.
//! Refreshes are serialized by a separate gate and re-check the snapshot
//! once inside it, so concurrent callers that all saw a stale value end up
//! sharing a single refresh.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Lock-protected single-writer cell with cheap snapshot reads
#[derive(Debug)]
pub struct RefreshCell<T> {
    current: RwLock<Option<Arc<T>>>,
    gate: Mutex<()>,
}

impl<T> Default for RefreshCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RefreshCell<T> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Snapshot of the active value, if any
    pub async fn current(&self) -> Option<Arc<T>> {
        self.current.read().await.clone()
    }

    /// Enter the refresh gate. Anything sampled after this returns (the
    /// time, the active snapshot) is seen by at most one refresher at once.
    pub async fn lock(&self) -> RefreshGuard<'_, T> {
        RefreshGuard {
            cell: self,
            _gate: self.gate.lock().await,
        }
    }

    /// Refresh the value unless another caller already did.
    ///
    /// `still_current` runs under the gate against whatever snapshot is
    /// active at that point; if it accepts the snapshot, `refresh` is never
    /// called. A failed refresh leaves the previous snapshot in place.
    pub async fn refresh_with<V, F, Fut, E>(&self, still_current: V, refresh: F) -> Result<Arc<T>, E>
    where
        V: FnOnce(&T) -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let gate = self.lock().await;

        if let Some(active) = gate.current().await {
            if still_current(&active) {
                return Ok(active);
            }
        }

        let fresh = refresh().await?;
        Ok(gate.publish(fresh).await)
    }
}

/// Exclusive right to replace the value of a [`RefreshCell`]
pub struct RefreshGuard<'a, T> {
    cell: &'a RefreshCell<T>,
    _gate: MutexGuard<'a, ()>,
}

impl<T> RefreshGuard<'_, T> {
    pub async fn current(&self) -> Option<Arc<T>> {
        self.cell.current().await
    }

    /// Swap in `value` and release the gate
    pub async fn publish(self, value: T) -> Arc<T> {
        let fresh = Arc::new(value);
        *self.cell.current.write().await = Some(Arc::clone(&fresh));
        fresh
    }
}
