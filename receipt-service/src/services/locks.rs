//! Per-account serialisation of reconciliation runs.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// One async mutex per account number, created on first use and removed once
/// nobody holds or waits on it.
#[derive(Default)]
pub struct AccountLocks {
    locks: Arc<LockTable>,
}

/// Holds an account until dropped.
pub struct AccountGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
    account_number: String,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        // Release first so the guard's own reference is gone before counting.
        self.guard.take();
        self.locks
            .remove_if(&self.account_number, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other run holds the account, then holds it until the
    /// guard is dropped.
    pub async fn acquire(&self, account_number: &str) -> AccountGuard {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self
            .locks
            .entry(account_number.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        AccountGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
            account_number: account_number.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
