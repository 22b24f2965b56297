use super::MAX_TIMESTAMP;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// A source of monotonically increasing timestamps for MVCC.
///
/// - `read_ts`: The point in time a transaction reads from (snapshot).
/// - `commit_ts`: The point in time a transaction writes its changes.
#[derive(Debug)]
pub struct TimestampOracle {
    next_ts: AtomicU64,
}

impl TimestampOracle {
    pub fn new(start_ts: u64) -> Self {
        Self {
            next_ts: AtomicU64::new(start_ts),
        }
    }

    /// Allocate and return the next timestamp (the value after incrementing).
    pub fn next(&self) -> u64 {
        self.next_ts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Read the current timestamp without incrementing
    pub fn read(&self) -> u64 {
        self.next_ts.load(Ordering::SeqCst)
    }
}

impl Default for TimestampOracle {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Handle passed into compiled queries: identity and snapshot of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionContext {
    txn_id: u64,
    read_ts: u64,
}

impl TransactionContext {
    /// 테스트나 관리 도구용 고정 스냅샷
    pub fn at(read_ts: u64) -> Self {
        Self {
            txn_id: read_ts,
            read_ts,
        }
    }

    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    pub fn read_ts(&self) -> u64 {
        self.read_ts
    }

    /// Timestamp stamped into `begin` of versions this transaction inserts
    /// and into `end` of versions it deletes.
    pub fn write_ts(&self) -> u64 {
        self.txn_id
    }

    /// A version is visible iff `begin <= read_ts < end`
    #[inline]
    pub fn is_visible(&self, begin: u64, end: u64) -> bool {
        begin <= self.read_ts && self.read_ts < end
    }

    /// Whether a version with this `end` is still live (not deleted by anyone)
    #[inline]
    pub fn is_live(end: u64) -> bool {
        end == MAX_TIMESTAMP
    }
}

/// Managing active transactions.
#[derive(Debug)]
pub struct TransactionManager {
    oracle: Arc<TimestampOracle>,
    /// Active transactions: tx_id -> read_ts
    active_txs: Arc<DashMap<u64, u64>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            oracle: Arc::new(TimestampOracle::default()),
            active_txs: Arc::new(DashMap::new()),
        }
    }

    /// Start a new transaction, allocating a read timestamp.
    pub fn begin(&self) -> TransactionContext {
        let read_ts = self.oracle.next();
        self.active_txs.insert(read_ts, read_ts);
        trace!(txn_id = read_ts, "transaction begin");
        TransactionContext {
            txn_id: read_ts,
            read_ts,
        }
    }

    /// Mark a transaction as completed.
    pub fn end(&self, txn: &TransactionContext) {
        self.active_txs.remove(&txn.txn_id);
        trace!(txn_id = txn.txn_id, "transaction end");
    }

    /// Read the current max timestamp.
    pub fn current_ts(&self) -> u64 {
        self.oracle.read()
    }

    /// Minimum active read timestamp, `None` when idle.
    pub fn min_active_ts(&self) -> Option<u64> {
        self.active_txs.iter().map(|entry| *entry.value()).min()
    }

    pub fn active_count(&self) -> usize {
        self.active_txs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_allocates_increasing_snapshots() {
        let manager = TransactionManager::new();
        let t1 = manager.begin();
        let t2 = manager.begin();
        assert!(t2.read_ts() > t1.read_ts());
        assert_eq!(manager.active_count(), 2);
        assert_eq!(manager.min_active_ts(), Some(t1.read_ts()));

        manager.end(&t1);
        assert_eq!(manager.min_active_ts(), Some(t2.read_ts()));
    }

    #[test]
    fn visibility_window() {
        let txn = TransactionContext::at(10);
        assert!(txn.is_visible(5, MAX_TIMESTAMP));
        assert!(txn.is_visible(10, 11));
        assert!(!txn.is_visible(11, MAX_TIMESTAMP));
        assert!(!txn.is_visible(5, 10));
    }
}
