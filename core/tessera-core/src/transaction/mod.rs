//! 트랜잭션: 타임스탬프 오라클, 활성 트랜잭션 관리, 가시성 규칙
//!
//! 단순 MVCC 모델: 각 행 버전은 `[begin, end)` 타임스탬프 구간을 갖고,
//! 트랜잭션은 자신의 read timestamp가 구간 안에 있을 때만 그 버전을 본다.

mod manager;

pub use manager::{TimestampOracle, TransactionContext, TransactionManager};

/// `end` timestamp of a live (not deleted) row version
pub const MAX_TIMESTAMP: u64 = u64::MAX;
