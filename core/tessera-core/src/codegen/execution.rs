//! Worker pool: rayon 기반 파이프라인 실행
//!
//! 병렬 단계는 소스 입력(타일 그룹)을 연속된 서로소 범위로 나누어 워커마다
//! 하나씩 할당한다. 단계의 `finish`는 모든 워커가 끝난 뒤에만 실행된다.

use crate::config::EngineConfig;
use crate::error::{TesseraError, TesseraResult};
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Parallelization policy for the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParallelizationPolicy {
    /// Number of logical CPUs, capped at 16
    #[default]
    Auto,
    /// Use a fixed number of threads
    Fixed(usize),
    /// Half of the CPUs; stages still size themselves by input
    Adaptive,
}

/// Bounded worker pool executing pipeline stages
#[derive(Clone)]
pub struct WorkerPool {
    thread_pool: Arc<rayon::ThreadPool>,
    policy: ParallelizationPolicy,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("policy", &self.policy)
            .field("threads", &self.thread_count())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(policy: ParallelizationPolicy) -> TesseraResult<Self> {
        if let ParallelizationPolicy::Fixed(0) = policy {
            return Err(TesseraError::InvalidArguments(
                "Thread count must be greater than 0".to_string(),
            ));
        }
        let num_threads = Self::determine_thread_count(policy);

        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("tessera-worker-{}", i))
            .build()
            .map_err(|e| TesseraError::ThreadPool(format!("Failed to create thread pool: {}", e)))?;

        Ok(Self {
            thread_pool: Arc::new(thread_pool),
            policy,
        })
    }

    pub fn new_auto() -> TesseraResult<Self> {
        Self::new(ParallelizationPolicy::Auto)
    }

    pub fn new_fixed(num_threads: usize) -> TesseraResult<Self> {
        Self::new(ParallelizationPolicy::Fixed(num_threads))
    }

    pub fn from_config(config: &EngineConfig) -> TesseraResult<Self> {
        Self::new(config.parallelism)
    }

    pub fn policy(&self) -> ParallelizationPolicy {
        self.policy
    }

    pub fn thread_count(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Execute a closure in the thread pool
    pub fn execute<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.thread_pool.install(f)
    }

    fn determine_thread_count(policy: ParallelizationPolicy) -> usize {
        match policy {
            ParallelizationPolicy::Auto => num_cpus::get().min(16),
            ParallelizationPolicy::Fixed(n) => n,
            ParallelizationPolicy::Adaptive => (num_cpus::get() / 2).max(1),
        }
    }

    /// Worker count for a stage with `work_units` tile groups
    pub fn plan_workers(&self, work_units: usize, min_units_per_worker: usize) -> usize {
        if work_units == 0 {
            return 1;
        }
        let by_input = work_units / min_units_per_worker.max(1);
        match self.policy {
            ParallelizationPolicy::Fixed(_) | ParallelizationPolicy::Auto => {
                by_input.clamp(1, self.thread_count())
            }
            // 입력이 적을 때는 워커를 더 아낀다
            ParallelizationPolicy::Adaptive => (by_input / 2).clamp(1, self.thread_count()),
        }
    }

    /// Split `[0, total)` into `workers` contiguous, disjoint, non-empty ranges
    pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
        let workers = workers.clamp(1, total.max(1));
        let base = total / workers;
        let extra = total % workers;
        let mut ranges = Vec::with_capacity(workers);
        let mut start = 0;
        for worker in 0..workers {
            let len = base + usize::from(worker < extra);
            ranges.push(start..start + len);
            start += len;
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fixed() {
        let pool = WorkerPool::new_fixed(4).unwrap();
        assert_eq!(pool.policy(), ParallelizationPolicy::Fixed(4));
        assert_eq!(pool.thread_count(), 4);
    }

    #[test]
    fn test_new_fixed_zero_threads() {
        assert!(WorkerPool::new_fixed(0).is_err());
    }

    #[test]
    fn test_execute() {
        let pool = WorkerPool::new_auto().unwrap();
        assert_eq!(pool.execute(|| 42), 42);
        assert!(pool.thread_count() > 0);
    }

    #[test]
    fn test_plan_workers() {
        let pool = WorkerPool::new_fixed(4).unwrap();
        assert_eq!(pool.plan_workers(0, 1), 1);
        assert_eq!(pool.plan_workers(2, 1), 2);
        assert_eq!(pool.plan_workers(100, 1), 4);
        assert_eq!(pool.plan_workers(6, 3), 2);
    }

    #[test]
    fn test_partition_covers_range() {
        let ranges = WorkerPool::partition(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(WorkerPool::partition(2, 8), vec![0..1, 1..2]);
        assert_eq!(WorkerPool::partition(0, 4), vec![0..0]);
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&ParallelizationPolicy::Fixed(3)).unwrap();
        let back: ParallelizationPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ParallelizationPolicy::Fixed(3));
    }
}
