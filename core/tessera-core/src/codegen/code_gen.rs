//! Code emitter
//!
//! 생성 코드는 컴파일 시점에 합성된 클로저 트리다. 번역기는 `produce`/`consume`
//! 중에 아래의 함수 타입들을 만들어 조립하고, 실행 시에는 플랜 트리를 다시 보지 않는다.
//!
//! - [`ExprFn`]: 한 행에 대한 스칼라 식
//! - [`RowFn`] / [`BatchFn`]: 파이프라인 단계의 consume 본문
//! - [`SourceFn`]: 파이프라인 소스 (워커마다 한 번, 할당된 범위로 호출)
//! - [`StateFn`] / [`ThreadInitFn`] / [`FinishFn`]: 상태 수명주기 훅

use super::proxy::ProxyRegistry;
use super::query::ExecutorContext;
use super::query_state::RuntimeState;
use super::row_batch::{Row, RowBatch};
use crate::config::EngineConfig;
use crate::error::TesseraResult;
use crate::types::{SqlType, Value};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

pub type ExprFn = Arc<dyn Fn(&mut Row<'_>, &ExecutorContext) -> TesseraResult<Value> + Send + Sync>;
pub type RowFn = Arc<dyn Fn(&mut WorkerScope<'_>, &mut Row<'_>) -> TesseraResult<()> + Send + Sync>;
pub type BatchFn =
    Arc<dyn Fn(&mut WorkerScope<'_>, &mut RowBatch<'_>) -> TesseraResult<()> + Send + Sync>;
pub type SourceFn =
    Arc<dyn Fn(&mut WorkerScope<'_>, Option<Range<usize>>) -> TesseraResult<()> + Send + Sync>;
/// Number of work units (tile groups) a parallel source can split
pub type PartitionFn = Arc<dyn Fn(&RuntimeState, &ExecutorContext) -> TesseraResult<usize> + Send + Sync>;
pub type StateFn = Arc<dyn Fn(&mut RuntimeState, &ExecutorContext) -> TesseraResult<()> + Send + Sync>;
/// `(thread, query, exec)`
pub type ThreadInitFn =
    Arc<dyn Fn(&mut RuntimeState, &RuntimeState, &ExecutorContext) -> TesseraResult<()> + Send + Sync>;
/// `(query, threads, exec)`: runs once after every worker of the stage completed
pub type FinishFn = Arc<
    dyn Fn(&mut RuntimeState, &mut [RuntimeState], &ExecutorContext) -> TesseraResult<()> + Send + Sync,
>;

// 클로저 시그니처 추론을 위한 생성 헬퍼들

pub fn expr_fn<F>(f: F) -> ExprFn
where
    F: Fn(&mut Row<'_>, &ExecutorContext) -> TesseraResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn row_fn<F>(f: F) -> RowFn
where
    F: Fn(&mut WorkerScope<'_>, &mut Row<'_>) -> TesseraResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn batch_fn<F>(f: F) -> BatchFn
where
    F: Fn(&mut WorkerScope<'_>, &mut RowBatch<'_>) -> TesseraResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn source_fn<F>(f: F) -> SourceFn
where
    F: Fn(&mut WorkerScope<'_>, Option<Range<usize>>) -> TesseraResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn partition_fn<F>(f: F) -> PartitionFn
where
    F: Fn(&RuntimeState, &ExecutorContext) -> TesseraResult<usize> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn state_fn<F>(f: F) -> StateFn
where
    F: Fn(&mut RuntimeState, &ExecutorContext) -> TesseraResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn thread_init_fn<F>(f: F) -> ThreadInitFn
where
    F: Fn(&mut RuntimeState, &RuntimeState, &ExecutorContext) -> TesseraResult<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn finish_fn<F>(f: F) -> FinishFn
where
    F: Fn(&mut RuntimeState, &mut [RuntimeState], &ExecutorContext) -> TesseraResult<()>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Identity of a compiled expression, used as the row cache key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// A translated expression: its identity, result type and evaluation body
#[derive(Clone)]
pub struct CompiledExpr {
    pub id: ExprId,
    pub ty: SqlType,
    pub eval: ExprFn,
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("id", &self.id)
            .field("ty", &self.ty)
            .finish()
    }
}

impl CompiledExpr {
    /// Evaluate without consulting the row cache
    pub fn evaluate(&self, row: &mut Row<'_>, exec: &ExecutorContext) -> TesseraResult<Value> {
        (self.eval)(row, exec)
    }
}

/// Per-worker view handed to every generated function of a pipeline
pub struct WorkerScope<'a> {
    pub query: &'a RuntimeState,
    pub thread: &'a mut RuntimeState,
    pub exec: &'a ExecutorContext,
    worker_id: usize,
    stopped: bool,
}

impl<'a> WorkerScope<'a> {
    pub fn new(
        query: &'a RuntimeState,
        thread: &'a mut RuntimeState,
        exec: &'a ExecutorContext,
        worker_id: usize,
    ) -> Self {
        Self {
            query,
            thread,
            exec,
            worker_id,
            stopped: false,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Ask the pipeline source to stop producing (LIMIT reached)
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// Structured conditional over one row
pub struct If;

impl If {
    pub fn build(condition: CompiledExpr, then: RowFn, otherwise: Option<RowFn>) -> RowFn {
        row_fn(move |scope, row| {
            if row.derive_value(&condition, scope.exec)?.is_true() {
                then(scope, row)
            } else if let Some(otherwise) = &otherwise {
                otherwise(scope, row)
            } else {
                Ok(())
            }
        })
    }
}

/// Loop body result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Break,
}

/// Structured loop that also honours [`WorkerScope::stop`]
pub struct Loop;

impl Loop {
    pub fn run<I, F>(items: I, scope: &mut WorkerScope<'_>, mut body: F) -> TesseraResult<()>
    where
        I: IntoIterator,
        F: FnMut(&mut WorkerScope<'_>, I::Item) -> TesseraResult<LoopControl>,
    {
        for item in items {
            if scope.is_stopped() {
                break;
            }
            if body(scope, item)? == LoopControl::Break {
                break;
            }
        }
        Ok(())
    }
}

/// Strided loop over `[start, end)` in steps of at most `vector_size`
#[derive(Debug, Clone)]
pub struct VectorizedLoop {
    next: u32,
    end: u32,
    vector_size: u32,
}

impl VectorizedLoop {
    pub fn new(range: Range<u32>, vector_size: usize) -> Self {
        Self {
            next: range.start,
            end: range.end,
            vector_size: u32::try_from(vector_size).unwrap_or(u32::MAX).max(1),
        }
    }
}

impl Iterator for VectorizedLoop {
    type Item = Range<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.vector_size).min(self.end);
        self.next = end;
        Some(start..end)
    }
}

/// Emission context owned by the compilation context
pub struct CodeGen {
    config: Arc<EngineConfig>,
    proxies: ProxyRegistry,
    next_expr_id: u32,
}

impl fmt::Debug for CodeGen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeGen")
            .field("proxies", &self.proxies.len())
            .field("expressions", &self.next_expr_id)
            .finish()
    }
}

impl CodeGen {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            proxies: ProxyRegistry::new(),
            next_expr_id: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shared_config(&self) -> Arc<EngineConfig> {
        Arc::clone(&self.config)
    }

    pub fn vector_size(&self) -> usize {
        self.config.vector_size.max(1)
    }

    pub fn proxies(&mut self) -> &mut ProxyRegistry {
        &mut self.proxies
    }

    /// Emit an expression body under a fresh identity
    pub fn emit(&mut self, ty: SqlType, eval: ExprFn) -> CompiledExpr {
        let id = ExprId(self.next_expr_id);
        self.next_expr_id += 1;
        CompiledExpr { id, ty, eval }
    }

    /// Typed constant; the value is cast to `ty` once, here
    pub fn constant(&mut self, value: Value, ty: SqlType) -> TesseraResult<CompiledExpr> {
        let value = value.cast_to(ty)?;
        Ok(self.emit(ty, expr_fn(move |_, _| Ok(value.clone()))))
    }

    pub fn null(&mut self, ty: SqlType) -> CompiledExpr {
        self.emit(ty, expr_fn(|_, _| Ok(Value::Null)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectorized_loop_strides() {
        let chunks: Vec<_> = VectorizedLoop::new(3..13, 4).collect();
        assert_eq!(chunks, vec![3..7, 7..11, 11..13]);
        assert_eq!(VectorizedLoop::new(5..5, 4).count(), 0);
    }

    #[test]
    fn constants_are_cast_once() {
        let mut codegen = CodeGen::new(Arc::new(EngineConfig::default()));
        let c = codegen.constant(Value::Integer(7), SqlType::BigInt).unwrap();
        assert_eq!(c.ty, SqlType::BigInt);
        let d = codegen.null(SqlType::Varchar);
        assert_ne!(c.id, d.id);
        assert!(codegen.constant(Value::BigInt(i64::MAX), SqlType::Integer).is_err());
    }
}
