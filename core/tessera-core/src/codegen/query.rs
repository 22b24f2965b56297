//! Compiled query & executor entry points
//!
//! [`CompiledQuery`]는 컴파일 결과물이다: 쿼리 상태 레이아웃, 초기화/해제 훅,
//! 의존 순서대로 정렬된 파이프라인 단계들. 실행은
//! `initialize_state → execute_plan → tear_down_state` 순서이며
//! [`CompiledQuery::execute`]가 세 단계를 묶고 완료 콜백을 호출한다.

use super::code_gen::{
    FinishFn, PartitionFn, SourceFn, StateFn, ThreadInitFn, WorkerScope,
};
use super::execution::WorkerPool;
use super::pipeline::PipelineId;
use super::query_state::{RuntimeState, StateLayout, StateSlot};
use crate::config::EngineConfig;
use crate::error::{TesseraError, TesseraResult};
use crate::transaction::TransactionContext;
use crate::types::{AttributeInfo, Value, build_array};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, instrument};

/// Rows collected by the result sink
pub type ResultBuffer = Vec<Vec<Value>>;

/// Execution-context handle passed to every generated function
#[derive(Debug)]
pub struct ExecutorContext {
    txn: TransactionContext,
    params: Vec<Value>,
    config: Arc<EngineConfig>,
    processed: AtomicU64,
}

impl ExecutorContext {
    pub fn new(txn: TransactionContext, params: Vec<Value>, config: Arc<EngineConfig>) -> Self {
        Self {
            txn,
            params,
            config,
            processed: AtomicU64::new(0),
        }
    }

    pub fn txn(&self) -> &TransactionContext {
        &self.txn
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn parameter(&self, index: usize) -> TesseraResult<&Value> {
        self.params.get(index).ok_or_else(|| {
            TesseraError::execution(
                format!("parameter ${} not bound ({} given)", index + 1, self.params.len()),
                "parameters",
            )
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Count rows written by a mutation
    pub fn add_processed(&self, rows: u64) {
        self.processed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// One executable pipeline: source, per-worker state, and the finish barrier
pub struct PipelineStep {
    pub(crate) pipeline: PipelineId,
    pub(crate) parallel: bool,
    pub(crate) thread_layout: StateLayout,
    pub(crate) thread_inits: Vec<ThreadInitFn>,
    pub(crate) source: SourceFn,
    pub(crate) partition: Option<PartitionFn>,
    pub(crate) finish: Vec<FinishFn>,
}

impl fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("pipeline", &self.pipeline)
            .field("parallel", &self.parallel)
            .field("thread_slots", &self.thread_layout.len())
            .field("finish_hooks", &self.finish.len())
            .finish()
    }
}

impl PipelineStep {
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    fn run(
        &self,
        state: &mut RuntimeState,
        exec: &ExecutorContext,
        pool: &WorkerPool,
    ) -> TesseraResult<usize> {
        let ranges: Vec<Option<Range<usize>>> = match &self.partition {
            Some(partition) if self.parallel => {
                let units = partition(state, exec)?;
                let workers = pool.plan_workers(units, exec.config().min_tile_groups_per_worker);
                WorkerPool::partition(units, workers)
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            _ => vec![None],
        };

        let query: &RuntimeState = state;
        let mut threads = if ranges.len() == 1 {
            let range = ranges.into_iter().next().flatten();
            vec![self.run_worker(query, exec, 0, range)?]
        } else {
            pool.execute(|| {
                ranges
                    .into_par_iter()
                    .enumerate()
                    .map(|(worker_id, range)| self.run_worker(query, exec, worker_id, range))
                    .collect::<TesseraResult<Vec<_>>>()
            })?
        };

        // 모든 워커가 끝난 뒤에만 스레드 상태를 합친다
        for finish in &self.finish {
            finish(state, &mut threads, exec)?;
        }
        Ok(threads.len())
    }

    fn run_worker(
        &self,
        query: &RuntimeState,
        exec: &ExecutorContext,
        worker_id: usize,
        range: Option<Range<usize>>,
    ) -> TesseraResult<RuntimeState> {
        let mut thread = RuntimeState::allocate(&self.thread_layout);
        for init in &self.thread_inits {
            init(&mut thread, query, exec)?;
        }
        let mut scope = WorkerScope::new(query, &mut thread, exec, worker_id);
        (self.source)(&mut scope, range)?;
        Ok(thread)
    }
}

/// Outcome delivered to the completion callback
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    columns: Vec<AttributeInfo>,
    rows: Vec<Vec<Value>>,
    processed: u64,
}

impl QueryResult {
    pub fn new(columns: Vec<AttributeInfo>, rows: Vec<Vec<Value>>, processed: u64) -> Self {
        Self {
            columns,
            rows,
            processed,
        }
    }

    pub fn columns(&self) -> &[AttributeInfo] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Rows written by a mutation
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn column_values(&self, column: usize) -> Vec<Value> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).cloned())
            .collect()
    }

    pub fn to_record_batch(&self) -> TesseraResult<RecordBatch> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|attr| Field::new(attr.label(), attr.ty.to_arrow(), attr.nullable))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays = self
            .columns
            .iter()
            .enumerate()
            .map(|(col, attr)| build_array(attr.ty, self.rows.iter().map(|row| &row[col])))
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

pub struct CompiledQuery {
    pub(crate) layout: StateLayout,
    pub(crate) initializers: Vec<StateFn>,
    pub(crate) tear_downs: Vec<StateFn>,
    pub(crate) steps: Vec<PipelineStep>,
    pub(crate) output: Vec<AttributeInfo>,
    pub(crate) result: StateSlot<ResultBuffer>,
    pub(crate) config: Arc<EngineConfig>,
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("state_slots", &self.layout.len())
            .field("steps", &self.steps)
            .field("output", &self.output.len())
            .finish()
    }
}

impl CompiledQuery {
    pub fn output_attributes(&self) -> &[AttributeInfo] {
        &self.output
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fresh, uninitialized per-query state record
    pub fn allocate_state(&self) -> RuntimeState {
        RuntimeState::allocate(&self.layout)
    }

    pub fn initialize_state(&self, state: &mut RuntimeState, exec: &ExecutorContext) -> TesseraResult<()> {
        for init in &self.initializers {
            init(state, exec)?;
        }
        Ok(())
    }

    /// Run every pipeline in dependency order
    #[instrument(skip_all, fields(steps = self.steps.len()))]
    pub fn execute_plan(
        &self,
        state: &mut RuntimeState,
        exec: &ExecutorContext,
        pool: &WorkerPool,
    ) -> TesseraResult<()> {
        for step in &self.steps {
            let start = Instant::now();
            let workers = step.run(state, exec, pool)?;
            debug!(
                pipeline = %step.pipeline,
                workers,
                elapsed_us = start.elapsed().as_micros() as u64,
                "pipeline complete"
            );
        }
        Ok(())
    }

    /// Release everything the query state holds; safe after a failed execution
    pub fn tear_down_state(&self, state: &mut RuntimeState, exec: &ExecutorContext) -> TesseraResult<()> {
        let mut first_error = None;
        for tear_down in self.tear_downs.iter().rev() {
            if let Err(e) = tear_down(state, exec) {
                first_error.get_or_insert(e);
            }
        }
        state.clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Run the whole query and hand the outcome to `callback`.
    ///
    /// A failed query delivers no rows.
    pub fn execute<F>(&self, txn: &TransactionContext, params: Vec<Value>, pool: &WorkerPool, callback: F)
    where
        F: FnOnce(TesseraResult<QueryResult>),
    {
        let exec = ExecutorContext::new(*txn, params, Arc::clone(&self.config));
        let mut state = self.allocate_state();
        let outcome = self
            .initialize_state(&mut state, &exec)
            .and_then(|()| self.execute_plan(&mut state, &exec, pool))
            .and_then(|()| {
                let rows = state.take(self.result)?;
                Ok(QueryResult::new(self.output.clone(), rows, exec.processed()))
            });
        let torn_down = self.tear_down_state(&mut state, &exec);
        callback(outcome.and_then(|result| torn_down.map(|()| result)));
    }

    /// [`CompiledQuery::execute`] returning the outcome directly
    pub fn run(
        &self,
        txn: &TransactionContext,
        params: Vec<Value>,
        pool: &WorkerPool,
    ) -> TesseraResult<QueryResult> {
        let mut outcome = Err(TesseraError::execution("no completion", "executor"));
        self.execute(txn, params, pool, |result| outcome = result);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SqlType;
    use arrow::array::Array;

    #[test]
    fn result_converts_to_record_batch() {
        let result = QueryResult::new(
            vec![
                AttributeInfo::named(0, "id", SqlType::Integer),
                AttributeInfo::named(1, "name", SqlType::Varchar),
            ],
            vec![
                vec![Value::Integer(1), Value::varchar("a")],
                vec![Value::Integer(2), Value::Null],
            ],
            0,
        );
        let batch = result.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(1).name(), "name");
        assert_eq!(batch.column(1).null_count(), 1);
        assert_eq!(result.column_values(0), vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let exec = ExecutorContext::new(
            TransactionContext::at(1),
            vec![Value::Integer(5)],
            Arc::new(EngineConfig::default()),
        );
        assert_eq!(exec.parameter(0).unwrap(), &Value::Integer(5));
        assert!(exec.parameter(1).is_err());
        exec.add_processed(3);
        assert_eq!(exec.processed(), 3);
    }
}
