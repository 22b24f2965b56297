//! Operator translators
//!
//! 플랜 노드 하나당 번역기 하나. 생성자(`create`)는 자신이 속한 파이프라인
//! 단계를 받아 자식을 준비하고 상태 슬롯을 등록한다. 이후
//!
//! - `produce`: 소스라면 파이프라인 소스를 등록하고, 아니면 자식의 produce를 호출
//! - `consume_batch` / `consume_row`: 상위 단계에서 들어오는 배치/행 처리 본문
//!
//! 블로킹 연산자(group-by, order-by, join 빌드 쪽)는 자식 파이프라인의
//! 0번 단계이자 부모 파이프라인의 소스이므로 두 파이프라인에 동시에 나타난다.
//! 어느 쪽에서 호출되었는지는 `ConsumerContext::pipeline`으로 구분한다.

mod delete;
mod filter;
mod global_group_by;
mod group_by;
mod hash_group_by;
mod hash_join;
mod insert;
mod limit;
mod nested_loop_join;
mod order_by;
mod projection;
mod result_sink;
mod sort_group_by;
mod table_scan;
mod update;

pub use delete::DeleteTranslator;
pub use filter::FilterTranslator;
pub use global_group_by::GlobalGroupByTranslator;
pub use hash_group_by::HashGroupByTranslator;
pub use hash_join::HashJoinTranslator;
pub use insert::InsertTranslator;
pub use limit::LimitTranslator;
pub use nested_loop_join::NestedLoopJoinTranslator;
pub use order_by::OrderByTranslator;
pub use projection::ProjectionTranslator;
pub use result_sink::ResultSink;
pub use sort_group_by::SortGroupByTranslator;
pub use table_scan::TableScanTranslator;
pub use update::UpdateTranslator;

use super::code_gen::{BatchFn, RowFn, batch_fn};
use super::compilation_context::CompilationContext;
use super::pipeline::{ConsumerContext, TranslatorId};
use super::proxy::Proxy;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::runtime::bindings::RestoreFn;
use crate::storage::{DataTable, RowLocation};
use crate::transaction::TransactionContext;
use std::rc::Rc;
use tracing::warn;

pub trait OperatorTranslator {
    fn id(&self) -> TranslatorId;

    fn name(&self) -> &'static str;

    /// Register query-state initializers
    fn initialize_state(&self, _ctx: &mut CompilationContext) -> TesseraResult<()> {
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()>;

    /// Batch-at-a-time consume; by default every valid row goes through
    /// [`OperatorTranslator::consume_row`].
    fn consume_batch(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<BatchFn> {
        let consume = self.consume_row(ctx, at)?;
        Ok(batch_fn(move |scope, batch| {
            batch.for_each(|row| consume(scope, row))
        }))
    }

    fn consume_row(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn>;

    /// Register query-state tear-down hooks
    fn tear_down_state(&self, _ctx: &mut CompilationContext) -> TesseraResult<()> {
        Ok(())
    }
}

/// Factory entry for one [`crate::plan::PlanKind`]
pub type OperatorCtor = fn(
    &PlanNode,
    TranslatorId,
    ConsumerContext,
    &mut CompilationContext,
) -> TesseraResult<Rc<dyn OperatorTranslator>>;

pub(crate) fn wrong_plan(translator: &str, plan: &PlanNode) -> TesseraError {
    TesseraError::Config(format!(
        "{translator} translator handed a {:?} plan",
        plan.kind()
    ))
}

/// Consume on a translator that only ever acts as a source
pub(crate) fn not_a_consumer(translator: &str) -> TesseraError {
    TesseraError::Config(format!("{translator} has no input to consume"))
}

/// 실패한 변경 연산이 지운 버전을 모두 되살린 뒤 원래 에러를 돌려준다
pub(crate) fn undo_deletes(
    restore: &Proxy<RestoreFn>,
    table: &DataTable,
    txn: &TransactionContext,
    deleted: &[RowLocation],
    cause: TesseraError,
) -> TesseraError {
    for &location in deleted {
        if let Err(err) = restore(table, txn, location) {
            warn!(table = table.name(), ?location, error = %err, "restore after failed mutation");
        }
    }
    warn!(table = table.name(), restored = deleted.len(), error = %cause, "mutation rolled back");
    cause
}
