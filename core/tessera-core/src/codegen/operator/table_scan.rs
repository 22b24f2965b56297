//! Sequential scan
//!
//! 타일 그룹 단위로 순회하며 `vector_size`씩 잘라 가시성 검사를 거친 배치를
//! 만든다. 스캔 술어는 배치 단위로 선택 벡터를 좁히고, 살아남은 행이 있을 때만
//! 다음 단계로 넘긴다. 병렬 단계에서는 워커마다 연속된 타일 그룹 범위를 맡는다.

use super::{OperatorTranslator, not_a_consumer, wrong_plan};
use crate::codegen::code_gen::{
    CompiledExpr, Loop, LoopControl, RowFn, VectorizedLoop, partition_fn, source_fn,
};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::codegen::row_batch::{RowBatch, TileGroupAccessor};
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::runtime::StorageBindings;
use crate::storage::{DataTable, TileGroup};
use crate::types::AttributeId;
use std::rc::Rc;
use std::sync::Arc;
use tracing::trace;

pub struct TableScanTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    table: Arc<DataTable>,
    columns: Vec<(usize, AttributeId)>,
    predicate: Option<CompiledExpr>,
}

impl TableScanTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::SeqScan {
            table,
            columns,
            predicate,
        } = plan
        else {
            return Err(wrong_plan("table scan", plan));
        };
        for column in columns {
            if column.column >= table.schema().len() {
                return Err(TesseraError::Binding(format!(
                    "column {} out of range for table '{}'",
                    column.column,
                    table.name()
                )));
            }
        }
        let predicate = predicate
            .as_ref()
            .map(|expr| ctx.compile_expression(expr))
            .transpose()?;
        Ok(Rc::new(Self {
            id,
            at,
            table: Arc::clone(table),
            columns: columns
                .iter()
                .map(|c| (c.column, c.attribute.id))
                .collect(),
            predicate,
        }))
    }
}

impl OperatorTranslator for TableScanTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "table_scan"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let consumer = ctx.batch_consumer(self.at)?;
        let StorageBindings {
            chunks,
            visible_positions,
            ..
        } = ctx.bindings().clone();
        let table = Arc::clone(&self.table);
        let columns = self.columns.clone();
        let predicate = self.predicate.clone();

        let source = source_fn(move |scope, range| {
            let exec = scope.exec;
            let vector_size = exec.config().vector_size.max(1);
            let groups = chunks(&*table, range);
            trace!(table = table.name(), tile_groups = groups.len(), worker = scope.worker_id(), "scan");
            let mut visible = Vec::with_capacity(vector_size);
            Loop::run(groups.iter(), scope, |scope, group| {
                let group: &TileGroup = group;
                let accessors: Vec<TileGroupAccessor<'_>> = columns
                    .iter()
                    .map(|(column, _)| TileGroupAccessor::new(group, *column))
                    .collect();
                for range in VectorizedLoop::new(0..group.num_rows(), vector_size) {
                    if scope.is_stopped() {
                        return Ok(LoopControl::Break);
                    }
                    visible.clear();
                    visible_positions(group, exec.txn(), range.clone(), &mut visible);
                    if visible.is_empty() {
                        continue;
                    }
                    let mut batch =
                        RowBatch::with_selection(range, visible.clone()).in_tile_group(group.id());
                    for ((_, attr), accessor) in columns.iter().zip(&accessors) {
                        batch.add_attribute(*attr, accessor);
                    }
                    if let Some(predicate) = &predicate {
                        batch.iterate(|row| {
                            let keep = row.derive_value(predicate, exec)?.is_true();
                            row.set_validity(keep)
                        })?;
                        if batch.is_empty() {
                            continue;
                        }
                    }
                    consumer(scope, &mut batch)?;
                }
                Ok(LoopControl::Continue)
            })
        });

        let table = Arc::clone(&self.table);
        let partition = partition_fn(move |_, _| Ok(table.tile_group_count()));
        ctx.register_pipeline_source(self.id, self.at.pipeline, source, Some(partition))
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, _at: ConsumerContext) -> TesseraResult<RowFn> {
        Err(not_a_consumer("table scan"))
    }
}
