use super::{OperatorTranslator, undo_deletes, wrong_plan};
use crate::codegen::code_gen::{CompiledExpr, RowFn, finish_fn, row_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::runtime::StorageBindings;
use crate::storage::{DataTable, RowLocation};
use crate::types::{SqlType, Value};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

type PendingUpdates = Vec<(RowLocation, Vec<Value>)>;

/// UPDATE as delete + insert of a new version.
///
/// 새 버전은 스캔 중에 계산하고 테이블 제약으로 검증해 버퍼에 두고, 단계가
/// 끝난 뒤 이전 버전 삭제에 성공한 행만 다시 삽입한다. 삽입된 행은 새 타일
/// 그룹에 붙으므로 같은 스캔이 다시 보지 않는다. 삭제나 삽입이 실패하면 이미
/// 지운 버전을 되살려 테이블은 그대로 남는다.
pub struct UpdateTranslator {
    id: TranslatorId,
    child: TranslatorId,
    table: Arc<DataTable>,
    assignments: Vec<(usize, SqlType, CompiledExpr)>,
    pending: StateSlot<PendingUpdates>,
}

impl UpdateTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Update {
            table,
            input,
            assignments,
        } = plan
        else {
            return Err(wrong_plan("update", plan));
        };
        let child = ctx.prepare_plan(input, at.pipeline)?;

        let columns = table.schema().columns();
        let assignments = assignments
            .iter()
            .map(|assignment| {
                let def = columns.get(assignment.column).ok_or_else(|| {
                    TesseraError::Binding(format!(
                        "update column {} out of range for table '{}'",
                        assignment.column,
                        table.name()
                    ))
                })?;
                Ok((assignment.column, def.ty, ctx.compile_expression(&assignment.expr)?))
            })
            .collect::<TesseraResult<Vec<_>>>()?;

        let StorageBindings {
            insert,
            delete,
            restore,
            ..
        } = ctx.bindings().clone();
        let target = Arc::clone(table);
        let pipeline = ctx.pipeline_mut(at.pipeline)?;
        let pending = pipeline.register_thread_state::<PendingUpdates>("update_pending")?;
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
            thread.install(pending, PendingUpdates::new())
        }));
        pipeline.add_finish(finish_fn(move |_, threads, exec| {
            let mut updates = PendingUpdates::new();
            for thread in threads.iter_mut() {
                updates.append(&mut thread.take(pending)?);
            }
            let txn = exec.txn();
            let mut deleted = Vec::with_capacity(updates.len());
            let mut versions = Vec::with_capacity(updates.len());
            for (location, row) in updates {
                match delete(&*target, txn, location) {
                    Ok(true) => {
                        deleted.push(location);
                        versions.push(row);
                    }
                    Ok(false) => {}
                    Err(err) => return Err(undo_deletes(&restore, &target, txn, &deleted, err)),
                }
            }
            let updated = insert(&*target, txn, &versions)
                .map_err(|err| undo_deletes(&restore, &target, txn, &deleted, err))?;
            debug!(table = target.name(), updated, "update applied");
            exec.add_processed(updated as u64);
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            child,
            table: Arc::clone(table),
            assignments,
            pending,
        }))
    }
}

impl OperatorTranslator for UpdateTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "update"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)
    }

    fn consume_row(&self, ctx: &mut CompilationContext, _at: ConsumerContext) -> TesseraResult<RowFn> {
        let read_row = ctx.bindings().read_row.clone();
        let validate = ctx.bindings().validate.clone();
        let table = Arc::clone(&self.table);
        let assignments = self.assignments.clone();
        let pending = self.pending;
        Ok(row_fn(move |scope, row| {
            let location = row.location().ok_or_else(|| {
                TesseraError::Binding("update input row has no storage location".into())
            })?;
            let mut version = read_row(&*table, location)?;
            // 모든 SET 식은 이전 버전 기준으로 계산한다
            let mut values = Vec::with_capacity(assignments.len());
            for (_, ty, expr) in &assignments {
                values.push(row.derive_value(expr, scope.exec)?.cast_to(*ty)?);
            }
            for ((column, _, _), value) in assignments.iter().zip(values) {
                version[*column] = value;
            }
            // 삭제 전에 거부해야 이전 버전이 남는다
            validate(&*table, &version)?;
            scope.thread.get_mut(pending)?.push((location, version));
            Ok(())
        }))
    }
}
