use super::{OperatorTranslator, undo_deletes, wrong_plan};
use crate::codegen::code_gen::{RowFn, finish_fn, row_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::storage::RowLocation;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// DELETE: collects the storage address of every input row and deletes them
/// once the scan has drained. Rows already invisible to the transaction are
/// skipped and not counted; a storage failure restores what was deleted.
pub struct DeleteTranslator {
    id: TranslatorId,
    child: TranslatorId,
    locations: StateSlot<Vec<RowLocation>>,
}

impl DeleteTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Delete { table, input } = plan else {
            return Err(wrong_plan("delete", plan));
        };
        let child = ctx.prepare_plan(input, at.pipeline)?;

        let delete = ctx.bindings().delete.clone();
        let restore = ctx.bindings().restore.clone();
        let table = Arc::clone(table);
        let pipeline = ctx.pipeline_mut(at.pipeline)?;
        let locations = pipeline.register_thread_state::<Vec<RowLocation>>("delete_locations")?;
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
            thread.install(locations, Vec::new())
        }));
        pipeline.add_finish(finish_fn(move |_, threads, exec| {
            let mut targets = Vec::new();
            for thread in threads.iter_mut() {
                targets.append(&mut thread.take(locations)?);
            }
            let txn = exec.txn();
            let mut deleted = Vec::with_capacity(targets.len());
            for location in targets {
                match delete(&*table, txn, location) {
                    Ok(true) => deleted.push(location),
                    Ok(false) => {}
                    Err(err) => return Err(undo_deletes(&restore, &table, txn, &deleted, err)),
                }
            }
            debug!(table = table.name(), deleted = deleted.len(), "delete applied");
            exec.add_processed(deleted.len() as u64);
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            child,
            locations,
        }))
    }
}

impl OperatorTranslator for DeleteTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "delete"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, _at: ConsumerContext) -> TesseraResult<RowFn> {
        let locations = self.locations;
        Ok(row_fn(move |scope, row| {
            let location = row.location().ok_or_else(|| {
                TesseraError::Binding("delete input row has no storage location".into())
            })?;
            scope.thread.get_mut(locations)?.push(location);
            Ok(())
        }))
    }
}
