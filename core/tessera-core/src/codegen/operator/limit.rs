use super::{OperatorTranslator, wrong_plan};
use crate::codegen::code_gen::{RowFn, row_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::error::TesseraResult;
use crate::plan::PlanNode;
use std::rc::Rc;

/// OFFSET / LIMIT. Runs its pipeline on one worker and stops the source
/// once the last row has been passed on.
pub struct LimitTranslator {
    id: TranslatorId,
    child: TranslatorId,
    offset: u64,
    count: u64,
    seen: StateSlot<u64>,
}

impl LimitTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Limit {
            input,
            offset,
            count,
        } = plan
        else {
            return Err(wrong_plan("limit", plan));
        };
        let pipeline = ctx.pipeline_mut(at.pipeline)?;
        pipeline.set_serial("limit");
        let seen = pipeline.register_thread_state::<u64>("limit_seen")?;
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| thread.install(seen, 0)));
        let child = ctx.prepare_plan(input, at.pipeline)?;
        Ok(Rc::new(Self {
            id,
            child,
            offset: *offset as u64,
            count: *count as u64,
            seen,
        }))
    }
}

impl OperatorTranslator for LimitTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "limit"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)
    }

    fn consume_row(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        let next = ctx.row_consumer(at)?;
        let (seen, offset) = (self.seen, self.offset);
        let end = self.offset.saturating_add(self.count);
        Ok(row_fn(move |scope, row| {
            let index = {
                let seen = scope.thread.get_mut(seen)?;
                let index = *seen;
                *seen += 1;
                index
            };
            if index >= end {
                scope.stop();
                return Ok(());
            }
            if index >= offset {
                next(scope, row)?;
            }
            if index + 1 >= end {
                scope.stop();
            }
            Ok(())
        }))
    }
}
