use super::{OperatorTranslator, wrong_plan};
use crate::codegen::code_gen::{BatchFn, CompiledExpr, If, RowFn, batch_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::types::SqlType;
use std::rc::Rc;

/// WHERE outside of a scan.
///
/// 배치 경로에서는 선택 벡터만 좁힌다. 행 경로(조인 출력 등)에서는 조건문으로 감싼다.
pub struct FilterTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    child: TranslatorId,
    predicate: CompiledExpr,
}

impl FilterTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Filter { input, predicate } = plan else {
            return Err(wrong_plan("filter", plan));
        };
        let child = ctx.prepare_plan(input, at.pipeline)?;
        let predicate = ctx.compile_expression(predicate)?;
        if predicate.ty != SqlType::Boolean {
            return Err(TesseraError::type_mismatch("BOOLEAN", predicate.ty.name()));
        }
        Ok(Rc::new(Self {
            id,
            at,
            child,
            predicate,
        }))
    }
}

impl OperatorTranslator for FilterTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "filter"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)
    }

    fn consume_batch(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<BatchFn> {
        let next = ctx.batch_consumer(at)?;
        let predicate = self.predicate.clone();
        Ok(batch_fn(move |scope, batch| {
            let exec = scope.exec;
            batch.iterate(|row| {
                let keep = row.derive_value(&predicate, exec)?.is_true();
                row.set_validity(keep)
            })?;
            if batch.is_empty() {
                return Ok(());
            }
            next(scope, batch)
        }))
    }

    fn consume_row(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        let next = ctx.row_consumer(at)?;
        Ok(If::build(self.predicate.clone(), next, None))
    }
}
