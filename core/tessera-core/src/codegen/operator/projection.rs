use super::{OperatorTranslator, wrong_plan};
use crate::codegen::code_gen::{CompiledExpr, RowFn, row_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::error::TesseraResult;
use crate::plan::PlanNode;
use crate::types::{AttributeId, Value};
use smallvec::SmallVec;
use std::rc::Rc;

/// Computes each target and registers it on the row under its output attribute
pub struct ProjectionTranslator {
    id: TranslatorId,
    child: TranslatorId,
    targets: Vec<(AttributeId, CompiledExpr)>,
}

impl ProjectionTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Projection { input, targets } = plan else {
            return Err(wrong_plan("projection", plan));
        };
        let child = ctx.prepare_plan(input, at.pipeline)?;
        let targets = targets
            .iter()
            .map(|target| Ok((target.output.id, ctx.compile_expression(&target.expr)?)))
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(Rc::new(Self { id, child, targets }))
    }
}

impl OperatorTranslator for ProjectionTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "projection"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)
    }

    fn consume_row(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        let next = ctx.row_consumer(at)?;
        let targets = self.targets.clone();
        Ok(row_fn(move |scope, row| {
            // 모든 대상을 먼저 계산한 뒤 등록: 한 대상이 다른 대상의 입력을 덮지 않게
            let mut values: SmallVec<[Value; 8]> = SmallVec::with_capacity(targets.len());
            for (_, expr) in &targets {
                values.push(row.derive_value(expr, scope.exec)?);
            }
            for ((attr, _), value) in targets.iter().zip(values) {
                row.register_attribute_value(*attr, value);
            }
            next(scope, row)
        }))
    }
}
