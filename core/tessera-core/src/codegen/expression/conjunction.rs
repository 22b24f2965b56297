use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::{ConjunctionOp, Expr};
use crate::types::{SqlType, Value};

/// AND / OR with three-valued logic.
///
/// 왼쪽 값만으로 결과가 정해지면 오른쪽은 평가하지 않는다.
pub struct ConjunctionTranslator {
    op: ConjunctionOp,
    left: CompiledExpr,
    right: CompiledExpr,
}

impl ConjunctionTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Conjunction { op, left, right } = expr else {
            return Err(wrong_node("conjunction", expr));
        };
        expr.result_type()?;
        Ok(Box::new(Self {
            op: *op,
            left: ctx.compile_expression(left)?,
            right: ctx.compile_expression(right)?,
        }))
    }
}

impl ExpressionTranslator for ConjunctionTranslator {
    fn result_type(&self) -> SqlType {
        SqlType::Boolean
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let (left, right) = (self.left.clone(), self.right.clone());
        // AND는 false에서, OR는 true에서 단락
        let decisive = self.op == ConjunctionOp::Or;
        Ok(codegen.emit(
            SqlType::Boolean,
            expr_fn(move |row, exec| {
                let l = row.derive_value(&left, exec)?.as_bool();
                if l == Some(decisive) {
                    return Ok(Value::Boolean(decisive));
                }
                let r = row.derive_value(&right, exec)?.as_bool();
                if r == Some(decisive) {
                    return Ok(Value::Boolean(decisive));
                }
                Ok(match (l, r) {
                    (Some(_), Some(_)) => Value::Boolean(!decisive),
                    _ => Value::Null,
                })
            }),
        ))
    }
}
