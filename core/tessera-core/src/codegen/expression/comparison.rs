use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::{ComparisonOp, Expr};
use crate::types::{SqlType, Value};
use std::cmp::Ordering;

/// Comparison with SQL NULL semantics: any NULL operand yields NULL
pub struct ComparisonTranslator {
    op: ComparisonOp,
    left: CompiledExpr,
    right: CompiledExpr,
}

impl ComparisonTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Comparison { op, left, right } = expr else {
            return Err(wrong_node("comparison", expr));
        };
        // 타입 검사만 수행
        expr.result_type()?;
        Ok(Box::new(Self {
            op: *op,
            left: ctx.compile_expression(left)?,
            right: ctx.compile_expression(right)?,
        }))
    }
}

impl ExpressionTranslator for ComparisonTranslator {
    fn result_type(&self) -> SqlType {
        SqlType::Boolean
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let op = self.op;
        let (left, right) = (self.left.clone(), self.right.clone());
        Ok(codegen.emit(
            SqlType::Boolean,
            expr_fn(move |row, exec| {
                let l = row.derive_value(&left, exec)?;
                let r = row.derive_value(&right, exec)?;
                Ok(compare(op, &l, &r))
            }),
        ))
    }
}

pub(crate) fn compare(op: ComparisonOp, l: &Value, r: &Value) -> Value {
    if l.is_null() || r.is_null() {
        return Value::Null;
    }
    let ord = l.compare(r);
    Value::Boolean(match op {
        ComparisonOp::Eq => ord == Ordering::Equal,
        ComparisonOp::NotEq => ord != Ordering::Equal,
        ComparisonOp::Lt => ord == Ordering::Less,
        ComparisonOp::LtEq => ord != Ordering::Greater,
        ComparisonOp::Gt => ord == Ordering::Greater,
        ComparisonOp::GtEq => ord != Ordering::Less,
    })
}
