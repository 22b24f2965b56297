use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{Expr, UnaryOp};
use crate::types::{SqlType, Value};

pub struct UnaryTranslator {
    op: UnaryOp,
    operand: CompiledExpr,
    ty: SqlType,
}

impl UnaryTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Unary { op, operand } = expr else {
            return Err(wrong_node("unary", expr));
        };
        let ty = expr.result_type()?;
        Ok(Box::new(Self {
            op: *op,
            operand: ctx.compile_expression(operand)?,
            ty,
        }))
    }
}

impl ExpressionTranslator for UnaryTranslator {
    fn result_type(&self) -> SqlType {
        self.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let op = self.op;
        let operand = self.operand.clone();
        Ok(codegen.emit(
            self.ty,
            expr_fn(move |row, exec| {
                let value = row.derive_value(&operand, exec)?;
                match (op, &value) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, Value::Boolean(b)) => Ok(Value::Boolean(!b)),
                    (UnaryOp::Negate, Value::Integer(v)) => v
                        .checked_neg()
                        .map(Value::Integer)
                        .ok_or_else(|| TesseraError::Overflow(format!("-({v})"))),
                    (UnaryOp::Negate, Value::BigInt(v)) => v
                        .checked_neg()
                        .map(Value::BigInt)
                        .ok_or_else(|| TesseraError::Overflow(format!("-({v})"))),
                    (UnaryOp::Negate, Value::Decimal(v)) => Ok(Value::Decimal(-v)),
                    (_, other) => Err(TesseraError::invalid_value(
                        "BOOLEAN or numeric operand",
                        format!("{other:?}"),
                    )),
                }
            }),
        ))
    }
}
