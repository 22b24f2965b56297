use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::Expr;
use crate::types::{SqlType, Value};

/// `IS [NOT] NULL`, never NULL itself
pub struct NullCheckTranslator {
    operand: CompiledExpr,
    negated: bool,
}

impl NullCheckTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::NullCheck { operand, negated } = expr else {
            return Err(wrong_node("null check", expr));
        };
        Ok(Box::new(Self {
            operand: ctx.compile_expression(operand)?,
            negated: *negated,
        }))
    }
}

impl ExpressionTranslator for NullCheckTranslator {
    fn result_type(&self) -> SqlType {
        SqlType::Boolean
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let operand = self.operand.clone();
        let negated = self.negated;
        Ok(codegen.emit(
            SqlType::Boolean,
            expr_fn(move |row, exec| {
                let is_null = row.derive_value(&operand, exec)?.is_null();
                Ok(Value::Boolean(is_null != negated))
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval_row;
    use super::*;
    use crate::types::AttributeInfo;

    #[test]
    fn null_checks() {
        let a = AttributeInfo::new(0, SqlType::Integer);
        let null_row = [(a.clone(), Value::Null)];
        let value_row = [(a.clone(), Value::Integer(1))];
        let is_null = Expr::is_null(Expr::column(&a));
        let is_not_null = Expr::is_not_null(Expr::column(&a));
        assert_eq!(eval_row(&is_null, &null_row).unwrap(), Value::Boolean(true));
        assert_eq!(eval_row(&is_null, &value_row).unwrap(), Value::Boolean(false));
        assert_eq!(eval_row(&is_not_null, &null_row).unwrap(), Value::Boolean(false));
        assert_eq!(eval_row(&is_not_null, &value_row).unwrap(), Value::Boolean(true));
    }
}
