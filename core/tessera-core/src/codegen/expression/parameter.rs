use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::Expr;
use crate::types::SqlType;

/// `$n`: bound at execution time from the executor context
pub struct ParameterTranslator {
    index: usize,
    ty: SqlType,
}

impl ParameterTranslator {
    pub fn create(
        expr: &Expr,
        _ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Parameter { index, ty } = expr else {
            return Err(wrong_node("parameter", expr));
        };
        Ok(Box::new(Self {
            index: *index,
            ty: *ty,
        }))
    }
}

impl ExpressionTranslator for ParameterTranslator {
    fn result_type(&self) -> SqlType {
        self.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let (index, ty) = (self.index, self.ty);
        Ok(codegen.emit(
            ty,
            expr_fn(move |_, exec| exec.parameter(index)?.cast_to(ty)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval_with;
    use super::*;
    use crate::types::Value;

    #[test]
    fn parameters_are_read_and_cast() {
        let expr = Expr::parameter(1, SqlType::BigInt);
        let value = eval_with(&expr, &[], vec![Value::Null, Value::Integer(4)]).unwrap();
        assert_eq!(value, Value::BigInt(4));
        assert!(eval_with(&expr, &[], vec![Value::Integer(1)]).is_err());
    }
}
