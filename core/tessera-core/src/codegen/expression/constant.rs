use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::Expr;
use crate::types::{SqlType, Value};

pub struct ConstantTranslator {
    value: Value,
    ty: SqlType,
}

impl ConstantTranslator {
    pub fn create(
        expr: &Expr,
        _ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Constant { value, ty } = expr else {
            return Err(wrong_node("constant", expr));
        };
        Ok(Box::new(Self {
            value: value.clone(),
            ty: *ty,
        }))
    }
}

impl ExpressionTranslator for ConstantTranslator {
    fn result_type(&self) -> SqlType {
        self.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        codegen.constant(self.value.clone(), self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval_row;
    use super::*;

    #[test]
    fn constants_are_cast_to_their_type() {
        let expr = Expr::Constant {
            value: Value::Integer(7),
            ty: SqlType::BigInt,
        };
        assert_eq!(eval_row(&expr, &[]).unwrap(), Value::BigInt(7));
        assert_eq!(eval_row(&Expr::null(SqlType::Varchar), &[]).unwrap(), Value::Null);
    }
}
