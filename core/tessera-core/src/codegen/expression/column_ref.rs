use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::Expr;
use crate::types::{AttributeInfo, SqlType};

/// Reads an attribute through the row (cache, then batch accessor)
pub struct ColumnRefTranslator {
    attribute: AttributeInfo,
}

impl ColumnRefTranslator {
    pub fn create(
        expr: &Expr,
        _ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::ColumnRef(attribute) = expr else {
            return Err(wrong_node("column ref", expr));
        };
        Ok(Box::new(Self {
            attribute: attribute.clone(),
        }))
    }
}

impl ExpressionTranslator for ColumnRefTranslator {
    fn result_type(&self) -> SqlType {
        self.attribute.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let attr = self.attribute.id;
        Ok(codegen.emit(self.attribute.ty, expr_fn(move |row, _| row.value(attr))))
    }
}
