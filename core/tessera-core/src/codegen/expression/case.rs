use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::TesseraResult;
use crate::plan::Expr;
use crate::types::{SqlType, Value};

/// Searched CASE: the first true WHEN wins, else the default (or NULL)
pub struct CaseTranslator {
    clauses: Vec<(CompiledExpr, CompiledExpr)>,
    default: Option<CompiledExpr>,
    ty: SqlType,
}

impl CaseTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Case { clauses, default } = expr else {
            return Err(wrong_node("case", expr));
        };
        let ty = expr.result_type()?;
        let clauses = clauses
            .iter()
            .map(|clause| {
                Ok((
                    ctx.compile_expression(&clause.condition)?,
                    ctx.compile_expression(&clause.result)?,
                ))
            })
            .collect::<TesseraResult<Vec<_>>>()?;
        let default = default
            .as_deref()
            .map(|expr| ctx.compile_expression(expr))
            .transpose()?;
        Ok(Box::new(Self {
            clauses,
            default,
            ty,
        }))
    }
}

impl ExpressionTranslator for CaseTranslator {
    fn result_type(&self) -> SqlType {
        self.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let ty = self.ty;
        let clauses = self.clauses.clone();
        let default = self.default.clone();
        Ok(codegen.emit(
            ty,
            expr_fn(move |row, exec| {
                for (condition, result) in &clauses {
                    if row.derive_value(condition, exec)?.is_true() {
                        return row.derive_value(result, exec)?.cast_to(ty);
                    }
                }
                match &default {
                    Some(default) => row.derive_value(default, exec)?.cast_to(ty),
                    None => Ok(Value::Null),
                }
            }),
        ))
    }
}
