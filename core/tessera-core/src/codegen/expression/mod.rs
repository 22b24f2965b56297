//! Expression translators
//!
//! 식 노드 하나당 번역기 하나. 생성자는 자식 식을 먼저 컴파일하고
//! (`CompilationContext::compile_expression`, 노드별로 메모이즈됨),
//! `derive_value`가 행 하나를 평가하는 [`CompiledExpr`]를 만든다.
//! 자식 값은 항상 `Row::derive_value`로 읽으므로 행마다 최대 한 번만 계산된다.

mod arithmetic;
mod case;
mod column_ref;
mod comparison;
mod conjunction;
mod constant;
mod function;
mod null_check;
mod parameter;
mod unary;

pub use arithmetic::ArithmeticTranslator;
pub use case::CaseTranslator;
pub use column_ref::ColumnRefTranslator;
pub use comparison::ComparisonTranslator;
pub use conjunction::ConjunctionTranslator;
pub use constant::ConstantTranslator;
pub use function::FunctionTranslator;
pub use null_check::NullCheckTranslator;
pub use parameter::ParameterTranslator;
pub use unary::UnaryTranslator;

use super::code_gen::{CodeGen, CompiledExpr};
use super::compilation_context::CompilationContext;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::Expr;
use crate::types::SqlType;

pub trait ExpressionTranslator {
    fn result_type(&self) -> SqlType;

    /// Emit the evaluation body
    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr>;
}

/// Factory entry for one [`crate::plan::ExpressionKind`]
pub type ExpressionCtor =
    fn(&Expr, &mut CompilationContext) -> TesseraResult<Box<dyn ExpressionTranslator>>;

pub(crate) fn wrong_node(translator: &str, expr: &Expr) -> TesseraError {
    TesseraError::Config(format!(
        "{translator} translator handed a {:?} expression",
        expr.kind()
    ))
}
