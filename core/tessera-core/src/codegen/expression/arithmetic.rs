//! `+ - * / %` over numeric operands.
//!
//! 두 피연산자를 승격된 타입으로 캐스팅한 뒤 계산한다. 정수 연산은 검사되며
//! 범위를 넘으면 Overflow 오류, 0으로 나누기/나머지는 NULL.

use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{ArithmeticOp, Expr};
use crate::types::{SqlType, Value};

pub struct ArithmeticTranslator {
    op: ArithmeticOp,
    left: CompiledExpr,
    right: CompiledExpr,
    ty: SqlType,
}

impl ArithmeticTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Arithmetic { op, left, right } = expr else {
            return Err(wrong_node("arithmetic", expr));
        };
        let ty = expr.result_type()?;
        Ok(Box::new(Self {
            op: *op,
            left: ctx.compile_expression(left)?,
            right: ctx.compile_expression(right)?,
            ty,
        }))
    }
}

impl ExpressionTranslator for ArithmeticTranslator {
    fn result_type(&self) -> SqlType {
        self.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let (op, ty) = (self.op, self.ty);
        let (left, right) = (self.left.clone(), self.right.clone());
        Ok(codegen.emit(
            ty,
            expr_fn(move |row, exec| {
                let l = row.derive_value(&left, exec)?;
                let r = row.derive_value(&right, exec)?;
                if l.is_null() || r.is_null() {
                    return Ok(Value::Null);
                }
                apply(op, &l.cast_to(ty)?, &r.cast_to(ty)?)
            }),
        ))
    }
}

fn overflow(op: ArithmeticOp, l: &Value, r: &Value) -> TesseraError {
    TesseraError::Overflow(format!("{l} {} {r}", op.symbol()))
}

macro_rules! checked_integer {
    ($op:expr, $a:expr, $b:expr, $l:expr, $r:expr, $variant:path) => {{
        let (a, b) = ($a, $b);
        let result = match $op {
            ArithmeticOp::Add => a.checked_add(b),
            ArithmeticOp::Sub => a.checked_sub(b),
            ArithmeticOp::Mul => a.checked_mul(b),
            ArithmeticOp::Div if b == 0 => return Ok(Value::Null),
            ArithmeticOp::Div => a.checked_div(b),
            ArithmeticOp::Mod if b == 0 => return Ok(Value::Null),
            ArithmeticOp::Mod => a.checked_rem(b),
        };
        result.map($variant).ok_or_else(|| overflow($op, $l, $r))
    }};
}

/// Apply `op` to two non-null values of the same numeric type
pub(crate) fn apply(op: ArithmeticOp, l: &Value, r: &Value) -> TesseraResult<Value> {
    match (l, r) {
        (Value::Integer(a), Value::Integer(b)) => {
            checked_integer!(op, *a, *b, l, r, Value::Integer)
        }
        (Value::BigInt(a), Value::BigInt(b)) => checked_integer!(op, *a, *b, l, r, Value::BigInt),
        (Value::Decimal(a), Value::Decimal(b)) => {
            let (a, b) = (*a, *b);
            Ok(match op {
                ArithmeticOp::Add => Value::Decimal(a + b),
                ArithmeticOp::Sub => Value::Decimal(a - b),
                ArithmeticOp::Mul => Value::Decimal(a * b),
                ArithmeticOp::Div | ArithmeticOp::Mod if b == 0.0 => Value::Null,
                ArithmeticOp::Div => Value::Decimal(a / b),
                ArithmeticOp::Mod => Value::Decimal(a % b),
            })
        }
        _ => Err(TesseraError::invalid_value(
            "matching numeric operands",
            format!("{l:?} {} {r:?}", op.symbol()),
        )),
    }
}
