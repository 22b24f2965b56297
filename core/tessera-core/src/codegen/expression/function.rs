//! Built-in scalar functions. NULL in any argument yields NULL.

use super::{ExpressionTranslator, wrong_node};
use crate::codegen::code_gen::{CodeGen, CompiledExpr, expr_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{BuiltinFunction, Expr};
use crate::types::{SqlType, Value};
use smallvec::SmallVec;

pub struct FunctionTranslator {
    func: BuiltinFunction,
    args: Vec<CompiledExpr>,
    ty: SqlType,
}

impl FunctionTranslator {
    pub fn create(
        expr: &Expr,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Box<dyn ExpressionTranslator>> {
        let Expr::Function { func, args } = expr else {
            return Err(wrong_node("function", expr));
        };
        let ty = expr.result_type()?;
        let args = args
            .iter()
            .map(|arg| ctx.compile_expression(arg))
            .collect::<TesseraResult<Vec<_>>>()?;
        Ok(Box::new(Self {
            func: *func,
            args,
            ty,
        }))
    }
}

impl ExpressionTranslator for FunctionTranslator {
    fn result_type(&self) -> SqlType {
        self.ty
    }

    fn derive_value(&self, codegen: &mut CodeGen) -> TesseraResult<CompiledExpr> {
        let func = self.func;
        let args = self.args.clone();
        Ok(codegen.emit(
            self.ty,
            expr_fn(move |row, exec| {
                let mut values: SmallVec<[Value; 3]> = SmallVec::with_capacity(args.len());
                for arg in &args {
                    let value = row.derive_value(arg, exec)?;
                    if value.is_null() {
                        return Ok(Value::Null);
                    }
                    values.push(value);
                }
                call(func, &values)
            }),
        ))
    }
}

fn bad_argument(func: BuiltinFunction, value: &Value) -> TesseraError {
    TesseraError::invalid_value(
        format!("valid {} argument", func.name()),
        format!("{value:?}"),
    )
}

fn float_arg(func: BuiltinFunction, value: &Value) -> TesseraResult<f64> {
    value.as_f64().ok_or_else(|| bad_argument(func, value))
}

fn str_arg(func: BuiltinFunction, value: &Value) -> TesseraResult<&str> {
    value.as_str().ok_or_else(|| bad_argument(func, value))
}

fn call(func: BuiltinFunction, args: &[Value]) -> TesseraResult<Value> {
    let first = args.first().ok_or_else(|| {
        TesseraError::InvalidArguments(format!("{} called without arguments", func.name()))
    })?;
    match func {
        BuiltinFunction::Abs => match first {
            Value::Integer(v) => v
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| TesseraError::Overflow(format!("ABS({v})"))),
            Value::BigInt(v) => v
                .checked_abs()
                .map(Value::BigInt)
                .ok_or_else(|| TesseraError::Overflow(format!("ABS({v})"))),
            Value::Decimal(v) => Ok(Value::Decimal(v.abs())),
            other => Err(bad_argument(func, other)),
        },
        BuiltinFunction::Ceil => Ok(Value::Decimal(float_arg(func, first)?.ceil())),
        BuiltinFunction::Floor => Ok(Value::Decimal(float_arg(func, first)?.floor())),
        BuiltinFunction::Round => Ok(Value::Decimal(float_arg(func, first)?.round())),
        BuiltinFunction::Sqrt => {
            let v = float_arg(func, first)?;
            // 음수의 제곱근은 NULL
            Ok(if v < 0.0 { Value::Null } else { Value::Decimal(v.sqrt()) })
        }
        BuiltinFunction::Upper => Ok(Value::varchar(str_arg(func, first)?.to_uppercase())),
        BuiltinFunction::Lower => Ok(Value::varchar(str_arg(func, first)?.to_lowercase())),
        BuiltinFunction::Trim => Ok(Value::varchar(str_arg(func, first)?.trim())),
        BuiltinFunction::Length => {
            let len = str_arg(func, first)?.chars().count();
            i32::try_from(len)
                .map(Value::Integer)
                .map_err(|_| TesseraError::Overflow(format!("LENGTH of {len} characters")))
        }
        BuiltinFunction::Concat => {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::Varchar(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Ok(Value::varchar(out))
        }
        BuiltinFunction::Substring => {
            let s = str_arg(func, first)?;
            let from = args
                .get(1)
                .and_then(Value::as_i64)
                .ok_or_else(|| bad_argument(func, first))?;
            let len = match args.get(2) {
                Some(v) => Some(v.as_i64().ok_or_else(|| bad_argument(func, v))?),
                None => None,
            };
            Ok(Value::varchar(substring(s, from, len)))
        }
    }
}

/// SQL `SUBSTRING(s FROM from [FOR len])` with 1-based character positions
fn substring(s: &str, from: i64, len: Option<i64>) -> String {
    let end = match len {
        Some(len) if len < 0 => return String::new(),
        Some(len) => from.saturating_add(len),
        None => i64::MAX,
    };
    let start = from.max(1);
    if end <= start {
        return String::new();
    }
    let skip = usize::try_from(start - 1).unwrap_or(usize::MAX);
    let take = usize::try_from(end - start).unwrap_or(usize::MAX);
    s.chars().skip(skip).take(take).collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::eval_row;
    use super::*;

    fn f(func: BuiltinFunction, args: Vec<Expr>) -> Value {
        eval_row(&Expr::function(func, args), &[]).unwrap()
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(f(BuiltinFunction::Abs, vec![Expr::constant(-3)]), Value::Integer(3));
        assert_eq!(f(BuiltinFunction::Ceil, vec![Expr::constant(1.2)]), Value::Decimal(2.0));
        assert_eq!(f(BuiltinFunction::Floor, vec![Expr::constant(-1.2)]), Value::Decimal(-2.0));
        assert_eq!(f(BuiltinFunction::Round, vec![Expr::constant(2)]), Value::Decimal(2.0));
        assert_eq!(f(BuiltinFunction::Sqrt, vec![Expr::constant(9)]), Value::Decimal(3.0));
        assert_eq!(f(BuiltinFunction::Sqrt, vec![Expr::constant(-1.0)]), Value::Null);
    }

    #[test]
    fn string_functions() {
        assert_eq!(f(BuiltinFunction::Upper, vec![Expr::constant("abc")]), Value::varchar("ABC"));
        assert_eq!(f(BuiltinFunction::Trim, vec![Expr::constant("  x ")]), Value::varchar("x"));
        assert_eq!(f(BuiltinFunction::Length, vec![Expr::constant("héllo")]), Value::Integer(5));
        assert_eq!(
            f(BuiltinFunction::Concat, vec![Expr::constant("a"), Expr::constant(1)]),
            Value::varchar("a1")
        );
        assert_eq!(
            f(
                BuiltinFunction::Substring,
                vec![Expr::constant("database"), Expr::constant(5), Expr::constant(4)]
            ),
            Value::varchar("base")
        );
        assert_eq!(
            f(BuiltinFunction::Substring, vec![Expr::constant("abc"), Expr::constant(0)]),
            Value::varchar("abc")
        );
    }

    #[test]
    fn null_argument_yields_null() {
        assert_eq!(
            f(BuiltinFunction::Concat, vec![Expr::constant("a"), Expr::null(SqlType::Varchar)]),
            Value::Null
        );
    }

    #[test]
    fn wrong_argument_types_fail_to_compile() {
        let expr = Expr::function(BuiltinFunction::Upper, vec![Expr::constant(1)]);
        assert!(eval_row(&expr, &[]).unwrap_err().is_compile_error());
    }
}
