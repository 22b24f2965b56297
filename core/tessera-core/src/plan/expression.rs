//! 바인딩된 표현식 트리
//!
//! 모든 컬럼 참조는 이미 [`AttributeInfo`]로 해석되어 있다. 타입 유도는
//! [`Expr::result_type`]에서 한 번 수행되며, 실패는 컴파일 단계 에러다.

use crate::error::{TesseraError, TesseraResult};
use crate::types::{AttributeId, AttributeInfo, SqlType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConjunctionOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Built-in scalar functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFunction {
    Abs,
    Ceil,
    Floor,
    Round,
    Sqrt,
    Upper,
    Lower,
    Length,
    Trim,
    Concat,
    Substring,
}

impl BuiltinFunction {
    pub fn name(self) -> &'static str {
        match self {
            BuiltinFunction::Abs => "ABS",
            BuiltinFunction::Ceil => "CEIL",
            BuiltinFunction::Floor => "FLOOR",
            BuiltinFunction::Round => "ROUND",
            BuiltinFunction::Sqrt => "SQRT",
            BuiltinFunction::Upper => "UPPER",
            BuiltinFunction::Lower => "LOWER",
            BuiltinFunction::Length => "LENGTH",
            BuiltinFunction::Trim => "TRIM",
            BuiltinFunction::Concat => "CONCAT",
            BuiltinFunction::Substring => "SUBSTRING",
        }
    }

    /// Return type for the given argument types
    pub fn return_type(self, args: &[SqlType]) -> TesseraResult<SqlType> {
        let arity_error = |expected: &str| {
            TesseraError::unsupported(
                format!("{} with {} argument(s)", self.name(), args.len()),
                format!("{} takes {expected}", self.name()),
            )
        };
        match self {
            BuiltinFunction::Abs => match args {
                [t] if t.is_numeric() => Ok(*t),
                [t] => Err(TesseraError::type_mismatch("numeric", t.name())),
                _ => Err(arity_error("one argument")),
            },
            BuiltinFunction::Ceil
            | BuiltinFunction::Floor
            | BuiltinFunction::Round
            | BuiltinFunction::Sqrt => match args {
                [t] if t.is_numeric() => Ok(SqlType::Decimal),
                [t] => Err(TesseraError::type_mismatch("numeric", t.name())),
                _ => Err(arity_error("one argument")),
            },
            BuiltinFunction::Upper | BuiltinFunction::Lower | BuiltinFunction::Trim => {
                match args {
                    [SqlType::Varchar] => Ok(SqlType::Varchar),
                    [t] => Err(TesseraError::type_mismatch("VARCHAR", t.name())),
                    _ => Err(arity_error("one argument")),
                }
            }
            BuiltinFunction::Length => match args {
                [SqlType::Varchar] => Ok(SqlType::Integer),
                [t] => Err(TesseraError::type_mismatch("VARCHAR", t.name())),
                _ => Err(arity_error("one argument")),
            },
            BuiltinFunction::Concat if args.len() >= 2 => Ok(SqlType::Varchar),
            BuiltinFunction::Concat => Err(arity_error("at least two arguments")),
            BuiltinFunction::Substring => match args {
                [SqlType::Varchar, from] | [SqlType::Varchar, from, _]
                    if from.is_integral() && args[2..].iter().all(|t| t.is_integral()) =>
                {
                    Ok(SqlType::Varchar)
                }
                [_, _] | [_, _, _] => Err(TesseraError::type_mismatch(
                    "(VARCHAR, integer[, integer])",
                    format!("{args:?}"),
                )),
                _ => Err(arity_error("two or three arguments")),
            },
        }
    }
}

/// Tag used by the translator factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    Constant,
    ColumnRef,
    Parameter,
    Arithmetic,
    Comparison,
    Conjunction,
    Unary,
    Case,
    Function,
    NullCheck,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenClause {
    pub condition: Expr,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant {
        value: Value,
        ty: SqlType,
    },
    ColumnRef(AttributeInfo),
    /// Positional query parameter (`$1` is index 0)
    Parameter {
        index: usize,
        ty: SqlType,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conjunction {
        op: ConjunctionOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Case {
        clauses: Vec<WhenClause>,
        default: Option<Box<Expr>>,
    },
    Function {
        func: BuiltinFunction,
        args: Vec<Expr>,
    },
    /// `IS NULL` / `IS NOT NULL`
    NullCheck {
        operand: Box<Expr>,
        negated: bool,
    },
}

impl Expr {
    /// Typed constant; the type of a NULL literal must be given with [`Expr::null`]
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        let ty = value.sql_type().unwrap_or(SqlType::Integer);
        Expr::Constant { value, ty }
    }

    pub fn null(ty: SqlType) -> Self {
        Expr::Constant {
            value: Value::Null,
            ty,
        }
    }

    pub fn column(attr: &AttributeInfo) -> Self {
        Expr::ColumnRef(attr.clone())
    }

    pub fn parameter(index: usize, ty: SqlType) -> Self {
        Expr::Parameter { index, ty }
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expr, right: Expr) -> Self {
        Expr::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Self::arithmetic(ArithmeticOp::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::arithmetic(ArithmeticOp::Sub, left, right)
    }

    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::arithmetic(ArithmeticOp::Mul, left, right)
    }

    pub fn div(left: Expr, right: Expr) -> Self {
        Self::arithmetic(ArithmeticOp::Div, left, right)
    }

    pub fn compare(op: ComparisonOp, left: Expr, right: Expr) -> Self {
        Expr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equal(left: Expr, right: Expr) -> Self {
        Self::compare(ComparisonOp::Eq, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Self::compare(ComparisonOp::Lt, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Self::compare(ComparisonOp::Gt, left, right)
    }

    pub fn gt_eq(left: Expr, right: Expr) -> Self {
        Self::compare(ComparisonOp::GtEq, left, right)
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::Conjunction {
            op: ConjunctionOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Conjunction {
            op: ConjunctionOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn negate(operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Negate,
            operand: Box::new(operand),
        }
    }

    pub fn is_null(operand: Expr) -> Self {
        Expr::NullCheck {
            operand: Box::new(operand),
            negated: false,
        }
    }

    pub fn is_not_null(operand: Expr) -> Self {
        Expr::NullCheck {
            operand: Box::new(operand),
            negated: true,
        }
    }

    pub fn function(func: BuiltinFunction, args: Vec<Expr>) -> Self {
        Expr::Function { func, args }
    }

    pub fn case(clauses: Vec<(Expr, Expr)>, default: Option<Expr>) -> Self {
        Expr::Case {
            clauses: clauses
                .into_iter()
                .map(|(condition, result)| WhenClause { condition, result })
                .collect(),
            default: default.map(Box::new),
        }
    }

    pub fn kind(&self) -> ExpressionKind {
        match self {
            Expr::Constant { .. } => ExpressionKind::Constant,
            Expr::ColumnRef(_) => ExpressionKind::ColumnRef,
            Expr::Parameter { .. } => ExpressionKind::Parameter,
            Expr::Arithmetic { .. } => ExpressionKind::Arithmetic,
            Expr::Comparison { .. } => ExpressionKind::Comparison,
            Expr::Conjunction { .. } => ExpressionKind::Conjunction,
            Expr::Unary { .. } => ExpressionKind::Unary,
            Expr::Case { .. } => ExpressionKind::Case,
            Expr::Function { .. } => ExpressionKind::Function,
            Expr::NullCheck { .. } => ExpressionKind::NullCheck,
        }
    }

    /// Derive the result type, rejecting invalid type combinations
    pub fn result_type(&self) -> TesseraResult<SqlType> {
        match self {
            Expr::Constant { ty, .. } | Expr::Parameter { ty, .. } => Ok(*ty),
            Expr::ColumnRef(attr) => Ok(attr.ty),
            Expr::Arithmetic { op, left, right } => {
                let (l, r) = (left.result_type()?, right.result_type()?);
                SqlType::promote(l, r).ok_or_else(|| {
                    TesseraError::unsupported(
                        format!("{l} {} {r}", op.symbol()),
                        "arithmetic needs numeric operands",
                    )
                })
            }
            Expr::Comparison { left, right, .. } => {
                let (l, r) = (left.result_type()?, right.result_type()?);
                if !l.is_comparable_with(r) {
                    return Err(TesseraError::unsupported(
                        format!("comparison between {l} and {r}"),
                        "cast one side first",
                    ));
                }
                Ok(SqlType::Boolean)
            }
            Expr::Conjunction { left, right, .. } => {
                expect_boolean(left)?;
                expect_boolean(right)?;
                Ok(SqlType::Boolean)
            }
            Expr::Unary { op, operand } => {
                let ty = operand.result_type()?;
                match op {
                    UnaryOp::Not if ty == SqlType::Boolean => Ok(ty),
                    UnaryOp::Negate if ty.is_numeric() => Ok(ty),
                    UnaryOp::Not => Err(TesseraError::type_mismatch("BOOLEAN", ty.name())),
                    UnaryOp::Negate => Err(TesseraError::type_mismatch("numeric", ty.name())),
                }
            }
            Expr::Case { clauses, default } => {
                let mut result: Option<SqlType> = None;
                let results = clauses
                    .iter()
                    .map(|c| &c.result)
                    .chain(default.as_deref());
                for clause in clauses {
                    expect_boolean(&clause.condition)?;
                }
                for expr in results {
                    let ty = expr.result_type()?;
                    result = Some(match result {
                        None => ty,
                        Some(prev) if prev == ty => prev,
                        Some(prev) => SqlType::promote(prev, ty).ok_or_else(|| {
                            TesseraError::unsupported(
                                format!("CASE branches of {prev} and {ty}"),
                                "all branches must share a type",
                            )
                        })?,
                    });
                }
                result.ok_or_else(|| {
                    TesseraError::unsupported("CASE without branches", "add a WHEN clause")
                })
            }
            Expr::Function { func, args } => {
                let types = args
                    .iter()
                    .map(Expr::result_type)
                    .collect::<TesseraResult<Vec<_>>>()?;
                func.return_type(&types)
            }
            Expr::NullCheck { operand, .. } => {
                operand.result_type()?;
                Ok(SqlType::Boolean)
            }
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant { .. } | Expr::ColumnRef(_) | Expr::Parameter { .. } => Vec::new(),
            Expr::Arithmetic { left, right, .. }
            | Expr::Comparison { left, right, .. }
            | Expr::Conjunction { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Unary { operand, .. } | Expr::NullCheck { operand, .. } => vec![operand.as_ref()],
            Expr::Case { clauses, default } => clauses
                .iter()
                .flat_map(|c| [&c.condition, &c.result])
                .chain(default.as_deref())
                .collect(),
            Expr::Function { args, .. } => args.iter().collect(),
        }
    }

    /// Every attribute this expression reads, in first-seen order
    pub fn referenced_attributes(&self) -> Vec<AttributeId> {
        let mut out = Vec::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes(&self, out: &mut Vec<AttributeId>) {
        if let Expr::ColumnRef(attr) = self {
            if !out.contains(&attr.id) {
                out.push(attr.id);
            }
        }
        for child in self.children() {
            child.collect_attributes(out);
        }
    }
}

fn expect_boolean(expr: &Expr) -> TesseraResult<()> {
    match expr.result_type()? {
        SqlType::Boolean => Ok(()),
        other => Err(TesseraError::type_mismatch("BOOLEAN", other.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_promotes() {
        let a = AttributeInfo::new(0, SqlType::Integer);
        let expr = Expr::add(Expr::column(&a), Expr::constant(2.5));
        assert_eq!(expr.result_type().unwrap(), SqlType::Decimal);
    }

    #[test]
    fn arithmetic_on_varchar_is_unsupported() {
        let s = AttributeInfo::new(0, SqlType::Varchar);
        let expr = Expr::mul(Expr::column(&s), Expr::constant(2));
        assert!(expr.result_type().unwrap_err().is_compile_error());
    }

    #[test]
    fn conjunction_needs_booleans() {
        let expr = Expr::and(Expr::constant(true), Expr::constant(1));
        assert!(matches!(
            expr.result_type(),
            Err(TesseraError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn case_branch_types_unify() {
        let expr = Expr::case(
            vec![(Expr::constant(true), Expr::constant(1))],
            Some(Expr::constant(2i64)),
        );
        assert_eq!(expr.result_type().unwrap(), SqlType::BigInt);
    }

    #[test]
    fn substring_signature() {
        let ok = BuiltinFunction::Substring
            .return_type(&[SqlType::Varchar, SqlType::Integer, SqlType::Integer]);
        assert_eq!(ok.unwrap(), SqlType::Varchar);
        assert!(
            BuiltinFunction::Substring
                .return_type(&[SqlType::Integer, SqlType::Integer])
                .is_err()
        );
    }

    #[test]
    fn referenced_attributes_dedup() {
        let a = AttributeInfo::new(3, SqlType::Integer);
        let b = AttributeInfo::new(1, SqlType::Integer);
        let expr = Expr::and(
            Expr::gt(Expr::column(&a), Expr::column(&b)),
            Expr::is_not_null(Expr::column(&a)),
        );
        assert_eq!(
            expr.referenced_attributes(),
            vec![AttributeId(3), AttributeId(1)]
        );
    }
}
