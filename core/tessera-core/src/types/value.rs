//! SQL 타입과 스칼라 값
//!
//! [`Value`]는 생성된 코드가 주고받는 유일한 스칼라 표현이다. NULL은 명시적 variant이며,
//! 정렬 시 항상 가장 앞에 온다.

use crate::error::{TesseraError, TesseraResult};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int32Builder, Int64Builder,
    StringBuilder,
};
use arrow::datatypes::{DataType, Float64Type, Int32Type, Int64Type};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Semantic SQL type of an attribute or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlType {
    Boolean,
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    BigInt,
    /// Double-precision decimal
    Decimal,
    Varchar,
}

impl SqlType {
    pub fn name(self) -> &'static str {
        match self {
            SqlType::Boolean => "BOOLEAN",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Decimal => "DECIMAL",
            SqlType::Varchar => "VARCHAR",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt | SqlType::Decimal)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Result type of a binary arithmetic operation over two numeric types.
    ///
    /// Returns `None` when either side is not numeric.
    pub fn promote(left: SqlType, right: SqlType) -> Option<SqlType> {
        if !left.is_numeric() || !right.is_numeric() {
            return None;
        }
        Some(match (left, right) {
            (SqlType::Decimal, _) | (_, SqlType::Decimal) => SqlType::Decimal,
            (SqlType::BigInt, _) | (_, SqlType::BigInt) => SqlType::BigInt,
            _ => SqlType::Integer,
        })
    }

    /// Whether values of the two types can be compared with each other
    pub fn is_comparable_with(self, other: SqlType) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }

    pub fn to_arrow(self) -> DataType {
        match self {
            SqlType::Boolean => DataType::Boolean,
            SqlType::Integer => DataType::Int32,
            SqlType::BigInt => DataType::Int64,
            SqlType::Decimal => DataType::Float64,
            SqlType::Varchar => DataType::Utf8,
        }
    }

    pub fn from_arrow(data_type: &DataType) -> TesseraResult<Self> {
        match data_type {
            DataType::Boolean => Ok(SqlType::Boolean),
            DataType::Int32 => Ok(SqlType::Integer),
            DataType::Int64 => Ok(SqlType::BigInt),
            DataType::Float64 => Ok(SqlType::Decimal),
            DataType::Utf8 => Ok(SqlType::Varchar),
            dt => Err(TesseraError::type_mismatch(
                "Boolean|Int32|Int64|Float64|Utf8",
                format!("{dt:?}"),
            )),
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single SQL scalar
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Integer(i32),
    BigInt(i64),
    Decimal(f64),
    Varchar(Arc<str>),
}

impl Value {
    pub fn varchar(s: impl AsRef<str>) -> Self {
        Value::Varchar(Arc::from(s.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL type of a non-null value
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(SqlType::Boolean),
            Value::Integer(_) => Some(SqlType::Integer),
            Value::BigInt(_) => Some(SqlType::BigInt),
            Value::Decimal(_) => Some(SqlType::Decimal),
            Value::Varchar(_) => Some(SqlType::Varchar),
        }
    }

    /// SQL truthiness: only `TRUE` passes a predicate, NULL does not
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to `target`, keeping NULL as NULL.
    ///
    /// Narrowing BIGINT → INTEGER is checked and fails with [`TesseraError::Overflow`].
    pub fn cast_to(&self, target: SqlType) -> TesseraResult<Value> {
        if self.sql_type() == Some(target) || self.is_null() {
            return Ok(self.clone());
        }
        let converted = match (self, target) {
            (Value::Integer(v), SqlType::BigInt) => Some(Value::BigInt(i64::from(*v))),
            (Value::Integer(v), SqlType::Decimal) => Some(Value::Decimal(f64::from(*v))),
            (Value::BigInt(v), SqlType::Integer) => {
                let narrowed = i32::try_from(*v)
                    .map_err(|_| TesseraError::Overflow(format!("{v} does not fit INTEGER")))?;
                Some(Value::Integer(narrowed))
            }
            (Value::BigInt(v), SqlType::Decimal) => Some(Value::Decimal(*v as f64)),
            (Value::Boolean(b), SqlType::Integer) => Some(Value::Integer(i32::from(*b))),
            (Value::Boolean(b), SqlType::BigInt) => Some(Value::BigInt(i64::from(*b))),
            (v, SqlType::Varchar) => Some(Value::varchar(v.to_string())),
            (Value::Varchar(s), SqlType::Integer) => s.trim().parse().ok().map(Value::Integer),
            (Value::Varchar(s), SqlType::BigInt) => s.trim().parse().ok().map(Value::BigInt),
            (Value::Varchar(s), SqlType::Decimal) => s.trim().parse().ok().map(Value::Decimal),
            _ => None,
        };
        converted.ok_or_else(|| TesseraError::invalid_value(target.name(), self.type_name()))
    }

    fn type_name(&self) -> &'static str {
        self.sql_type().map_or("NULL", SqlType::name)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::BigInt(_) | Value::Decimal(_) => 2,
            Value::Varchar(_) => 3,
        }
    }

    /// Three-way comparison used by sort keys and MIN/MAX.
    ///
    /// NULL sorts first; numeric variants compare by value across widths.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => normalize_zero(*a).total_cmp(&normalize_zero(*b)),
            (Value::Decimal(f), _) if other.rank() == 2 => {
                compare_int_float(other.as_i64().unwrap_or(0), *f).reverse()
            }
            (_, Value::Decimal(f)) if self.rank() == 2 => {
                compare_int_float(self.as_i64().unwrap_or(0), *f)
            }
            _ if self.rank() == 2 && other.rank() == 2 => {
                let (a, b) = (self.as_i64().unwrap_or(0), other.as_i64().unwrap_or(0));
                a.cmp(&b)
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// Equality under SQL semantics: `None` when either side is NULL
    pub fn sql_eq(&self, other: &Value) -> Option<bool> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(self.compare(other) == Ordering::Equal)
    }

    /// Read the value at `idx` out of an arrow column
    pub fn from_array(array: &ArrayRef, idx: usize) -> TesseraResult<Self> {
        if array.is_null(idx) {
            return Ok(Value::Null);
        }
        match array.data_type() {
            DataType::Int32 => Ok(Value::Integer(array.as_primitive::<Int32Type>().value(idx))),
            DataType::Int64 => Ok(Value::BigInt(array.as_primitive::<Int64Type>().value(idx))),
            DataType::Float64 => Ok(Value::Decimal(
                array.as_primitive::<Float64Type>().value(idx),
            )),
            DataType::Boolean => Ok(Value::Boolean(array.as_boolean().value(idx))),
            DataType::Utf8 => Ok(Value::varchar(array.as_string::<i32>().value(idx))),
            dt => Err(TesseraError::invalid_value(
                "Int32|Int64|Float64|Boolean|Utf8",
                format!("{dt:?}"),
            )),
        }
    }
}

/// Build an arrow column of `ty` from a sequence of values.
///
/// Each non-null value is cast to `ty` first.
pub fn build_array<'v>(
    ty: SqlType,
    values: impl ExactSizeIterator<Item = &'v Value>,
) -> TesseraResult<ArrayRef> {
    let len = values.len();
    let array: ArrayRef = match ty {
        SqlType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(len);
            for v in values {
                builder.append_option(v.cast_to(ty)?.as_bool());
            }
            Arc::new(builder.finish())
        }
        SqlType::Integer => {
            let mut builder = Int32Builder::with_capacity(len);
            for v in values {
                match v.cast_to(ty)? {
                    Value::Integer(i) => builder.append_value(i),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        SqlType::BigInt => {
            let mut builder = Int64Builder::with_capacity(len);
            for v in values {
                builder.append_option(v.cast_to(ty)?.as_i64());
            }
            Arc::new(builder.finish())
        }
        SqlType::Decimal => {
            let mut builder = Float64Builder::with_capacity(len);
            for v in values {
                builder.append_option(v.cast_to(ty)?.as_f64());
            }
            Arc::new(builder.finish())
        }
        SqlType::Varchar => {
            let mut builder = StringBuilder::with_capacity(len, len * 8);
            for v in values {
                builder.append_option(v.cast_to(ty)?.as_str());
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

// 해시 테이블 키로 쓰이므로 Eq/Hash는 구조적이다: NULL == NULL,
// 정수 폭은 무시하고, DECIMAL은 비트 패턴(-0.0 정규화)으로 비교한다.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => normalize_bits(*a) == normalize_bits(*b),
            (Value::Varchar(a), Value::Varchar(b)) => a == b,
            _ => match (self.as_i64(), other.as_i64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Integer(v) => i64::from(*v).hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Decimal(v) => normalize_bits(*v).hash(state),
            Value::Varchar(s) => s.hash(state),
        }
    }
}

fn normalize_bits(v: f64) -> u64 {
    normalize_zero(v).to_bits()
}

/// -0.0 과 0.0 을 같은 값으로 취급
fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// 정수와 실수를 f64 변환 없이 비교 (2^53 이상에서도 정확)
fn compare_int_float(i: i64, f: f64) -> Ordering {
    // i64 범위: [-2^63, 2^63)
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    if f.is_nan() {
        return (i as f64).total_cmp(&f);
    }
    if f >= BOUND {
        return Ordering::Less;
    }
    if f < -BOUND {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal if f > whole => Ordering::Less,
        Ordering::Equal if f < whole => Ordering::Greater,
        ord => ord,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Varchar(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::varchar(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(Arc::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
