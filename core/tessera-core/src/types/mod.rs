//! 타입 시스템: SQL 타입, 스칼라 값, 속성 식별자

mod attribute;
mod value;

pub use attribute::{AttributeId, AttributeInfo};
pub use value::{SqlType, Value, build_array};
