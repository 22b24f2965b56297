//! 논리 컬럼 식별자

use super::SqlType;
use std::fmt;
use std::sync::Arc;

/// Ordinal identity of a logical column, unique within one bound plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(pub u32);

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Resolved logical column: semantic type, ordinal id, optional name, nullability.
///
/// Plan nodes own these; translators keep copies of the [`AttributeId`] only.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub id: AttributeId,
    pub ty: SqlType,
    pub nullable: bool,
    pub name: Option<Arc<str>>,
}

impl AttributeInfo {
    pub fn new(id: u32, ty: SqlType) -> Self {
        Self {
            id: AttributeId(id),
            ty,
            nullable: true,
            name: None,
        }
    }

    pub fn named(id: u32, name: &str, ty: SqlType) -> Self {
        Self::new(id, ty).with_name(name)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(Arc::from(name));
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Display label: name when present, otherwise the ordinal id
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => self.id.to_string(),
        }
    }
}
