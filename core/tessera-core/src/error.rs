//! Error types for the Tessera query engine.
//!
//! All public APIs return `TesseraResult<T>`; no panics in library code.
//!
//! 에러는 세 부류로 나뉜다:
//! - 컴파일(prepare/setup) 단계의 구성 오류: [`TesseraError::Unsupported`], [`TesseraError::Config`]
//! - 바인딩 결함: [`TesseraError::Binding`]
//! - 실행 중 데이터 오류: [`TesseraError::Overflow`], [`TesseraError::InvalidValue`], [`TesseraError::Execution`]

use thiserror::Error;

/// Unified error type for all Tessera operations.
#[derive(Debug, Error)]
pub enum TesseraError {
    /// Unsupported plan node, expression, aggregate or type combination
    #[error("not supported: {feature}\nHint: {hint}")]
    Unsupported { feature: String, hint: String },

    /// Invalid configuration or compile-time registration
    #[error("configuration error: {0}")]
    Config(String),

    /// Plan-time type check failure (expression or predicate typing)
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A value seen while running a query cannot be converted or combined
    #[error("invalid value: expected {expected}, got {actual}")]
    InvalidValue { expected: String, actual: String },

    /// Attribute derived without accessor or cached value
    #[error("binding error: {0}")]
    Binding(String),

    /// Checked arithmetic overflow at runtime
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// Query execution error
    #[error("execution error: {message}\nContext: {context}")]
    Execution { message: String, context: String },

    /// Runtime state slot missing or holding a different type
    #[error("state slot '{name}': {reason}")]
    StateSlot { name: String, reason: String },

    /// Storage layer error (tile groups, row locations)
    #[error("storage error: {0}")]
    Storage(String),

    /// Apache Arrow error (RecordBatch operations)
    #[error("arrow error: {source}")]
    Arrow {
        #[from]
        source: arrow::error::ArrowError,
    },

    /// Standard I/O error
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid arguments
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Worker pool construction failed
    #[error("thread pool error: {0}")]
    ThreadPool(String),
}

/// Result type alias for all Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

impl TesseraError {
    /// Helper to build an [`TesseraError::Unsupported`]
    pub fn unsupported(feature: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
            hint: hint.into(),
        }
    }

    /// Helper to build an [`TesseraError::Execution`]
    pub fn execution(message: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Helper to build a [`TesseraError::TypeMismatch`]
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Helper to build an [`TesseraError::InvalidValue`]
    pub fn invalid_value(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidValue {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// 컴파일 단계에서 발생하는 에러인지 여부 (실행 전에 보고됨)
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. } | Self::Config(_) | Self::TypeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(err: serde_json::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}
