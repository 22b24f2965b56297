//! Logging utilities for Tessera
//!
//! tracing subscriber 초기화 헬퍼. 라이브러리 코드는 `tracing` 매크로만 사용하고,
//! subscriber 설치는 애플리케이션(또는 테스트)이 이 모듈로 결정한다.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter: compiler/pipeline events at info, everything else at warn
pub const DEFAULT_FILTER: &str = "warn,tessera_core=info";

/// Initialize logging with default settings
///
/// # Environment Variables
/// - `RUST_LOG` - Log level filter (default: [`DEFAULT_FILTER`])
///
/// # Example
/// ```rust
/// tessera_core::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    init_with_level(DEFAULT_FILTER)
}

/// Initialize logging with a specific level or filter directive
///
/// # Arguments
/// * `level` - Log level or directive (`debug`, `tessera_core::codegen=trace`, ...)
#[cfg(feature = "logging")]
pub fn init_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // 이미 설치된 subscriber가 있으면 조용히 무시
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .try_init();
}

/// Initialize logging for tests
///
/// Pipeline worker ids are only visible at trace level, so tests get `trace`
/// for the engine itself.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("warn,tessera_core=trace"))
        .with_test_writer()
        .try_init();
}

// Stub implementations when logging feature is disabled
#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_with_level(_level: &str) {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
