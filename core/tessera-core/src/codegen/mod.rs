//! Query compilation
//!
//! 플랜 트리를 push 기반 파이프라인으로 번역한다. 번역기는 생성 코드(클로저)를
//! 조립하고, 실행기는 파이프라인 단계를 의존 순서대로 워커 풀에서 돌린다.
//!
//! - [`compilation_context`]: prepare / produce / consume 구동
//! - [`operator`], [`expression`]: 노드별 번역기
//! - [`row_batch`]: 선택 벡터를 가진 배치와 행 캐시
//! - [`aggregation`]: 집계 저장 영역 상태 머신
//! - [`query`], [`execution`]: 컴파일 결과물과 워커 풀

pub mod aggregation;
pub mod code_gen;
pub mod compilation_context;
pub mod execution;
pub mod expression;
pub mod operator;
pub mod pipeline;
pub mod proxy;
pub mod query;
pub mod query_compiler;
pub mod query_state;
pub mod row_batch;
pub mod translator_factory;

pub use aggregation::Aggregation;
pub use code_gen::{CodeGen, CompiledExpr, WorkerScope};
pub use compilation_context::CompilationContext;
pub use execution::{ParallelizationPolicy, WorkerPool};
pub use pipeline::{ConsumerContext, Pipeline, PipelineId, TranslatorId};
pub use proxy::{Proxy, ProxyRegistry};
pub use query::{CompiledQuery, ExecutorContext, PipelineStep, QueryResult};
pub use query_compiler::QueryCompiler;
pub use query_state::{QueryState, RuntimeState, StateSlot};
pub use row_batch::{Row, RowBatch};
pub use translator_factory::TranslatorFactory;
