//! # Tessera: Push-based Query Compilation Engine
//!
//! Tessera는 인메모리 관계형 데이터베이스의 쿼리 컴파일 엔진입니다.
//! 바인딩된 물리 플랜 트리를 produce/consume 번역기로 파이프라인 단위의
//! 생성 코드로 바꾸고, 워커 풀에서 벡터 단위로 실행합니다.
//!
//! ## 주요 특징
//!
//! - **Push 기반 파이프라인**: 블로킹 연산자(group-by, order-by, join 빌드)가 파이프라인 경계
//! - **벡터화 배치**: 선택 벡터 + 행 캐시, `vector_size` 단위 순회
//! - **런타임 자료구조**: open-addressing 해시 테이블, 병렬 정렬기, 집계 상태 머신
//! - **병렬 실행**: rayon 워커 풀, 스레드 로컬 상태를 단계 종료 시 병합
//! - **Apache Arrow**: 타일 그룹 저장과 결과 `RecordBatch` 변환
//!
//! ## 빠른 시작
//!
//! ```rust
//! use tessera_core::plan::{AggregateKind, AggregateStrategy, AggregateTerm, Expr, PlanNode};
//! use tessera_core::storage::{ColumnDef, DataTable, TableSchema};
//! use tessera_core::transaction::TransactionManager;
//! use tessera_core::types::{AttributeInfo, SqlType, Value};
//! use tessera_core::{EngineConfig, QueryCompiler, WorkerPool};
//!
//! # fn main() -> tessera_core::TesseraResult<()> {
//! let table = DataTable::new(
//!     "orders",
//!     TableSchema::new(vec![
//!         ColumnDef::new("customer", SqlType::Integer),
//!         ColumnDef::new("amount", SqlType::BigInt),
//!     ]),
//!     1024,
//! );
//! let txns = TransactionManager::new();
//! let writer = txns.begin();
//! table.insert_rows(
//!     &writer,
//!     &[
//!         vec![Value::Integer(1), Value::BigInt(10)],
//!         vec![Value::Integer(2), Value::BigInt(5)],
//!         vec![Value::Integer(1), Value::BigInt(7)],
//!     ],
//! )?;
//! txns.end(&writer);
//!
//! // SELECT customer, SUM(amount) FROM orders GROUP BY customer
//! let (scan, columns) = PlanNode::scan_all(&table, 0);
//! let plan = PlanNode::Aggregate {
//!     input: Box::new(scan),
//!     group_by: vec![columns[0].clone()],
//!     aggregates: vec![AggregateTerm::new(
//!         AggregateKind::Sum,
//!         Expr::column(&columns[1]),
//!         AttributeInfo::named(10, "total", SqlType::BigInt),
//!     )],
//!     strategy: AggregateStrategy::Hash,
//!     having: None,
//! };
//!
//! let query = QueryCompiler::new(EngineConfig::default()).compile(&plan)?;
//! let pool = WorkerPool::new_auto()?;
//! let result = query.run(&txns.begin(), vec![], &pool)?;
//! assert_eq!(result.num_rows(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## 실행 흐름
//!
//! ```text
//! PlanNode → QueryCompiler → CompilationContext (prepare → produce → consume)
//!          → CompiledQuery { initialize_state → execute_plan → tear_down_state }
//!          → QueryResult → RecordBatch
//! ```
//!
//! ## 모듈 구조
//!
//! - [`codegen`]: 컴파일 컨텍스트, 번역기, 배치, 실행기
//! - [`runtime`]: 해시 테이블, 정렬기, 스토리지 바인딩
//! - [`plan`]: 바인딩된 플랜 / 식 트리
//! - [`storage`]: 인메모리 타일 그룹 테이블
//! - [`transaction`]: MVCC 타임스탬프와 가시성
//! - [`types`]: SQL 타입과 값

pub mod codegen;
pub mod config;
pub mod error;
pub mod plan;
pub mod runtime;
pub mod storage;
pub mod transaction;
pub mod types;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use codegen::{CompiledQuery, ParallelizationPolicy, QueryCompiler, QueryResult, WorkerPool};
pub use config::EngineConfig;
pub use error::{TesseraError, TesseraResult};
