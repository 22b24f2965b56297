//! Query compiler
//!
//! 바인딩된 플랜 → [`CompiledQuery`]. 설정 검증 후 컴파일 컨텍스트를 돌리고
//! 결과 요약을 로그로 남긴다. 컴파일러 자체는 상태가 없어 여러 플랜에 재사용된다.

use super::compilation_context::CompilationContext;
use super::query::CompiledQuery;
use super::translator_factory::TranslatorFactory;
use crate::config::EngineConfig;
use crate::error::TesseraResult;
use crate::plan::PlanNode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct QueryCompiler {
    config: Arc<EngineConfig>,
    factory: TranslatorFactory,
}

impl QueryCompiler {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_factory(config, TranslatorFactory::default())
    }

    /// Compiler using a custom set of translators
    pub fn with_factory(config: EngineConfig, factory: TranslatorFactory) -> Self {
        Self {
            config: Arc::new(config),
            factory,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &TranslatorFactory {
        &self.factory
    }

    #[instrument(skip_all, fields(plan = ?plan.kind()))]
    pub fn compile(&self, plan: &PlanNode) -> TesseraResult<CompiledQuery> {
        self.config.validate()?;
        let start = Instant::now();
        let query = CompilationContext::generate_plan(plan, Arc::clone(&self.config), self.factory.clone())?;
        info!(
            steps = query.steps().len(),
            parallel_steps = query.steps().iter().filter(|s| s.is_parallel()).count(),
            columns = query.output_attributes().len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "query compiled"
        );
        Ok(query)
    }
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TesseraError;
    use crate::plan::{Expr, PlanKind};
    use crate::storage::{ColumnDef, DataTable, TableSchema};
    use crate::types::SqlType;

    fn table() -> Arc<DataTable> {
        DataTable::new(
            "t",
            TableSchema::new(vec![ColumnDef::new("a", SqlType::Integer)]),
            8,
        )
    }

    #[test]
    fn invalid_config_is_rejected_before_compiling() {
        let compiler = QueryCompiler::new(EngineConfig::default().with_vector_size(0));
        let (plan, _) = PlanNode::scan_all(&table(), 0);
        assert!(matches!(compiler.compile(&plan), Err(TesseraError::Config(_))));
    }

    #[test]
    fn non_boolean_filter_is_a_compile_error() {
        let (scan, attrs) = PlanNode::scan_all(&table(), 0);
        let plan = PlanNode::Filter {
            input: Box::new(scan),
            predicate: Expr::column(&attrs[0]),
        };
        let err = QueryCompiler::default().compile(&plan).unwrap_err();
        assert!(err.is_compile_error());
    }

    #[test]
    fn custom_factory_limits_supported_plans() {
        let mut factory = TranslatorFactory::default();
        factory.unregister_operator(PlanKind::Filter);
        let compiler = QueryCompiler::with_factory(EngineConfig::default(), factory);
        let (scan, attrs) = PlanNode::scan_all(&table(), 0);
        assert!(compiler.compile(&scan).is_ok());
        let plan = PlanNode::Filter {
            input: Box::new(scan),
            predicate: Expr::is_null(Expr::column(&attrs[0])),
        };
        assert!(matches!(
            compiler.compile(&plan),
            Err(TesseraError::Unsupported { .. })
        ));
    }
}
