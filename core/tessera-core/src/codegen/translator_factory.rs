//! Translator factory
//!
//! 플랜 노드 종류 / 식 종류 → 번역기 생성자 매핑. 등록되지 않은 종류는
//! 컴파일 시점에 `Unsupported` 오류가 된다.

use super::expression::{
    ArithmeticTranslator, CaseTranslator, ColumnRefTranslator, ComparisonTranslator,
    ConjunctionTranslator, ConstantTranslator, ExpressionCtor, FunctionTranslator,
    NullCheckTranslator, ParameterTranslator, UnaryTranslator,
};
use super::operator::{
    DeleteTranslator, FilterTranslator, GlobalGroupByTranslator, HashGroupByTranslator,
    HashJoinTranslator, InsertTranslator, LimitTranslator, NestedLoopJoinTranslator,
    OperatorCtor, OrderByTranslator, ProjectionTranslator, SortGroupByTranslator,
    TableScanTranslator, UpdateTranslator,
};
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{ExpressionKind, PlanKind};
use ahash::AHashMap;

#[derive(Clone)]
pub struct TranslatorFactory {
    /// 플랜 종류별 연산자 생성자
    operators: AHashMap<PlanKind, OperatorCtor>,

    /// 식 종류별 생성자
    expressions: AHashMap<ExpressionKind, ExpressionCtor>,
}

impl std::fmt::Debug for TranslatorFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorFactory")
            .field("operators", &self.operators.len())
            .field("expressions", &self.expressions.len())
            .finish()
    }
}

impl TranslatorFactory {
    /// 빈 팩토리 생성
    pub fn empty() -> Self {
        Self {
            operators: AHashMap::new(),
            expressions: AHashMap::new(),
        }
    }

    /// 기본 제공 번역기가 모두 등록된 팩토리
    pub fn with_builtin() -> Self {
        let mut factory = Self::empty();

        factory.register_operator(PlanKind::SeqScan, TableScanTranslator::create);
        factory.register_operator(PlanKind::Filter, FilterTranslator::create);
        factory.register_operator(PlanKind::Projection, ProjectionTranslator::create);
        factory.register_operator(PlanKind::HashAggregate, HashGroupByTranslator::create);
        factory.register_operator(PlanKind::SortAggregate, SortGroupByTranslator::create);
        factory.register_operator(PlanKind::GlobalAggregate, GlobalGroupByTranslator::create);
        factory.register_operator(PlanKind::HashJoin, HashJoinTranslator::create);
        factory.register_operator(PlanKind::NestedLoopJoin, NestedLoopJoinTranslator::create);
        factory.register_operator(PlanKind::OrderBy, OrderByTranslator::create);
        factory.register_operator(PlanKind::Limit, LimitTranslator::create);
        factory.register_operator(PlanKind::Insert, InsertTranslator::create);
        factory.register_operator(PlanKind::Update, UpdateTranslator::create);
        factory.register_operator(PlanKind::Delete, DeleteTranslator::create);

        factory.register_expression(ExpressionKind::Constant, ConstantTranslator::create);
        factory.register_expression(ExpressionKind::ColumnRef, ColumnRefTranslator::create);
        factory.register_expression(ExpressionKind::Parameter, ParameterTranslator::create);
        factory.register_expression(ExpressionKind::Arithmetic, ArithmeticTranslator::create);
        factory.register_expression(ExpressionKind::Comparison, ComparisonTranslator::create);
        factory.register_expression(ExpressionKind::Conjunction, ConjunctionTranslator::create);
        factory.register_expression(ExpressionKind::Unary, UnaryTranslator::create);
        factory.register_expression(ExpressionKind::Case, CaseTranslator::create);
        factory.register_expression(ExpressionKind::Function, FunctionTranslator::create);
        factory.register_expression(ExpressionKind::NullCheck, NullCheckTranslator::create);

        factory
    }

    /// 연산자 생성자 등록 (기존 등록을 덮어씀)
    pub fn register_operator(&mut self, kind: PlanKind, ctor: OperatorCtor) {
        self.operators.insert(kind, ctor);
    }

    /// 식 생성자 등록 (기존 등록을 덮어씀)
    pub fn register_expression(&mut self, kind: ExpressionKind, ctor: ExpressionCtor) {
        self.expressions.insert(kind, ctor);
    }

    pub fn unregister_operator(&mut self, kind: PlanKind) -> Option<OperatorCtor> {
        self.operators.remove(&kind)
    }

    pub fn unregister_expression(&mut self, kind: ExpressionKind) -> Option<ExpressionCtor> {
        self.expressions.remove(&kind)
    }

    pub fn supports_operator(&self, kind: PlanKind) -> bool {
        self.operators.contains_key(&kind)
    }

    pub fn supports_expression(&self, kind: ExpressionKind) -> bool {
        self.expressions.contains_key(&kind)
    }

    pub fn operator(&self, kind: PlanKind) -> TesseraResult<OperatorCtor> {
        self.operators.get(&kind).copied().ok_or_else(|| {
            TesseraError::unsupported(format!("plan node {kind:?}"), "no operator translator registered")
        })
    }

    pub fn expression(&self, kind: ExpressionKind) -> TesseraResult<ExpressionCtor> {
        self.expressions.get(&kind).copied().ok_or_else(|| {
            TesseraError::unsupported(format!("expression {kind:?}"), "no expression translator registered")
        })
    }
}

impl Default for TranslatorFactory {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_covers_every_kind() {
        let factory = TranslatorFactory::default();
        for kind in [
            PlanKind::SeqScan,
            PlanKind::Filter,
            PlanKind::Projection,
            PlanKind::HashAggregate,
            PlanKind::SortAggregate,
            PlanKind::GlobalAggregate,
            PlanKind::HashJoin,
            PlanKind::NestedLoopJoin,
            PlanKind::OrderBy,
            PlanKind::Limit,
            PlanKind::Insert,
            PlanKind::Update,
            PlanKind::Delete,
        ] {
            assert!(factory.supports_operator(kind), "{kind:?}");
        }
        assert!(factory.supports_expression(ExpressionKind::Case));
    }

    #[test]
    fn missing_kind_is_unsupported() {
        let mut factory = TranslatorFactory::default();
        assert!(factory.unregister_operator(PlanKind::Limit).is_some());
        let err = factory.operator(PlanKind::Limit).err().unwrap();
        assert!(matches!(err, TesseraError::Unsupported { .. }));
        assert!(err.is_compile_error());

        let empty = TranslatorFactory::empty();
        assert!(empty.expression(ExpressionKind::Constant).is_err());
    }
}
