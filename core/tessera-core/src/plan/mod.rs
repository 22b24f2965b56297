//! 바인딩된 물리 플랜
//!
//! 파서/바인더/옵티마이저는 이 크레이트 밖에 있다. 여기서는 그들이 넘겨주는
//! 결과물의 모양만 정의한다: 모든 속성이 해석된 플랜 트리와 표현식 트리.

mod expression;
mod node;

pub use expression::{
    ArithmeticOp, BuiltinFunction, ComparisonOp, ConjunctionOp, Expr, ExpressionKind, UnaryOp,
    WhenClause,
};
pub use node::{
    AggregateKind, AggregateStrategy, AggregateTerm, Assignment, InsertSource, JoinType, PlanKind,
    PlanNode, ProjectTarget, ScanColumn, SortKey, aggregate_output_type,
};
