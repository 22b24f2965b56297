//! 바인딩된 물리 플랜 노드

use super::Expr;
use crate::storage::DataTable;
use crate::types::{AttributeInfo, SqlType};
use std::sync::Arc;

/// One table column read by a scan, with the attribute it produces
#[derive(Debug, Clone)]
pub struct ScanColumn {
    pub column: usize,
    pub attribute: AttributeInfo,
}

impl ScanColumn {
    pub fn new(column: usize, attribute: AttributeInfo) -> Self {
        Self { column, attribute }
    }
}

/// Projection target: `expr AS output`
#[derive(Debug, Clone)]
pub struct ProjectTarget {
    pub output: AttributeInfo,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    CountStar,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateKind {
    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::CountStar => "COUNT(*)",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Avg => "AVG",
        }
    }
}

/// One aggregate of an aggregation node
#[derive(Debug, Clone)]
pub struct AggregateTerm {
    pub kind: AggregateKind,
    /// Aggregated expression; `None` only for `COUNT(*)`
    pub input: Option<Expr>,
    pub distinct: bool,
    pub output: AttributeInfo,
}

impl AggregateTerm {
    pub fn new(kind: AggregateKind, input: Expr, output: AttributeInfo) -> Self {
        Self {
            kind,
            input: Some(input),
            distinct: false,
            output,
        }
    }

    pub fn count_star(output: AttributeInfo) -> Self {
        Self {
            kind: AggregateKind::CountStar,
            input: None,
            distinct: false,
            output,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }
}

/// Physical aggregation strategy chosen by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateStrategy {
    Hash,
    Sort,
    /// No GROUP BY: one global group
    Plain,
}

/// Join semantics; `Left` keeps every row of the left (probe) side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub attribute: AttributeInfo,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(attribute: &AttributeInfo) -> Self {
        Self {
            attribute: attribute.clone(),
            descending: false,
        }
    }

    pub fn desc(attribute: &AttributeInfo) -> Self {
        Self {
            attribute: attribute.clone(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum InsertSource {
    /// Literal tuples, one expression per table column
    Values(Vec<Vec<Expr>>),
    /// Child plan whose output attributes are in table column order
    Select(Box<PlanNode>),
}

/// `SET column = expr`
#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: usize,
    pub expr: Expr,
}

/// Tag used by the translator factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKind {
    SeqScan,
    Filter,
    Projection,
    HashAggregate,
    SortAggregate,
    GlobalAggregate,
    HashJoin,
    NestedLoopJoin,
    OrderBy,
    Limit,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table: Arc<DataTable>,
        columns: Vec<ScanColumn>,
        predicate: Option<Expr>,
    },
    Filter {
        input: Box<PlanNode>,
        predicate: Expr,
    },
    Projection {
        input: Box<PlanNode>,
        targets: Vec<ProjectTarget>,
    },
    Aggregate {
        input: Box<PlanNode>,
        group_by: Vec<AttributeInfo>,
        aggregates: Vec<AggregateTerm>,
        strategy: AggregateStrategy,
        /// Evaluated over group keys and aggregate outputs
        having: Option<Expr>,
    },
    /// `right` is built into a hash table, `left` probes it
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        join_type: JoinType,
        predicate: Option<Expr>,
    },
    /// `right` is buffered, every `left` row is matched against all of it
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        join_type: JoinType,
        predicate: Option<Expr>,
    },
    OrderBy {
        input: Box<PlanNode>,
        sort_keys: Vec<SortKey>,
        output: Vec<AttributeInfo>,
        /// Top-K: keep only the first `limit` rows
        limit: Option<usize>,
    },
    Limit {
        input: Box<PlanNode>,
        offset: usize,
        count: usize,
    },
    Insert {
        table: Arc<DataTable>,
        source: InsertSource,
    },
    /// `input` must produce rows scanned from `table`
    Update {
        table: Arc<DataTable>,
        input: Box<PlanNode>,
        assignments: Vec<Assignment>,
    },
    Delete {
        table: Arc<DataTable>,
        input: Box<PlanNode>,
    },
}

impl PlanNode {
    /// Scan every column of `table`, numbering attributes from `first_id`
    pub fn scan_all(table: &Arc<DataTable>, first_id: u32) -> (PlanNode, Vec<AttributeInfo>) {
        let attributes: Vec<AttributeInfo> = table
            .schema()
            .columns()
            .iter()
            .zip(first_id..)
            .map(|(def, id)| {
                let attr = AttributeInfo::named(id, &def.name, def.ty);
                if def.nullable { attr } else { attr.not_null() }
            })
            .collect();
        let columns = attributes
            .iter()
            .enumerate()
            .map(|(column, attr)| ScanColumn::new(column, attr.clone()))
            .collect();
        let plan = PlanNode::SeqScan {
            table: Arc::clone(table),
            columns,
            predicate: None,
        };
        (plan, attributes)
    }

    pub fn kind(&self) -> PlanKind {
        match self {
            PlanNode::SeqScan { .. } => PlanKind::SeqScan,
            PlanNode::Filter { .. } => PlanKind::Filter,
            PlanNode::Projection { .. } => PlanKind::Projection,
            PlanNode::Aggregate {
                group_by, strategy, ..
            } => match strategy {
                _ if group_by.is_empty() => PlanKind::GlobalAggregate,
                AggregateStrategy::Plain => PlanKind::GlobalAggregate,
                AggregateStrategy::Hash => PlanKind::HashAggregate,
                AggregateStrategy::Sort => PlanKind::SortAggregate,
            },
            PlanNode::HashJoin { .. } => PlanKind::HashJoin,
            PlanNode::NestedLoopJoin { .. } => PlanKind::NestedLoopJoin,
            PlanNode::OrderBy { .. } => PlanKind::OrderBy,
            PlanNode::Limit { .. } => PlanKind::Limit,
            PlanNode::Insert { .. } => PlanKind::Insert,
            PlanNode::Update { .. } => PlanKind::Update,
            PlanNode::Delete { .. } => PlanKind::Delete,
        }
    }

    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::SeqScan { .. } => Vec::new(),
            PlanNode::Insert { source, .. } => match source {
                InsertSource::Values(_) => Vec::new(),
                InsertSource::Select(child) => vec![child.as_ref()],
            },
            PlanNode::Filter { input, .. }
            | PlanNode::Projection { input, .. }
            | PlanNode::Aggregate { input, .. }
            | PlanNode::OrderBy { input, .. }
            | PlanNode::Limit { input, .. }
            | PlanNode::Update { input, .. }
            | PlanNode::Delete { input, .. } => vec![input.as_ref()],
            PlanNode::HashJoin { left, right, .. } | PlanNode::NestedLoopJoin { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
        }
    }

    /// Attributes visible to the parent, in output order
    pub fn output_attributes(&self) -> Vec<AttributeInfo> {
        match self {
            PlanNode::SeqScan { columns, .. } => {
                columns.iter().map(|c| c.attribute.clone()).collect()
            }
            PlanNode::Filter { input, .. } | PlanNode::Limit { input, .. } => {
                input.output_attributes()
            }
            PlanNode::Projection { targets, .. } => {
                targets.iter().map(|t| t.output.clone()).collect()
            }
            PlanNode::Aggregate {
                group_by,
                aggregates,
                ..
            } => group_by
                .iter()
                .cloned()
                .chain(aggregates.iter().map(|a| a.output.clone()))
                .collect(),
            PlanNode::HashJoin {
                left,
                right,
                join_type,
                ..
            }
            | PlanNode::NestedLoopJoin {
                left,
                right,
                join_type,
                ..
            } => {
                let mut out = left.output_attributes();
                out.extend(right.output_attributes().into_iter().map(|mut attr| {
                    if *join_type == JoinType::Left {
                        attr.nullable = true;
                    }
                    attr
                }));
                out
            }
            PlanNode::OrderBy { output, .. } => output.clone(),
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. } => {
                Vec::new()
            }
        }
    }

    /// Whether this node modifies a table
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. }
        )
    }
}

/// Output type of an aggregate given its input type
pub fn aggregate_output_type(kind: AggregateKind, input: Option<SqlType>) -> Option<SqlType> {
    match (kind, input) {
        (AggregateKind::Count | AggregateKind::CountStar, _) => Some(SqlType::BigInt),
        (AggregateKind::Sum, Some(ty)) if ty.is_integral() => Some(SqlType::BigInt),
        (AggregateKind::Sum, Some(SqlType::Decimal)) => Some(SqlType::Decimal),
        (AggregateKind::Min | AggregateKind::Max, Some(ty)) => Some(ty),
        (AggregateKind::Avg, Some(ty)) if ty.is_numeric() => Some(SqlType::Decimal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ColumnDef, TableSchema};

    fn table() -> Arc<DataTable> {
        DataTable::new(
            "t",
            TableSchema::new(vec![
                ColumnDef::new("a", SqlType::Integer).not_null(),
                ColumnDef::new("b", SqlType::Varchar),
            ]),
            16,
        )
    }

    #[test]
    fn scan_all_numbers_attributes() {
        let (plan, attrs) = PlanNode::scan_all(&table(), 10);
        assert_eq!(plan.kind(), PlanKind::SeqScan);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].id.0, 11);
        assert!(!attrs[0].nullable);
        assert_eq!(plan.output_attributes(), attrs);
    }

    #[test]
    fn aggregate_without_keys_is_global() {
        let (scan, attrs) = PlanNode::scan_all(&table(), 0);
        let plan = PlanNode::Aggregate {
            input: Box::new(scan),
            group_by: vec![],
            aggregates: vec![AggregateTerm::new(
                AggregateKind::Sum,
                Expr::column(&attrs[0]),
                AttributeInfo::new(5, SqlType::BigInt),
            )],
            strategy: AggregateStrategy::Hash,
            having: None,
        };
        assert_eq!(plan.kind(), PlanKind::GlobalAggregate);
        assert_eq!(plan.output_attributes().len(), 1);
    }

    #[test]
    fn left_join_makes_right_side_nullable() {
        let (l, _) = PlanNode::scan_all(&table(), 0);
        let (r, _) = PlanNode::scan_all(&table(), 2);
        let plan = PlanNode::NestedLoopJoin {
            left: Box::new(l),
            right: Box::new(r),
            join_type: JoinType::Left,
            predicate: None,
        };
        let out = plan.output_attributes();
        assert_eq!(out.len(), 4);
        assert!(!out[0].nullable);
        assert!(out[2].nullable);
    }

    #[test]
    fn aggregate_output_types() {
        assert_eq!(
            aggregate_output_type(AggregateKind::Sum, Some(SqlType::Integer)),
            Some(SqlType::BigInt)
        );
        assert_eq!(
            aggregate_output_type(AggregateKind::Avg, Some(SqlType::Varchar)),
            None
        );
        assert_eq!(
            aggregate_output_type(AggregateKind::CountStar, None),
            Some(SqlType::BigInt)
        );
    }
}
