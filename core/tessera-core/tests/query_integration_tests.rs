// Query Integration Tests
//
// 종단 간 통합 테스트: 플랜 컴파일 → 워커 풀 실행 → 결과 / 테이블 상태 검증

use tessera_core::error::{TesseraError, TesseraResult};
use tessera_core::plan::{
    AggregateKind, AggregateStrategy, AggregateTerm, Assignment, Expr, InsertSource, JoinType,
    PlanNode, ProjectTarget, SortKey,
};
use tessera_core::storage::{ColumnDef, DataTable, TableSchema};
use tessera_core::transaction::{TransactionContext, TransactionManager};
use tessera_core::types::{AttributeInfo, SqlType, Value};
use tessera_core::{EngineConfig, QueryCompiler, WorkerPool};

use std::cmp::Ordering;
use std::sync::Arc;

// ─── Helpers ────────────────────────────────────────────

/// orders(customer INTEGER NOT NULL, amount BIGINT)
fn orders_table(tile_group_size: usize) -> Arc<DataTable> {
    DataTable::new(
        "orders",
        TableSchema::new(vec![
            ColumnDef::new("customer", SqlType::Integer).not_null(),
            ColumnDef::new("amount", SqlType::BigInt),
        ]),
        tile_group_size,
    )
}

fn customers_table() -> Arc<DataTable> {
    DataTable::new(
        "customers",
        TableSchema::new(vec![
            ColumnDef::new("id", SqlType::Integer).not_null(),
            ColumnDef::new("name", SqlType::Varchar),
        ]),
        4,
    )
}

fn load(txns: &TransactionManager, table: &DataTable, rows: Vec<Vec<Value>>) -> TransactionContext {
    let writer = txns.begin();
    table.insert_rows(&writer, &rows).unwrap();
    txns.end(&writer);
    writer
}

fn order(customer: i32, amount: i64) -> Vec<Value> {
    vec![Value::Integer(customer), Value::BigInt(amount)]
}

fn sample_orders() -> Vec<Vec<Value>> {
    vec![
        order(1, 10),
        order(2, 5),
        order(1, 7),
        order(3, 1),
        order(2, 5),
        vec![Value::Integer(3), Value::Null],
        order(1, 3),
    ]
}

fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.compare(y))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
    rows
}

fn run(plan: &PlanNode, txn: &TransactionContext) -> TesseraResult<Vec<Vec<Value>>> {
    tessera_core::logging::init_test();
    let query = QueryCompiler::new(EngineConfig::serial()).compile(plan)?;
    let pool = WorkerPool::new_fixed(1)?;
    Ok(query.run(txn, vec![], &pool)?.into_rows())
}

fn sum_by_customer(scan: PlanNode, attrs: &[AttributeInfo], strategy: AggregateStrategy) -> PlanNode {
    PlanNode::Aggregate {
        input: Box::new(scan),
        group_by: vec![attrs[0].clone()],
        aggregates: vec![
            AggregateTerm::new(
                AggregateKind::Sum,
                Expr::column(&attrs[1]),
                AttributeInfo::named(10, "total", SqlType::BigInt),
            ),
            AggregateTerm::count_star(AttributeInfo::named(11, "n", SqlType::BigInt)),
        ],
        strategy,
        having: None,
    }
}

// ═══════════════════════════════════════════════════════════
// Scan / Filter / Projection
// ═══════════════════════════════════════════════════════════

#[test]
fn test_scan_filter_project() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(3);
    load(&txns, &table, sample_orders());

    // SELECT customer, amount * 2 FROM orders WHERE amount > 4
    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Projection {
        input: Box::new(PlanNode::Filter {
            input: Box::new(scan),
            predicate: Expr::gt(Expr::column(&attrs[1]), Expr::constant(4i64)),
        }),
        targets: vec![
            ProjectTarget {
                output: attrs[0].clone(),
                expr: Expr::column(&attrs[0]),
            },
            ProjectTarget {
                output: AttributeInfo::named(5, "doubled", SqlType::BigInt),
                expr: Expr::mul(Expr::column(&attrs[1]), Expr::constant(2i64)),
            },
        ],
    };

    let rows = sorted(run(&plan, &txns.begin())?);
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::BigInt(14)],
            vec![Value::Integer(1), Value::BigInt(20)],
            vec![Value::Integer(2), Value::BigInt(10)],
            vec![Value::Integer(2), Value::BigInt(10)],
        ]
    );
    Ok(())
}

#[test]
fn test_parameter_binding() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(4);
    load(&txns, &table, sample_orders());

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Filter {
        input: Box::new(scan),
        predicate: Expr::equal(Expr::column(&attrs[0]), Expr::parameter(0, SqlType::Integer)),
    };
    let query = QueryCompiler::default().compile(&plan)?;
    let pool = WorkerPool::new_fixed(2)?;

    let txn = txns.begin();
    assert_eq!(query.run(&txn, vec![Value::Integer(1)], &pool)?.num_rows(), 3);
    assert_eq!(query.run(&txn, vec![Value::Integer(2)], &pool)?.num_rows(), 2);
    assert_eq!(query.run(&txn, vec![Value::Integer(9)], &pool)?.num_rows(), 0);
    Ok(())
}

/// 실행 중 오류는 콜백에 Err로 전달되고 행은 전달되지 않는다
#[test]
fn test_runtime_error_reaches_callback() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(4);
    load(&txns, &table, vec![order(i32::MAX, 1)]);

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Projection {
        input: Box::new(scan),
        targets: vec![ProjectTarget {
            output: AttributeInfo::new(5, SqlType::Integer),
            expr: Expr::add(Expr::column(&attrs[0]), Expr::constant(1i32)),
        }],
    };
    let query = QueryCompiler::default().compile(&plan)?;
    let pool = WorkerPool::new_fixed(1)?;

    let mut delivered = None;
    query.execute(&txns.begin(), vec![], &pool, |outcome| delivered = Some(outcome));
    assert!(matches!(delivered, Some(Err(TesseraError::Overflow(_)))));
    Ok(())
}

#[test]
fn test_unsupported_plan_fails_to_compile() {
    let table = orders_table(4);
    let (scan, _) = PlanNode::scan_all(&table, 0);
    // SUM over VARCHAR
    let plan = PlanNode::Aggregate {
        input: Box::new(PlanNode::Projection {
            input: Box::new(scan),
            targets: vec![ProjectTarget {
                output: AttributeInfo::new(5, SqlType::Varchar),
                expr: Expr::constant("x"),
            }],
        }),
        group_by: vec![],
        aggregates: vec![AggregateTerm::new(
            AggregateKind::Sum,
            Expr::column(&AttributeInfo::new(5, SqlType::Varchar)),
            AttributeInfo::new(6, SqlType::BigInt),
        )],
        strategy: AggregateStrategy::Plain,
        having: None,
    };
    let err = QueryCompiler::default().compile(&plan).unwrap_err();
    assert!(err.is_compile_error(), "{err}");
}

// ═══════════════════════════════════════════════════════════
// Aggregation
// ═══════════════════════════════════════════════════════════

#[test]
fn test_hash_group_by_sum_and_count() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(2);
    load(&txns, &table, sample_orders());

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = sum_by_customer(scan, &attrs, AggregateStrategy::Hash);
    let rows = sorted(run(&plan, &txns.begin())?);

    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::BigInt(20), Value::BigInt(3)],
            vec![Value::Integer(2), Value::BigInt(10), Value::BigInt(2)],
            // NULL은 SUM에서 무시되지만 COUNT(*)에는 포함
            vec![Value::Integer(3), Value::BigInt(1), Value::BigInt(2)],
        ]
    );
    Ok(())
}

#[test]
fn test_sort_and_hash_group_by_agree() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(5);
    let rows: Vec<Vec<Value>> = (0..200).map(|i| order(i % 13, i64::from(i * 3 % 17))).collect();
    load(&txns, &table, rows);
    let txn = txns.begin();

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let hash = sorted(run(&sum_by_customer(scan.clone(), &attrs, AggregateStrategy::Hash), &txn)?);
    let sort = run(&sum_by_customer(scan, &attrs, AggregateStrategy::Sort), &txn)?;

    assert_eq!(hash.len(), 13);
    // sort 전략은 키 순서로 그룹을 내보낸다
    assert_eq!(sort, hash);
    Ok(())
}

#[test]
fn test_group_by_avg_min_max_distinct() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(3);
    load(&txns, &table, sample_orders());

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    for strategy in [AggregateStrategy::Hash, AggregateStrategy::Sort] {
        let plan = PlanNode::Aggregate {
            input: Box::new(scan.clone()),
            group_by: vec![attrs[0].clone()],
            aggregates: vec![
                AggregateTerm::new(
                    AggregateKind::Avg,
                    Expr::column(&attrs[1]),
                    AttributeInfo::new(10, SqlType::Decimal),
                ),
                AggregateTerm::new(
                    AggregateKind::Min,
                    Expr::column(&attrs[1]),
                    AttributeInfo::new(11, SqlType::BigInt),
                ),
                AggregateTerm::new(
                    AggregateKind::Max,
                    Expr::column(&attrs[1]),
                    AttributeInfo::new(12, SqlType::BigInt),
                ),
                AggregateTerm::new(
                    AggregateKind::Count,
                    Expr::column(&attrs[1]),
                    AttributeInfo::new(13, SqlType::BigInt),
                )
                .distinct(),
            ],
            strategy,
            having: None,
        };
        let rows = sorted(run(&plan, &txns.begin())?);
        assert_eq!(rows.len(), 3, "{strategy:?}");

        let avg = rows[0][1].as_f64().unwrap();
        assert!((avg - 20.0 / 3.0).abs() < 1e-9);
        assert_eq!(rows[0][2], Value::BigInt(3));
        assert_eq!(rows[0][3], Value::BigInt(10));
        assert_eq!(rows[0][4], Value::BigInt(3));

        // 2번 고객: 5, 5 → DISTINCT 1
        assert_eq!(rows[1][4], Value::BigInt(1));
        // 3번 고객: 1, NULL → NULL 제외
        assert_eq!(rows[2][1].as_f64(), Some(1.0));
        assert_eq!(rows[2][4], Value::BigInt(1));
    }
    Ok(())
}

#[test]
fn test_having_filters_groups() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(4);
    load(&txns, &table, sample_orders());

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let total = AttributeInfo::named(10, "total", SqlType::BigInt);
    let plan = PlanNode::Aggregate {
        input: Box::new(scan),
        group_by: vec![attrs[0].clone()],
        aggregates: vec![AggregateTerm::new(
            AggregateKind::Sum,
            Expr::column(&attrs[1]),
            total.clone(),
        )],
        strategy: AggregateStrategy::Hash,
        having: Some(Expr::gt_eq(Expr::column(&total), Expr::constant(10i64))),
    };

    let rows = sorted(run(&plan, &txns.begin())?);
    assert_eq!(
        rows,
        vec![
            vec![Value::Integer(1), Value::BigInt(20)],
            vec![Value::Integer(2), Value::BigInt(10)],
        ]
    );
    Ok(())
}

#[test]
fn test_global_aggregate_on_empty_input() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(4);

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Aggregate {
        input: Box::new(scan),
        group_by: vec![],
        aggregates: vec![
            AggregateTerm::count_star(AttributeInfo::new(10, SqlType::BigInt)),
            AggregateTerm::new(
                AggregateKind::Sum,
                Expr::column(&attrs[1]),
                AttributeInfo::new(11, SqlType::BigInt),
            ),
        ],
        strategy: AggregateStrategy::Plain,
        having: None,
    };

    let rows = run(&plan, &txns.begin())?;
    assert_eq!(rows, vec![vec![Value::BigInt(0), Value::Null]]);
    Ok(())
}

fn sum_count_avg(scan: PlanNode, attrs: &[AttributeInfo], group_by: Vec<AttributeInfo>, strategy: AggregateStrategy) -> PlanNode {
    PlanNode::Aggregate {
        input: Box::new(scan),
        group_by,
        aggregates: vec![
            AggregateTerm::new(
                AggregateKind::Sum,
                Expr::column(&attrs[1]),
                AttributeInfo::new(10, SqlType::BigInt),
            ),
            AggregateTerm::new(
                AggregateKind::Count,
                Expr::column(&attrs[1]),
                AttributeInfo::new(11, SqlType::BigInt),
            ),
            AggregateTerm::new(
                AggregateKind::Avg,
                Expr::column(&attrs[1]),
                AttributeInfo::new(12, SqlType::Decimal),
            ),
        ],
        strategy,
        having: None,
    }
}

/// SUM / COUNT(col) / AVG 는 NULL 을 건너뛰고, 값이 없으면 NULL / 0 / NULL
#[test]
fn test_global_sum_count_avg() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(2);
    load(
        &txns,
        &table,
        vec![order(1, 10), vec![Value::Integer(1), Value::Null], order(2, 20)],
    );
    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let rows = run(&sum_count_avg(scan, &attrs, vec![], AggregateStrategy::Plain), &txns.begin())?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], Value::BigInt(30));
    assert_eq!(rows[0][1], Value::BigInt(2));
    assert_eq!(rows[0][2].as_f64(), Some(15.0));

    let nulls = orders_table(2);
    load(
        &txns,
        &nulls,
        vec![vec![Value::Integer(1), Value::Null], vec![Value::Integer(2), Value::Null]],
    );
    let (scan, attrs) = PlanNode::scan_all(&nulls, 0);
    let rows = run(&sum_count_avg(scan, &attrs, vec![], AggregateStrategy::Plain), &txns.begin())?;
    assert_eq!(rows, vec![vec![Value::Null, Value::BigInt(0), Value::Null]]);
    Ok(())
}

#[test]
fn test_hash_group_by_avg_with_null_group() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(2);
    load(
        &txns,
        &table,
        vec![
            order(1, 10),
            vec![Value::Integer(1), Value::Null],
            order(1, 20),
            vec![Value::Integer(2), Value::Null],
        ],
    );
    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = sum_count_avg(scan, &attrs, vec![attrs[0].clone()], AggregateStrategy::Hash);

    let rows = sorted(run(&plan, &txns.begin())?);
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][..3], &[Value::Integer(1), Value::BigInt(30), Value::BigInt(2)]);
    assert_eq!(rows[0][3].as_f64(), Some(15.0));
    assert_eq!(
        rows[1],
        vec![Value::Integer(2), Value::Null, Value::BigInt(0), Value::Null]
    );
    Ok(())
}

#[test]
fn test_parallel_matches_serial() -> TesseraResult<()> {
    tessera_core::logging::init_test();
    let txns = TransactionManager::new();
    let table = orders_table(16);
    let rows: Vec<Vec<Value>> = (0..2_000).map(|i| order(i % 37, i64::from(i))).collect();
    load(&txns, &table, rows);
    let txn = txns.begin();

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Filter {
        input: Box::new(scan),
        predicate: Expr::lt(Expr::column(&attrs[1]), Expr::constant(1_500i64)),
    };
    let plan = sum_by_customer(plan, &attrs, AggregateStrategy::Hash);

    let parallel = QueryCompiler::new(EngineConfig::default()).compile(&plan)?;
    assert!(parallel.steps().iter().any(|step| step.is_parallel()));
    let pool = WorkerPool::new_fixed(4)?;
    let parallel_rows = sorted(parallel.run(&txn, vec![], &pool)?.into_rows());

    assert_eq!(parallel_rows, sorted(run(&plan, &txn)?));
    let total: i64 = parallel_rows.iter().filter_map(|row| row[1].as_i64()).sum();
    assert_eq!(total, (0..1_500).sum::<i64>());
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Joins
// ═══════════════════════════════════════════════════════════

fn join_fixture() -> (TransactionManager, Arc<DataTable>, Arc<DataTable>) {
    let txns = TransactionManager::new();
    let customers = customers_table();
    let orders = orders_table(3);
    load(
        &txns,
        &customers,
        vec![
            vec![Value::Integer(1), Value::varchar("kim")],
            vec![Value::Integer(2), Value::varchar("lee")],
            vec![Value::Integer(4), Value::varchar("park")],
        ],
    );
    load(&txns, &orders, sample_orders());
    (txns, customers, orders)
}

#[test]
fn test_hash_join_inner_and_left() -> TesseraResult<()> {
    let (txns, customers, orders) = join_fixture();
    let (left, c) = PlanNode::scan_all(&customers, 0);
    let (right, o) = PlanNode::scan_all(&orders, 10);

    let join = |join_type| PlanNode::HashJoin {
        left: Box::new(left.clone()),
        right: Box::new(right.clone()),
        left_keys: vec![Expr::column(&c[0])],
        right_keys: vec![Expr::column(&o[0])],
        join_type,
        predicate: None,
    };

    let txn = txns.begin();
    let inner = run(&join(JoinType::Inner), &txn)?;
    // kim 3건 + lee 2건
    assert_eq!(inner.len(), 5);
    assert!(inner.iter().all(|row| row[0] == row[2]));

    let outer = sorted(run(&join(JoinType::Left), &txn)?);
    assert_eq!(outer.len(), 6);
    let unmatched = outer.last().unwrap();
    assert_eq!(unmatched[..2], [Value::Integer(4), Value::varchar("park")]);
    assert!(unmatched[2..].iter().all(Value::is_null));
    Ok(())
}

#[test]
fn test_hash_join_residual_predicate() -> TesseraResult<()> {
    let (txns, customers, orders) = join_fixture();
    let (left, c) = PlanNode::scan_all(&customers, 0);
    let (right, o) = PlanNode::scan_all(&orders, 10);

    let plan = PlanNode::HashJoin {
        left: Box::new(left),
        right: Box::new(right),
        left_keys: vec![Expr::column(&c[0])],
        right_keys: vec![Expr::column(&o[0])],
        join_type: JoinType::Inner,
        predicate: Some(Expr::gt(Expr::column(&o[1]), Expr::constant(6i64))),
    };
    let rows = sorted(run(&plan, &txns.begin())?);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][3], Value::BigInt(7));
    assert_eq!(rows[1][3], Value::BigInt(10));
    Ok(())
}

#[test]
fn test_nested_loop_join_matches_hash_join() -> TesseraResult<()> {
    let (txns, customers, orders) = join_fixture();
    let (left, c) = PlanNode::scan_all(&customers, 0);
    let (right, o) = PlanNode::scan_all(&orders, 10);
    let txn = txns.begin();

    for join_type in [JoinType::Inner, JoinType::Left] {
        let nlj = PlanNode::NestedLoopJoin {
            left: Box::new(left.clone()),
            right: Box::new(right.clone()),
            join_type,
            predicate: Some(Expr::equal(Expr::column(&c[0]), Expr::column(&o[0]))),
        };
        let hash = PlanNode::HashJoin {
            left: Box::new(left.clone()),
            right: Box::new(right.clone()),
            left_keys: vec![Expr::column(&c[0])],
            right_keys: vec![Expr::column(&o[0])],
            join_type,
            predicate: None,
        };
        assert_eq!(sorted(run(&nlj, &txn)?), sorted(run(&hash, &txn)?), "{join_type:?}");
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Order By / Limit
// ═══════════════════════════════════════════════════════════

#[test]
fn test_order_by_and_top_k() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(2);
    load(&txns, &table, sample_orders());
    let txn = txns.begin();

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let order_by = |limit| PlanNode::OrderBy {
        input: Box::new(scan.clone()),
        sort_keys: vec![SortKey::desc(&attrs[1]), SortKey::asc(&attrs[0])],
        output: attrs.clone(),
        limit,
    };

    let all = run(&order_by(None), &txn)?;
    let amounts: Vec<Value> = all.iter().map(|row| row[1].clone()).collect();
    // DESC에서 NULL은 맨 뒤
    assert_eq!(
        amounts,
        vec![
            Value::BigInt(10),
            Value::BigInt(7),
            Value::BigInt(5),
            Value::BigInt(5),
            Value::BigInt(3),
            Value::BigInt(1),
            Value::Null,
        ]
    );

    let top = run(&order_by(Some(3)), &txn)?;
    assert_eq!(top, all[..3].to_vec());
    Ok(())
}

#[test]
fn test_limit_offset() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(2);
    load(&txns, &table, sample_orders());

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Limit {
        input: Box::new(PlanNode::OrderBy {
            input: Box::new(scan),
            sort_keys: vec![SortKey::asc(&attrs[1])],
            output: attrs.clone(),
            limit: None,
        }),
        offset: 2,
        count: 3,
    };
    let rows = run(&plan, &txns.begin())?;
    let amounts: Vec<Value> = rows.iter().map(|row| row[1].clone()).collect();
    assert_eq!(amounts, vec![Value::BigInt(3), Value::BigInt(5), Value::BigInt(5)]);

    let (scan, _) = PlanNode::scan_all(&table, 0);
    let zero = PlanNode::Limit {
        input: Box::new(scan),
        offset: 0,
        count: 0,
    };
    assert!(run(&zero, &txns.begin())?.is_empty());
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Mutations
// ═══════════════════════════════════════════════════════════

#[test]
fn test_insert_values_and_select() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(4);
    let copy = orders_table(4);
    let pool = WorkerPool::new_fixed(2)?;
    let compiler = QueryCompiler::default();

    let insert = PlanNode::Insert {
        table: Arc::clone(&table),
        source: InsertSource::Values(vec![
            vec![Expr::constant(1i32), Expr::constant(100i64)],
            // INTEGER 상수는 BIGINT 컬럼으로 캐스팅
            vec![Expr::constant(2i32), Expr::constant(7i32)],
            vec![Expr::constant(3i32), Expr::null(SqlType::BigInt)],
        ]),
    };
    let writer = txns.begin();
    let result = compiler.compile(&insert)?.run(&writer, vec![], &pool)?;
    txns.end(&writer);
    assert_eq!(result.processed(), 3);
    assert_eq!(result.num_rows(), 0);
    assert_eq!(table.visible_row_count(&txns.begin()), 3);

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let insert_select = PlanNode::Insert {
        table: Arc::clone(&copy),
        source: InsertSource::Select(Box::new(PlanNode::Filter {
            input: Box::new(scan),
            predicate: Expr::is_not_null(Expr::column(&attrs[1])),
        })),
    };
    let writer = txns.begin();
    let result = compiler.compile(&insert_select)?.run(&writer, vec![], &pool)?;
    txns.end(&writer);
    assert_eq!(result.processed(), 2);

    let (scan, _) = PlanNode::scan_all(&copy, 0);
    let rows = sorted(run(&scan, &txns.begin())?);
    assert_eq!(rows, vec![order(1, 100), order(2, 7)]);
    Ok(())
}

#[test]
fn test_insert_arity_and_not_null() {
    let txns = TransactionManager::new();
    let table = orders_table(4);
    let compiler = QueryCompiler::default();

    let short = PlanNode::Insert {
        table: Arc::clone(&table),
        source: InsertSource::Values(vec![vec![Expr::constant(1i32)]]),
    };
    assert!(matches!(compiler.compile(&short), Err(TesseraError::Binding(_))));

    let null_key = PlanNode::Insert {
        table: Arc::clone(&table),
        source: InsertSource::Values(vec![vec![Expr::null(SqlType::Integer), Expr::constant(1i64)]]),
    };
    let query = compiler.compile(&null_key).unwrap();
    let pool = WorkerPool::new_fixed(1).unwrap();
    assert!(query.run(&txns.begin(), vec![], &pool).is_err());
    assert_eq!(table.visible_row_count(&txns.begin()), 0);
}

#[test]
fn test_delete_respects_snapshots() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(3);
    let loaded = load(&txns, &table, sample_orders());

    // DELETE FROM orders WHERE customer = 1
    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Delete {
        table: Arc::clone(&table),
        input: Box::new(PlanNode::Filter {
            input: Box::new(scan),
            predicate: Expr::equal(Expr::column(&attrs[0]), Expr::constant(1i32)),
        }),
    };
    let deleter = txns.begin();
    let result = QueryCompiler::default()
        .compile(&plan)?
        .run(&deleter, vec![], &WorkerPool::new_fixed(2)?)?;
    txns.end(&deleter);

    assert_eq!(result.processed(), 3);
    assert_eq!(table.visible_row_count(&deleter), 4);
    assert_eq!(table.visible_row_count(&txns.begin()), 4);
    // 삭제 이전 스냅샷은 여전히 전부 본다
    assert_eq!(table.visible_row_count(&TransactionContext::at(loaded.read_ts())), 7);
    Ok(())
}

#[test]
fn test_update_creates_new_versions() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(3);
    let loaded = load(&txns, &table, sample_orders());

    // UPDATE orders SET amount = amount * 10 WHERE customer = 2
    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = PlanNode::Update {
        table: Arc::clone(&table),
        input: Box::new(PlanNode::Filter {
            input: Box::new(scan),
            predicate: Expr::equal(Expr::column(&attrs[0]), Expr::constant(2i32)),
        }),
        assignments: vec![Assignment {
            column: 1,
            expr: Expr::mul(Expr::column(&attrs[1]), Expr::constant(10i64)),
        }],
    };
    let updater = txns.begin();
    let result = QueryCompiler::new(EngineConfig::serial())
        .compile(&plan)?
        .run(&updater, vec![], &WorkerPool::new_fixed(1)?)?;
    txns.end(&updater);
    assert_eq!(result.processed(), 2);

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = sum_by_customer(scan, &attrs, AggregateStrategy::Hash);

    let after = sorted(run(&plan, &txns.begin())?);
    assert_eq!(after[1], vec![Value::Integer(2), Value::BigInt(100), Value::BigInt(2)]);
    assert_eq!(table.visible_row_count(&txns.begin()), 7);

    let before = sorted(run(&plan, &TransactionContext::at(loaded.read_ts()))?);
    assert_eq!(before[1], vec![Value::Integer(2), Value::BigInt(10), Value::BigInt(2)]);
    Ok(())
}

/// 새 버전 하나라도 제약을 어기면 UPDATE 전체가 실패하고 이전 버전이 남는다
#[test]
fn test_failed_update_leaves_table_unchanged() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(3);
    load(&txns, &table, sample_orders());
    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let before = sorted(run(&scan, &txns.begin())?);

    // UPDATE orders SET customer = NULL
    let set_null = PlanNode::Update {
        table: Arc::clone(&table),
        input: Box::new(scan.clone()),
        assignments: vec![Assignment {
            column: 0,
            expr: Expr::null(SqlType::Integer),
        }],
    };
    // UPDATE orders SET customer = customer + 2147483645: 3번 고객부터 넘침
    let overflow = PlanNode::Update {
        table: Arc::clone(&table),
        input: Box::new(scan.clone()),
        assignments: vec![Assignment {
            column: 0,
            expr: Expr::add(Expr::column(&attrs[0]), Expr::constant(2_147_483_645i32)),
        }],
    };

    for plan in [&set_null, &overflow] {
        let updater = txns.begin();
        assert!(run(plan, &updater).is_err());
        txns.end(&updater);
        assert_eq!(table.visible_row_count(&txns.begin()), 7);
        assert_eq!(sorted(run(&scan, &txns.begin())?), before);

        let parallel = QueryCompiler::new(EngineConfig::default()).compile(plan)?;
        let updater = txns.begin();
        assert!(parallel.run(&updater, vec![], &WorkerPool::new_fixed(2)?).is_err());
        txns.end(&updater);
        assert_eq!(sorted(run(&scan, &txns.begin())?), before);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════

#[test]
fn test_result_to_record_batch() -> TesseraResult<()> {
    let txns = TransactionManager::new();
    let table = orders_table(4);
    load(&txns, &table, sample_orders());

    let (scan, attrs) = PlanNode::scan_all(&table, 0);
    let plan = sum_by_customer(scan, &attrs, AggregateStrategy::Sort);
    let query = QueryCompiler::default().compile(&plan)?;
    let result = query.run(&txns.begin(), vec![], &WorkerPool::new_fixed(2)?)?;

    let batch = result.to_record_batch()?;
    assert_eq!(batch.num_rows(), 3);
    assert_eq!(batch.num_columns(), 3);
    let schema = batch.schema();
    let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    assert_eq!(names, vec!["customer", "total", "n"]);
    assert_eq!(
        result.column_values(0),
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
    Ok(())
}
