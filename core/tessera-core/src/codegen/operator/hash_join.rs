//! Hash join
//!
//! 오른쪽 입력이 빌드 쪽이다: 자식 파이프라인에서 워커별 해시 테이블을 만들고,
//! 단계가 끝나면 쿼리 상태의 공유 테이블로 합친다. 왼쪽 입력은 부모
//! 파이프라인에서 그 테이블을 탐색한다 (탐색 중 테이블은 읽기 전용).
//!
//! NULL 키는 어떤 행과도 매칭되지 않는다. LEFT 조인에서 매칭이 없는 왼쪽 행은
//! 오른쪽 속성을 NULL로 채워 내보낸다.

use super::{OperatorTranslator, wrong_plan};
use crate::codegen::code_gen::{
    CompiledExpr, RowFn, finish_fn, row_fn, state_fn, thread_init_fn,
};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, PipelineId, TranslatorId};
use crate::codegen::query::ExecutorContext;
use crate::codegen::query_state::StateSlot;
use crate::codegen::row_batch::Row;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{Expr, JoinType, PlanNode};
use crate::runtime::{HashTable, StoreValues};
use crate::types::{AttributeId, SqlType, Value};
use smallvec::SmallVec;
use std::rc::Rc;
use tracing::debug;

type JoinKey = SmallVec<[Value; 4]>;

pub struct HashJoinTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    build_pipeline: PipelineId,
    left: TranslatorId,
    right: TranslatorId,
    left_keys: Vec<CompiledExpr>,
    right_keys: Vec<CompiledExpr>,
    key_types: Vec<SqlType>,
    predicate: Option<CompiledExpr>,
    join_type: JoinType,
    right_attributes: Vec<AttributeId>,
    table: StateSlot<HashTable>,
    partition: StateSlot<HashTable>,
}

fn compile_keys(ctx: &mut CompilationContext, keys: &[Expr]) -> TesseraResult<Vec<CompiledExpr>> {
    keys.iter().map(|key| ctx.compile_expression(key)).collect()
}

fn derive_key(
    row: &mut Row<'_>,
    keys: &[CompiledExpr],
    types: &[SqlType],
    exec: &ExecutorContext,
) -> TesseraResult<JoinKey> {
    keys.iter()
        .zip(types)
        .map(|(key, ty)| row.derive_value(key, exec)?.cast_to(*ty))
        .collect()
}

impl HashJoinTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::HashJoin {
            left,
            right,
            left_keys,
            right_keys,
            join_type,
            predicate,
        } = plan
        else {
            return Err(wrong_plan("hash join", plan));
        };
        if left_keys.is_empty() || left_keys.len() != right_keys.len() {
            return Err(TesseraError::Config(format!(
                "hash join needs matching key lists ({} vs {})",
                left_keys.len(),
                right_keys.len()
            )));
        }

        let build_pipeline = ctx.new_pipeline(Some(at.pipeline));
        ctx.pipeline_mut(build_pipeline)?.add(id);
        let left_child = ctx.prepare_plan(left, at.pipeline)?;
        let right_child = ctx.prepare_plan(right, build_pipeline)?;

        let left_keys = compile_keys(ctx, left_keys)?;
        let right_keys = compile_keys(ctx, right_keys)?;
        // 양쪽 키를 공통 타입으로 맞춘 뒤 해시한다
        let key_types = left_keys
            .iter()
            .zip(&right_keys)
            .map(|(l, r)| match (l.ty, r.ty) {
                (a, b) if a == b => Ok(a),
                (a, b) => SqlType::promote(a, b).ok_or_else(|| {
                    TesseraError::unsupported(format!("join key {a} = {b}"), "cast one side first")
                }),
            })
            .collect::<TesseraResult<Vec<_>>>()?;
        let predicate = predicate
            .as_ref()
            .map(|expr| ctx.compile_expression(expr))
            .transpose()?;

        let right_attributes: Vec<AttributeId> =
            right.output_attributes().iter().map(|a| a.id).collect();
        let table = ctx.register_query_state::<HashTable>("join_hash_table")?;

        let value_size = right_attributes.len();
        let pipeline = ctx.pipeline_mut(build_pipeline)?;
        let partition = pipeline.register_thread_state::<HashTable>("join_build_partition")?;
        pipeline.add_thread_init(thread_init_fn(move |thread, _, exec| {
            thread.install(partition, HashTable::with_config(value_size, exec.config()))
        }));
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let target = query.get_mut(table)?;
            for thread in threads.iter_mut() {
                target.append_from(thread.take(partition)?);
            }
            debug!(entries = target.len(), "join hash table built");
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            at,
            build_pipeline,
            left: left_child,
            right: right_child,
            left_keys,
            right_keys,
            key_types,
            predicate,
            join_type: *join_type,
            right_attributes,
            table,
            partition,
        }))
    }

    fn consume_build(&self) -> RowFn {
        let keys = self.right_keys.clone();
        let types = self.key_types.clone();
        let attributes = self.right_attributes.clone();
        let partition = self.partition;
        row_fn(move |scope, row| {
            let key = derive_key(row, &keys, &types, scope.exec)?;
            if key.iter().any(Value::is_null) {
                return Ok(());
            }
            let payload = attributes
                .iter()
                .map(|attr| row.value(*attr))
                .collect::<TesseraResult<Vec<_>>>()?;
            let table = scope.thread.get_mut(partition)?;
            let hash = table.hash_key(&key);
            table.insert(Some(hash), &key, &mut StoreValues(&payload))
        })
    }

    fn consume_probe(&self, next: RowFn) -> RowFn {
        let keys = self.left_keys.clone();
        let types = self.key_types.clone();
        let attributes = self.right_attributes.clone();
        let predicate = self.predicate.clone();
        let left_join = self.join_type == JoinType::Left;
        let table = self.table;
        row_fn(move |scope, row| {
            let exec = scope.exec;
            let query = scope.query;
            let key = derive_key(row, &keys, &types, exec)?;
            let mut matched = false;
            if !key.iter().any(Value::is_null) {
                let table = query.get(table)?;
                table.find_all(None, &key, |payload| {
                    let mut joined = row.fork();
                    for (attr, value) in attributes.iter().zip(payload) {
                        joined.register_attribute_value(*attr, value.clone());
                    }
                    if let Some(predicate) = &predicate {
                        if !joined.derive_value(predicate, exec)?.is_true() {
                            return Ok(());
                        }
                    }
                    matched = true;
                    next(scope, &mut joined)
                })?;
            }
            if !matched && left_join {
                let mut joined = row.fork();
                for attr in &attributes {
                    joined.register_attribute_value(*attr, Value::Null);
                }
                next(scope, &mut joined)?;
            }
            Ok(())
        })
    }
}

impl OperatorTranslator for HashJoinTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "hash_join"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let (table, value_size) = (self.table, self.right_attributes.len());
        ctx.add_initializer(state_fn(move |state, exec| {
            state.install(table, HashTable::with_config(value_size, exec.config()))
        }));
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        // 빌드 파이프라인이 먼저 소스를 등록하므로 먼저 실행된다
        ctx.produce(self.right)?;
        ctx.produce(self.left)
    }

    fn consume_row(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        if at.pipeline == self.build_pipeline {
            Ok(self.consume_build())
        } else {
            debug_assert_eq!(at, self.at);
            let next = ctx.row_consumer(at)?;
            Ok(self.consume_probe(next))
        }
    }

    fn tear_down_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let table = self.table;
        ctx.add_tear_down(state_fn(move |state, _| {
            if state.is_installed(table) {
                state.get_mut(table)?.destroy();
            }
            Ok(())
        }));
        Ok(())
    }
}
