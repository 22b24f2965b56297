//! Hash GROUP BY
//!
//! 자식 파이프라인의 워커마다 (그룹 키 → 집계 저장 영역) 해시 테이블을 만들고,
//! 단계가 끝나면 `merge_values`로 쿼리 상태의 테이블에 합친다. 배치 경로는
//! 벡터 단위로 키와 해시를 먼저 계산해 버킷을 prefetch한 뒤 probe한다.
//!
//! DISTINCT 집계가 있으면 보조 테이블이 워커 간에 공유되지 않으므로 자식
//! 파이프라인을 직렬로 돌린다.

use super::group_by::{
    AggregateInputs, GroupKey, compile_having, compile_inputs, derive_group_key, derive_inputs, emit_groups,
    output_layout,
};
use super::{OperatorTranslator, wrong_plan};
use crate::codegen::aggregation::Aggregation;
use crate::codegen::code_gen::{
    BatchFn, CompiledExpr, RowFn, batch_fn, finish_fn, row_fn, source_fn, state_fn, thread_init_fn,
};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, PipelineId, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::runtime::{HashTable, InsertCallback, Locality, PrefetchKind, ProbeCallback};
use crate::types::{AttributeId, Value};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Worker-local build state
struct GroupByState {
    table: HashTable,
    distinct: Vec<HashTable>,
}

impl GroupByState {
    fn accumulate(
        &mut self,
        aggregation: &Aggregation,
        hash: Option<u64>,
        key: &[Value],
        values: &[Value],
    ) -> TesseraResult<()> {
        let mask = aggregation.probe_distinct(&mut self.distinct, key, values)?;
        self.table.probe_or_insert(
            hash,
            key,
            &mut AdvanceGroup {
                aggregation,
                values,
                mask: &mask,
            },
            &mut InitializeGroup {
                aggregation,
                values,
                mask: &mask,
            },
        )?;
        Ok(())
    }
}

struct AdvanceGroup<'a> {
    aggregation: &'a Aggregation,
    values: &'a [Value],
    mask: &'a [bool],
}

impl ProbeCallback for AdvanceGroup<'_> {
    fn process_entry(&mut self, payload: &mut [Value]) -> TesseraResult<()> {
        self.aggregation
            .advance_values_masked(payload, self.values, self.mask)
    }
}

struct InitializeGroup<'a> {
    aggregation: &'a Aggregation,
    values: &'a [Value],
    mask: &'a [bool],
}

impl InsertCallback for InitializeGroup<'_> {
    fn value_size(&self) -> usize {
        self.aggregation.storage_size()
    }

    fn store_value(&mut self, payload: &mut [Value]) -> TesseraResult<()> {
        self.aggregation
            .create_initial_values_masked(payload, self.values, self.mask)
    }
}

pub struct HashGroupByTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    child_pipeline: PipelineId,
    child: TranslatorId,
    keys: Vec<AttributeId>,
    inputs: Vec<Option<CompiledExpr>>,
    having: Option<CompiledExpr>,
    layout: Vec<AttributeId>,
    aggregation: Arc<Aggregation>,
    table: StateSlot<HashTable>,
    partition: StateSlot<GroupByState>,
}

impl HashGroupByTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Aggregate {
            input,
            group_by,
            aggregates,
            having,
            ..
        } = plan
        else {
            return Err(wrong_plan("hash group by", plan));
        };
        if group_by.is_empty() {
            return Err(TesseraError::Config("hash group by without grouping keys".into()));
        }

        let child_pipeline = ctx.new_pipeline(Some(at.pipeline));
        ctx.pipeline_mut(child_pipeline)?.add(id);
        let child = ctx.prepare_plan(input, child_pipeline)?;

        let aggregation = Arc::new(Aggregation::setup(aggregates, false)?);
        let inputs = compile_inputs(ctx, aggregates)?;
        let having = compile_having(ctx, having.as_ref())?;
        let table = ctx.register_query_state::<HashTable>("group_by_table")?;

        let pipeline = ctx.pipeline_mut(child_pipeline)?;
        if aggregation.has_distinct() {
            pipeline.set_serial("distinct aggregate");
        }
        let partition = pipeline.register_thread_state::<GroupByState>("group_by_partition")?;
        let init_aggregation = Arc::clone(&aggregation);
        pipeline.add_thread_init(thread_init_fn(move |thread, _, exec| {
            let state = GroupByState {
                table: HashTable::with_config(init_aggregation.storage_size(), exec.config()),
                distinct: init_aggregation.create_distinct_tables(exec.config()),
            };
            thread.install(partition, state)
        }));
        let merge_aggregation = Arc::clone(&aggregation);
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let target = query.get_mut(table)?;
            for thread in threads.iter_mut() {
                let state = thread.take(partition)?;
                target.merge_from(state.table, |dst, src| merge_aggregation.merge_values(dst, src))?;
            }
            debug!(groups = target.num_keys(), "hash aggregation merged");
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            at,
            child_pipeline,
            child,
            keys: group_by.iter().map(|attr| attr.id).collect(),
            inputs,
            having,
            layout: output_layout(group_by, aggregates),
            aggregation,
            table,
            partition,
        }))
    }
}

impl OperatorTranslator for HashGroupByTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "hash_group_by"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let (table, value_size) = (self.table, self.aggregation.storage_size());
        ctx.add_initializer(state_fn(move |state, exec| {
            state.install(table, HashTable::with_config(value_size, exec.config()))
        }));
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)?;

        let consumer = ctx.batch_consumer(self.at)?;
        let (table, aggregation) = (self.table, Arc::clone(&self.aggregation));
        let layout = self.layout.clone();
        let having = self.having.clone();
        let source = source_fn(move |scope, _| {
            let query = scope.query;
            let vector_size = scope.exec.config().vector_size;
            query.get(table)?.vectorized_iterate(vector_size, |access| {
                if scope.is_stopped() {
                    return Ok(());
                }
                let tuples = (0..access.len())
                    .map(|i| {
                        let mut tuple = access.key(i).to_vec();
                        tuple.extend(aggregation.finalize_values(access.payload(i))?);
                        Ok(tuple)
                    })
                    .collect::<TesseraResult<Vec<_>>>()?;
                emit_groups(scope, &tuples, &layout, having.as_ref(), &consumer)
            })
        });
        ctx.register_pipeline_source(self.id, self.at.pipeline, source, None)
    }

    fn consume_batch(&self, _ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<BatchFn> {
        if at.pipeline != self.child_pipeline {
            return Err(TesseraError::Config("hash group by consumed outside its build pipeline".into()));
        }
        let keys = self.keys.clone();
        let inputs = self.inputs.clone();
        let aggregation = Arc::clone(&self.aggregation);
        let partition = self.partition;
        Ok(batch_fn(move |scope, batch| {
            let exec = scope.exec;
            let vector_size = exec.config().vector_size.max(1);
            let positions = batch.positions();
            let mut rows: Vec<(GroupKey, AggregateInputs)> = Vec::with_capacity(vector_size.min(positions.len()));
            let mut hashes: Vec<u64> = Vec::with_capacity(rows.capacity());
            for chunk in positions.chunks(vector_size) {
                rows.clear();
                for &position in chunk {
                    let mut row = batch.row_at(position, None);
                    let key = derive_group_key(&mut row, &keys)?;
                    let values = derive_inputs(&mut row, &inputs, exec)?;
                    rows.push((key, values));
                }

                let state = scope.thread.get_mut(partition)?;
                hashes.clear();
                hashes.extend(rows.iter().map(|(key, _)| state.table.hash_key(key)));
                for &hash in &hashes {
                    state.table.prefetch_bucket(hash, PrefetchKind::Write, Locality::High);
                }
                for ((key, values), &hash) in rows.iter().zip(&hashes) {
                    state.accumulate(&aggregation, Some(hash), key, values)?;
                }
            }
            Ok(())
        }))
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        if at.pipeline != self.child_pipeline {
            return Err(TesseraError::Config("hash group by consumed outside its build pipeline".into()));
        }
        let keys = self.keys.clone();
        let inputs = self.inputs.clone();
        let aggregation = Arc::clone(&self.aggregation);
        let partition = self.partition;
        Ok(row_fn(move |scope, row| {
            let key = derive_group_key(row, &keys)?;
            let values = derive_inputs(row, &inputs, scope.exec)?;
            scope
                .thread
                .get_mut(partition)?
                .accumulate(&aggregation, None, &key, &values)
        }))
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
