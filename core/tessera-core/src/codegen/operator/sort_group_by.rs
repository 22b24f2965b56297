//! Sort GROUP BY
//!
//! 자식 파이프라인은 (그룹 키 ∪ 집계 입력) 튜플을 워커별 정렬기에 쌓기만 하고,
//! 단계가 끝나면 병렬 정렬 후 병합한다. 부모 파이프라인의 소스가 정렬된 튜플을
//! 순서대로 읽으며 같은 키가 이어지는 구간을 하나의 그룹으로 집계한다.

use super::group_by::{
    compile_having, compile_inputs, derive_group_key, derive_inputs, emit_groups, output_layout,
};
use super::{OperatorTranslator, wrong_plan};
use crate::codegen::aggregation::Aggregation;
use crate::codegen::code_gen::{
    CompiledExpr, RowFn, finish_fn, row_fn, source_fn, state_fn, thread_init_fn,
};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, PipelineId, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::PlanNode;
use crate::runtime::{CompareFn, SortKeySpec, Sorter, build_comparator};
use crate::types::{AttributeId, Value};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

pub struct SortGroupByTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    child_pipeline: PipelineId,
    child: TranslatorId,
    keys: Vec<AttributeId>,
    inputs: Vec<Option<CompiledExpr>>,
    having: Option<CompiledExpr>,
    layout: Vec<AttributeId>,
    aggregation: Arc<Aggregation>,
    comparator: CompareFn,
    sorter: StateSlot<Sorter>,
    partition: StateSlot<Sorter>,
}

impl SortGroupByTranslator {
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
            return Err(wrong_plan("sort group by", plan));
        };
        if group_by.is_empty() {
            return Err(TesseraError::Config("sort group by without grouping keys".into()));
        }

        let child_pipeline = ctx.new_pipeline(Some(at.pipeline));
        ctx.pipeline_mut(child_pipeline)?.add(id);
        let child = ctx.prepare_plan(input, child_pipeline)?;

        let aggregation = Arc::new(Aggregation::setup(aggregates, false)?);
        let inputs = compile_inputs(ctx, aggregates)?;
        let having = compile_having(ctx, having.as_ref())?;

        let comparator = build_comparator(
            (0..group_by.len())
                .map(|slot| SortKeySpec {
                    slot,
                    descending: false,
                })
                .collect(),
        );
        let width = group_by.len() + inputs.len();

        let sorter = ctx.register_query_state::<Sorter>("group_by_sorter")?;
        let pipeline = ctx.pipeline_mut(child_pipeline)?;
        let partition = pipeline.register_thread_state::<Sorter>("group_by_sort_partition")?;
        let thread_comparator = comparator.clone();
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
            thread.install(partition, Sorter::new(thread_comparator.clone(), width))
        }));
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let partitions = threads
                .iter_mut()
                .map(|thread| thread.take(partition))
                .collect::<TesseraResult<Vec<_>>>()?;
            let target = query.get_mut(sorter)?;
            target.sort_parallel(partitions);
            debug!(rows = target.len(), "group input sorted");
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
            comparator,
            sorter,
            partition,
        }))
    }
}

impl OperatorTranslator for SortGroupByTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "sort_group_by"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let (sorter, comparator) = (self.sorter, self.comparator.clone());
        let width = self.keys.len() + self.inputs.len();
        ctx.add_initializer(state_fn(move |state, _| {
            state.install(sorter, Sorter::new(comparator.clone(), width))
        }));
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)?;

        let consumer = ctx.batch_consumer(self.at)?;
        let (sorter, aggregation) = (self.sorter, Arc::clone(&self.aggregation));
        let num_keys = self.keys.len();
        let layout = self.layout.clone();
        let having = self.having.clone();
        let source = source_fn(move |scope, _| {
            let query = scope.query;
            let exec = scope.exec;
            let vector_size = exec.config().vector_size.max(1);
            let mut distinct = aggregation.create_distinct_tables(exec.config());
            let mut payload = vec![Value::Null; aggregation.storage_size()];
            let mut groups: Vec<Vec<Value>> = Vec::with_capacity(vector_size);
            let mut current: Option<&[Value]> = None;

            let finish_group = |key: &[Value], payload: &[Value]| -> TesseraResult<Vec<Value>> {
                let mut tuple = key.to_vec();
                tuple.extend(aggregation.finalize_values(payload)?);
                Ok(tuple)
            };

            for tuple in query.get(sorter)?.iter() {
                if scope.is_stopped() {
                    return Ok(());
                }
                let (key, values) = tuple.split_at(num_keys);
                let mask = aggregation.probe_distinct(&mut distinct, key, values)?;
                match current {
                    Some(group) if group == key => {
                        aggregation.advance_values_masked(&mut payload, values, &mask)?;
                    }
                    _ => {
                        if let Some(group) = current {
                            groups.push(finish_group(group, &payload)?);
                            if groups.len() == vector_size {
                                emit_groups(scope, &groups, &layout, having.as_ref(), &consumer)?;
                                groups.clear();
                            }
                        }
                        aggregation.create_initial_values_masked(&mut payload, values, &mask)?;
                        current = Some(key);
                    }
                }
            }
            if let Some(group) = current {
                groups.push(finish_group(group, &payload)?);
            }
            if scope.is_stopped() {
                return Ok(());
            }
            emit_groups(scope, &groups, &layout, having.as_ref(), &consumer)
        });
        // 정렬된 구간을 끊지 않도록 단일 워커
        ctx.register_pipeline_source(self.id, self.at.pipeline, source, None)
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        if at.pipeline != self.child_pipeline {
            return Err(TesseraError::Config("sort group by consumed outside its build pipeline".into()));
        }
        let keys = self.keys.clone();
        let inputs = self.inputs.clone();
        let partition = self.partition;
        Ok(row_fn(move |scope, row| {
            let mut tuple: Vec<Value> = derive_group_key(row, &keys)?.into_iter().collect();
            tuple.extend(derive_inputs(row, &inputs, scope.exec)?);
            scope.thread.get_mut(partition)?.append(tuple)
        }))
    }

    fn tear_down_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let sorter = self.sorter;
        ctx.add_tear_down(state_fn(move |state, _| {
            if state.is_installed(sorter) {
                state.get_mut(sorter)?.destroy();
            }
            Ok(())
        }));
        Ok(())
    }
}
