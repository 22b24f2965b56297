//! ORDER BY [LIMIT k]
//!
//! 자식 파이프라인이 워커별 정렬기에 튜플을 쌓고, 단계가 끝나면 병렬 정렬 후
//! 병합한다. top-K가 주어지면 파티션마다 먼저 k개로 줄인 뒤 병합한다.
//! 정렬된 결과는 부모 파이프라인의 (단일 워커) 소스가 벡터 단위로 읽는다.
//!
//! 튜플 레이아웃: 출력 속성들, 그 다음 출력에 없는 정렬 키 속성들.

use super::{OperatorTranslator, not_a_consumer, wrong_plan};
use crate::codegen::code_gen::{RowFn, finish_fn, row_fn, source_fn, state_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, PipelineId, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::codegen::row_batch::{RowBatch, TupleAccessor};
use crate::error::TesseraResult;
use crate::plan::PlanNode;
use crate::runtime::{CompareFn, SortKeySpec, Sorter, build_comparator};
use crate::types::{AttributeId, Value};
use std::rc::Rc;
use tracing::debug;

pub struct OrderByTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    child_pipeline: PipelineId,
    child: TranslatorId,
    layout: Vec<AttributeId>,
    output_width: usize,
    comparator: CompareFn,
    sorter: StateSlot<Sorter>,
    partition: StateSlot<Sorter>,
}

impl OrderByTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::OrderBy {
            input,
            sort_keys,
            output,
            limit,
        } = plan
        else {
            return Err(wrong_plan("order by", plan));
        };

        let child_pipeline = ctx.new_pipeline(Some(at.pipeline));
        ctx.pipeline_mut(child_pipeline)?.add(id);
        let child = ctx.prepare_plan(input, child_pipeline)?;

        let mut layout: Vec<AttributeId> = output.iter().map(|a| a.id).collect();
        let output_width = layout.len();
        let mut keys = Vec::with_capacity(sort_keys.len());
        for key in sort_keys {
            let slot = match layout.iter().position(|id| *id == key.attribute.id) {
                Some(slot) => slot,
                None => {
                    layout.push(key.attribute.id);
                    layout.len() - 1
                }
            };
            keys.push(SortKeySpec {
                slot,
                descending: key.descending,
            });
        }
        let comparator = build_comparator(keys);
        let width = layout.len();

        let sorter = ctx.register_query_state::<Sorter>("order_by_sorter")?;
        let pipeline = ctx.pipeline_mut(child_pipeline)?;
        let partition = pipeline.register_thread_state::<Sorter>("order_by_partition")?;
        let thread_comparator = comparator.clone();
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
            thread.install(partition, Sorter::new(thread_comparator.clone(), width))
        }));
        let limit = *limit;
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let mut partitions = threads
                .iter_mut()
                .map(|thread| thread.take(partition))
                .collect::<TesseraResult<Vec<_>>>()?;
            let target = query.get_mut(sorter)?;
            if let Some(k) = limit {
                for part in &mut partitions {
                    part.sort_top_k(k);
                }
            }
            target.sort_parallel(partitions);
            if let Some(k) = limit {
                target.sort_top_k(k);
            }
            debug!(rows = target.len(), top_k = ?limit, "sorted");
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            at,
            child_pipeline,
            child,
            layout,
            output_width,
            comparator,
            sorter,
            partition,
        }))
    }
}

impl OperatorTranslator for OrderByTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "order_by"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let (sorter, comparator, width) = (self.sorter, self.comparator.clone(), self.layout.len());
        ctx.add_initializer(state_fn(move |state, _| {
            state.install(sorter, Sorter::new(comparator.clone(), width))
        }));
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)?;

        let consumer = ctx.batch_consumer(self.at)?;
        let sorter = self.sorter;
        let output: Vec<AttributeId> = self.layout[..self.output_width].to_vec();
        let source = source_fn(move |scope, _| {
            let query = scope.query;
            let vector_size = scope.exec.config().vector_size;
            query.get(sorter)?.vectorized_iterate(vector_size, |access| {
                if scope.is_stopped() {
                    return Ok(());
                }
                let tuples = access.tuples();
                let accessors: Vec<TupleAccessor<'_, Box<[Value]>>> = (0..output.len())
                    .map(|slot| TupleAccessor::new(tuples, slot))
                    .collect();
                let mut batch = RowBatch::new(0..tuples.len() as u32);
                for (attr, accessor) in output.iter().zip(&accessors) {
                    batch.add_attribute(*attr, accessor);
                }
                consumer(scope, &mut batch)
            })
        });
        // 분할 함수 없음: 정렬 순서를 유지하기 위해 단일 워커
        ctx.register_pipeline_source(self.id, self.at.pipeline, source, None)
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        if at.pipeline != self.child_pipeline {
            return Err(not_a_consumer("order by output"));
        }
        let layout = self.layout.clone();
        let partition = self.partition;
        Ok(row_fn(move |scope, row| {
            let tuple = layout
                .iter()
                .map(|attr| row.value(*attr))
                .collect::<TesseraResult<Vec<_>>>()?;
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
