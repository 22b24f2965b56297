//! Aggregation without GROUP BY
//!
//! 워커마다 하나의 집계 저장 영역을 갖고, 단계가 끝나면 쿼리 상태로 합친다.
//! 입력이 비어 있어도 정확히 한 행을 내보낸다 (COUNT는 0, 나머지는 NULL).

use super::group_by::{compile_having, compile_inputs, derive_inputs, emit_groups, output_layout};
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
use crate::runtime::HashTable;
use crate::types::{AttributeId, Value};
use std::rc::Rc;
use std::sync::Arc;

struct GlobalState {
    payload: Vec<Value>,
    distinct: Vec<HashTable>,
}

pub struct GlobalGroupByTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    child_pipeline: PipelineId,
    child: TranslatorId,
    inputs: Vec<Option<CompiledExpr>>,
    having: Option<CompiledExpr>,
    layout: Vec<AttributeId>,
    aggregation: Arc<Aggregation>,
    payload: StateSlot<Vec<Value>>,
    partition: StateSlot<GlobalState>,
}

fn initial_payload(aggregation: &Aggregation) -> TesseraResult<Vec<Value>> {
    let mut payload = vec![Value::Null; aggregation.storage_size()];
    aggregation.create_initial_global_values(&mut payload)?;
    Ok(payload)
}

impl GlobalGroupByTranslator {
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
            return Err(wrong_plan("global group by", plan));
        };
        if !group_by.is_empty() {
            return Err(TesseraError::Config(format!(
                "global aggregation with {} grouping keys",
                group_by.len()
            )));
        }

        let child_pipeline = ctx.new_pipeline(Some(at.pipeline));
        ctx.pipeline_mut(child_pipeline)?.add(id);
        let child = ctx.prepare_plan(input, child_pipeline)?;

        let aggregation = Arc::new(Aggregation::setup(aggregates, true)?);
        let inputs = compile_inputs(ctx, aggregates)?;
        let having = compile_having(ctx, having.as_ref())?;
        let payload = ctx.register_query_state::<Vec<Value>>("aggregate_values")?;

        let pipeline = ctx.pipeline_mut(child_pipeline)?;
        if aggregation.has_distinct() {
            pipeline.set_serial("distinct aggregate");
        }
        let partition = pipeline.register_thread_state::<GlobalState>("aggregate_partition")?;
        let init_aggregation = Arc::clone(&aggregation);
        pipeline.add_thread_init(thread_init_fn(move |thread, _, exec| {
            let state = GlobalState {
                payload: initial_payload(&init_aggregation)?,
                distinct: init_aggregation.create_distinct_tables(exec.config()),
            };
            thread.install(partition, state)
        }));
        let merge_aggregation = Arc::clone(&aggregation);
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let target = query.get_mut(payload)?;
            for thread in threads.iter_mut() {
                let state = thread.take(partition)?;
                merge_aggregation.merge_values(target, &state.payload)?;
            }
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            at,
            child_pipeline,
            child,
            inputs,
            having,
            layout: output_layout(group_by, aggregates),
            aggregation,
            payload,
            partition,
        }))
    }
}

impl OperatorTranslator for GlobalGroupByTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "global_group_by"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let (payload, aggregation) = (self.payload, Arc::clone(&self.aggregation));
        ctx.add_initializer(state_fn(move |state, _| {
            state.install(payload, initial_payload(&aggregation)?)
        }));
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.child)?;

        let consumer = ctx.batch_consumer(self.at)?;
        let (payload, aggregation) = (self.payload, Arc::clone(&self.aggregation));
        let layout = self.layout.clone();
        let having = self.having.clone();
        let source = source_fn(move |scope, _| {
            let values = aggregation.finalize_values(scope.query.get(payload)?)?;
            emit_groups(scope, &[values], &layout, having.as_ref(), &consumer)
        });
        ctx.register_pipeline_source(self.id, self.at.pipeline, source, None)
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        if at.pipeline != self.child_pipeline {
            return Err(TesseraError::Config("global aggregation consumed outside its input pipeline".into()));
        }
        let inputs = self.inputs.clone();
        let aggregation = Arc::clone(&self.aggregation);
        let partition = self.partition;
        Ok(row_fn(move |scope, row| {
            let values = derive_inputs(row, &inputs, scope.exec)?;
            let GlobalState { payload, distinct } = scope.thread.get_mut(partition)?;
            let mask = aggregation.probe_distinct(distinct, &[], &values)?;
            aggregation.advance_values_masked(payload, &values, &mask)
        }))
    }
}
