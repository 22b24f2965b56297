use super::{OperatorTranslator, wrong_plan};
use crate::codegen::code_gen::{CompiledExpr, RowFn, finish_fn, row_fn, state_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, PipelineId, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::error::TesseraResult;
use crate::plan::{JoinType, PlanNode};
use crate::types::{AttributeId, Value};
use std::rc::Rc;

type Buffered = Vec<Vec<Value>>;

/// Nested-loop join: the right input is buffered in a child pipeline, every
/// left row is then checked against all buffered rows.
pub struct NestedLoopJoinTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    build_pipeline: PipelineId,
    left: TranslatorId,
    right: TranslatorId,
    predicate: Option<CompiledExpr>,
    join_type: JoinType,
    right_attributes: Vec<AttributeId>,
    rows: StateSlot<Buffered>,
    partition: StateSlot<Buffered>,
}

impl NestedLoopJoinTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::NestedLoopJoin {
            left,
            right,
            join_type,
            predicate,
        } = plan
        else {
            return Err(wrong_plan("nested loop join", plan));
        };
        let build_pipeline = ctx.new_pipeline(Some(at.pipeline));
        ctx.pipeline_mut(build_pipeline)?.add(id);
        let left_child = ctx.prepare_plan(left, at.pipeline)?;
        let right_child = ctx.prepare_plan(right, build_pipeline)?;
        let predicate = predicate
            .as_ref()
            .map(|expr| ctx.compile_expression(expr))
            .transpose()?;

        let rows = ctx.register_query_state::<Buffered>("nlj_rows")?;
        let pipeline = ctx.pipeline_mut(build_pipeline)?;
        let partition = pipeline.register_thread_state::<Buffered>("nlj_partition")?;
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
            thread.install(partition, Buffered::new())
        }));
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let target = query.get_mut(rows)?;
            for thread in threads.iter_mut() {
                target.append(thread.get_mut(partition)?);
            }
            Ok(())
        }));

        Ok(Rc::new(Self {
            id,
            at,
            build_pipeline,
            left: left_child,
            right: right_child,
            predicate,
            join_type: *join_type,
            right_attributes: right.output_attributes().iter().map(|a| a.id).collect(),
            rows,
            partition,
        }))
    }
}

impl OperatorTranslator for NestedLoopJoinTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "nested_loop_join"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let rows = self.rows;
        ctx.add_initializer(state_fn(move |state, _| state.install(rows, Buffered::new())));
        Ok(())
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        ctx.produce(self.right)?;
        ctx.produce(self.left)
    }

    fn consume_row(&self, ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        let attributes = self.right_attributes.clone();
        if at.pipeline == self.build_pipeline {
            let partition = self.partition;
            return Ok(row_fn(move |scope, row| {
                let tuple = attributes
                    .iter()
                    .map(|attr| row.value(*attr))
                    .collect::<TesseraResult<Vec<_>>>()?;
                scope.thread.get_mut(partition)?.push(tuple);
                Ok(())
            }));
        }

        debug_assert_eq!(at, self.at);
        let next = ctx.row_consumer(at)?;
        let predicate = self.predicate.clone();
        let left_join = self.join_type == JoinType::Left;
        let rows = self.rows;
        Ok(row_fn(move |scope, row| {
            let exec = scope.exec;
            let query = scope.query;
            let buffered = query.get(rows)?;
            let mut matched = false;
            for tuple in buffered {
                if scope.is_stopped() {
                    return Ok(());
                }
                let mut joined = row.fork();
                for (attr, value) in attributes.iter().zip(tuple) {
                    joined.register_attribute_value(*attr, value.clone());
                }
                if let Some(predicate) = &predicate {
                    if !joined.derive_value(predicate, exec)?.is_true() {
                        continue;
                    }
                }
                matched = true;
                next(scope, &mut joined)?;
            }
            if !matched && left_join {
                let mut joined = row.fork();
                for attr in &attributes {
                    joined.register_attribute_value(*attr, Value::Null);
                }
                next(scope, &mut joined)?;
            }
            Ok(())
        }))
    }

    fn tear_down_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let rows = self.rows;
        ctx.add_tear_down(state_fn(move |state, _| {
            if state.is_installed(rows) {
                state.get_mut(rows)?.clear();
            }
            Ok(())
        }));
        Ok(())
    }
}
