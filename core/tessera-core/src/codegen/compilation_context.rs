//! Compilation context
//!
//! 플랜 트리 → 컴파일된 쿼리. 진행 순서:
//!
//! 1. `prepare_plan`: 번역기를 bottom-up으로 생성한다. 각 생성자는 자식과 식을
//!    재귀적으로 준비하고 상태 슬롯과 파이프라인 경계를 등록한다.
//! 2. `initialize_state`: 번역기마다 쿼리 상태 초기화 훅을 등록한다.
//! 3. `produce`: 루트에서 top-down으로 생성 코드를 조립한다. 소스가
//!    `register_pipeline_source`를 호출하는 순서가 곧 실행 순서다.
//! 4. `tear_down_state` 훅 등록 후 [`CompiledQuery`]로 고정한다.

use super::code_gen::{BatchFn, CodeGen, CompiledExpr, PartitionFn, RowFn, SourceFn, StateFn};
use super::operator::{OperatorTranslator, ResultSink};
use super::pipeline::{ConsumerContext, Pipeline, PipelineId, TranslatorId};
use super::query::{CompiledQuery, ResultBuffer};
use super::query_state::{QueryState, StateSlot};
use super::translator_factory::TranslatorFactory;
use crate::config::EngineConfig;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{Expr, PlanNode};
use crate::runtime::StorageBindings;
use ahash::AHashMap;
use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct CompilationContext {
    codegen: CodeGen,
    factory: TranslatorFactory,
    bindings: StorageBindings,
    query_state: QueryState,
    pipelines: Vec<Pipeline>,
    translators: Vec<Option<Rc<dyn OperatorTranslator>>>,
    // 같은 식 노드는 한 번만 번역한다 (노드 주소 기준)
    expressions: AHashMap<*const Expr, CompiledExpr>,
    initializers: Vec<StateFn>,
    tear_downs: Vec<StateFn>,
    step_order: Vec<PipelineId>,
}

impl CompilationContext {
    pub fn new(config: Arc<EngineConfig>, factory: TranslatorFactory) -> TesseraResult<Self> {
        let mut codegen = CodeGen::new(config);
        let bindings = StorageBindings::declare(&mut codegen)?;
        Ok(Self {
            codegen,
            factory,
            bindings,
            query_state: QueryState::new(),
            pipelines: Vec::new(),
            translators: Vec::new(),
            expressions: AHashMap::new(),
            initializers: Vec::new(),
            tear_downs: Vec::new(),
            step_order: Vec::new(),
        })
    }

    /// Compile `plan` into an executable query
    pub fn generate_plan(
        plan: &PlanNode,
        config: Arc<EngineConfig>,
        factory: TranslatorFactory,
    ) -> TesseraResult<CompiledQuery> {
        let mut ctx = Self::new(Arc::clone(&config), factory)?;

        let root = ctx.new_pipeline(None);
        let result: StateSlot<ResultBuffer> = ctx.register_query_state("result_rows")?;
        let sink_id = ctx.reserve_translator();
        let sink_at = ctx.pipeline_mut(root)?.add(sink_id);

        let plan_id = ctx.prepare_plan(plan, root)?;
        let output = plan.output_attributes();
        let sink = ResultSink::new(sink_id, sink_at, output.clone(), result, &mut ctx)?;
        ctx.install_translator(sink_id, Rc::new(sink))?;

        for translator in ctx.all_translators()? {
            translator.initialize_state(&mut ctx)?;
        }
        ctx.produce(plan_id)?;
        for translator in ctx.all_translators()? {
            translator.tear_down_state(&mut ctx)?;
        }

        if let Some(orphan) = ctx.pipelines.iter().find(|p| !p.has_source()) {
            return Err(TesseraError::Config(format!(
                "{} has no source after produce",
                orphan.id()
            )));
        }
        let steps = ctx
            .step_order
            .iter()
            .map(|id| ctx.pipelines[id.0].to_step())
            .collect::<TesseraResult<Vec<_>>>()?;

        debug!(
            translators = ctx.translators.len(),
            pipelines = steps.len(),
            query_slots = ctx.query_state.len(),
            proxies = ctx.codegen.proxies().len(),
            "plan compiled"
        );

        Ok(CompiledQuery {
            layout: ctx.query_state.layout(),
            initializers: ctx.initializers,
            tear_downs: ctx.tear_downs,
            steps,
            output,
            result,
            config,
        })
    }

    pub fn codegen(&mut self) -> &mut CodeGen {
        &mut self.codegen
    }

    pub fn config(&self) -> &EngineConfig {
        self.codegen.config()
    }

    pub fn shared_config(&self) -> Arc<EngineConfig> {
        self.codegen.shared_config()
    }

    pub fn bindings(&self) -> &StorageBindings {
        &self.bindings
    }

    pub fn register_query_state<T: Any + Send + Sync>(&mut self, name: &str) -> TesseraResult<StateSlot<T>> {
        self.query_state.register_unique(name)
    }

    pub fn new_pipeline(&mut self, parent: Option<PipelineId>) -> PipelineId {
        let id = PipelineId(self.pipelines.len());
        let parallel = self.codegen.config().parallel_execution;
        self.pipelines.push(Pipeline::new(id, parent, parallel));
        trace!(pipeline = %id, parent = ?parent, "new pipeline");
        id
    }

    pub fn pipeline(&self, id: PipelineId) -> TesseraResult<&Pipeline> {
        self.pipelines
            .get(id.0)
            .ok_or_else(|| TesseraError::Config(format!("unknown {id}")))
    }

    pub fn pipeline_mut(&mut self, id: PipelineId) -> TesseraResult<&mut Pipeline> {
        self.pipelines
            .get_mut(id.0)
            .ok_or_else(|| TesseraError::Config(format!("unknown {id}")))
    }

    /// Create the translator for `plan` as the next stage of `pipeline`.
    ///
    /// The stage is claimed before construction so that children prepared by
    /// the constructor land upstream of it.
    pub fn prepare_plan(&mut self, plan: &PlanNode, pipeline: PipelineId) -> TesseraResult<TranslatorId> {
        let ctor = self.factory.operator(plan.kind())?;
        let id = self.reserve_translator();
        let at = self.pipeline_mut(pipeline)?.add(id);
        let translator = ctor(plan, id, at, self)?;
        trace!(translator = translator.name(), id = id.0, pipeline = %pipeline, stage = at.stage, "prepared");
        self.install_translator(id, translator)?;
        Ok(id)
    }

    /// Translate an expression node, memoized by node identity
    pub fn compile_expression(&mut self, expr: &Expr) -> TesseraResult<CompiledExpr> {
        let key = expr as *const Expr;
        if let Some(compiled) = self.expressions.get(&key) {
            return Ok(compiled.clone());
        }
        let ctor = self.factory.expression(expr.kind())?;
        let translator = ctor(expr, self)?;
        let compiled = translator.derive_value(&mut self.codegen)?;
        self.expressions.insert(key, compiled.clone());
        Ok(compiled)
    }

    pub fn produce(&mut self, translator: TranslatorId) -> TesseraResult<()> {
        let translator = self.translator(translator)?;
        translator.produce(self)
    }

    /// Batch entry point of the stage downstream of `from`
    pub fn batch_consumer(&mut self, from: ConsumerContext) -> TesseraResult<BatchFn> {
        let (next, translator) = self.downstream(from)?;
        translator.consume_batch(self, next)
    }

    /// Row entry point of the stage downstream of `from`
    pub fn row_consumer(&mut self, from: ConsumerContext) -> TesseraResult<RowFn> {
        let (next, translator) = self.downstream(from)?;
        translator.consume_row(self, next)
    }

    /// Make `source` the producer of `pipeline` and schedule it after every
    /// pipeline registered so far.
    pub fn register_pipeline_source(
        &mut self,
        producer: TranslatorId,
        pipeline: PipelineId,
        source: SourceFn,
        partition: Option<PartitionFn>,
    ) -> TesseraResult<()> {
        self.pipeline_mut(pipeline)?
            .set_source(producer, source, partition)?;
        self.step_order.push(pipeline);
        Ok(())
    }

    pub fn add_initializer(&mut self, init: StateFn) {
        self.initializers.push(init);
    }

    /// Tear-down hooks run in reverse registration order
    pub fn add_tear_down(&mut self, tear_down: StateFn) {
        self.tear_downs.push(tear_down);
    }

    fn reserve_translator(&mut self) -> TranslatorId {
        self.translators.push(None);
        TranslatorId(self.translators.len() - 1)
    }

    fn install_translator(&mut self, id: TranslatorId, translator: Rc<dyn OperatorTranslator>) -> TesseraResult<()> {
        let slot = self
            .translators
            .get_mut(id.0)
            .ok_or_else(|| TesseraError::Config(format!("translator {} was never reserved", id.0)))?;
        *slot = Some(translator);
        Ok(())
    }

    fn translator(&self, id: TranslatorId) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        self.translators
            .get(id.0)
            .and_then(Option::as_ref)
            .cloned()
            .ok_or_else(|| TesseraError::Config(format!("translator {} is not constructed", id.0)))
    }

    fn all_translators(&self) -> TesseraResult<Vec<Rc<dyn OperatorTranslator>>> {
        (0..self.translators.len())
            .map(|i| self.translator(TranslatorId(i)))
            .collect()
    }

    fn downstream(
        &self,
        from: ConsumerContext,
    ) -> TesseraResult<(ConsumerContext, Rc<dyn OperatorTranslator>)> {
        let next = from.next().ok_or_else(|| {
            TesseraError::Config(format!("stage 0 of {} has no consumer", from.pipeline))
        })?;
        let id = self
            .pipeline(next.pipeline)?
            .translator_at(next.stage)
            .ok_or_else(|| {
                TesseraError::Config(format!("{} has no stage {}", next.pipeline, next.stage))
            })?;
        Ok((next, self.translator(id)?))
    }
}
