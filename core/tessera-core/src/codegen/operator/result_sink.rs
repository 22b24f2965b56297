use super::OperatorTranslator;
use crate::codegen::code_gen::{RowFn, finish_fn, row_fn, state_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::codegen::query::ResultBuffer;
use crate::codegen::query_state::StateSlot;
use crate::error::{TesseraError, TesseraResult};
use crate::types::AttributeInfo;

/// Stage 0 of the root pipeline: collects output tuples.
///
/// 워커별 버퍼에 쌓고 단계가 끝나면 워커 순서대로 쿼리 결과에 이어 붙인다.
pub struct ResultSink {
    id: TranslatorId,
    at: ConsumerContext,
    output: Vec<AttributeInfo>,
    result: StateSlot<ResultBuffer>,
    buffer: StateSlot<ResultBuffer>,
}

impl ResultSink {
    pub fn new(
        id: TranslatorId,
        at: ConsumerContext,
        output: Vec<AttributeInfo>,
        result: StateSlot<ResultBuffer>,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Self> {
        let pipeline = ctx.pipeline_mut(at.pipeline)?;
        let buffer = pipeline.register_thread_state::<ResultBuffer>("result_buffer")?;
        pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
            thread.install(buffer, ResultBuffer::new())
        }));
        pipeline.add_finish(finish_fn(move |query, threads, _| {
            let result = query.get_mut(result)?;
            for thread in threads.iter_mut() {
                result.append(thread.get_mut(buffer)?);
            }
            Ok(())
        }));
        Ok(Self {
            id,
            at,
            output,
            result,
            buffer,
        })
    }
}

impl OperatorTranslator for ResultSink {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "result_sink"
    }

    fn initialize_state(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let result = self.result;
        ctx.add_initializer(state_fn(move |state, _| state.install(result, ResultBuffer::new())));
        Ok(())
    }

    fn produce(&self, _ctx: &mut CompilationContext) -> TesseraResult<()> {
        Err(TesseraError::Config(
            "result sink is driven by the root plan".to_string(),
        ))
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, at: ConsumerContext) -> TesseraResult<RowFn> {
        debug_assert_eq!(at, self.at);
        let output: Vec<_> = self.output.iter().map(|attr| attr.id).collect();
        let buffer = self.buffer;
        Ok(row_fn(move |scope, row| {
            let tuple = output
                .iter()
                .map(|attr| row.value(*attr))
                .collect::<TesseraResult<Vec<_>>>()?;
            scope.thread.get_mut(buffer)?.push(tuple);
            Ok(())
        }))
    }
}
