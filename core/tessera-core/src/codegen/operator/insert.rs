//! INSERT INTO ... VALUES / INSERT INTO ... SELECT
//!
//! VALUES 형식은 자체 소스를 등록해 각 튜플의 식을 한 행짜리 배치에서 평가한다.
//! SELECT 형식은 자식 출력을 워커별로 모았다가 단계가 끝나면 한 번에 삽입한다.
//! 값은 컬럼 타입으로 캐스팅되며, NOT NULL 위반은 스토리지가 거부한다.

use super::{OperatorTranslator, not_a_consumer, wrong_plan};
use crate::codegen::code_gen::{CompiledExpr, RowFn, finish_fn, row_fn, source_fn, thread_init_fn};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::pipeline::{ConsumerContext, TranslatorId};
use crate::codegen::query_state::StateSlot;
use crate::codegen::row_batch::RowBatch;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{InsertSource, PlanNode};
use crate::storage::DataTable;
use crate::types::{AttributeId, SqlType, Value};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

type Buffered = Vec<Vec<Value>>;

enum Source {
    Values(Vec<Vec<CompiledExpr>>),
    Select {
        child: TranslatorId,
        attributes: Vec<AttributeId>,
        rows: StateSlot<Buffered>,
    },
}

pub struct InsertTranslator {
    id: TranslatorId,
    at: ConsumerContext,
    table: Arc<DataTable>,
    column_types: Vec<SqlType>,
    source: Source,
}

fn check_arity(table: &DataTable, width: usize) -> TesseraResult<()> {
    if width != table.schema().len() {
        return Err(TesseraError::Binding(format!(
            "insert into '{}' supplies {width} values for {} columns",
            table.name(),
            table.schema().len()
        )));
    }
    Ok(())
}

impl InsertTranslator {
    pub fn create(
        plan: &PlanNode,
        id: TranslatorId,
        at: ConsumerContext,
        ctx: &mut CompilationContext,
    ) -> TesseraResult<Rc<dyn OperatorTranslator>> {
        let PlanNode::Insert { table, source } = plan else {
            return Err(wrong_plan("insert", plan));
        };
        let column_types: Vec<SqlType> = table.schema().columns().iter().map(|c| c.ty).collect();

        let source = match source {
            InsertSource::Values(tuples) => {
                let mut compiled = Vec::with_capacity(tuples.len());
                for tuple in tuples {
                    check_arity(table, tuple.len())?;
                    compiled.push(
                        tuple
                            .iter()
                            .map(|expr| ctx.compile_expression(expr))
                            .collect::<TesseraResult<Vec<_>>>()?,
                    );
                }
                Source::Values(compiled)
            }
            InsertSource::Select(input) => {
                let attributes: Vec<AttributeId> =
                    input.output_attributes().iter().map(|a| a.id).collect();
                check_arity(table, attributes.len())?;
                let child = ctx.prepare_plan(input, at.pipeline)?;

                let insert = ctx.bindings().insert.clone();
                let (target, types) = (Arc::clone(table), column_types.clone());
                let pipeline = ctx.pipeline_mut(at.pipeline)?;
                let rows = pipeline.register_thread_state::<Buffered>("insert_rows")?;
                pipeline.add_thread_init(thread_init_fn(move |thread, _, _| {
                    thread.install(rows, Buffered::new())
                }));
                pipeline.add_finish(finish_fn(move |_, threads, exec| {
                    let mut all = Buffered::new();
                    for thread in threads.iter_mut() {
                        all.append(thread.get_mut(rows)?);
                    }
                    for row in &mut all {
                        cast_row(row, &types)?;
                    }
                    let inserted = insert(&*target, exec.txn(), &all)?;
                    debug!(table = target.name(), inserted, "insert select applied");
                    exec.add_processed(inserted as u64);
                    Ok(())
                }));
                Source::Select {
                    child,
                    attributes,
                    rows,
                }
            }
        };

        Ok(Rc::new(Self {
            id,
            at,
            table: Arc::clone(table),
            column_types,
            source,
        }))
    }
}

fn cast_row(row: &mut [Value], types: &[SqlType]) -> TesseraResult<()> {
    for (value, ty) in row.iter_mut().zip(types) {
        if !value.is_null() {
            *value = value.cast_to(*ty)?;
        }
    }
    Ok(())
}

impl OperatorTranslator for InsertTranslator {
    fn id(&self) -> TranslatorId {
        self.id
    }

    fn name(&self) -> &'static str {
        "insert"
    }

    fn produce(&self, ctx: &mut CompilationContext) -> TesseraResult<()> {
        let tuples = match &self.source {
            Source::Select { child, .. } => return ctx.produce(*child),
            Source::Values(tuples) => tuples.clone(),
        };
        let insert = ctx.bindings().insert.clone();
        let table = Arc::clone(&self.table);
        let types = self.column_types.clone();
        let source = source_fn(move |scope, _| {
            let exec = scope.exec;
            let batch = RowBatch::new(0..1);
            let rows = tuples
                .iter()
                .map(|tuple| {
                    let mut row = batch.row_at(0, None);
                    let mut values = tuple
                        .iter()
                        .map(|expr| row.derive_value(expr, exec))
                        .collect::<TesseraResult<Vec<_>>>()?;
                    cast_row(&mut values, &types)?;
                    Ok(values)
                })
                .collect::<TesseraResult<Vec<_>>>()?;
            let inserted = insert(&*table, exec.txn(), &rows)?;
            debug!(table = table.name(), inserted, "insert values applied");
            exec.add_processed(inserted as u64);
            Ok(())
        });
        ctx.register_pipeline_source(self.id, self.at.pipeline, source, None)
    }

    fn consume_row(&self, _ctx: &mut CompilationContext, _at: ConsumerContext) -> TesseraResult<RowFn> {
        let Source::Select {
            attributes, rows, ..
        } = &self.source
        else {
            return Err(not_a_consumer("insert values"));
        };
        let (attributes, rows) = (attributes.clone(), *rows);
        Ok(row_fn(move |scope, row| {
            let tuple = attributes
                .iter()
                .map(|attr| row.value(*attr))
                .collect::<TesseraResult<Vec<_>>>()?;
            scope.thread.get_mut(rows)?.push(tuple);
            Ok(())
        }))
    }
}
