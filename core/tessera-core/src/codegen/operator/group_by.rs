//! Group-by 번역기들이 공유하는 조각
//!
//! 집계 결과 튜플 레이아웃은 (그룹 키 속성들, 집계 출력 속성들) 순서이며
//! HAVING은 이 튜플 위에서 평가된다.

use crate::codegen::code_gen::{BatchFn, CompiledExpr, WorkerScope};
use crate::codegen::compilation_context::CompilationContext;
use crate::codegen::query::ExecutorContext;
use crate::codegen::row_batch::{Row, RowBatch, TupleAccessor};
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{AggregateTerm, Expr};
use crate::types::{AttributeId, AttributeInfo, SqlType, Value};
use smallvec::SmallVec;

pub(super) type GroupKey = SmallVec<[Value; 4]>;
pub(super) type AggregateInputs = SmallVec<[Value; 8]>;

/// One compiled input per aggregate term; `None` for `COUNT(*)`
pub(super) fn compile_inputs(
    ctx: &mut CompilationContext,
    terms: &[AggregateTerm],
) -> TesseraResult<Vec<Option<CompiledExpr>>> {
    terms
        .iter()
        .map(|term| term.input.as_ref().map(|expr| ctx.compile_expression(expr)).transpose())
        .collect()
}

pub(super) fn compile_having(
    ctx: &mut CompilationContext,
    having: Option<&Expr>,
) -> TesseraResult<Option<CompiledExpr>> {
    let Some(having) = having else {
        return Ok(None);
    };
    let having = ctx.compile_expression(having)?;
    if having.ty != SqlType::Boolean {
        return Err(TesseraError::type_mismatch("BOOLEAN", having.ty.name()));
    }
    Ok(Some(having))
}

pub(super) fn output_layout(group_by: &[AttributeInfo], terms: &[AggregateTerm]) -> Vec<AttributeId> {
    group_by
        .iter()
        .map(|attr| attr.id)
        .chain(terms.iter().map(|term| term.output.id))
        .collect()
}

pub(super) fn derive_group_key(row: &mut Row<'_>, keys: &[AttributeId]) -> TesseraResult<GroupKey> {
    keys.iter().map(|attr| row.value(*attr)).collect()
}

pub(super) fn derive_inputs(
    row: &mut Row<'_>,
    inputs: &[Option<CompiledExpr>],
    exec: &ExecutorContext,
) -> TesseraResult<AggregateInputs> {
    inputs
        .iter()
        .map(|input| match input {
            Some(expr) => row.derive_value(expr, exec),
            None => Ok(Value::Null),
        })
        .collect()
}

/// Hand finalized group tuples to the parent pipeline, dropping the ones HAVING rejects
pub(super) fn emit_groups(
    scope: &mut WorkerScope<'_>,
    tuples: &[Vec<Value>],
    layout: &[AttributeId],
    having: Option<&CompiledExpr>,
    consumer: &BatchFn,
) -> TesseraResult<()> {
    if tuples.is_empty() {
        return Ok(());
    }
    let accessors: Vec<TupleAccessor<'_, Vec<Value>>> = (0..layout.len())
        .map(|slot| TupleAccessor::new(tuples, slot))
        .collect();
    let mut batch = RowBatch::new(0..tuples.len() as u32);
    for (attr, accessor) in layout.iter().zip(&accessors) {
        batch.add_attribute(*attr, accessor);
    }
    if let Some(having) = having {
        let exec = scope.exec;
        batch.iterate(|row| {
            let keep = row.derive_value(having, exec)?.is_true();
            row.set_validity(keep)
        })?;
        if batch.is_empty() {
            return Ok(());
        }
    }
    consumer(scope, &mut batch)
}
