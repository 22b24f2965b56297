//! RowBatch / Row
//!
//! `RowBatch`는 최대 N개 후보 행에 대한 위치 기반 뷰다. 필터링 전에는
//! `[start, end)` 전체가 유효하고, 필터링 후에는 selection vector에 있는
//! 위치(오름차순, 중복 없음)만 유효하다.
//!
//! `Row`는 배치 안의 한 위치와 행 로컬 캐시를 가진다. 같은 행에서 같은
//! 속성이나 식은 최대 한 번만 계산된다.

use super::code_gen::{CompiledExpr, ExprId};
use super::query::ExecutorContext;
use crate::error::{TesseraError, TesseraResult};
use crate::storage::{RowLocation, TileGroup};
use crate::types::{AttributeId, Value};
use smallvec::SmallVec;
use std::ops::Range;

/// Lazily loads one attribute at a batch position
pub trait AttributeAccessor {
    fn access(&self, position: u32) -> TesseraResult<Value>;
}

/// Column of a stored tile group
pub struct TileGroupAccessor<'t> {
    tile_group: &'t TileGroup,
    column: usize,
}

impl<'t> TileGroupAccessor<'t> {
    pub fn new(tile_group: &'t TileGroup, column: usize) -> Self {
        Self { tile_group, column }
    }
}

impl AttributeAccessor for TileGroupAccessor<'_> {
    fn access(&self, position: u32) -> TesseraResult<Value> {
        self.tile_group.value_at(self.column, position)
    }
}

/// Slot of materialized tuples (sorter output, aggregation results, buffered rows)
pub struct TupleAccessor<'t, T> {
    tuples: &'t [T],
    slot: usize,
}

impl<'t, T: AsRef<[Value]>> TupleAccessor<'t, T> {
    pub fn new(tuples: &'t [T], slot: usize) -> Self {
        Self { tuples, slot }
    }
}

impl<T: AsRef<[Value]>> AttributeAccessor for TupleAccessor<'_, T> {
    fn access(&self, position: u32) -> TesseraResult<Value> {
        self.tuples
            .get(position as usize)
            .and_then(|tuple| tuple.as_ref().get(self.slot))
            .cloned()
            .ok_or_else(|| {
                TesseraError::Binding(format!(
                    "tuple position {position} slot {} out of range",
                    self.slot
                ))
            })
    }
}

/// Compacts a selection vector while rows are emitted or dropped
#[derive(Debug)]
pub struct OutputTracker {
    positions: Vec<u32>,
    write_pos: usize,
}

impl OutputTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            positions: vec![0; capacity],
            write_pos: 0,
        }
    }

    /// Record `position`; it survives only when `valid`
    #[inline]
    pub fn append(&mut self, position: u32, valid: bool) {
        // 분기 없이 항상 쓰고 유효할 때만 커서를 민다
        self.positions[self.write_pos] = position;
        self.write_pos += valid as usize;
    }

    pub fn len(&self) -> usize {
        self.write_pos
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn finish(mut self) -> Vec<u32> {
        self.positions.truncate(self.write_pos);
        self.positions
    }
}

pub struct RowBatch<'a> {
    tile_group: Option<usize>,
    start: u32,
    end: u32,
    selection: Vec<u32>,
    filtered: bool,
    accessors: Vec<(AttributeId, &'a dyn AttributeAccessor)>,
}

impl<'a> RowBatch<'a> {
    /// Unfiltered batch over `[range.start, range.end)`
    pub fn new(range: Range<u32>) -> Self {
        Self {
            tile_group: None,
            start: range.start,
            end: range.end.max(range.start),
            selection: Vec::new(),
            filtered: false,
            accessors: Vec::new(),
        }
    }

    /// Batch whose valid rows are exactly `selection` within `range`
    pub fn with_selection(range: Range<u32>, selection: Vec<u32>) -> Self {
        let mut batch = Self::new(range);
        batch.set_selection(selection);
        batch
    }

    pub fn in_tile_group(mut self, tile_group: usize) -> Self {
        self.tile_group = Some(tile_group);
        self
    }

    pub fn add_attribute(&mut self, attr: AttributeId, accessor: &'a dyn AttributeAccessor) {
        match self.accessors.iter_mut().find(|(id, _)| *id == attr) {
            Some(entry) => entry.1 = accessor,
            None => self.accessors.push((attr, accessor)),
        }
    }

    pub fn accessor(&self, attr: AttributeId) -> Option<&'a dyn AttributeAccessor> {
        self.accessors
            .iter()
            .find(|(id, _)| *id == attr)
            .map(|(_, accessor)| *accessor)
    }

    pub fn tile_group(&self) -> Option<usize> {
        self.tile_group
    }

    pub fn capacity(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered
    }

    /// Number of currently valid rows
    pub fn num_rows(&self) -> usize {
        if self.filtered {
            self.selection.len()
        } else {
            self.capacity()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Valid positions, materialized
    pub fn positions(&self) -> Vec<u32> {
        if self.filtered {
            self.selection.clone()
        } else {
            (self.start..self.end).collect()
        }
    }

    /// Replace the valid set; positions must be ascending and inside the batch
    pub fn set_selection(&mut self, selection: Vec<u32>) {
        debug_assert!(selection.len() <= self.capacity());
        debug_assert!(selection.windows(2).all(|w| w[0] < w[1]));
        self.selection = selection;
        self.filtered = true;
    }

    pub fn row_at<'r>(&'r self, position: u32, tracker: Option<&'r mut OutputTracker>) -> Row<'r> {
        Row {
            batch: self,
            position,
            tracker,
            cache: SmallVec::new(),
        }
    }

    /// Scalar walk; each row decides its own validity through `set_validity`
    pub fn iterate<F>(&mut self, mut f: F) -> TesseraResult<()>
    where
        F: FnMut(&mut Row<'_>) -> TesseraResult<()>,
    {
        let positions = self.positions();
        let mut tracker = OutputTracker::new(positions.len());
        for &position in &positions {
            let mut row = self.row_at(position, Some(&mut tracker));
            f(&mut row)?;
        }
        self.set_selection(tracker.finish());
        Ok(())
    }

    /// Read-only walk over the valid rows
    pub fn for_each<F>(&self, mut f: F) -> TesseraResult<()>
    where
        F: FnMut(&mut Row<'_>) -> TesseraResult<()>,
    {
        if self.filtered {
            for &position in &self.selection {
                f(&mut self.row_at(position, None))?;
            }
        } else {
            for position in self.start..self.end {
                f(&mut self.row_at(position, None))?;
            }
        }
        Ok(())
    }

    /// Walk valid positions `vector_size` at a time. The callback pushes the
    /// positions it keeps into the output vector, which becomes the selection.
    pub fn vectorized_iterate<F>(&mut self, vector_size: usize, mut f: F) -> TesseraResult<()>
    where
        F: FnMut(&RowBatch<'a>, &[u32], &mut Vec<u32>) -> TesseraResult<()>,
    {
        let positions = self.positions();
        let mut kept = Vec::with_capacity(positions.len());
        for chunk in positions.chunks(vector_size.max(1)) {
            f(self, chunk, &mut kept)?;
        }
        self.set_selection(kept);
        Ok(())
    }
}

/// Row cache key: attribute or compiled expression identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey {
    Attribute(AttributeId),
    Expression(ExprId),
}

pub struct Row<'r> {
    batch: &'r RowBatch<'r>,
    position: u32,
    tracker: Option<&'r mut OutputTracker>,
    cache: SmallVec<[(CacheKey, Value); 8]>,
}

impl<'r> Row<'r> {
    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn batch(&self) -> &'r RowBatch<'r> {
        self.batch
    }

    /// Storage address when the batch came from a tile group
    pub fn location(&self) -> Option<RowLocation> {
        self.batch.tile_group().map(|tile_group| RowLocation {
            tile_group,
            offset: self.position,
        })
    }

    /// Attribute value: cache first, then the batch accessor
    pub fn value(&mut self, attr: AttributeId) -> TesseraResult<Value> {
        let key = CacheKey::Attribute(attr);
        if let Some(value) = self.cached(key) {
            return Ok(value.clone());
        }
        let accessor = self.batch.accessor(attr).ok_or_else(|| {
            TesseraError::Binding(format!("no accessor or cached value for attribute {attr}"))
        })?;
        let value = accessor.access(self.position)?;
        self.cache.push((key, value.clone()));
        Ok(value)
    }

    /// Expression value, evaluated at most once per row
    pub fn derive_value(&mut self, expr: &CompiledExpr, exec: &ExecutorContext) -> TesseraResult<Value> {
        let key = CacheKey::Expression(expr.id);
        if let Some(value) = self.cached(key) {
            return Ok(value.clone());
        }
        let value = expr.evaluate(self, exec)?;
        self.cache.push((key, value.clone()));
        Ok(value)
    }

    /// Seed the cache; later lookups of `attr` see `value`
    pub fn register_attribute_value(&mut self, attr: AttributeId, value: Value) {
        let key = CacheKey::Attribute(attr);
        match self.cache.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.cache.push((key, value)),
        }
    }

    pub fn set_validity(&mut self, valid: bool) -> TesseraResult<()> {
        let tracker = self.tracker.as_deref_mut().ok_or_else(|| {
            TesseraError::Binding("set_validity on a row without an output tracker".into())
        })?;
        tracker.append(self.position, valid);
        Ok(())
    }

    /// Overlay row at the same position inheriting the cache, without a tracker
    pub fn fork(&self) -> Row<'r> {
        Row {
            batch: self.batch,
            position: self.position,
            tracker: None,
            cache: self.cache.clone(),
        }
    }

    fn cached(&self, key: CacheKey) -> Option<&Value> {
        self.cache.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::code_gen::{CodeGen, expr_fn};
    use crate::config::EngineConfig;
    use crate::transaction::TransactionContext;
    use crate::types::SqlType;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tuples() -> Vec<Vec<Value>> {
        (0..10)
            .map(|i| vec![Value::Integer(i), Value::varchar(format!("r{i}"))])
            .collect()
    }

    fn exec() -> ExecutorContext {
        ExecutorContext::new(TransactionContext::at(1), Vec::new(), Arc::new(EngineConfig::default()))
    }

    #[test]
    fn iterate_compacts_in_order() {
        let data = tuples();
        let ids = TupleAccessor::new(&data, 0);
        let mut batch = RowBatch::new(0..10);
        batch.add_attribute(AttributeId(0), &ids);

        batch
            .iterate(|row| {
                let keep = row.value(AttributeId(0))?.as_i64().unwrap_or(0) % 3 == 0;
                row.set_validity(keep)
            })
            .unwrap();
        assert!(batch.is_filtered());
        assert_eq!(batch.positions(), vec![0, 3, 6, 9]);

        // a second pass only sees survivors
        batch
            .iterate(|row| {
                let position = row.position();
                row.set_validity(position > 3)
            })
            .unwrap();
        assert_eq!(batch.positions(), vec![6, 9]);
    }

    #[test]
    fn vectorized_iterate_honours_chunk_size() {
        let data = tuples();
        let ids = TupleAccessor::new(&data, 0);
        let mut batch = RowBatch::new(0..10);
        batch.add_attribute(AttributeId(0), &ids);
        let mut chunk_sizes = Vec::new();
        batch
            .vectorized_iterate(4, |batch, chunk, out| {
                chunk_sizes.push(chunk.len());
                for &position in chunk {
                    let mut row = batch.row_at(position, None);
                    if row.value(AttributeId(0))?.as_i64() != Some(5) {
                        out.push(position);
                    }
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(chunk_sizes, vec![4, 4, 2]);
        assert_eq!(batch.num_rows(), 9);
    }

    #[test]
    fn derive_value_evaluates_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut codegen = CodeGen::new(Arc::new(EngineConfig::default()));
        let expr = codegen.emit(
            SqlType::Integer,
            expr_fn(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(Value::Integer(42))
            }),
        );
        let exec = exec();
        let batch = RowBatch::new(0..1);
        let mut row = batch.row_at(0, None);
        assert_eq!(row.derive_value(&expr, &exec).unwrap(), Value::Integer(42));
        assert_eq!(row.derive_value(&expr, &exec).unwrap(), Value::Integer(42));
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        // forks inherit the cache
        let mut fork = row.fork();
        fork.derive_value(&expr, &exec).unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn missing_accessor_is_binding_error() {
        let batch = RowBatch::new(0..1);
        let mut row = batch.row_at(0, None);
        assert!(matches!(row.value(AttributeId(7)), Err(TesseraError::Binding(_))));
        row.register_attribute_value(AttributeId(7), Value::Boolean(true));
        assert_eq!(row.value(AttributeId(7)).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn set_validity_requires_tracker() {
        let batch = RowBatch::new(0..1);
        let mut row = batch.row_at(0, None);
        assert!(row.set_validity(true).is_err());
    }
}
