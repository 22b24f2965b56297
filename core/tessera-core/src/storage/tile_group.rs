use crate::error::{TesseraError, TesseraResult};
use crate::transaction::{MAX_TIMESTAMP, TransactionContext};
use crate::types::{SqlType, Value};
use arrow::array::{Array, ArrayRef};
use arrow::record_batch::RecordBatch;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Physical address of one row version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowLocation {
    pub tile_group: usize,
    pub offset: u32,
}

/// Column layout descriptor handed to scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub column: usize,
    pub ty: SqlType,
    /// Arrow array offset of the first row
    pub offset: usize,
    /// Distance in elements between consecutive rows
    pub stride: usize,
    /// 컬럼형(true) / 행 우선(false)
    pub columnar: bool,
}

/// Per-row MVCC header of a tile group
#[derive(Debug)]
pub struct TileGroupHeader {
    begin: Vec<u64>,
    end: Vec<AtomicU64>,
}

impl TileGroupHeader {
    pub(crate) fn new(num_rows: usize, begin_ts: u64) -> Self {
        Self {
            begin: vec![begin_ts; num_rows],
            end: (0..num_rows).map(|_| AtomicU64::new(MAX_TIMESTAMP)).collect(),
        }
    }

    pub fn begin_ts(&self, offset: u32) -> u64 {
        self.begin[offset as usize]
    }

    pub fn end_ts(&self, offset: u32) -> u64 {
        self.end[offset as usize].load(Ordering::Acquire)
    }

    /// Append the positions in `range` visible to `txn` to `out`, ascending
    pub fn visible_positions(
        &self,
        txn: &TransactionContext,
        range: Range<u32>,
        out: &mut Vec<u32>,
    ) {
        let end = (range.end as usize).min(self.begin.len()) as u32;
        for pos in range.start..end {
            let idx = pos as usize;
            if txn.is_visible(self.begin[idx], self.end[idx].load(Ordering::Acquire)) {
                out.push(pos);
            }
        }
    }

    /// Stamp `end` of a visible live version; `false` when already gone
    pub(crate) fn mark_deleted(&self, offset: u32, txn: &TransactionContext) -> bool {
        let idx = offset as usize;
        if self.begin[idx] > txn.read_ts() {
            return false;
        }
        self.end[idx]
            .compare_exchange(
                MAX_TIMESTAMP,
                txn.write_ts(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Reopen a version whose `end` was stamped by `txn`
    pub(crate) fn unmark_deleted(&self, offset: u32, txn: &TransactionContext) -> bool {
        self.end[offset as usize]
            .compare_exchange(
                txn.write_ts(),
                MAX_TIMESTAMP,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Immutable chunk of rows stored column-wise
#[derive(Debug)]
pub struct TileGroup {
    id: usize,
    batch: RecordBatch,
    header: TileGroupHeader,
}

impl TileGroup {
    pub(crate) fn new(id: usize, batch: RecordBatch, begin_ts: u64) -> Self {
        let header = TileGroupHeader::new(batch.num_rows(), begin_ts);
        Self { id, batch, header }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn num_rows(&self) -> u32 {
        self.batch.num_rows() as u32
    }

    pub fn header(&self) -> &TileGroupHeader {
        &self.header
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn column(&self, column: usize) -> TesseraResult<&ArrayRef> {
        if column >= self.batch.num_columns() {
            return Err(TesseraError::Storage(format!(
                "tile group {} has no column {column}",
                self.id
            )));
        }
        Ok(self.batch.column(column))
    }

    /// Fetch one column value by row offset
    pub fn value_at(&self, column: usize, offset: u32) -> TesseraResult<Value> {
        let array = self.column(column)?;
        if offset as usize >= array.len() {
            return Err(TesseraError::Storage(format!(
                "offset {offset} out of bounds in tile group {}",
                self.id
            )));
        }
        Value::from_array(array, offset as usize)
    }

    /// Materialize every column of one row
    pub fn read_row(&self, offset: u32) -> TesseraResult<Vec<Value>> {
        (0..self.batch.num_columns())
            .map(|col| self.value_at(col, offset))
            .collect()
    }

    pub fn layout(&self) -> TesseraResult<Vec<ColumnLayout>> {
        self.batch
            .columns()
            .iter()
            .enumerate()
            .map(|(column, array)| {
                Ok(ColumnLayout {
                    column,
                    ty: SqlType::from_arrow(array.data_type())?,
                    offset: array.offset(),
                    stride: 1,
                    columnar: true,
                })
            })
            .collect()
    }
}
