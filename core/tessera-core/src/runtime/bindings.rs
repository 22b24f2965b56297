//! Storage / transaction bindings
//!
//! 생성 코드에서 스토리지를 부르는 유일한 경로. 각 함수는 [`ProxyRegistry`]에
//! 이름으로 한 번 선언되고, 번역기는 [`StorageBindings`] 핸들을 캡처한다.

use crate::codegen::{CodeGen, Proxy};
use crate::error::TesseraResult;
use crate::storage::{DataTable, RowLocation, TileGroup};
use crate::transaction::TransactionContext;
use crate::types::Value;
use std::ops::Range;
use std::sync::Arc;

/// Tile groups of a table in an optional sub-range
pub type ChunksFn = dyn Fn(&DataTable, Option<Range<usize>>) -> Vec<Arc<TileGroup>> + Send + Sync;
/// Append the positions of `range` visible to the transaction
pub type VisibilityFn =
    dyn Fn(&TileGroup, &TransactionContext, Range<u32>, &mut Vec<u32>) + Send + Sync;
pub type InsertFn =
    dyn Fn(&DataTable, &TransactionContext, &[Vec<Value>]) -> TesseraResult<usize> + Send + Sync;
pub type DeleteFn =
    dyn Fn(&DataTable, &TransactionContext, RowLocation) -> TesseraResult<bool> + Send + Sync;
pub type ReadRowFn = dyn Fn(&DataTable, RowLocation) -> TesseraResult<Vec<Value>> + Send + Sync;
/// Check a row against the table's column constraints without writing
pub type ValidateFn = dyn Fn(&DataTable, &[Value]) -> TesseraResult<()> + Send + Sync;
/// Undo a delete made by the same transaction
pub type RestoreFn = DeleteFn;

#[derive(Debug, Clone)]
pub struct StorageBindings {
    pub chunks: Proxy<ChunksFn>,
    pub visible_positions: Proxy<VisibilityFn>,
    pub insert: Proxy<InsertFn>,
    pub delete: Proxy<DeleteFn>,
    pub read_row: Proxy<ReadRowFn>,
    pub validate: Proxy<ValidateFn>,
    pub restore: Proxy<RestoreFn>,
}

impl StorageBindings {
    pub fn declare(codegen: &mut CodeGen) -> TesseraResult<Self> {
        let proxies = codegen.proxies();
        Ok(Self {
            chunks: proxies.declare::<ChunksFn>("storage_chunks", || {
                let f: Arc<ChunksFn> =
                    Arc::new(|table: &DataTable, range: Option<Range<usize>>| table.chunks(range));
                f
            })?,
            visible_positions: proxies.declare::<VisibilityFn>("txn_visible_positions", || {
                let f: Arc<VisibilityFn> = Arc::new(
                    |group: &TileGroup,
                     txn: &TransactionContext,
                     range: Range<u32>,
                     out: &mut Vec<u32>| {
                        group.header().visible_positions(txn, range, out)
                    },
                );
                f
            })?,
            insert: proxies.declare::<InsertFn>("storage_insert", || {
                let f: Arc<InsertFn> = Arc::new(
                    |table: &DataTable, txn: &TransactionContext, rows: &[Vec<Value>]| {
                        table.insert_rows(txn, rows)
                    },
                );
                f
            })?,
            delete: proxies.declare::<DeleteFn>("storage_delete", || {
                let f: Arc<DeleteFn> = Arc::new(
                    |table: &DataTable, txn: &TransactionContext, location: RowLocation| {
                        table.delete_row(txn, location)
                    },
                );
                f
            })?,
            read_row: proxies.declare::<ReadRowFn>("storage_read_row", || {
                let f: Arc<ReadRowFn> =
                    Arc::new(|table: &DataTable, location: RowLocation| table.read_row(location));
                f
            })?,
            validate: proxies.declare::<ValidateFn>("storage_validate_row", || {
                let f: Arc<ValidateFn> =
                    Arc::new(|table: &DataTable, row: &[Value]| table.validate_row(row));
                f
            })?,
            restore: proxies.declare::<RestoreFn>("storage_restore_row", || {
                let f: Arc<RestoreFn> = Arc::new(
                    |table: &DataTable, txn: &TransactionContext, location: RowLocation| {
                        table.restore_row(txn, location)
                    },
                );
                f
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::{ColumnDef, TableSchema};
    use crate::types::SqlType;

    #[test]
    fn bindings_reach_storage() {
        let mut codegen = CodeGen::new(Arc::new(EngineConfig::default()));
        let bindings = StorageBindings::declare(&mut codegen).unwrap();
        // 두 번째 선언은 기존 프록시를 재사용
        StorageBindings::declare(&mut codegen).unwrap();
        assert_eq!(codegen.proxies().len(), 7);

        let table = DataTable::new(
            "t",
            TableSchema::new(vec![ColumnDef::new("a", SqlType::Integer)]),
            4,
        );
        let writer = TransactionContext::at(1);
        let rows: Vec<Vec<Value>> = (0..6).map(|i| vec![Value::Integer(i)]).collect();
        assert_eq!((bindings.insert)(&table, &writer, &rows).unwrap(), 6);

        let chunks = (bindings.chunks)(&table, None);
        assert_eq!(chunks.len(), 2);

        let reader = TransactionContext::at(2);
        let location = RowLocation { tile_group: 0, offset: 1 };
        assert!((bindings.delete)(&table, &reader, location).unwrap());

        let later = TransactionContext::at(3);
        let mut visible = Vec::new();
        (bindings.visible_positions)(&chunks[0], &later, 0..chunks[0].num_rows(), &mut visible);
        assert_eq!(visible, vec![0, 2, 3]);

        assert!((bindings.restore)(&table, &reader, location).unwrap());
        visible.clear();
        (bindings.visible_positions)(&chunks[0], &later, 0..chunks[0].num_rows(), &mut visible);
        assert_eq!(visible, vec![0, 1, 2, 3]);
        assert!((bindings.validate)(&table, &[Value::Null]).is_ok());
        assert!((bindings.validate)(&table, &[]).is_err());
        assert_eq!(
            (bindings.read_row)(&table, RowLocation { tile_group: 1, offset: 0 }).unwrap(),
            vec![Value::Integer(4)]
        );
    }
}
