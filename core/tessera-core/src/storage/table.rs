use super::{RowLocation, TileGroup};
use crate::error::{TesseraError, TesseraResult};
use crate::transaction::TransactionContext;
use crate::types::{SqlType, Value, build_array};
use arrow::array::ArrayRef;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: SqlType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: &str, ty: SqlType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered column definitions of a table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSchema {
    columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.ty.to_arrow(), c.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

/// In-memory table: an append-only list of tile groups
#[derive(Debug)]
pub struct DataTable {
    name: String,
    schema: TableSchema,
    arrow_schema: SchemaRef,
    tile_group_size: usize,
    tile_groups: RwLock<Vec<Arc<TileGroup>>>,
}

impl DataTable {
    pub fn new(name: &str, schema: TableSchema, tile_group_size: usize) -> Arc<Self> {
        let arrow_schema = schema.to_arrow();
        Arc::new(Self {
            name: name.to_string(),
            schema,
            arrow_schema,
            tile_group_size: tile_group_size.max(1),
            tile_groups: RwLock::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::clone(&self.arrow_schema)
    }

    pub fn tile_group_count(&self) -> usize {
        self.tile_groups.read().len()
    }

    pub fn tile_group(&self, id: usize) -> Option<Arc<TileGroup>> {
        self.tile_groups.read().get(id).cloned()
    }

    /// Chunk iteration primitive: tile groups in `range` (all when `None`)
    pub fn chunks(&self, range: Option<Range<usize>>) -> Vec<Arc<TileGroup>> {
        let groups = self.tile_groups.read();
        let range = range.unwrap_or(0..groups.len());
        let end = range.end.min(groups.len());
        groups
            .get(range.start.min(end)..end)
            .map(<[Arc<TileGroup>]>::to_vec)
            .unwrap_or_default()
    }

    /// Append rows as new tile groups stamped with `txn`'s write timestamp.
    ///
    /// Values are cast to the column type; NULL in a NOT NULL column fails.
    pub fn insert_rows(&self, txn: &TransactionContext, rows: &[Vec<Value>]) -> TesseraResult<usize> {
        for row in rows {
            self.validate_row(row)?;
        }
        let mut groups = self.tile_groups.write();
        for chunk in rows.chunks(self.tile_group_size) {
            let columns: Vec<ArrayRef> = self
                .schema
                .columns()
                .iter()
                .enumerate()
                .map(|(col, def)| build_array(def.ty, chunk.iter().map(|row| &row[col])))
                .collect::<TesseraResult<_>>()?;
            let batch = RecordBatch::try_new(Arc::clone(&self.arrow_schema), columns)?;
            let id = groups.len();
            groups.push(Arc::new(TileGroup::new(id, batch, txn.write_ts())));
        }
        debug!(table = %self.name, rows = rows.len(), "inserted rows");
        Ok(rows.len())
    }

    /// Delete one visible row version; `Ok(false)` if it was not visible
    pub fn delete_row(&self, txn: &TransactionContext, location: RowLocation) -> TesseraResult<bool> {
        let group = self.locate(location)?;
        let header = group.header();
        if !txn.is_visible(header.begin_ts(location.offset), header.end_ts(location.offset)) {
            return Ok(false);
        }
        Ok(header.mark_deleted(location.offset, txn))
    }

    /// Undo a [`DataTable::delete_row`] made by the same `txn`
    pub fn restore_row(&self, txn: &TransactionContext, location: RowLocation) -> TesseraResult<bool> {
        let group = self.locate(location)?;
        Ok(group.header().unmark_deleted(location.offset, txn))
    }

    pub fn read_row(&self, location: RowLocation) -> TesseraResult<Vec<Value>> {
        self.locate(location)?.read_row(location.offset)
    }

    /// Number of rows visible to `txn`
    pub fn visible_row_count(&self, txn: &TransactionContext) -> usize {
        let mut visible = Vec::new();
        for group in self.chunks(None) {
            group
                .header()
                .visible_positions(txn, 0..group.num_rows(), &mut visible);
        }
        visible.len()
    }

    fn locate(&self, location: RowLocation) -> TesseraResult<Arc<TileGroup>> {
        let group = self.tile_group(location.tile_group).ok_or_else(|| {
            TesseraError::Storage(format!(
                "table '{}' has no tile group {}",
                self.name, location.tile_group
            ))
        })?;
        if location.offset >= group.num_rows() {
            return Err(TesseraError::Storage(format!(
                "offset {} out of bounds in tile group {}",
                location.offset, location.tile_group
            )));
        }
        Ok(group)
    }

    /// Check arity, NOT NULL and castability of `row` without writing anything
    pub fn validate_row(&self, row: &[Value]) -> TesseraResult<()> {
        if row.len() != self.schema.len() {
            return Err(TesseraError::InvalidArguments(format!(
                "table '{}' expects {} columns, got {}",
                self.name,
                self.schema.len(),
                row.len()
            )));
        }
        for (value, def) in row.iter().zip(self.schema.columns()) {
            if value.is_null() && !def.nullable {
                return Err(TesseraError::execution(
                    format!("NULL in NOT NULL column '{}'", def.name),
                    format!("insert into '{}'", self.name),
                ));
            }
            value.cast_to(def.ty)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionManager;

    fn numbers_table(tile_group_size: usize) -> Arc<DataTable> {
        let schema = TableSchema::new(vec![
            ColumnDef::new("id", SqlType::Integer).not_null(),
            ColumnDef::new("name", SqlType::Varchar),
        ]);
        DataTable::new("numbers", schema, tile_group_size)
    }

    fn rows(n: i32) -> Vec<Vec<Value>> {
        (0..n)
            .map(|i| vec![Value::Integer(i), Value::varchar(format!("n{i}"))])
            .collect()
    }

    #[test]
    fn insert_splits_into_tile_groups() {
        let manager = TransactionManager::new();
        let table = numbers_table(4);
        let txn = manager.begin();
        assert_eq!(table.insert_rows(&txn, &rows(10)).unwrap(), 10);
        assert_eq!(table.tile_group_count(), 3);
        assert_eq!(table.chunks(Some(1..3)).len(), 2);
        assert_eq!(
            table.read_row(RowLocation { tile_group: 2, offset: 1 }).unwrap(),
            vec![Value::Integer(9), Value::varchar("n9")]
        );
    }

    #[test]
    fn delete_hides_row_from_later_snapshots() {
        let manager = TransactionManager::new();
        let table = numbers_table(8);
        let writer = manager.begin();
        table.insert_rows(&writer, &rows(3)).unwrap();

        let old_reader = manager.begin();
        let deleter = manager.begin();
        let loc = RowLocation { tile_group: 0, offset: 1 };
        assert!(table.delete_row(&deleter, loc).unwrap());
        assert!(!table.delete_row(&deleter, loc).unwrap());

        let new_reader = manager.begin();
        assert_eq!(table.visible_row_count(&old_reader), 3);
        assert_eq!(table.visible_row_count(&new_reader), 2);
    }

    #[test]
    fn restore_undoes_own_delete_only() {
        let manager = TransactionManager::new();
        let table = numbers_table(8);
        let writer = manager.begin();
        table.insert_rows(&writer, &rows(2)).unwrap();
        manager.end(&writer);

        let deleter = manager.begin();
        let other = manager.begin();
        let loc = RowLocation { tile_group: 0, offset: 0 };
        assert!(table.delete_row(&deleter, loc).unwrap());
        assert!(!table.restore_row(&other, loc).unwrap());
        assert!(table.restore_row(&deleter, loc).unwrap());
        assert!(!table.restore_row(&deleter, loc).unwrap());

        assert_eq!(table.visible_row_count(&manager.begin()), 2);
    }

    #[test]
    fn validate_row_writes_nothing() {
        let table = numbers_table(8);
        assert!(table.validate_row(&[Value::Integer(1), Value::Null]).is_ok());
        assert!(table.validate_row(&[Value::Null, Value::Null]).is_err());
        assert!(matches!(
            table.validate_row(&[Value::Integer(1)]),
            Err(TesseraError::InvalidArguments(_))
        ));
        assert_eq!(table.tile_group_count(), 0);
    }

    #[test]
    fn rejects_null_in_not_null_column() {
        let table = numbers_table(8);
        let txn = TransactionContext::at(1);
        let err = table
            .insert_rows(&txn, &[vec![Value::Null, Value::varchar("x")]])
            .unwrap_err();
        assert!(matches!(err, TesseraError::Execution { .. }));
        assert_eq!(table.tile_group_count(), 0);
    }

    #[test]
    fn snapshot_before_insert_sees_nothing() {
        let table = numbers_table(8);
        table.insert_rows(&TransactionContext::at(5), &rows(2)).unwrap();
        assert_eq!(table.visible_row_count(&TransactionContext::at(4)), 0);
        assert_eq!(table.visible_row_count(&TransactionContext::at(5)), 2);
    }
}
