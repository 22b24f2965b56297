//! 인메모리 참조 스토리지
//!
//! 테이블은 Arrow `RecordBatch` 타일 그룹의 목록이며, 각 타일 그룹은 행별 MVCC
//! 헤더(`begin`/`end` 타임스탬프)를 함께 가진다. 컴파일된 쿼리는 이 모듈을
//! [`crate::runtime::bindings`]의 프록시를 통해서만 호출한다.

mod table;
mod tile_group;

pub use table::{ColumnDef, DataTable, TableSchema};
pub use tile_group::{ColumnLayout, RowLocation, TileGroup, TileGroupHeader};
