//! 생성 코드가 호출하는 런타임 자료구조와 스토리지 바인딩

pub mod bindings;
mod hash_table;
mod sorter;

pub use bindings::StorageBindings;
pub use hash_table::{
    HashTable, HashTableAccess, InsertCallback, Locality, NoopProbe, PrefetchKind, ProbeCallback,
    ProbeOutcome, StoreValues,
};
pub use sorter::{CompareFn, SortKeySpec, Sorter, SorterAccess, build_comparator};
