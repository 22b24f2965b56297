//! Sorter: 튜플 버퍼 + 생성된 비교 함수
//!
//! 정렬 전에는 append만, 정렬 후에는 순회만 한다. 이 순서는 호출자가 지킨다.
//! 병렬 모드에서는 스레드별 Sorter가 각자 버퍼링한 뒤 `finish`에서
//! [`Sorter::sort_parallel`]로 파티션별 정렬 + k-way merge를 한다.

use crate::error::{TesseraError, TesseraResult};
use crate::types::Value;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::debug;

/// Three-way comparison over two materialized tuples: <0, 0, >0
pub type CompareFn = Arc<dyn Fn(&[Value], &[Value]) -> i32 + Send + Sync>;

/// One sort key: tuple slot and direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKeySpec {
    pub slot: usize,
    pub descending: bool,
}

/// Build the comparator for `keys`.
///
/// The first key that compares non-equal decides; descending keys swap operands.
pub fn build_comparator(keys: Vec<SortKeySpec>) -> CompareFn {
    Arc::new(move |left: &[Value], right: &[Value]| -> i32 {
        let mut result = 0;
        for key in &keys {
            if result != 0 {
                break;
            }
            let (a, b) = if key.descending {
                (&right[key.slot], &left[key.slot])
            } else {
                (&left[key.slot], &right[key.slot])
            };
            result = match a.compare(b) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
        }
        result
    })
}

pub struct Sorter {
    comparator: CompareFn,
    tuple_size: usize,
    tuples: Vec<Box<[Value]>>,
    sorted: bool,
}

impl std::fmt::Debug for Sorter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sorter")
            .field("tuple_size", &self.tuple_size)
            .field("len", &self.tuples.len())
            .field("sorted", &self.sorted)
            .finish()
    }
}

impl Sorter {
    pub fn new(comparator: CompareFn, tuple_size: usize) -> Self {
        Self {
            comparator,
            tuple_size,
            tuples: Vec::new(),
            sorted: false,
        }
    }

    /// Empty sorter sharing this one's comparator and tuple format
    pub fn sibling(&self) -> Self {
        Self::new(Arc::clone(&self.comparator), self.tuple_size)
    }

    pub fn append(&mut self, tuple: Vec<Value>) -> TesseraResult<()> {
        if tuple.len() != self.tuple_size {
            return Err(TesseraError::InvalidArguments(format!(
                "sorter tuple has {} values, expected {}",
                tuple.len(),
                self.tuple_size
            )));
        }
        self.tuples.push(tuple.into_boxed_slice());
        Ok(())
    }

    /// Stable sort of the buffered tuples
    pub fn sort(&mut self) {
        let comparator = &self.comparator;
        self.tuples.sort_by(|a, b| comparator(a, b).cmp(&0));
        self.sorted = true;
    }

    /// Keep only the first `k` tuples of the sorted order
    pub fn sort_top_k(&mut self, k: usize) {
        let comparator = &self.comparator;
        if k == 0 {
            self.tuples.clear();
        } else if k < self.tuples.len() {
            self.tuples
                .select_nth_unstable_by(k - 1, |a, b| comparator(a, b).cmp(&0));
            self.tuples.truncate(k);
        }
        self.sort();
    }

    /// Sort each partition on the rayon pool, then merge them (and any
    /// tuples already buffered here) into one ordered sequence.
    pub fn sort_parallel(&mut self, partitions: Vec<Sorter>) {
        let mut parts: Vec<Vec<Box<[Value]>>> = Vec::with_capacity(partitions.len() + 1);
        if !self.tuples.is_empty() {
            parts.push(std::mem::take(&mut self.tuples));
        }
        parts.extend(
            partitions
                .into_iter()
                .map(|p| p.tuples)
                .filter(|tuples| !tuples.is_empty()),
        );

        let comparator = &self.comparator;
        parts
            .par_iter_mut()
            .for_each(|part| part.sort_by(|a, b| comparator(a, b).cmp(&0)));

        debug!(partitions = parts.len(), "sorter merge");
        self.tuples = merge_sorted(parts, comparator);
        self.sorted = true;
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn tuple(&self, rank: usize) -> Option<&[Value]> {
        self.tuples.get(rank).map(|t| &t[..])
    }

    pub fn iter(&self) -> impl Iterator<Item = &[Value]> + '_ {
        self.tuples.iter().map(|t| &t[..])
    }

    /// Expose the tuples in rank order, `vector_size` at a time
    pub fn vectorized_iterate<F>(&self, vector_size: usize, mut f: F) -> TesseraResult<()>
    where
        F: FnMut(&SorterAccess<'_>) -> TesseraResult<()>,
    {
        for (chunk_idx, chunk) in self.tuples.chunks(vector_size.max(1)).enumerate() {
            let access = SorterAccess {
                tuples: chunk,
                base_rank: chunk_idx * vector_size.max(1),
            };
            f(&access)?;
        }
        Ok(())
    }

    /// Release buffered tuples
    pub fn destroy(&mut self) {
        self.tuples = Vec::new();
        self.sorted = false;
    }
}

/// Random access by rank within one chunk of sorted output
pub struct SorterAccess<'s> {
    tuples: &'s [Box<[Value]>],
    base_rank: usize,
}

impl<'s> SorterAccess<'s> {
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Global rank of the chunk's first tuple
    pub fn base_rank(&self) -> usize {
        self.base_rank
    }

    pub fn tuple(&self, position: usize) -> &'s [Value] {
        &self.tuples[position]
    }

    pub fn tuples(&self) -> &'s [Box<[Value]>] {
        self.tuples
    }
}

struct MergeHead<'c> {
    tuple: Box<[Value]>,
    partition: usize,
    compare: &'c CompareFn,
}

// BinaryHeap은 max-heap이므로 순서를 뒤집는다; 같으면 앞 파티션 우선
impl Ord for MergeHead<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&other.tuple, &self.tuple)
            .cmp(&0)
            .then_with(|| other.partition.cmp(&self.partition))
    }
}

impl PartialOrd for MergeHead<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeHead<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeHead<'_> {}

fn merge_sorted(parts: Vec<Vec<Box<[Value]>>>, compare: &CompareFn) -> Vec<Box<[Value]>> {
    if parts.len() <= 1 {
        return parts.into_iter().next().unwrap_or_default();
    }
    let total = parts.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut iters: Vec<_> = parts.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (partition, iter) in iters.iter_mut().enumerate() {
        if let Some(tuple) = iter.next() {
            heap.push(MergeHead {
                tuple,
                partition,
                compare,
            });
        }
    }
    while let Some(MergeHead {
        tuple, partition, ..
    }) = heap.pop()
    {
        out.push(tuple);
        if let Some(next) = iters[partition].next() {
            heap.push(MergeHead {
                tuple: next,
                partition,
                compare,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_tuple(a: i32, b: i32) -> Vec<Value> {
        vec![Value::Integer(a), Value::Integer(b)]
    }

    fn collect(sorter: &Sorter) -> Vec<(i64, i64)> {
        sorter
            .iter()
            .map(|t| (t[0].as_i64().unwrap(), t[1].as_i64().unwrap()))
            .collect()
    }

    #[test]
    fn ties_fall_through_to_next_key() {
        let cmp = build_comparator(vec![
            SortKeySpec { slot: 0, descending: false },
            SortKeySpec { slot: 1, descending: true },
        ]);
        let mut sorter = Sorter::new(cmp, 2);
        for (a, b) in [(2, 1), (1, 5), (2, 9), (1, 7)] {
            sorter.append(int_tuple(a, b)).unwrap();
        }
        sorter.sort();
        assert_eq!(collect(&sorter), vec![(1, 7), (1, 5), (2, 9), (2, 1)]);
    }

    #[test]
    fn nulls_sort_first_ascending() {
        let mut sorter = Sorter::new(build_comparator(vec![SortKeySpec { slot: 0, descending: false }]), 1);
        sorter.append(vec![Value::Integer(3)]).unwrap();
        sorter.append(vec![Value::Null]).unwrap();
        sorter.append(vec![Value::Integer(1)]).unwrap();
        sorter.sort();
        assert!(sorter.tuple(0).unwrap()[0].is_null());
        assert_eq!(sorter.tuple(2).unwrap()[0], Value::Integer(3));
    }

    #[test]
    fn parallel_merge_orders_all_partitions() {
        let cmp = build_comparator(vec![SortKeySpec { slot: 0, descending: false }]);
        let mut main = Sorter::new(cmp, 2);
        let mut partitions = Vec::new();
        for p in 0..4 {
            let mut part = main.sibling();
            for i in 0..25 {
                part.append(int_tuple((i * 7 + p * 3) % 50, p)).unwrap();
            }
            partitions.push(part);
        }
        main.sort_parallel(partitions);
        assert_eq!(main.len(), 100);
        let keys: Vec<i64> = collect(&main).into_iter().map(|(k, _)| k).collect();
        assert!(keys.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn top_k_keeps_leading_ranks() {
        let cmp = build_comparator(vec![SortKeySpec { slot: 0, descending: true }]);
        let mut sorter = Sorter::new(cmp, 2);
        for i in 0..100 {
            sorter.append(int_tuple(i, 0)).unwrap();
        }
        sorter.sort_top_k(3);
        let keys: Vec<i64> = collect(&sorter).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![99, 98, 97]);
    }

    #[test]
    fn vectorized_iterate_reports_ranks() {
        let cmp = build_comparator(vec![SortKeySpec { slot: 0, descending: false }]);
        let mut sorter = Sorter::new(cmp, 2);
        for i in (0..10).rev() {
            sorter.append(int_tuple(i, i)).unwrap();
        }
        sorter.sort();
        let mut seen = Vec::new();
        sorter
            .vectorized_iterate(4, |access| {
                for pos in 0..access.len() {
                    seen.push((access.base_rank() + pos, access.tuple(pos)[0].as_i64().unwrap()));
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|(rank, key)| *rank as i64 == *key));
    }

    #[test]
    fn rejects_wrong_width() {
        let mut sorter = Sorter::new(build_comparator(vec![]), 2);
        assert!(sorter.append(vec![Value::Null]).is_err());
    }
}
