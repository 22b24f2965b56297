// Runtime Property Tests
//
// 정렬기 / 해시 테이블 / 행 배치 불변식을 무작위 입력으로 검증

use proptest::prelude::*;
use tessera_core::codegen::RowBatch;
use tessera_core::runtime::{HashTable, NoopProbe, SortKeySpec, Sorter, StoreValues, build_comparator};
use tessera_core::types::Value;

use std::cmp::Ordering;
use std::collections::HashMap;

// ─── Helpers ────────────────────────────────────────────

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(Value::Null),
        6 => (-50i64..50).prop_map(Value::BigInt),
    ]
}

fn tuples(width: usize) -> impl Strategy<Value = Vec<Vec<Value>>> {
    prop::collection::vec(prop::collection::vec(value(), width), 0..200)
}

fn sorter(keys: &[SortKeySpec], width: usize, rows: &[Vec<Value>]) -> Sorter {
    let mut sorter = Sorter::new(build_comparator(keys.to_vec()), width);
    for row in rows {
        sorter.append(row.clone()).unwrap();
    }
    sorter
}

fn key_order(keys: &[SortKeySpec], a: &[Value], b: &[Value]) -> Ordering {
    for key in keys {
        let ord = a[key.slot].compare(&b[key.slot]);
        let ord = if key.descending { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

const KEYS: [SortKeySpec; 2] = [
    SortKeySpec {
        slot: 1,
        descending: true,
    },
    SortKeySpec {
        slot: 0,
        descending: false,
    },
];

proptest! {
    #[test]
    fn sorted_output_is_ordered_and_complete(rows in tuples(3)) {
        let mut s = sorter(&KEYS, 3, &rows);
        s.sort();
        prop_assert_eq!(s.len(), rows.len());
        let out: Vec<&[Value]> = s.iter().collect();
        for pair in out.windows(2) {
            prop_assert_ne!(key_order(&KEYS, pair[0], pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn parallel_sort_matches_serial(rows in tuples(2), parts in 1usize..6) {
        let mut serial = sorter(&KEYS, 2, &rows);
        serial.sort();

        let mut merged = Sorter::new(build_comparator(KEYS.to_vec()), 2);
        let partitions: Vec<Sorter> = (0..parts)
            .map(|p| {
                let mine: Vec<Vec<Value>> = rows.iter().skip(p).step_by(parts).cloned().collect();
                sorter(&KEYS, 2, &mine)
            })
            .collect();
        merged.sort_parallel(partitions);

        prop_assert_eq!(merged.len(), serial.len());
        for (a, b) in merged.iter().zip(serial.iter()) {
            prop_assert_eq!(key_order(&KEYS, a, b), Ordering::Equal);
        }
    }

    #[test]
    fn top_k_is_prefix_of_full_sort(rows in tuples(2), k in 0usize..50) {
        let mut full = sorter(&KEYS, 2, &rows);
        full.sort();
        let mut top = sorter(&KEYS, 2, &rows);
        top.sort_top_k(k);

        prop_assert_eq!(top.len(), k.min(rows.len()));
        // 경계의 동률은 어느 튜플이든 올 수 있으므로 키만 비교
        for (a, b) in top.iter().zip(full.iter()) {
            prop_assert_eq!(key_order(&KEYS, a, b), Ordering::Equal);
        }
    }

    #[test]
    fn hash_table_counts_distinct_keys(keys in prop::collection::vec(value(), 0..300)) {
        let mut table = HashTable::new(1, 4, 0.75);
        let mut expected: HashMap<Value, usize> = HashMap::new();
        for key in &keys {
            table
                .probe_or_insert(None, std::slice::from_ref(key), &mut NoopProbe, &mut StoreValues(&[Value::BigInt(1)]))
                .unwrap();
            *expected.entry(key.clone()).or_default() += 1;
        }
        prop_assert_eq!(table.num_keys(), expected.len());
        for key in expected.keys() {
            prop_assert!(table.lookup(std::slice::from_ref(key)).is_some());
        }
    }

    #[test]
    fn hash_table_merge_sums_payloads(
        left in prop::collection::vec(0i64..20, 0..100),
        right in prop::collection::vec(0i64..20, 0..100),
    ) {
        let build = |keys: &[i64]| {
            let mut table = HashTable::new(1, 8, 0.75);
            for key in keys {
                let key = [Value::BigInt(*key)];
                let mut bump = Bump;
                table
                    .probe_or_insert(None, &key, &mut bump, &mut StoreValues(&[Value::BigInt(1)]))
                    .unwrap();
            }
            table
        };
        let mut merged = build(&left);
        merged
            .merge_from(build(&right), |dst, src| {
                let total = dst[0].as_i64().unwrap_or(0) + src[0].as_i64().unwrap_or(0);
                dst[0] = Value::BigInt(total);
                Ok(())
            })
            .unwrap();

        let total: i64 = merged.iter().filter_map(|(_, payload)| payload[0].as_i64()).sum();
        prop_assert_eq!(total as usize, left.len() + right.len());
    }

    #[test]
    fn vectorized_selection_keeps_ascending_subset(
        len in 0u32..500,
        vector_size in 1usize..64,
        modulo in 1u32..7,
    ) {
        let mut batch = RowBatch::new(0..len);
        batch
            .vectorized_iterate(vector_size, |_, positions, kept| {
                kept.extend(positions.iter().copied().filter(|p| p % modulo == 0));
                Ok(())
            })
            .unwrap();

        let selection = batch.positions();
        prop_assert_eq!(selection.len(), (0..len).filter(|p| p % modulo == 0).count());
        prop_assert!(selection.windows(2).all(|w| w[0] < w[1]));
        prop_assert_eq!(batch.num_rows(), selection.len());
    }
}

/// 기존 키의 카운터를 1 증가
struct Bump;

impl tessera_core::runtime::ProbeCallback for Bump {
    fn process_entry(&mut self, payload: &mut [Value]) -> tessera_core::TesseraResult<()> {
        let next = payload[0].as_i64().unwrap_or(0) + 1;
        payload[0] = Value::BigInt(next);
        Ok(())
    }
}
