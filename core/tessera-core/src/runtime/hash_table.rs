//! Open-addressing hash table
//!
//! 버킷 배열은 2의 거듭제곱 크기이며 선형 탐사를 한다. 각 버킷은 해시 태그와 키 하나,
//! 그리고 그 키에 연결된 payload 체인을 가진다. 엔트리는 첫 삽입 시 만들어진다.
//!
//! 병렬 빌드는 스레드별 테이블을 만든 뒤 `finish`에서 [`HashTable::merge_from`] /
//! [`HashTable::append_from`]으로 합친다. 공유 테이블은 읽기 전용(조인 probe)으로만 쓰인다.

use crate::config::EngineConfig;
use crate::error::TesseraResult;
use crate::types::Value;
use ahash::RandomState;
use smallvec::SmallVec;
use std::hash::BuildHasher;
use tracing::trace;

// 스레드별 테이블을 합칠 때 저장된 해시를 그대로 쓰기 위해 시드는 고정
const HASH_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

const MIN_CAPACITY: usize = 8;

/// Invoked with the payload of an existing key
pub trait ProbeCallback {
    fn process_entry(&mut self, payload: &mut [Value]) -> TesseraResult<()>;
}

/// Initializes the payload of a newly inserted key
pub trait InsertCallback {
    fn value_size(&self) -> usize;
    fn store_value(&mut self, payload: &mut [Value]) -> TesseraResult<()>;
}

/// Probe path that ignores the existing payload (set membership)
pub struct NoopProbe;

impl ProbeCallback for NoopProbe {
    fn process_entry(&mut self, _payload: &mut [Value]) -> TesseraResult<()> {
        Ok(())
    }
}

/// Insert path that copies a prepared payload
pub struct StoreValues<'v>(pub &'v [Value]);

impl InsertCallback for StoreValues<'_> {
    fn value_size(&self) -> usize {
        self.0.len()
    }

    fn store_value(&mut self, payload: &mut [Value]) -> TesseraResult<()> {
        payload.clone_from_slice(self.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Found,
    Inserted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locality {
    None,
    Low,
    Moderate,
    High,
}

#[derive(Debug)]
struct Entry {
    hash: u64,
    key: Box<[Value]>,
    values: SmallVec<[Box<[Value]>; 1]>,
}

#[derive(Debug)]
pub struct HashTable {
    buckets: Vec<Option<Box<Entry>>>,
    mask: usize,
    num_keys: usize,
    num_values: usize,
    resize_threshold: usize,
    load_factor: f64,
    value_size: usize,
    hasher: RandomState,
}

impl HashTable {
    pub fn new(value_size: usize, capacity: usize, load_factor: f64) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let load_factor = load_factor.clamp(0.1, 0.95);
        Self {
            buckets: (0..capacity).map(|_| None).collect(),
            mask: capacity - 1,
            num_keys: 0,
            num_values: 0,
            resize_threshold: threshold(capacity, load_factor),
            load_factor,
            value_size,
            hasher: RandomState::with_seeds(HASH_SEEDS[0], HASH_SEEDS[1], HASH_SEEDS[2], HASH_SEEDS[3]),
        }
    }

    pub fn with_config(value_size: usize, config: &EngineConfig) -> Self {
        Self::new(value_size, config.hash_table_capacity, config.hash_table_load_factor)
    }

    /// Release every entry; the table stays usable and empty
    pub fn destroy(&mut self) {
        let capacity = MIN_CAPACITY;
        self.buckets = (0..capacity).map(|_| None).collect();
        self.mask = capacity - 1;
        self.num_keys = 0;
        self.num_values = 0;
        self.resize_threshold = threshold(capacity, self.load_factor);
    }

    pub fn hash_key(&self, key: &[Value]) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Payload width declared at construction
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Number of stored payloads (keys plus chained duplicates)
    pub fn len(&self) -> usize {
        self.num_values
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    pub fn is_empty(&self) -> bool {
        self.num_values == 0
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Performance hint only
    #[inline]
    pub fn prefetch_bucket(&self, _hash: u64, _kind: PrefetchKind, _locality: Locality) {}

    /// Run `probe` on the payload of `key` if present, otherwise insert a new
    /// entry initialized by `insert`.
    pub fn probe_or_insert<P, I>(
        &mut self,
        hash: Option<u64>,
        key: &[Value],
        probe: &mut P,
        insert: &mut I,
    ) -> TesseraResult<ProbeOutcome>
    where
        P: ProbeCallback + ?Sized,
        I: InsertCallback + ?Sized,
    {
        let hash = hash.unwrap_or_else(|| self.hash_key(key));
        let (slot, found) = self.find_slot(hash, key);
        if found {
            if let Some(entry) = self.buckets[slot].as_mut() {
                if let Some(payload) = entry.values.first_mut() {
                    probe.process_entry(payload)?;
                }
            }
            return Ok(ProbeOutcome::Found);
        }
        let payload = new_payload(insert)?;
        self.place_new(slot, hash, key, payload);
        Ok(ProbeOutcome::Inserted)
    }

    /// Insert without probing; duplicate keys chain another payload
    pub fn insert<I>(&mut self, hash: Option<u64>, key: &[Value], insert: &mut I) -> TesseraResult<()>
    where
        I: InsertCallback + ?Sized,
    {
        let hash = hash.unwrap_or_else(|| self.hash_key(key));
        let payload = new_payload(insert)?;
        let (slot, found) = self.find_slot(hash, key);
        if found {
            if let Some(entry) = self.buckets[slot].as_mut() {
                entry.values.push(payload);
                self.num_values += 1;
                return Ok(());
            }
        }
        self.place_new(slot, hash, key, payload);
        Ok(())
    }

    /// Visit every payload chained under `key`; returns the number visited
    pub fn find_all<F>(&self, hash: Option<u64>, key: &[Value], mut f: F) -> TesseraResult<usize>
    where
        F: FnMut(&[Value]) -> TesseraResult<()>,
    {
        let hash = hash.unwrap_or_else(|| self.hash_key(key));
        let (slot, found) = self.find_slot(hash, key);
        if !found {
            return Ok(0);
        }
        let Some(entry) = self.buckets[slot].as_ref() else {
            return Ok(0);
        };
        for payload in &entry.values {
            f(payload)?;
        }
        Ok(entry.values.len())
    }

    /// First payload of `key`
    pub fn lookup(&self, key: &[Value]) -> Option<&[Value]> {
        let (slot, found) = self.find_slot(self.hash_key(key), key);
        if !found {
            return None;
        }
        self.buckets[slot]
            .as_ref()
            .and_then(|entry| entry.values.first())
            .map(|payload| &payload[..])
    }

    /// All (key, payload) pairs in bucket order
    pub fn iter(&self) -> impl Iterator<Item = (&[Value], &[Value])> + '_ {
        self.buckets.iter().flatten().flat_map(|entry| {
            entry
                .values
                .iter()
                .map(move |payload| (&entry.key[..], &payload[..]))
        })
    }

    /// Walk every stored payload in chunks of at most `vector_size`
    pub fn vectorized_iterate<F>(&self, vector_size: usize, mut f: F) -> TesseraResult<()>
    where
        F: FnMut(&HashTableAccess<'_>) -> TesseraResult<()>,
    {
        let vector_size = vector_size.max(1);
        let mut access = HashTableAccess {
            entries: Vec::with_capacity(vector_size.min(self.num_values)),
        };
        for pair in self.iter() {
            access.entries.push(pair);
            if access.entries.len() == vector_size {
                f(&access)?;
                access.entries.clear();
            }
        }
        if !access.entries.is_empty() {
            f(&access)?;
        }
        Ok(())
    }

    /// Fold `other` into `self`: existing keys merge payloads via `merge`,
    /// new keys move over as-is.
    pub fn merge_from<F>(&mut self, other: HashTable, mut merge: F) -> TesseraResult<()>
    where
        F: FnMut(&mut [Value], &[Value]) -> TesseraResult<()>,
    {
        for entry in other.buckets.into_iter().flatten() {
            let (slot, found) = self.find_slot(entry.hash, &entry.key);
            if found {
                if let Some(dst) = self.buckets[slot]
                    .as_mut()
                    .and_then(|existing| existing.values.first_mut())
                {
                    for src in &entry.values {
                        merge(dst, src)?;
                    }
                    continue;
                }
            }
            self.place_entry(slot, entry);
        }
        Ok(())
    }

    /// Move every payload of `other` into `self`, chaining duplicates
    pub fn append_from(&mut self, other: HashTable) {
        for entry in other.buckets.into_iter().flatten() {
            let (slot, found) = self.find_slot(entry.hash, &entry.key);
            if found {
                if let Some(existing) = self.buckets[slot].as_mut() {
                    self.num_values += entry.values.len();
                    existing.values.extend(entry.values);
                    continue;
                }
            }
            self.place_entry(slot, entry);
        }
    }

    fn find_slot(&self, hash: u64, key: &[Value]) -> (usize, bool) {
        let mut slot = (hash as usize) & self.mask;
        loop {
            match &self.buckets[slot] {
                None => return (slot, false),
                Some(entry) if entry.hash == hash && entry.key[..] == *key => return (slot, true),
                Some(_) => slot = (slot + 1) & self.mask,
            }
        }
    }

    fn place_new(&mut self, slot: usize, hash: u64, key: &[Value], payload: Box<[Value]>) {
        let mut values = SmallVec::new();
        values.push(payload);
        let entry = Box::new(Entry {
            hash,
            key: key.into(),
            values,
        });
        self.place_entry(slot, entry);
    }

    /// `slot` must be the empty slot `find_slot` returned for this entry
    fn place_entry(&mut self, slot: usize, entry: Box<Entry>) {
        self.num_keys += 1;
        self.num_values += entry.values.len();
        self.buckets[slot] = Some(entry);
        if self.num_keys > self.resize_threshold {
            self.grow();
        }
    }

    fn grow(&mut self) {
        let capacity = self.buckets.len() * 2;
        trace!(
            from = self.buckets.len(),
            to = capacity,
            keys = self.num_keys,
            "hash table resize"
        );
        let old = std::mem::replace(&mut self.buckets, (0..capacity).map(|_| None).collect());
        self.mask = capacity - 1;
        self.resize_threshold = threshold(capacity, self.load_factor);
        for entry in old.into_iter().flatten() {
            let mut slot = (entry.hash as usize) & self.mask;
            while self.buckets[slot].is_some() {
                slot = (slot + 1) & self.mask;
            }
            self.buckets[slot] = Some(entry);
        }
    }
}

fn threshold(capacity: usize, load_factor: f64) -> usize {
    ((capacity as f64 * load_factor) as usize).clamp(1, capacity - 1)
}

fn new_payload<I: InsertCallback + ?Sized>(insert: &mut I) -> TesseraResult<Box<[Value]>> {
    let mut payload: Box<[Value]> = vec![Value::Null; insert.value_size()].into_boxed_slice();
    insert.store_value(&mut payload)?;
    Ok(payload)
}

/// Positional view over one chunk of a [`HashTable::vectorized_iterate`]
pub struct HashTableAccess<'t> {
    entries: Vec<(&'t [Value], &'t [Value])>,
}

impl<'t> HashTableAccess<'t> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key(&self, position: usize) -> &'t [Value] {
        self.entries[position].0
    }

    pub fn payload(&self, position: usize) -> &'t [Value] {
        self.entries[position].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountProbe(usize);

    impl ProbeCallback for CountProbe {
        fn process_entry(&mut self, payload: &mut [Value]) -> TesseraResult<()> {
            self.0 += 1;
            if let Value::BigInt(n) = &mut payload[0] {
                *n += 1;
            }
            Ok(())
        }
    }

    struct CountInsert(usize);

    impl InsertCallback for CountInsert {
        fn value_size(&self) -> usize {
            1
        }

        fn store_value(&mut self, payload: &mut [Value]) -> TesseraResult<()> {
            self.0 += 1;
            payload[0] = Value::BigInt(1);
            Ok(())
        }
    }

    #[test]
    fn first_call_inserts_then_probes() {
        let mut table = HashTable::new(1, 8, 0.75);
        let key = [Value::Integer(42), Value::varchar("k")];
        let (mut probe, mut insert) = (CountProbe(0), CountInsert(0));

        for _ in 0..5 {
            table
                .probe_or_insert(None, &key, &mut probe, &mut insert)
                .unwrap();
        }
        assert_eq!(insert.0, 1);
        assert_eq!(probe.0, 4);
        assert_eq!(table.lookup(&key), Some(&[Value::BigInt(5)][..]));
    }

    #[test]
    fn growth_preserves_entries() {
        let mut table = HashTable::new(1, 8, 0.5);
        for i in 0..1000 {
            table
                .insert(None, &[Value::Integer(i)], &mut StoreValues(&[Value::Integer(i * 2)]))
                .unwrap();
        }
        assert!(table.capacity() >= 2048);
        assert_eq!(table.num_keys(), 1000);
        for i in 0..1000 {
            assert_eq!(
                table.lookup(&[Value::Integer(i)]),
                Some(&[Value::Integer(i * 2)][..])
            );
        }
    }

    #[test]
    fn duplicate_inserts_chain() {
        let mut table = HashTable::new(1, 8, 0.75);
        for v in 0..3 {
            table
                .insert(None, &[Value::Integer(7)], &mut StoreValues(&[Value::Integer(v)]))
                .unwrap();
        }
        let mut seen = Vec::new();
        let n = table
            .find_all(None, &[Value::Integer(7)], |p| {
                seen.push(p[0].clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(table.num_keys(), 1);
        assert_eq!(table.len(), 3);
        assert_eq!(seen, vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn merge_combines_payloads() {
        let mut a = HashTable::new(1, 8, 0.75);
        let mut b = HashTable::new(1, 8, 0.75);
        a.insert(None, &[Value::Integer(1)], &mut StoreValues(&[Value::BigInt(10)])).unwrap();
        b.insert(None, &[Value::Integer(1)], &mut StoreValues(&[Value::BigInt(5)])).unwrap();
        b.insert(None, &[Value::Integer(2)], &mut StoreValues(&[Value::BigInt(7)])).unwrap();

        a.merge_from(b, |dst, src| {
            let sum = dst[0].as_i64().unwrap_or(0) + src[0].as_i64().unwrap_or(0);
            dst[0] = Value::BigInt(sum);
            Ok(())
        })
        .unwrap();
        assert_eq!(a.num_keys(), 2);
        assert_eq!(a.lookup(&[Value::Integer(1)]), Some(&[Value::BigInt(15)][..]));
        assert_eq!(a.lookup(&[Value::Integer(2)]), Some(&[Value::BigInt(7)][..]));
    }

    #[test]
    fn vectorized_iterate_chunks() {
        let mut table = HashTable::new(0, 8, 0.75);
        for i in 0..10 {
            table
                .probe_or_insert(None, &[Value::Integer(i)], &mut NoopProbe, &mut StoreValues(&[]))
                .unwrap();
        }
        let mut sizes = Vec::new();
        let mut keys = Vec::new();
        table
            .vectorized_iterate(4, |access| {
                sizes.push(access.len());
                for pos in 0..access.len() {
                    keys.push(access.key(pos)[0].as_i64().unwrap());
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(sizes, vec![4, 4, 2]);
        keys.sort_unstable();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn null_keys_group_together() {
        let mut table = HashTable::new(0, 8, 0.75);
        let first = table
            .probe_or_insert(None, &[Value::Null], &mut NoopProbe, &mut StoreValues(&[]))
            .unwrap();
        let second = table
            .probe_or_insert(None, &[Value::Null], &mut NoopProbe, &mut StoreValues(&[]))
            .unwrap();
        assert_eq!(first, ProbeOutcome::Inserted);
        assert_eq!(second, ProbeOutcome::Found);
    }
}
