//! Aggregation: 다중 집계 누산기
//!
//! 그룹 하나의 저장 영역은 `[Value]` 슬롯 배열이다. `Value::Null` 태그가 null
//! 비트맵 역할을 하며, AVG는 setup 시점에 SUM 슬롯과 COUNT 슬롯으로 분해된다.
//!
//! DISTINCT 집계는 (그룹 키 ∪ 입력 값)을 키로 하는 보조 해시 테이블을 가진다.
//! 보조 테이블 probe는 [`Aggregation::probe_distinct`]로 먼저 수행하고, 그 결과
//! 마스크를 `*_masked` 연산에 넘긴다. 메인 해시 테이블 콜백 안에서 보조 테이블을
//! 다시 빌리지 않기 위함이다.

use crate::config::EngineConfig;
use crate::error::{TesseraError, TesseraResult};
use crate::plan::{AggregateKind, AggregateTerm, Expr, aggregate_output_type};
use crate::runtime::{HashTable, NoopProbe, ProbeOutcome, StoreValues};
use crate::types::{SqlType, Value};
use smallvec::SmallVec;
use std::cmp::Ordering;
use tracing::debug;

/// Per-aggregate "apply this row" flags produced by the distinct probe
pub type DistinctMask = SmallVec<[bool; 8]>;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Count,
    Sum,
    Min,
    Max,
}

/// One physical storage slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSlot {
    kind: SlotKind,
    pub ty: SqlType,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct AggregateInfo {
    pub kind: AggregateKind,
    /// Index of the aggregated expression in the input vector; `None` for `COUNT(*)`
    pub source_index: Option<usize>,
    /// Primary slot (SUM/MIN/MAX/COUNT, or the SUM half of AVG)
    pub storage: usize,
    /// COUNT half of AVG
    pub count_storage: Option<usize>,
    pub is_distinct: bool,
    pub distinct_table: Option<usize>,
    pub output_type: SqlType,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    aggregates: Vec<AggregateInfo>,
    slots: Vec<StorageSlot>,
    global: bool,
    num_distinct: usize,
}

impl Aggregation {
    /// Build the storage layout for `terms`. `global` is aggregation without GROUP BY.
    pub fn setup(terms: &[AggregateTerm], global: bool) -> TesseraResult<Self> {
        let mut aggregates = Vec::with_capacity(terms.len());
        let mut slots = Vec::new();
        let mut num_distinct = 0;

        for (index, term) in terms.iter().enumerate() {
            let input_type = term.input.as_ref().map(Expr::result_type).transpose()?;
            let output_type = aggregate_output_type(term.kind, input_type).ok_or_else(|| {
                TesseraError::unsupported(
                    format!(
                        "{} over {}",
                        term.kind.name(),
                        input_type.map_or("*", SqlType::name)
                    ),
                    "aggregate/type combination has no implementation",
                )
            })?;
            if term.kind != AggregateKind::CountStar && term.input.is_none() {
                return Err(TesseraError::Config(format!(
                    "{} requires an input expression",
                    term.kind.name()
                )));
            }

            // MIN/MAX는 같은 값을 여러 번 넣어도 결과가 같으므로 DISTINCT를 끈다
            let is_distinct = term.distinct
                && !matches!(
                    term.kind,
                    AggregateKind::Min | AggregateKind::Max | AggregateKind::CountStar
                );
            let distinct_table = is_distinct.then(|| {
                num_distinct += 1;
                num_distinct - 1
            });

            let mut push_slot = |kind: SlotKind, ty: SqlType, nullable: bool| {
                slots.push(StorageSlot { kind, ty, nullable });
                slots.len() - 1
            };

            let (storage, count_storage) = match term.kind {
                AggregateKind::Count | AggregateKind::CountStar => {
                    (push_slot(SlotKind::Count, SqlType::BigInt, false), None)
                }
                AggregateKind::Sum => (push_slot(SlotKind::Sum, output_type, global), None),
                AggregateKind::Min => (push_slot(SlotKind::Min, output_type, global), None),
                AggregateKind::Max => (push_slot(SlotKind::Max, output_type, global), None),
                AggregateKind::Avg => {
                    let sum_type = match input_type {
                        Some(ty) if ty.is_integral() => SqlType::BigInt,
                        _ => SqlType::Decimal,
                    };
                    let sum = push_slot(SlotKind::Sum, sum_type, true);
                    let count = push_slot(SlotKind::Count, SqlType::BigInt, false);
                    (sum, Some(count))
                }
            };

            aggregates.push(AggregateInfo {
                kind: term.kind,
                source_index: term.input.as_ref().map(|_| index),
                storage,
                count_storage,
                is_distinct,
                distinct_table,
                output_type,
            });
        }

        debug!(
            aggregates = aggregates.len(),
            slots = slots.len(),
            distinct = num_distinct,
            global,
            "aggregation setup"
        );
        Ok(Self {
            aggregates,
            slots,
            global,
            num_distinct,
        })
    }

    pub fn aggregates(&self) -> &[AggregateInfo] {
        &self.aggregates
    }

    pub fn slots(&self) -> &[StorageSlot] {
        &self.slots
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    /// Number of payload values per group
    pub fn storage_size(&self) -> usize {
        self.slots.len()
    }

    pub fn has_distinct(&self) -> bool {
        self.num_distinct > 0
    }

    /// One empty auxiliary table per distinct aggregate
    pub fn create_distinct_tables(&self, config: &EngineConfig) -> Vec<HashTable> {
        (0..self.num_distinct)
            .map(|_| HashTable::with_config(0, config))
            .collect()
    }

    /// Probe every distinct table with `(group_key ∪ value)`.
    ///
    /// `true` means the aggregate should see this row: always for non-distinct
    /// aggregates, and for distinct ones only on a first-seen non-null value.
    pub fn probe_distinct(
        &self,
        tables: &mut [HashTable],
        group_key: &[Value],
        values: &[Value],
    ) -> TesseraResult<DistinctMask> {
        let mut mask = DistinctMask::with_capacity(self.aggregates.len());
        let mut key: SmallVec<[Value; 4]> = SmallVec::with_capacity(group_key.len() + 1);
        for agg in &self.aggregates {
            let Some(table_idx) = agg.distinct_table else {
                mask.push(true);
                continue;
            };
            let value = self.input(agg, values)?;
            if value.is_null() {
                mask.push(false);
                continue;
            }
            let table = tables.get_mut(table_idx).ok_or_else(|| {
                TesseraError::execution(
                    format!("distinct table {table_idx} missing"),
                    "aggregation",
                )
            })?;
            key.clear();
            key.extend(group_key.iter().cloned());
            key.push(value.clone());
            let outcome = table.probe_or_insert(None, &key, &mut NoopProbe, &mut StoreValues(&[]))?;
            mask.push(outcome == ProbeOutcome::Inserted);
        }
        Ok(mask)
    }

    /// Initialize a brand-new group from its first row
    pub fn create_initial_values(
        &self,
        payload: &mut [Value],
        values: &[Value],
        group_key: &[Value],
        distinct_tables: &mut [HashTable],
    ) -> TesseraResult<()> {
        let mask = self.probe_distinct(distinct_tables, group_key, values)?;
        self.create_initial_values_masked(payload, values, &mask)
    }

    pub fn create_initial_values_masked(
        &self,
        payload: &mut [Value],
        values: &[Value],
        mask: &[bool],
    ) -> TesseraResult<()> {
        self.check_payload(payload)?;
        for (agg, &apply) in self.aggregates.iter().zip(mask) {
            let input = if apply { self.input(agg, values)? } else { &NULL };
            match agg.kind {
                AggregateKind::CountStar => {
                    payload[agg.storage] = Value::BigInt(i64::from(apply));
                }
                AggregateKind::Count => {
                    payload[agg.storage] = Value::BigInt(i64::from(!input.is_null()));
                }
                AggregateKind::Sum | AggregateKind::Min | AggregateKind::Max => {
                    payload[agg.storage] = input.cast_to(self.slots[agg.storage].ty)?;
                }
                AggregateKind::Avg => {
                    payload[agg.storage] = input.cast_to(self.slots[agg.storage].ty)?;
                    if let Some(count) = agg.count_storage {
                        payload[count] = Value::BigInt(i64::from(!input.is_null()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Storage of the single global group before any row: counters 0, the rest NULL
    pub fn create_initial_global_values(&self, payload: &mut [Value]) -> TesseraResult<()> {
        self.check_payload(payload)?;
        for (value, slot) in payload.iter_mut().zip(&self.slots) {
            *value = match slot.kind {
                SlotKind::Count => Value::BigInt(0),
                _ => Value::Null,
            };
        }
        Ok(())
    }

    /// Fold one input row into an existing group
    pub fn advance_values(
        &self,
        payload: &mut [Value],
        values: &[Value],
        group_key: &[Value],
        distinct_tables: &mut [HashTable],
    ) -> TesseraResult<()> {
        let mask = self.probe_distinct(distinct_tables, group_key, values)?;
        self.advance_values_masked(payload, values, &mask)
    }

    pub fn advance_values_masked(
        &self,
        payload: &mut [Value],
        values: &[Value],
        mask: &[bool],
    ) -> TesseraResult<()> {
        self.check_payload(payload)?;
        for (agg, &apply) in self.aggregates.iter().zip(mask) {
            if !apply {
                continue;
            }
            if agg.kind == AggregateKind::CountStar {
                increment(&mut payload[agg.storage], 1)?;
                continue;
            }
            let input = self.input(agg, values)?;
            if input.is_null() {
                continue;
            }
            if let Some(count) = agg.count_storage {
                increment(&mut payload[count], 1)?;
            }
            let slot = self.slots[agg.storage];
            let update = if slot.kind == SlotKind::Count {
                Value::BigInt(1)
            } else {
                input.cast_to(slot.ty)?
            };
            combine(slot.kind, &mut payload[agg.storage], update)?;
        }
        Ok(())
    }

    /// Combine a partial state produced by another worker into `target`
    pub fn merge_values(&self, target: &mut [Value], source: &[Value]) -> TesseraResult<()> {
        self.check_payload(target)?;
        self.check_payload(source)?;
        for ((slot, target), source) in self.slots.iter().zip(target.iter_mut()).zip(source) {
            if source.is_null() {
                continue;
            }
            combine(slot.kind, target, source.clone())?;
        }
        Ok(())
    }

    /// Final value of every aggregate in declared order
    pub fn finalize_values(&self, payload: &[Value]) -> TesseraResult<Vec<Value>> {
        self.check_payload(payload)?;
        self.aggregates
            .iter()
            .map(|agg| match (agg.kind, agg.count_storage) {
                (AggregateKind::Avg, Some(count)) => {
                    let count = payload[count].as_i64().unwrap_or(0);
                    if count == 0 {
                        return Ok(Value::Null);
                    }
                    Ok(payload[agg.storage]
                        .as_f64()
                        .map_or(Value::Null, |sum| Value::Decimal(sum / count as f64)))
                }
                _ => payload[agg.storage].cast_to(agg.output_type),
            })
            .collect()
    }

    fn input<'v>(&self, agg: &AggregateInfo, values: &'v [Value]) -> TesseraResult<&'v Value> {
        match agg.source_index {
            None => Ok(&NULL),
            Some(index) => values.get(index).ok_or_else(|| {
                TesseraError::execution(
                    format!("aggregate input {index} missing ({} provided)", values.len()),
                    "aggregation",
                )
            }),
        }
    }

    fn check_payload(&self, payload: &[Value]) -> TesseraResult<()> {
        if payload.len() != self.slots.len() {
            return Err(TesseraError::execution(
                format!(
                    "aggregate storage has {} slots, expected {}",
                    payload.len(),
                    self.slots.len()
                ),
                "aggregation",
            ));
        }
        Ok(())
    }
}

fn increment(counter: &mut Value, by: i64) -> TesseraResult<()> {
    let current = counter.as_i64().unwrap_or(0);
    let next = current
        .checked_add(by)
        .ok_or_else(|| TesseraError::Overflow("COUNT overflow".into()))?;
    *counter = Value::BigInt(next);
    Ok(())
}

fn combine(kind: SlotKind, stored: &mut Value, update: Value) -> TesseraResult<()> {
    // 처음 보는 non-null 값은 항등원과 합치지 않고 그대로 저장
    if stored.is_null() {
        *stored = update;
        return Ok(());
    }
    match kind {
        SlotKind::Count => increment(stored, update.as_i64().unwrap_or(0)),
        SlotKind::Sum => {
            *stored = match (&*stored, &update) {
                (Value::BigInt(a), Value::BigInt(b)) => Value::BigInt(
                    a.checked_add(*b)
                        .ok_or_else(|| TesseraError::Overflow(format!("SUM overflow: {a} + {b}")))?,
                ),
                (a, b) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => Value::Decimal(a + b),
                    _ => return Err(TesseraError::invalid_value("numeric", b.to_string())),
                },
            };
            Ok(())
        }
        SlotKind::Min => {
            if update.compare(stored) == Ordering::Less {
                *stored = update;
            }
            Ok(())
        }
        SlotKind::Max => {
            if update.compare(stored) == Ordering::Greater {
                *stored = update;
            }
            Ok(())
        }
    }
}
