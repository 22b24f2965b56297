//! State registry
//!
//! 컴파일 중 번역기들이 이름 붙은 타입 슬롯을 등록하고([`QueryState`]),
//! 실행 시에는 슬롯들이 하나의 상태 레코드([`RuntimeState`])로 할당된다.
//! 쿼리 전체에 하나, 파이프라인 워커마다 하나씩 존재한다.

use crate::error::{TesseraError, TesseraResult};
use ahash::AHashMap;
use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handle to one registered slot
pub struct StateSlot<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateSlot<T> {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for StateSlot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateSlot<T> {}

impl<T> fmt::Debug for StateSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateSlot<{}>({})", type_name::<T>(), self.index)
    }
}

#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub name: String,
    pub type_name: &'static str,
    pub is_array: bool,
    type_id: TypeId,
}

/// Frozen slot table shared by every record allocated from it
pub type StateLayout = Arc<[SlotInfo]>;

/// Compile-time registry of named, typed slots
#[derive(Debug, Clone, Default)]
pub struct QueryState {
    slots: Vec<SlotInfo>,
    by_name: AHashMap<String, usize>,
}

impl QueryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot holding one `T`; names are unique per registry
    pub fn register<T: Any + Send + Sync>(&mut self, name: &str) -> TesseraResult<StateSlot<T>> {
        self.register_slot::<T>(name, false)
    }

    /// Like [`QueryState::register`], suffixing `name` with `#n` when it is taken.
    /// Operators that can appear several times in one plan register through this.
    pub fn register_unique<T: Any + Send + Sync>(&mut self, name: &str) -> TesseraResult<StateSlot<T>> {
        if !self.by_name.contains_key(name) {
            return self.register(name);
        }
        let unique = (1..)
            .map(|n| format!("{name}#{n}"))
            .find(|candidate| !self.by_name.contains_key(candidate))
            .unwrap_or_else(|| name.to_string());
        self.register(&unique)
    }

    /// Register a slot holding a `Vec<T>`
    pub fn register_array<T: Any + Send + Sync>(
        &mut self,
        name: &str,
    ) -> TesseraResult<StateSlot<Vec<T>>> {
        self.register_slot::<Vec<T>>(name, true)
    }

    fn register_slot<T: Any + Send + Sync>(
        &mut self,
        name: &str,
        is_array: bool,
    ) -> TesseraResult<StateSlot<T>> {
        if self.by_name.contains_key(name) {
            return Err(TesseraError::Config(format!(
                "state slot '{name}' registered twice"
            )));
        }
        let index = self.slots.len();
        self.slots.push(SlotInfo {
            name: name.to_string(),
            type_name: type_name::<T>(),
            is_array,
            type_id: TypeId::of::<T>(),
        });
        self.by_name.insert(name.to_string(), index);
        Ok(StateSlot {
            index,
            _marker: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_info(&self, index: usize) -> Option<&SlotInfo> {
        self.slots.get(index)
    }

    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn layout(&self) -> StateLayout {
        self.slots.clone().into()
    }
}

/// Runtime state record: one boxed value per registered slot.
///
/// Dropping the record releases everything still installed in it.
pub struct RuntimeState {
    layout: StateLayout,
    slots: Vec<Option<Box<dyn Any + Send + Sync>>>,
}

/// Per-worker record of one pipeline
pub type ThreadState = RuntimeState;

impl fmt::Debug for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeState")
            .field("slots", &self.layout.len())
            .field("installed", &self.slots.iter().filter(|s| s.is_some()).count())
            .finish()
    }
}

impl RuntimeState {
    pub fn allocate(layout: &StateLayout) -> Self {
        Self {
            layout: Arc::clone(layout),
            slots: (0..layout.len()).map(|_| None).collect(),
        }
    }

    /// Store `value` into `slot`, replacing any previous value
    pub fn install<T: Any + Send + Sync>(&mut self, slot: StateSlot<T>, value: T) -> TesseraResult<()> {
        let info = self.info(slot.index)?;
        if info.type_id != TypeId::of::<T>() {
            return Err(self.slot_error(
                slot.index,
                format!("declared as {}, installing {}", info.type_name, type_name::<T>()),
            ));
        }
        self.slots[slot.index] = Some(Box::new(value));
        Ok(())
    }

    pub fn get<T: Any>(&self, slot: StateSlot<T>) -> TesseraResult<&T> {
        self.info(slot.index)?;
        self.slots[slot.index]
            .as_ref()
            .ok_or_else(|| self.slot_error(slot.index, "not initialized".into()))?
            .downcast_ref::<T>()
            .ok_or_else(|| self.slot_error(slot.index, format!("does not hold {}", type_name::<T>())))
    }

    pub fn get_mut<T: Any>(&mut self, slot: StateSlot<T>) -> TesseraResult<&mut T> {
        let index = slot.index;
        self.info(index)?;
        match self.slots[index].as_ref() {
            None => return Err(self.slot_error(index, "not initialized".into())),
            Some(value) if !value.is::<T>() => {
                return Err(self.slot_error(index, format!("does not hold {}", type_name::<T>())));
            }
            Some(_) => {}
        }
        self.slots[index]
            .as_mut()
            .and_then(|value| value.downcast_mut::<T>())
            .ok_or_else(|| TesseraError::StateSlot {
                name: format!("#{index}"),
                reason: "changed during access".into(),
            })
    }

    /// Move the value out, leaving the slot uninitialized
    pub fn take<T: Any>(&mut self, slot: StateSlot<T>) -> TesseraResult<T> {
        self.info(slot.index)?;
        let boxed = self.slots[slot.index]
            .take()
            .ok_or_else(|| self.slot_error(slot.index, "not initialized".into()))?;
        match boxed.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(original) => {
                self.slots[slot.index] = Some(original);
                Err(self.slot_error(slot.index, format!("does not hold {}", type_name::<T>())))
            }
        }
    }

    pub fn is_installed<T>(&self, slot: StateSlot<T>) -> bool {
        self.slots.get(slot.index).is_some_and(Option::is_some)
    }

    /// Drop every installed value
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn info(&self, index: usize) -> TesseraResult<&SlotInfo> {
        self.layout.get(index).ok_or_else(|| TesseraError::StateSlot {
            name: format!("#{index}"),
            reason: format!("record has only {} slots", self.layout.len()),
        })
    }

    // 에러 메시지는 슬롯 이름으로 보고한다
    fn slot_error(&self, index: usize, reason: String) -> TesseraError {
        let name = self
            .layout
            .get(index)
            .map_or_else(|| format!("#{index}"), |info| info.name.clone());
        TesseraError::StateSlot { name, reason }
    }
}
