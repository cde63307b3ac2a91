//! Reference-counted slot table for heap-tagged values.
//!
//! Slots are addressed by index plus generation, the same scheme a non-moving
//! mark/sweep heap uses to keep handles stable and to detect stale ones.
//! Each slot holds one engine value and the number of outstanding
//! [`RawValue`](crate::RawValue) references the host owns on it.

use boa_engine::JsValue;

use crate::raw::HeapRef;

struct Slot {
    value: Option<JsValue>,
    ref_count: u32,
    generation: u32,
}

#[derive(Default)]
pub(crate) struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    total_refs: u64,
    stale: u64,
}

impl Heap {
    /// Store `value` in a fresh slot owned by one reference.
    pub(crate) fn alloc(&mut self, value: JsValue) -> HeapRef {
        self.live += 1;
        self.total_refs += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            slot.ref_count = 1;
            return HeapRef {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            value: Some(value),
            ref_count: 1,
            generation: 0,
        });
        HeapRef {
            index,
            generation: 0,
        }
    }

    fn slot(&self, r: HeapRef) -> Option<&Slot> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation && s.value.is_some())
    }

    fn slot_mut(&mut self, r: HeapRef) -> Option<&mut Slot> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.generation == r.generation && s.value.is_some())
    }

    pub(crate) fn get(&self, r: HeapRef) -> Option<&JsValue> {
        self.slot(r).and_then(|s| s.value.as_ref())
    }

    pub(crate) fn ref_count(&self, r: HeapRef) -> u32 {
        self.slot(r).map_or(0, |s| s.ref_count)
    }

    /// Add one reference. Returns false for a stale handle.
    pub(crate) fn retain(&mut self, r: HeapRef) -> bool {
        match self.slot_mut(r) {
            Some(slot) => {
                slot.ref_count += 1;
                self.total_refs += 1;
                true
            }
            None => {
                self.stale += 1;
                false
            }
        }
    }

    /// Drop one reference, releasing the slot at zero. Returns false for a
    /// stale handle.
    pub(crate) fn release(&mut self, r: HeapRef) -> bool {
        let Some(slot) = self.slot_mut(r) else {
            self.stale += 1;
            return false;
        };
        slot.ref_count -= 1;
        let emptied = slot.ref_count == 0;
        if emptied {
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
        }
        self.total_refs -= 1;
        if emptied {
            self.live -= 1;
            self.free.push(r.index);
        }
        true
    }

    pub(crate) fn live(&self) -> usize {
        self.live
    }

    pub(crate) fn total_refs(&self) -> u64 {
        self.total_refs
    }

    pub(crate) fn stale(&self) -> u64 {
        self.stale
    }
}
