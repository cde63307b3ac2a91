//! Side table linking engine objects to native handles.
//!
//! The engine object only stores a numeric token; the native handle lives
//! here as a `Weak`, so an association never keeps the native object alive
//! and a dropped native object simply stops resolving.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::trace;

/// Tokens must survive a round trip through an engine number.
const GENERATION_MASK: u32 = (1 << 21) - 1;

struct Slot {
    handle: Option<Weak<dyn Any>>,
    generation: u32,
}

impl Slot {
    fn is_dead(&self) -> bool {
        self.handle.as_ref().is_none_or(|w| w.strong_count() == 0)
    }
}

/// Arena of weak native handles addressed by generation-tagged tokens.
#[derive(Default)]
pub struct OpaqueRegistry {
    slots: RefCell<Vec<Slot>>,
    free: RefCell<Vec<u32>>,
}

fn token(index: u32, generation: u32) -> u64 {
    (u64::from(generation & GENERATION_MASK) << 32) | u64::from(index)
}

fn split(token: u64) -> (u32, u32) {
    ((token & 0xffff_ffff) as u32, (token >> 32) as u32)
}

impl OpaqueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn resolve(&self, token: u64) -> Option<usize> {
        let (index, generation) = split(token);
        let slots = self.slots.borrow();
        let slot = slots.get(index as usize)?;
        (slot.handle.is_some() && slot.generation & GENERATION_MASK == generation)
            .then_some(index as usize)
    }

    /// Store `handle`, reusing the slot behind `existing` when it is still
    /// valid. Returns the token to attach to the engine object.
    pub fn attach(&self, existing: Option<u64>, handle: Weak<dyn Any>) -> u64 {
        if let Some(index) = existing.and_then(|t| self.resolve(t)) {
            let mut slots = self.slots.borrow_mut();
            slots[index].handle = Some(handle);
            return token(index as u32, slots[index].generation);
        }

        if self.free.borrow().is_empty() {
            self.sweep();
        }
        let reused = self.free.borrow_mut().pop();
        let mut slots = self.slots.borrow_mut();
        let index = match reused {
            Some(index) => {
                slots[index as usize].handle = Some(handle);
                index
            }
            None => {
                slots.push(Slot {
                    handle: Some(handle),
                    generation: 0,
                });
                (slots.len() - 1) as u32
            }
        };
        let generation = slots[index as usize].generation;
        trace!(index, generation, "opaque handle attached");
        token(index, generation)
    }

    /// Resolve a token to a live handle of type `T`.
    pub fn lookup<T: Any>(&self, token: u64) -> Option<Rc<T>> {
        let index = self.resolve(token)?;
        let handle = self.slots.borrow()[index].handle.as_ref()?.upgrade()?;
        handle.downcast::<T>().ok()
    }

    /// Forget the handle behind `token`. Returns false if it was not live.
    pub fn detach(&self, token: u64) -> bool {
        let Some(index) = self.resolve(token) else {
            return false;
        };
        self.vacate(index);
        true
    }

    fn vacate(&self, index: usize) {
        let mut slots = self.slots.borrow_mut();
        slots[index].handle = None;
        slots[index].generation = slots[index].generation.wrapping_add(1);
        self.free.borrow_mut().push(index as u32);
    }

    /// Recycle slots whose native object has been dropped.
    fn sweep(&self) {
        let dead: Vec<usize> = self
            .slots
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.handle.is_some() && slot.is_dead())
            .map(|(index, _)| index)
            .collect();
        for index in dead {
            self.vacate(index);
        }
    }

    /// Number of associations whose native object is still alive.
    pub fn live(&self) -> usize {
        self.slots.borrow().iter().filter(|s| !s.is_dead()).count()
    }
}
