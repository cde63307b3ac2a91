//! Interned property names.
//!
//! Atoms are reference counted: interning an existing name bumps its count,
//! and the entry disappears once every holder has freed it. The table has a
//! fixed capacity so that leaked atoms surface as `Atom::NULL` instead of
//! unbounded growth.

use boa_engine::JsString;
use boa_engine::property::PropertyKey;
use rustc_hash::FxHashMap;

/// Interned property-name handle. `Atom::NULL` is never a valid name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Atom(u32);

impl Atom {
    pub const NULL: Atom = Atom(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

struct Entry {
    name: String,
    key: PropertyKey,
    ref_count: u32,
}

pub(crate) struct AtomTable {
    entries: Vec<Option<Entry>>,
    free: Vec<u32>,
    index: FxHashMap<String, u32>,
    capacity: usize,
}

impl AtomTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            index: FxHashMap::default(),
            capacity,
        }
    }

    pub(crate) fn intern(&mut self, name: &str) -> Atom {
        if let Some(&slot) = self.index.get(name) {
            if let Some(entry) = self.entries[slot as usize].as_mut() {
                entry.ref_count += 1;
            }
            return Atom(slot + 1);
        }
        if self.index.len() >= self.capacity {
            return Atom::NULL;
        }

        let entry = Entry {
            name: name.to_owned(),
            key: PropertyKey::from(JsString::from(name)),
            ref_count: 1,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.entries[slot as usize] = Some(entry);
                slot
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as u32
            }
        };
        self.index.insert(name.to_owned(), slot);
        Atom(slot + 1)
    }

    /// Returns false when the atom was not live.
    pub(crate) fn release(&mut self, atom: Atom) -> bool {
        let Some(slot) = atom.0.checked_sub(1) else {
            return false;
        };
        let Some(Some(entry)) = self.entries.get_mut(slot as usize) else {
            return false;
        };
        entry.ref_count -= 1;
        if entry.ref_count == 0 {
            if let Some(entry) = self.entries[slot as usize].take() {
                self.index.remove(&entry.name);
            }
            self.free.push(slot);
        }
        true
    }

    fn entry(&self, atom: Atom) -> Option<&Entry> {
        let slot = atom.0.checked_sub(1)?;
        self.entries.get(slot as usize)?.as_ref()
    }

    pub(crate) fn key(&self, atom: Atom) -> Option<PropertyKey> {
        self.entry(atom).map(|e| e.key.clone())
    }

    pub(crate) fn name(&self, atom: Atom) -> Option<&str> {
        self.entry(atom).map(|e| e.name.as_str())
    }

    pub(crate) fn live(&self) -> usize {
        self.index.len()
    }
}
