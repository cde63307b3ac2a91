//! RAII guard for interned property names

use ferry_engine::{Atom, Engine};
use tracing::trace;

use crate::error::{FerryError, FerryResult};

/// An atom that is freed when the guard goes out of scope.
///
/// Property operations acquire one per lookup, so the table never grows
/// across repeated calls, whichever way the operation exits.
pub struct ScopedAtom<'a> {
    engine: &'a Engine,
    atom: Atom,
}

impl<'a> ScopedAtom<'a> {
    pub fn new(engine: &'a Engine, name: &str) -> FerryResult<Self> {
        let atom = engine.new_atom(name);
        if atom.is_null() {
            return Err(FerryError::AtomExhausted(name.to_string()));
        }
        trace!(name, atom = atom.as_u32(), "atom acquired");
        Ok(Self { engine, atom })
    }

    pub fn atom(&self) -> Atom {
        self.atom
    }
}

impl Drop for ScopedAtom<'_> {
    fn drop(&mut self) {
        trace!(atom = self.atom.as_u32(), "atom released");
        self.engine.free_atom(self.atom);
    }
}
