//! Property access and calls on managed values.
//!
//! Two flavours of each operation:
//!
//! - the lenient one (`property`, `at_index`, `call`) never fails. Host
//!   misuse such as calling a non-function degrades according to the
//!   context's [`MisusePolicy`](crate::MisusePolicy), and a script exception
//!   comes back as an exception-tagged value.
//! - the `try_` one reports misuse and script exceptions as [`FerryError`].

use ferry_engine::RawValue;

use crate::atom::ScopedAtom;
use crate::context::Context;
use crate::convert::IntoValue;
use crate::error::{FerryError, FerryResult};
use crate::value::FerryValue;

impl FerryValue {
    fn attached(&self) -> FerryResult<&Context> {
        self.context().ok_or(FerryError::Detached)
    }

    fn degrade(&self, error: FerryError) -> FerryValue {
        match self.context() {
            Some(ctx) => ctx.misuse(error),
            None => {
                tracing::debug!(%error, "detached value, using undefined");
                FerryValue::undefined()
            }
        }
    }

    /// Surface an exception-tagged result as an error.
    fn settle(ctx: &Context, value: FerryValue) -> FerryResult<FerryValue> {
        if value.is_exception() {
            return Err(ctx.pending_error());
        }
        Ok(value)
    }

    // ---------------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------------

    /// Whether `name` resolves on this value or its prototype chain.
    /// False for detached values and non-objects.
    pub fn has_property(&self, name: &str) -> bool {
        let Some(ctx) = self.context() else {
            return false;
        };
        let Ok(atom) = ScopedAtom::new(ctx.engine(), name) else {
            return false;
        };
        match ctx.engine().has_property(self.raw(), atom.atom()) {
            Ok(found) => found,
            Err(_) => {
                ctx.discard_exception();
                false
            }
        }
    }

    fn lookup(&self, name: &str) -> FerryResult<FerryValue> {
        let ctx = self.attached()?;
        let atom = ScopedAtom::new(ctx.engine(), name)?;
        let raw = ctx.engine().get_property(self.raw(), atom.atom());
        Ok(FerryValue::adopt(ctx, raw))
    }

    /// Read property `name`. A throwing getter yields an exception-tagged
    /// value.
    pub fn property(&self, name: &str) -> FerryValue {
        self.lookup(name).unwrap_or_else(|e| self.degrade(e))
    }

    pub fn try_property(&self, name: &str) -> FerryResult<FerryValue> {
        let value = self.lookup(name)?;
        Self::settle(self.attached()?, value)
    }

    pub fn set_property<T: IntoValue + ?Sized>(&self, name: &str, value: &T) -> FerryResult<()> {
        let ctx = self.attached()?;
        let atom = ScopedAtom::new(ctx.engine(), name)?;
        let value = value.to_value(ctx);
        ctx.engine()
            .set_property(self.raw(), atom.atom(), value.raw())
            .map_err(|_| ctx.pending_error())
    }

    /// Remove own property `name`. Returns whether it is gone.
    pub fn delete_property(&self, name: &str) -> FerryResult<bool> {
        let ctx = self.attached()?;
        let atom = ScopedAtom::new(ctx.engine(), name)?;
        ctx.engine()
            .delete_property(self.raw(), atom.atom())
            .map_err(|_| ctx.pending_error())
    }

    // ---------------------------------------------------------------------
    // Arrays
    // ---------------------------------------------------------------------

    fn element(&self, index: i64) -> FerryResult<FerryValue> {
        let ctx = self.attached()?;
        if !self.is_array() {
            return Err(FerryError::NotAnArray);
        }
        let length = self.lookup("length")?.to_int().unwrap_or(0);
        let out_of_range = || FerryError::IndexOutOfRange { index, length };
        if index < 0 || index >= length {
            return Err(out_of_range());
        }
        let slot = u32::try_from(index).map_err(|_| out_of_range())?;
        let raw = ctx.engine().get_property_index(self.raw(), slot);
        Ok(FerryValue::adopt(ctx, raw))
    }

    /// Element `index` of an array. Negative or past-the-end indexes and
    /// non-array receivers are misuse.
    pub fn at_index(&self, index: i64) -> FerryValue {
        self.element(index).unwrap_or_else(|e| self.degrade(e))
    }

    pub fn try_at_index(&self, index: i64) -> FerryResult<FerryValue> {
        let value = self.element(index)?;
        Self::settle(self.attached()?, value)
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    fn invoke(&self, args: &[&dyn IntoValue]) -> FerryResult<FerryValue> {
        let ctx = self.attached()?;
        if !self.is_function() {
            return Err(FerryError::NotAFunction);
        }
        let args: Vec<FerryValue> = args.iter().map(|arg| arg.to_value(ctx)).collect();
        let raws: Vec<RawValue> = args.iter().map(FerryValue::raw).collect();
        tracing::trace!(argc = raws.len(), "calling script function");
        let raw = ctx.engine().call(self.raw(), RawValue::UNDEFINED, &raws);
        Ok(FerryValue::adopt(ctx, raw))
    }

    /// Call this function with `this` bound to undefined.
    ///
    /// An exception thrown by the function comes back exception-tagged.
    /// Calling something that is not a function is misuse and, under the
    /// default policy, returns undefined; check [`is_function`](Self::is_function)
    /// first when the two cases must be told apart.
    pub fn call(&self, args: &[&dyn IntoValue]) -> FerryValue {
        self.invoke(args).unwrap_or_else(|e| self.degrade(e))
    }

    pub fn try_call(&self, args: &[&dyn IntoValue]) -> FerryResult<FerryValue> {
        let value = self.invoke(args)?;
        Self::settle(self.attached()?, value)
    }
}
