//! Managed engine values with exactly-once release

use std::any::Any;
use std::fmt;
use std::rc::{Rc, Weak};

use ferry_engine::{RawValue, Tag};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::context::Context;
use crate::convert::{Exception, FromValue};
use crate::error::{FerryError, FerryResult};

/// A script value owned by the host.
///
/// Holds one reference to an engine value plus the context it belongs to.
/// When `auto_release` is set the reference is given back to the engine
/// exactly once, on drop. Construction adopts the caller's reference unless
/// duplication is requested, and `Clone` is the explicit duplicate path.
///
/// A value without a context is a sentinel: it never carries a heap
/// reference and is never released.
///
/// # Thread Safety
///
/// This type is `!Send` and `!Sync` because it holds a [`Context`].
pub struct FerryValue {
    raw: RawValue,
    ctx: Option<Context>,
    auto_release: bool,
}

impl FerryValue {
    /// Wrap `raw`.
    ///
    /// With `dup` the engine reference count is bumped first, for a raw value
    /// the caller keeps using; otherwise the caller's one reference moves into
    /// the new handle and must not be freed by the caller again.
    pub fn new(ctx: Option<&Context>, raw: RawValue, dup: bool, auto_release: bool) -> Self {
        match ctx {
            Some(ctx) => {
                let raw = if dup { ctx.engine().dup(raw) } else { raw };
                Self {
                    raw,
                    ctx: Some(ctx.clone()),
                    auto_release,
                }
            }
            None if raw.has_ref_count() => {
                warn!(tag = ?raw.tag(), "heap value without a context, using undefined");
                Self::undefined()
            }
            None => Self {
                raw,
                ctx: None,
                auto_release: false,
            },
        }
    }

    /// Take ownership of a reference the caller holds.
    pub fn adopt(ctx: &Context, raw: RawValue) -> Self {
        Self::new(Some(ctx), raw, false, true)
    }

    /// Add a reference of our own, leaving the caller's untouched.
    pub fn duplicate(ctx: &Context, raw: RawValue) -> Self {
        Self::new(Some(ctx), raw, true, true)
    }

    /// View a value whose reference stays with the caller. Never released.
    pub fn borrowed(ctx: &Context, raw: RawValue) -> Self {
        Self::new(Some(ctx), raw, false, false)
    }

    pub const fn undefined() -> Self {
        Self {
            raw: RawValue::UNDEFINED,
            ctx: None,
            auto_release: false,
        }
    }

    pub const fn null() -> Self {
        Self {
            raw: RawValue::NULL,
            ctx: None,
            auto_release: false,
        }
    }

    pub fn raw(&self) -> RawValue {
        self.raw
    }

    pub fn context(&self) -> Option<&Context> {
        self.ctx.as_ref()
    }

    /// Give up the handle and return one owned reference to the raw value.
    ///
    /// A borrowed handle duplicates first, so the caller always owns what
    /// it gets back.
    pub fn into_raw(mut self) -> RawValue {
        if let Some(ctx) = &self.ctx {
            if !self.auto_release {
                ctx.engine().dup(self.raw);
            }
        }
        self.auto_release = false;
        self.raw
    }

    // ---------------------------------------------------------------------
    // Tag predicates
    // ---------------------------------------------------------------------

    pub fn is_undefined(&self) -> bool {
        self.raw.is_undefined()
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_null()
    }

    pub fn is_exception(&self) -> bool {
        self.raw.is_exception()
    }

    pub fn is_object(&self) -> bool {
        self.raw.is_object()
    }

    pub fn is_string(&self) -> bool {
        self.raw.is_string()
    }

    pub fn is_number(&self) -> bool {
        self.raw.is_number()
    }

    pub fn is_boolean(&self) -> bool {
        self.raw.is_bool()
    }

    pub fn is_bool(&self) -> bool {
        self.raw.is_bool()
    }

    pub fn is_symbol(&self) -> bool {
        self.raw.is_symbol()
    }

    /// Needs a context; false for a detached value.
    pub fn is_function(&self) -> bool {
        self.ctx
            .as_ref()
            .is_some_and(|ctx| ctx.engine().is_function(self.raw))
    }

    /// Needs a context; false for a detached value.
    pub fn is_array(&self) -> bool {
        self.ctx
            .as_ref()
            .is_some_and(|ctx| ctx.engine().is_array(self.raw))
    }

    pub fn is_bigint(&self) -> bool {
        self.ctx
            .as_ref()
            .is_some_and(|ctx| ctx.engine().is_bigint(self.raw))
    }

    /// Script-level type name, refined to "function" and "array".
    pub fn type_name(&self) -> &'static str {
        match self.raw.tag() {
            Tag::Undefined => "undefined",
            Tag::Null => "null",
            Tag::Bool => "boolean",
            Tag::Int | Tag::Float64 => "number",
            Tag::String => "string",
            Tag::Symbol => "symbol",
            Tag::BigInt => "bigint",
            Tag::Exception => "exception",
            Tag::Object if self.is_function() => "function",
            Tag::Object if self.is_array() => "array",
            Tag::Object => "object",
        }
    }

    // ---------------------------------------------------------------------
    // Conversion
    // ---------------------------------------------------------------------

    /// Convert to a native type. `None` when detached or when the value does
    /// not have the shape `T` expects.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        let ctx = self.ctx.as_ref()?;
        T::from_value(ctx, self.raw)
    }

    /// Like [`get`](Self::get), reporting why the conversion failed.
    pub fn try_get<T: FromValue>(&self) -> FerryResult<T> {
        let ctx = self.ctx.as_ref().ok_or(FerryError::Detached)?;
        T::from_value(ctx, self.raw)
            .ok_or_else(|| FerryError::type_error(std::any::type_name::<T>(), self.type_name()))
    }

    pub fn to_int(&self) -> Option<i64> {
        self.get()
    }

    pub fn to_double(&self) -> Option<f64> {
        self.get()
    }

    /// The string payload of a string-tagged value. See
    /// [`coerce_string`](Self::coerce_string) for script `ToString`.
    pub fn to_string(&self) -> Option<String> {
        self.get()
    }

    pub fn to_bool(&self) -> Option<bool> {
        self.get()
    }

    pub fn to_error(&self) -> Option<Exception> {
        self.get()
    }

    /// Script `ToString` of any value.
    pub fn coerce_string(&self) -> Option<String> {
        let ctx = self.ctx.as_ref()?;
        let engine = ctx.engine();
        match engine.to_cstring(self.raw) {
            Some(exported) => {
                let text = exported.as_str().to_owned();
                engine.free_cstring(exported);
                Some(text)
            }
            None => {
                ctx.discard_exception();
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Serde bridge
    // ---------------------------------------------------------------------

    pub fn to_json(&self) -> FerryResult<serde_json::Value> {
        let ctx = self.ctx.as_ref().ok_or(FerryError::Detached)?;
        ctx.engine()
            .to_json(self.raw)
            .ok_or_else(|| ctx.pending_error())
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> FerryResult<T> {
        let json = self.to_json()?;
        Ok(serde_json::from_value(json)?)
    }

    // ---------------------------------------------------------------------
    // Native handle association
    // ---------------------------------------------------------------------

    /// Associate a native object with this engine object without keeping
    /// it alive. Returns false for non-objects or detached values.
    pub fn set_opaque<T: Any>(&self, handle: &Rc<T>) -> bool {
        let Some(ctx) = &self.ctx else {
            return false;
        };
        if !self.is_object() {
            return false;
        }
        let engine = ctx.engine();
        let weak: Weak<T> = Rc::downgrade(handle);
        let token = ctx.opaque().attach(engine.get_opaque(self.raw), weak);
        engine.set_opaque(self.raw, token)
    }

    /// The native object associated with this engine object, if it is still
    /// alive and of type `T`.
    pub fn get_opaque<T: Any>(&self) -> Option<Rc<T>> {
        let ctx = self.ctx.as_ref()?;
        let token = ctx.engine().get_opaque(self.raw)?;
        ctx.opaque().lookup(token)
    }
}

impl Clone for FerryValue {
    fn clone(&self) -> Self {
        Self::new(self.ctx.as_ref(), self.raw, true, true)
    }
}

impl Drop for FerryValue {
    fn drop(&mut self) {
        if !self.auto_release {
            return;
        }
        if let Some(ctx) = &self.ctx {
            ctx.engine().free(self.raw);
        }
    }
}

impl fmt::Debug for FerryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = matches!(
            self.raw.tag(),
            Tag::String | Tag::Int | Tag::Float64 | Tag::Bool | Tag::Null | Tag::Undefined
        );
        let text = if printable { self.coerce_string() } else { None };
        match text {
            Some(s) => write!(f, "FerryValue({})", s),
            None => write!(f, "FerryValue(<{}>)", self.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_carry_no_context() {
        let undefined = FerryValue::undefined();
        let null = FerryValue::null();
        assert!(undefined.is_undefined());
        assert!(null.is_null());
        assert!(undefined.context().is_none());
        assert!(!undefined.is_function());
        assert!(undefined.to_int().is_none());
    }

    #[test]
    fn test_adopt_releases_once() {
        let ctx = Context::new().unwrap();
        let raw = ctx.engine().new_object();
        {
            let value = FerryValue::adopt(&ctx, raw);
            assert_eq!(ctx.engine().ref_count(value.raw()), 1);
        }
        assert_eq!(ctx.stats().live_values, 0);
        assert_eq!(ctx.stats().stale_releases, 0);
    }

    #[test]
    fn test_duplicate_leaves_caller_reference() {
        let ctx = Context::new().unwrap();
        let engine = ctx.engine();
        let raw = engine.new_string("kept");
        {
            let value = FerryValue::duplicate(&ctx, raw);
            assert_eq!(engine.ref_count(value.raw()), 2);
        }
        assert_eq!(engine.ref_count(raw), 1);
        engine.free(raw);
        assert_eq!(ctx.stats().live_values, 0);
    }

    #[test]
    fn test_borrowed_never_releases() {
        let ctx = Context::new().unwrap();
        let raw = ctx.engine().new_object();
        drop(FerryValue::borrowed(&ctx, raw));
        assert_eq!(ctx.engine().ref_count(raw), 1);
        ctx.engine().free(raw);
    }

    #[test]
    fn test_clone_duplicates() {
        let ctx = Context::new().unwrap();
        let a = ctx.eval("({})");
        let b = a.clone();
        assert_eq!(ctx.engine().ref_count(a.raw()), 2);
        drop(a);
        assert_eq!(ctx.engine().ref_count(b.raw()), 1);
        drop(b);
        assert_eq!(ctx.stats().live_values, 0);
    }

    #[test]
    fn test_into_raw_transfers_reference() {
        let ctx = Context::new().unwrap();
        let raw = ctx.eval("[1, 2]").into_raw();
        assert_eq!(ctx.engine().ref_count(raw), 1);
        ctx.engine().free(raw);
        assert_eq!(ctx.stats().live_values, 0);
    }

    #[test]
    fn test_contextless_heap_value_becomes_undefined() {
        let ctx = Context::new().unwrap();
        let raw = ctx.engine().new_string("orphan");
        let value = FerryValue::new(None, raw, false, true);
        assert!(value.is_undefined());
        ctx.engine().free(raw);
    }

    #[test]
    fn test_predicates() {
        let ctx = Context::new().unwrap();
        assert!(ctx.eval("() => 1").is_function());
        assert!(ctx.eval("[]").is_array());
        assert!(ctx.eval("[]").is_object());
        assert!(ctx.eval("'s'").is_string());
        assert!(ctx.eval("1.5").is_number());
        assert!(ctx.eval("false").is_boolean());
        assert!(ctx.eval("Symbol()").is_symbol());
        assert!(ctx.eval("1n").is_bigint());
        assert!(ctx.eval("null").is_null());
        assert!(ctx.eval("undefined").is_undefined());
        assert!(ctx.eval("throw 1").is_exception());
    }

    #[test]
    fn test_type_name() {
        let ctx = Context::new().unwrap();
        assert_eq!(ctx.eval("() => 1").type_name(), "function");
        assert_eq!(ctx.eval("[]").type_name(), "array");
        assert_eq!(ctx.eval("({})").type_name(), "object");
        assert_eq!(ctx.eval("3").type_name(), "number");
    }

    #[test]
    fn test_try_get_reports_mismatch() {
        let ctx = Context::new().unwrap();
        let err = ctx.eval("'x'").try_get::<i32>().unwrap_err();
        assert!(matches!(err, FerryError::TypeError { ref actual, .. } if actual == "string"));
        assert!(matches!(
            FerryValue::undefined().try_get::<i32>(),
            Err(FerryError::Detached)
        ));
    }

    #[test]
    fn test_coerce_string() {
        let ctx = Context::new().unwrap();
        assert_eq!(ctx.eval("12").coerce_string().as_deref(), Some("12"));
        assert_eq!(ctx.eval("12").to_string(), None);
        assert_eq!(ctx.eval("[1, 2]").coerce_string().as_deref(), Some("1,2"));
        assert_eq!(ctx.eval("Symbol('s')").coerce_string(), None);
        assert!(ctx.take_exception().is_none());
    }

    #[test]
    fn test_deserialize() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }

        let ctx = Context::new().unwrap();
        let point: Point = ctx.eval("({ x: 1, y: 2 })").deserialize().unwrap();
        assert_eq!(point, Point { x: 1, y: 2 });
    }

    #[test]
    fn test_opaque_association() {
        let ctx = Context::new().unwrap();
        let obj = ctx.eval("({})");
        let native = Rc::new(String::from("native"));

        assert!(obj.get_opaque::<String>().is_none());
        assert!(obj.set_opaque(&native));
        assert_eq!(Rc::strong_count(&native), 1);
        assert!(Rc::ptr_eq(&obj.get_opaque::<String>().unwrap(), &native));

        // The link is unretained.
        drop(native);
        assert!(obj.get_opaque::<String>().is_none());

        assert!(!ctx.eval("1").set_opaque(&Rc::new(1u8)));
    }

    #[test]
    fn test_debug_format() {
        let ctx = Context::new().unwrap();
        assert_eq!(format!("{:?}", ctx.eval("'hi'")), "FerryValue(hi)");
        assert_eq!(format!("{:?}", ctx.eval("({})")), "FerryValue(<object>)");
        assert_eq!(format!("{:?}", FerryValue::undefined()), "FerryValue(<undefined>)");
    }
}
