//! Conversion protocol between native types and engine values.
//!
//! `FromValue` builds a native value from an engine value and fails with
//! `None` when the tag does not match: a string is never read as a number,
//! a number never as a boolean. `IntoValue` produces a managed engine value
//! and cannot fail.
//!
//! Implement both for your own types to let them cross the boundary through
//! [`FerryValue::get`], [`FerryValue::call`] and friends.

use std::fmt;

use ferry_engine::{ExceptionDetails, RawValue};
use tracing::warn;

use crate::context::Context;
use crate::error::FerryError;
use crate::value::FerryValue;

/// Construct a native value from an engine value.
pub trait FromValue: Sized {
    /// `raw` is borrowed; implementations that keep it must duplicate.
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self>;
}

/// Produce an engine value from a native one.
pub trait IntoValue {
    fn to_value(&self, ctx: &Context) -> FerryValue;
}

/// Marker for an exception-tagged value.
///
/// The thrown value itself stays pending on the engine; the marker carries
/// its name, message and stack as they were when the conversion ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exception {
    details: Option<ExceptionDetails>,
}

impl Exception {
    pub fn details(&self) -> Option<&ExceptionDetails> {
        self.details.as_ref()
    }

    /// Error name, e.g. "TypeError".
    pub fn name(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.name.as_str())
    }

    pub fn message(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.message.as_str())
    }

    pub fn stack(&self) -> Option<&str> {
        self.details.as_ref().and_then(|d| d.stack.as_deref())
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(d) => write!(f, "{}: {}", d.name, d.message),
            None => write!(f, "exception"),
        }
    }
}

impl From<Exception> for FerryError {
    fn from(exception: Exception) -> Self {
        match exception.details {
            Some(d) => FerryError::ScriptError {
                error_type: d.name,
                message: d.message,
                stack: d.stack,
            },
            None => FerryError::script_error("Error", "unknown exception"),
        }
    }
}

// ---------------------------------------------------------------------------
// FromValue implementations
// ---------------------------------------------------------------------------

impl FromValue for String {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_string() {
            return None;
        }
        let engine = ctx.engine();
        let exported = engine.to_cstring(raw)?;
        let text = exported.as_str().to_owned();
        engine.free_cstring(exported);
        Some(text)
    }
}

impl FromValue for i32 {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_number() {
            return None;
        }
        ctx.engine().to_int32(raw).ok()
    }
}

impl FromValue for u32 {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_number() {
            return None;
        }
        ctx.engine().to_uint32(raw).ok()
    }
}

impl FromValue for i64 {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_number() {
            return None;
        }
        ctx.engine().to_int64(raw).ok()
    }
}

impl FromValue for isize {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        let n = i64::from_value(ctx, raw)?;
        isize::try_from(n).ok()
    }
}

/// Negative values and values above `u32::MAX` do not convert.
impl FromValue for usize {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        let n = i64::from_value(ctx, raw)?;
        let n = u32::try_from(n).ok()?;
        usize::try_from(n).ok()
    }
}

impl FromValue for f64 {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_number() {
            return None;
        }
        ctx.engine().to_float64(raw).ok()
    }
}

impl FromValue for bool {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_bool() {
            return None;
        }
        ctx.engine().to_bool(raw).ok()
    }
}

/// Any object with a `length` converts, not only arrays. One element that
/// fails to convert fails the whole sequence. A throwing getter fails it too,
/// with the exception cleared.
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_object() {
            return None;
        }
        let receiver = FerryValue::borrowed(ctx, raw);
        let length = receiver.property("length");
        if length.is_exception() {
            ctx.discard_exception();
            return None;
        }
        let length = u32::try_from(length.to_int()?).ok()?;

        let engine = ctx.engine();
        let mut items = Vec::with_capacity(length.min(1024) as usize);
        for index in 0..length {
            let item = FerryValue::adopt(ctx, engine.get_property_index(raw, index));
            if item.is_exception() {
                ctx.discard_exception();
                return None;
            }
            items.push(T::from_value(ctx, item.raw())?);
        }
        Some(items)
    }
}

impl FromValue for Exception {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if !raw.is_exception() {
            return None;
        }
        Some(Exception {
            details: ctx.engine().exception_details_of(raw),
        })
    }
}

impl FromValue for FerryValue {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        Some(FerryValue::duplicate(ctx, raw))
    }
}

/// `null` and `undefined` convert to `None`.
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        if raw.is_null() || raw.is_undefined() {
            return Some(None);
        }
        T::from_value(ctx, raw).map(Some)
    }
}

impl FromValue for serde_json::Value {
    fn from_value(ctx: &Context, raw: RawValue) -> Option<Self> {
        let json = ctx.engine().to_json(raw);
        if json.is_none() {
            ctx.discard_exception();
        }
        json
    }
}

// ---------------------------------------------------------------------------
// IntoValue implementations
// ---------------------------------------------------------------------------

impl<T: IntoValue + ?Sized> IntoValue for &T {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        (**self).to_value(ctx)
    }
}

impl IntoValue for str {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_string(self))
    }
}

impl IntoValue for String {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        self.as_str().to_value(ctx)
    }
}

impl IntoValue for i32 {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_int32(*self))
    }
}

impl IntoValue for u32 {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_uint32(*self))
    }
}

impl IntoValue for i64 {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_int64(*self))
    }
}

impl IntoValue for isize {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_int64(*self as i64))
    }
}

impl IntoValue for usize {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        let raw = match u32::try_from(*self) {
            Ok(n) => ctx.engine().new_uint32(n),
            Err(_) => ctx.engine().new_float64(*self as f64),
        };
        FerryValue::adopt(ctx, raw)
    }
}

impl IntoValue for f64 {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_float64(*self))
    }
}

impl IntoValue for bool {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().new_bool(*self))
    }
}

/// Builds a fresh engine array.
impl<T: IntoValue> IntoValue for [T] {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        let engine = ctx.engine();
        let array = FerryValue::adopt(ctx, engine.new_array());
        for (index, item) in self.iter().enumerate() {
            let Ok(index) = u32::try_from(index) else {
                return FerryValue::adopt(ctx, engine.throw_type_error("array too long"));
            };
            let item = item.to_value(ctx);
            if engine
                .set_property_index(array.raw(), index, item.raw())
                .is_err()
            {
                return FerryValue::adopt(ctx, engine.pending_exception());
            }
        }
        array
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        self.as_slice().to_value(ctx)
    }
}

/// Managed values pass through with a reference of their own. A heap value
/// from another context cannot cross and becomes undefined.
impl IntoValue for FerryValue {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        match self.context() {
            Some(own) if own.same(ctx) => self.clone(),
            _ if !self.raw().has_ref_count() => FerryValue::adopt(ctx, self.raw()),
            _ => {
                warn!("value from another context passed as argument, using undefined");
                FerryValue::undefined()
            }
        }
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        match self {
            Some(value) => value.to_value(ctx),
            None => FerryValue::undefined(),
        }
    }
}

impl IntoValue for () {
    fn to_value(&self, _ctx: &Context) -> FerryValue {
        FerryValue::undefined()
    }
}

impl IntoValue for serde_json::Value {
    fn to_value(&self, ctx: &Context) -> FerryValue {
        FerryValue::adopt(ctx, ctx.engine().from_json(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T>(ctx: &Context, value: T) -> Option<T>
    where
        T: IntoValue + FromValue,
    {
        value.to_value(ctx).get::<T>()
    }

    #[test]
    fn test_integer_roundtrip() {
        let ctx = Context::new().unwrap();
        for n in [0, -1, i32::MAX, i32::MIN] {
            assert_eq!(roundtrip(&ctx, n), Some(n));
        }
        let wide = i64::from(i32::MAX) + 1;
        assert_eq!(roundtrip(&ctx, wide), Some(wide));
        assert_eq!(roundtrip(&ctx, u32::MAX), Some(u32::MAX));
    }

    #[test]
    fn test_string_roundtrip() {
        let ctx = Context::new().unwrap();
        for s in ["", "plain", "👋你好"] {
            assert_eq!(roundtrip(&ctx, s.to_string()).as_deref(), Some(s));
        }
        assert_eq!(ctx.stats().exported_strings, 0);
    }

    #[test]
    fn test_bool_and_float_roundtrip() {
        let ctx = Context::new().unwrap();
        assert_eq!(roundtrip(&ctx, true), Some(true));
        assert_eq!(roundtrip(&ctx, false), Some(false));
        assert_eq!(roundtrip(&ctx, 0.25), Some(0.25));
    }

    #[test]
    fn test_tag_mismatch() {
        let ctx = Context::new().unwrap();
        let s = ctx.eval("'1'");
        let n = ctx.eval("1");
        assert_eq!(s.get::<i32>(), None);
        assert_eq!(s.get::<f64>(), None);
        assert_eq!(n.get::<String>(), None);
        assert_eq!(n.get::<bool>(), None);
        assert_eq!(ctx.eval("true").get::<i64>(), None);
    }

    #[test]
    fn test_modular_narrowing() {
        let ctx = Context::new().unwrap();
        let big = ctx.eval("4294967297");
        assert_eq!(big.get::<i32>(), Some(1));
        assert_eq!(big.get::<i64>(), Some(4_294_967_297));
        assert_eq!(ctx.eval("-1").get::<u32>(), Some(u32::MAX));
    }

    #[test]
    fn test_usize_range_checked() {
        let ctx = Context::new().unwrap();
        assert_eq!(ctx.eval("7").get::<usize>(), Some(7));
        assert_eq!(ctx.eval("-1").get::<usize>(), None);
        assert_eq!(ctx.eval("4294967296").get::<usize>(), None);
        assert_eq!(ctx.eval("-5").get::<isize>(), Some(-5));
    }

    #[test]
    fn test_vec_atomic() {
        let ctx = Context::new().unwrap();
        assert_eq!(ctx.eval("[1, 2]").get::<Vec<i32>>(), Some(vec![1, 2]));
        assert_eq!(ctx.eval("[1, '2']").get::<Vec<i32>>(), None);
        assert_eq!(ctx.eval("[1, '2']").get::<Vec<String>>(), None);
        assert_eq!(
            ctx.eval("['a', 'b']").get::<Vec<String>>(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(ctx.eval("'ab'").get::<Vec<String>>(), None);
        assert_eq!(ctx.stats().live_values, 0);
    }

    #[test]
    fn test_vec_accepts_array_like_objects() {
        let ctx = Context::new().unwrap();
        let value = ctx.eval("({ length: 2, 0: 5, 1: 6 })");
        assert!(!value.is_array());
        assert_eq!(value.get::<Vec<i32>>(), Some(vec![5, 6]));
    }

    #[test]
    fn test_vec_producer_builds_array() {
        let ctx = Context::new().unwrap();
        let value = vec![1, 2, 3].to_value(&ctx);
        assert!(value.is_array());
        assert_eq!(value.get::<Vec<i64>>(), Some(vec![1, 2, 3]));

        let nested = vec![vec!["x"], vec![]].to_value(&ctx);
        assert_eq!(nested.property("length").to_int(), Some(2));
    }

    #[test]
    fn test_option() {
        let ctx = Context::new().unwrap();
        assert_eq!(ctx.eval("null").get::<Option<i32>>(), Some(None));
        assert_eq!(ctx.eval("3").get::<Option<i32>>(), Some(Some(3)));
        assert_eq!(ctx.eval("'3'").get::<Option<i32>>(), None);
        assert!(None::<i32>.to_value(&ctx).is_undefined());
        assert!(().to_value(&ctx).is_undefined());
    }

    #[test]
    fn test_exception_marker() {
        let ctx = Context::new().unwrap();
        assert!(ctx.eval("1").get::<Exception>().is_none());

        let thrown = ctx.eval("throw new TypeError('bad')");
        let exception = thrown.to_error().unwrap();
        assert_eq!(exception.name(), Some("TypeError"));
        assert_eq!(exception.message(), Some("bad"));
        assert_eq!(exception.to_string(), "TypeError: bad");

        let err: FerryError = exception.into();
        assert!(err.is_script_error());
    }

    #[test]
    fn test_exception_details_follow_their_value() {
        let ctx = Context::new().unwrap();
        let first = ctx.eval("throw new TypeError('first')");
        let second = ctx.eval("throw new RangeError('second')");
        assert_eq!(first.to_error().unwrap().to_string(), "TypeError: first");
        assert_eq!(second.to_error().unwrap().to_string(), "RangeError: second");

        assert!(ctx.take_exception().is_some());
        let exception = first.to_error().unwrap();
        assert_eq!(exception.name(), Some("TypeError"));
        assert_eq!(exception.message(), Some("first"));

        let thrown = ctx.eval("throw new SyntaxError('kept')");
        assert_eq!(ctx.eval("Symbol('s')").coerce_string(), None);
        assert!(ctx.take_exception().is_none());
        assert_eq!(thrown.to_error().unwrap().message(), Some("kept"));

        drop((first, second, thrown));
        assert_eq!(ctx.stats().live_exceptions, 0);
    }

    #[test]
    fn test_vec_throwing_getter_clears_exception() {
        let ctx = Context::new().unwrap();
        let length = ctx.eval("({ get length() { throw new Error('length') } })");
        assert_eq!(length.get::<Vec<i32>>(), None);
        assert!(ctx.take_exception().is_none());

        let element = ctx.eval("({ length: 2, 0: 1, get 1() { throw new Error('element') } })");
        assert_eq!(element.get::<Vec<i32>>(), None);
        assert!(ctx.take_exception().is_none());
    }

    #[test]
    fn test_foreign_value_does_not_cross() {
        let a = Context::new().unwrap();
        let b = Context::new().unwrap();
        let obj = a.eval("({})");
        assert!(obj.to_value(&b).is_undefined());
        assert_eq!(a.eval("5").to_value(&b).to_int(), Some(5));
    }

    #[test]
    fn test_json_value() {
        let ctx = Context::new().unwrap();
        let json = serde_json::json!({ "name": "ferry", "tags": [1, 2] });
        let value = json.to_value(&ctx);
        assert!(value.is_object());
        assert_eq!(value.get::<serde_json::Value>(), Some(json));
    }
}
