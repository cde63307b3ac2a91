//! Bridge context: owns the engine and hands out managed values.

use std::fmt;
use std::rc::Rc;

use ferry_engine::{Engine, HeapStats, RawValue};
use tracing::{debug, trace};

use crate::atom::ScopedAtom;
use crate::config::{ContextConfig, MisusePolicy};
use crate::convert::IntoValue;
use crate::error::{FerryError, FerryResult};
use crate::opaque::OpaqueRegistry;
use crate::value::FerryValue;

struct ContextInner {
    opaque: OpaqueRegistry,
    config: ContextConfig,
    engine: Engine,
}

/// Shared handle to one engine context.
///
/// Cloning is cheap; every [`FerryValue`] that owns a heap reference holds a
/// clone, so the engine outlives all values created from it.
///
/// # Thread Safety
///
/// `Context` is `!Send` and `!Sync`. All operations must happen on the thread
/// that created it.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Context {
    /// Create a context with default settings.
    pub fn new() -> FerryResult<Self> {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with custom settings.
    pub fn with_config(config: ContextConfig) -> FerryResult<Self> {
        config.validate()?;
        debug!(
            misuse_policy = ?config.misuse_policy,
            max_atoms = config.max_atoms,
            "creating bridge context"
        );
        let engine = Engine::new(config.engine_config());
        Ok(Self {
            inner: Rc::new(ContextInner {
                opaque: OpaqueRegistry::new(),
                config,
                engine,
            }),
        })
    }

    /// The raw engine surface.
    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub fn config(&self) -> &ContextConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> HeapStats {
        self.inner.engine.stats()
    }

    pub(crate) fn opaque(&self) -> &OpaqueRegistry {
        &self.inner.opaque
    }

    pub(crate) fn same(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Evaluate a script under the configured source name.
    ///
    /// A script that throws yields an exception-tagged value; the thrown
    /// value stays pending until [`Context::take_exception`].
    pub fn eval(&self, source: &str) -> FerryValue {
        self.eval_with_source(source, &self.inner.config.source_name)
    }

    pub fn eval_with_source(&self, source: &str, filename: &str) -> FerryValue {
        let raw = self.inner.engine.eval(source, filename);
        FerryValue::adopt(self, raw)
    }

    /// Evaluate a script, turning a thrown exception into an error.
    pub fn try_eval(&self, source: &str) -> FerryResult<FerryValue> {
        let value = self.eval(source);
        if value.is_exception() {
            return Err(self.pending_error());
        }
        Ok(value)
    }

    /// The global object.
    pub fn global(&self) -> FerryValue {
        FerryValue::adopt(self, self.inner.engine.global_object())
    }

    pub fn get_global(&self, name: &str) -> FerryValue {
        self.global().property(name)
    }

    pub fn set_global<T: IntoValue + ?Sized>(&self, name: &str, value: &T) -> FerryResult<()> {
        self.global().set_property(name, value)
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.global().has_property(name)
    }

    /// Produce a managed value from a native one.
    pub fn value<T: IntoValue + ?Sized>(&self, value: &T) -> FerryValue {
        value.to_value(self)
    }

    /// Intern a property name for the lifetime of the returned guard.
    pub fn atom(&self, name: &str) -> FerryResult<ScopedAtom<'_>> {
        ScopedAtom::new(&self.inner.engine, name)
    }

    /// Collect and clear the pending script exception, if any.
    pub fn take_exception(&self) -> Option<FerryError> {
        let engine = &self.inner.engine;
        if !engine.has_exception() {
            return None;
        }
        let details = engine.exception_details();
        let thrown = engine.take_exception();
        engine.free(thrown);
        let error = match details {
            Some(details) => FerryError::ScriptError {
                error_type: details.name,
                message: details.message,
                stack: details.stack,
            },
            None => FerryError::script_error("Error", "unknown exception"),
        };
        trace!(%error, "exception collected");
        Some(error)
    }

    /// Clear the pending exception, or report one that should have been there.
    pub(crate) fn pending_error(&self) -> FerryError {
        self.take_exception()
            .unwrap_or_else(|| FerryError::internal("operation failed without a pending exception"))
    }

    /// Drop a pending exception raised by a lenient operation.
    pub(crate) fn discard_exception(&self) {
        if let Some(error) = self.take_exception() {
            debug!(%error, "discarding exception from lenient operation");
        }
    }

    /// Apply the misuse policy to a host-side error.
    pub(crate) fn misuse(&self, error: FerryError) -> FerryValue {
        match self.inner.config.misuse_policy {
            MisusePolicy::Undefined => {
                debug!(%error, "host misuse degraded to undefined");
                FerryValue::undefined()
            }
            MisusePolicy::Throw => {
                debug!(%error, "host misuse raised as TypeError");
                let raw = self.inner.engine.throw_type_error(&error.to_string());
                FerryValue::adopt(self, raw)
            }
        }
    }

    /// Wrap a raw value the caller already owns.
    pub fn adopt(&self, raw: RawValue) -> FerryValue {
        FerryValue::adopt(self, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_scalar() {
        let ctx = Context::new().unwrap();
        let value = ctx.eval("let i = 10; i;");
        assert_eq!(value.to_int(), Some(10));
    }

    #[test]
    fn test_try_eval_error() {
        let ctx = Context::new().unwrap();
        let err = ctx.try_eval("throw new RangeError('too far')").unwrap_err();
        assert!(err.is_script_error());
        assert_eq!(err.error_type(), "RangeError");
        assert!(err.to_string().contains("too far"));
        assert!(ctx.take_exception().is_none());
    }

    #[test]
    fn test_zero_atoms_rejected() {
        let err = Context::with_config(ContextConfig::new().max_atoms(0)).unwrap_err();
        assert!(matches!(err, FerryError::ContextCreation { .. }));
    }

    #[test]
    fn test_globals() {
        let ctx = Context::new().unwrap();
        assert!(!ctx.has_global("answer"));
        ctx.set_global("answer", &42).unwrap();
        assert!(ctx.has_global("answer"));
        assert_eq!(ctx.get_global("answer").to_int(), Some(42));
        assert_eq!(ctx.eval("answer + 1").to_int(), Some(43));
    }

    #[test]
    fn test_clone_shares_engine() {
        let ctx = Context::new().unwrap();
        let other = ctx.clone();
        assert!(ctx.same(&other));
        assert!(!ctx.same(&Context::new().unwrap()));
    }

    #[test]
    fn test_misuse_policy_throw() {
        let ctx = Context::with_config(ContextConfig::strict()).unwrap();
        let value = ctx.misuse(FerryError::NotAFunction);
        assert!(value.is_exception());
        let err = ctx.take_exception().unwrap();
        assert_eq!(err.error_type(), "TypeError");
    }

    #[test]
    fn test_values_released_with_scope() {
        let ctx = Context::new().unwrap();
        {
            let _a = ctx.eval("({})");
            let _b = ctx.value("text");
            assert_eq!(ctx.stats().live_values, 2);
        }
        assert_eq!(ctx.stats().live_values, 0);
    }
}
