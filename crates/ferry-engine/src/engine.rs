//! The engine context: evaluation, property access, calls and coercions over
//! manually reference-counted [`RawValue`]s.
//!
//! Every method that returns a heap-tagged value hands the caller exactly one
//! reference, which must eventually be given back with [`Engine::free`].
//! Methods that take values only borrow them.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::path::Path;

use boa_engine::object::ObjectInitializer;
use boa_engine::object::builtins::JsArray;
use boa_engine::property::{PropertyDescriptor, PropertyKey};
use boa_engine::{Context, JsError, JsNativeError, JsObject, JsString, JsSymbol, JsValue, Source};
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::atom::{Atom, AtomTable};
use crate::heap::Heap;
use crate::raw::{ExceptionId, RawValue};

/// The operation raised; the exception is pending on the engine until
/// [`Engine::take_exception`] collects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("javascript exception pending")]
pub struct Thrown;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of distinct live atoms.
    pub max_atoms: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_atoms: 65_536 }
    }
}

/// Reference and resource counters, for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Occupied heap slots.
    pub live_values: usize,
    /// Sum of the reference counts of all occupied slots.
    pub total_refs: u64,
    /// Distinct live atoms.
    pub live_atoms: usize,
    /// Strings handed out by `to_cstring` and not yet freed.
    pub exported_strings: usize,
    /// Raised exceptions still referenced by a marker.
    pub live_exceptions: usize,
    /// dup/free calls made on already released handles.
    pub stale_releases: u64,
}

/// Name, message and stack of a thrown value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionDetails {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

/// UTF-8 copy of a value produced by [`Engine::to_cstring`].
///
/// Hand it back with [`Engine::free_cstring`] once copied out.
#[derive(Debug)]
pub struct ExportedString {
    text: Box<str>,
}

impl ExportedString {
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

struct Raised {
    error: JsError,
    ref_count: u32,
}

/// Thrown values kept alive by the exception markers that name them.
#[derive(Default)]
struct ExceptionTable {
    last: u32,
    live: FxHashMap<u32, Raised>,
    stale: u64,
}

impl ExceptionTable {
    fn next_id(&mut self) -> ExceptionId {
        loop {
            self.last = self.last.wrapping_add(1);
            if self.last != 0 && !self.live.contains_key(&self.last) {
                return ExceptionId(self.last);
            }
        }
    }

    fn attach(&mut self, id: ExceptionId, error: &JsError) {
        self.live
            .entry(id.0)
            .or_insert_with(|| Raised {
                error: error.clone(),
                ref_count: 0,
            })
            .ref_count += 1;
    }

    fn retain(&mut self, id: ExceptionId) -> bool {
        match self.live.get_mut(&id.0) {
            Some(raised) => {
                raised.ref_count += 1;
                true
            }
            None => {
                self.stale += 1;
                false
            }
        }
    }

    fn release(&mut self, id: ExceptionId) -> bool {
        let Some(raised) = self.live.get_mut(&id.0) else {
            self.stale += 1;
            return false;
        };
        raised.ref_count -= 1;
        if raised.ref_count == 0 {
            self.live.remove(&id.0);
        }
        true
    }

    fn ref_count(&self, id: ExceptionId) -> u32 {
        self.live.get(&id.0).map_or(0, |r| r.ref_count)
    }

    fn error(&self, id: ExceptionId) -> Option<&JsError> {
        self.live.get(&id.0).map(|r| &r.error)
    }
}

/// A single-threaded script engine context.
///
/// This type is `!Send` and `!Sync`: the underlying engine must stay on the
/// thread that created it.
pub struct Engine {
    heap: RefCell<Heap>,
    atoms: RefCell<AtomTable>,
    exported: Cell<usize>,
    exceptions: RefCell<ExceptionTable>,
    pending: RefCell<Option<(ExceptionId, JsError)>>,
    opaque_key: Option<JsSymbol>,
    context: RefCell<Context>,
    /// Marker to make this type !Send + !Sync
    _not_send: PhantomData<*mut ()>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        debug!(max_atoms = config.max_atoms, "creating engine context");
        Self {
            heap: RefCell::new(Heap::default()),
            atoms: RefCell::new(AtomTable::new(config.max_atoms)),
            exported: Cell::new(0),
            exceptions: RefCell::new(ExceptionTable::default()),
            pending: RefCell::new(None),
            opaque_key: JsSymbol::new(Some(JsString::from("ferry.opaque"))),
            context: RefCell::new(Context::default()),
            _not_send: PhantomData,
        }
    }

    fn with_context<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        f(&mut self.context.borrow_mut())
    }

    /// Move an engine value into the raw representation, allocating a heap
    /// slot for reference types.
    fn wrap(&self, value: JsValue) -> RawValue {
        if value.is_undefined() {
            return RawValue::Undefined;
        }
        if value.is_null() {
            return RawValue::Null;
        }
        if let Some(b) = value.as_boolean() {
            return RawValue::Bool(b);
        }
        if let Some(n) = value.as_number() {
            return RawValue::number(n);
        }

        let is_string = value.is_string();
        let is_symbol = value.is_symbol();
        let is_bigint = value.is_bigint();
        let r = self.heap.borrow_mut().alloc(value);
        trace!(index = r.index(), "heap slot allocated");
        if is_string {
            RawValue::String(r)
        } else if is_symbol {
            RawValue::Symbol(r)
        } else if is_bigint {
            RawValue::BigInt(r)
        } else {
            RawValue::Object(r)
        }
    }

    /// Borrowed view of a raw value as an engine value.
    fn to_js(&self, value: RawValue) -> JsValue {
        match value {
            RawValue::Int(i) => JsValue::from(i),
            RawValue::Float(f) => JsValue::from(f),
            RawValue::Bool(b) => JsValue::from(b),
            RawValue::Null => JsValue::null(),
            RawValue::Undefined | RawValue::Exception(_) => JsValue::undefined(),
            RawValue::String(r)
            | RawValue::Object(r)
            | RawValue::Symbol(r)
            | RawValue::BigInt(r) => {
                let found = self.heap.borrow().get(r).cloned();
                found.unwrap_or_else(|| {
                    warn!(index = r.index(), "use of released heap value");
                    JsValue::undefined()
                })
            }
        }
    }

    fn object(&self, value: RawValue) -> Option<JsObject> {
        let RawValue::Object(r) = value else {
            return None;
        };
        let heap = self.heap.borrow();
        heap.get(r).and_then(|v| v.as_object().cloned())
    }

    fn raise(&self, error: JsError) -> Thrown {
        let id = self.exceptions.borrow_mut().next_id();
        trace!(id = id.as_u32(), "exception raised");
        *self.pending.borrow_mut() = Some((id, error));
        Thrown
    }

    fn throw(&self, error: JsError) -> RawValue {
        self.raise(error);
        self.pending_exception()
    }

    fn key(&self, atom: Atom) -> Result<PropertyKey, Thrown> {
        let key = self.atoms.borrow().key(atom);
        key.ok_or_else(|| {
            self.raise(
                JsNativeError::typ()
                    .with_message(format!("invalid atom {}", atom.as_u32()))
                    .into(),
            )
        })
    }

    /// ToObject on the receiver, as property reads on primitives require.
    fn receiver(&self, value: RawValue) -> Result<JsObject, Thrown> {
        if let Some(object) = self.object(value) {
            return Ok(object);
        }
        let js = self.to_js(value);
        self.with_context(|ctx| js.to_object(ctx))
            .map_err(|e| self.raise(e))
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Add one reference to `value` and return it.
    pub fn dup(&self, value: RawValue) -> RawValue {
        if let Some(r) = value.heap_ref() {
            if !self.heap.borrow_mut().retain(r) {
                warn!(index = r.index(), "dup of released heap value");
            }
        } else if let Some(id) = value.exception_id() {
            if !self.exceptions.borrow_mut().retain(id) {
                warn!(id = id.as_u32(), "dup of released exception marker");
            }
        }
        value
    }

    /// Give back one reference to `value`.
    pub fn free(&self, value: RawValue) {
        if let Some(r) = value.heap_ref() {
            if self.heap.borrow_mut().release(r) {
                trace!(index = r.index(), "heap reference released");
            } else {
                warn!(index = r.index(), "free of released heap value");
            }
        } else if let Some(id) = value.exception_id() {
            if !self.exceptions.borrow_mut().release(id) {
                warn!(id = id.as_u32(), "free of released exception marker");
            }
        }
    }

    /// Current reference count; 0 for scalars and released handles.
    pub fn ref_count(&self, value: RawValue) -> u32 {
        if let Some(id) = value.exception_id() {
            return self.exceptions.borrow().ref_count(id);
        }
        value
            .heap_ref()
            .map_or(0, |r| self.heap.borrow().ref_count(r))
    }

    // ---------------------------------------------------------------------
    // Atoms
    // ---------------------------------------------------------------------

    /// Intern `name`. Returns `Atom::NULL` when the table is full.
    pub fn new_atom(&self, name: &str) -> Atom {
        let atom = self.atoms.borrow_mut().intern(name);
        if atom.is_null() {
            warn!(name, "atom table exhausted");
        }
        atom
    }

    pub fn free_atom(&self, atom: Atom) {
        if !self.atoms.borrow_mut().release(atom) {
            warn!(atom = atom.as_u32(), "free of dead atom");
        }
    }

    pub fn atom_name(&self, atom: Atom) -> Option<String> {
        self.atoms.borrow().name(atom).map(str::to_owned)
    }

    // ---------------------------------------------------------------------
    // Evaluation
    // ---------------------------------------------------------------------

    /// Evaluate a script. Returns an exception-tagged value if it threw.
    pub fn eval(&self, source: &str, filename: &str) -> RawValue {
        debug!(filename, len = source.len(), "evaluating script");
        let result = self.with_context(|ctx| {
            ctx.eval(Source::from_bytes(source).with_path(Path::new(filename)))
        });
        match result {
            Ok(value) => self.wrap(value),
            Err(error) => {
                debug!(filename, %error, "script raised");
                self.throw(error)
            }
        }
    }

    pub fn global_object(&self) -> RawValue {
        let global = self.with_context(|ctx| ctx.global_object());
        self.wrap(JsValue::from(global))
    }

    // ---------------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------------

    pub fn get_property(&self, obj: RawValue, atom: Atom) -> RawValue {
        let target = match self.key(atom).and_then(|k| Ok((k, self.receiver(obj)?))) {
            Ok(target) => target,
            Err(Thrown) => return self.pending_exception(),
        };
        let (key, object) = target;
        let result = self.with_context(|ctx| object.get(key, ctx));
        match result {
            Ok(value) => self.wrap(value),
            Err(error) => self.throw(error),
        }
    }

    pub fn get_property_index(&self, obj: RawValue, index: u32) -> RawValue {
        let object = match self.receiver(obj) {
            Ok(object) => object,
            Err(Thrown) => return self.pending_exception(),
        };
        let result = self.with_context(|ctx| object.get(index, ctx));
        match result {
            Ok(value) => self.wrap(value),
            Err(error) => self.throw(error),
        }
    }

    /// Set a property. `value` is borrowed; the caller keeps its reference.
    pub fn set_property(&self, obj: RawValue, atom: Atom, value: RawValue) -> Result<(), Thrown> {
        let key = self.key(atom)?;
        let object = self.object(obj).ok_or_else(|| {
            self.raise(JsNativeError::typ().with_message("not an object").into())
        })?;
        let value = self.to_js(value);
        self.with_context(|ctx| object.set(key, value, true, ctx))
            .map(|_| ())
            .map_err(|e| self.raise(e))
    }

    pub fn set_property_index(&self, obj: RawValue, index: u32, value: RawValue) -> Result<(), Thrown> {
        let object = self.object(obj).ok_or_else(|| {
            self.raise(JsNativeError::typ().with_message("not an object").into())
        })?;
        let value = self.to_js(value);
        self.with_context(|ctx| object.set(index, value, true, ctx))
            .map(|_| ())
            .map_err(|e| self.raise(e))
    }

    /// Property lookup through the prototype chain. Non-objects have none.
    pub fn has_property(&self, obj: RawValue, atom: Atom) -> Result<bool, Thrown> {
        let key = self.key(atom)?;
        let Some(object) = self.object(obj) else {
            return Ok(false);
        };
        self.with_context(|ctx| object.has_property(key, ctx))
            .map_err(|e| self.raise(e))
    }

    pub fn delete_property(&self, obj: RawValue, atom: Atom) -> Result<bool, Thrown> {
        let key = self.key(atom)?;
        let Some(object) = self.object(obj) else {
            return Ok(false);
        };
        self.with_context(|ctx| object.delete_property_or_throw(key, ctx))
            .map_err(|e| self.raise(e))
    }

    // ---------------------------------------------------------------------
    // Calls
    // ---------------------------------------------------------------------

    /// Call `func` with `this` and `args`. All inputs are borrowed.
    pub fn call(&self, func: RawValue, this: RawValue, args: &[RawValue]) -> RawValue {
        let Some(function) = self.object(func).filter(|o| o.is_callable()) else {
            return self.throw(JsNativeError::typ().with_message("not a function").into());
        };
        let this = self.to_js(this);
        let args: Vec<JsValue> = args.iter().map(|a| self.to_js(*a)).collect();
        trace!(argc = args.len(), "calling function");
        let result = self.with_context(|ctx| function.call(&this, &args, ctx));
        match result {
            Ok(value) => self.wrap(value),
            Err(error) => self.throw(error),
        }
    }

    // ---------------------------------------------------------------------
    // Coercions
    // ---------------------------------------------------------------------

    pub fn to_int32(&self, value: RawValue) -> Result<i32, Thrown> {
        if let RawValue::Int(i) = value {
            return Ok(i);
        }
        let js = self.to_js(value);
        self.with_context(|ctx| js.to_i32(ctx))
            .map_err(|e| self.raise(e))
    }

    pub fn to_uint32(&self, value: RawValue) -> Result<u32, Thrown> {
        if let RawValue::Int(i) = value {
            return Ok(i as u32);
        }
        let js = self.to_js(value);
        self.with_context(|ctx| js.to_u32(ctx))
            .map_err(|e| self.raise(e))
    }

    /// ToNumber, then reduced modulo 2^64 the way ToInt32 reduces modulo 2^32.
    pub fn to_int64(&self, value: RawValue) -> Result<i64, Thrown> {
        if let RawValue::Int(i) = value {
            return Ok(i64::from(i));
        }
        self.to_float64(value).map(wrap_int64)
    }

    pub fn to_float64(&self, value: RawValue) -> Result<f64, Thrown> {
        match value {
            RawValue::Int(i) => return Ok(f64::from(i)),
            RawValue::Float(f) => return Ok(f),
            _ => {}
        }
        let js = self.to_js(value);
        self.with_context(|ctx| js.to_number(ctx))
            .map_err(|e| self.raise(e))
    }

    pub fn to_bool(&self, value: RawValue) -> Result<bool, Thrown> {
        if let RawValue::Bool(b) = value {
            return Ok(b);
        }
        Ok(self.to_js(value).to_boolean())
    }

    /// ToString into an owned UTF-8 buffer. `None` if the conversion threw or
    /// the string is not valid Unicode.
    pub fn to_cstring(&self, value: RawValue) -> Option<ExportedString> {
        let js = self.to_js(value);
        let converted = self.with_context(|ctx| js.to_string(ctx));
        let text = match converted {
            Ok(s) => s.to_std_string().ok()?,
            Err(error) => {
                self.raise(error);
                return None;
            }
        };
        self.exported.set(self.exported.get() + 1);
        Some(ExportedString {
            text: text.into_boxed_str(),
        })
    }

    pub fn free_cstring(&self, s: ExportedString) {
        self.exported.set(self.exported.get().saturating_sub(1));
        drop(s);
    }

    // ---------------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------------

    pub fn new_string(&self, s: &str) -> RawValue {
        self.wrap(JsValue::from(JsString::from(s)))
    }

    pub fn new_int32(&self, v: i32) -> RawValue {
        RawValue::Int(v)
    }

    pub fn new_uint32(&self, v: u32) -> RawValue {
        RawValue::number(f64::from(v))
    }

    pub fn new_int64(&self, v: i64) -> RawValue {
        match i32::try_from(v) {
            Ok(i) => RawValue::Int(i),
            Err(_) => RawValue::Float(v as f64),
        }
    }

    pub fn new_float64(&self, v: f64) -> RawValue {
        RawValue::number(v)
    }

    pub fn new_bool(&self, v: bool) -> RawValue {
        RawValue::Bool(v)
    }

    pub fn new_object(&self) -> RawValue {
        let object = self.with_context(|ctx| ObjectInitializer::new(ctx).build());
        self.wrap(JsValue::from(object))
    }

    pub fn new_array(&self) -> RawValue {
        let array = self.with_context(JsArray::new);
        self.wrap(JsValue::from(array))
    }

    // ---------------------------------------------------------------------
    // Engine-side tag queries
    // ---------------------------------------------------------------------

    pub fn is_function(&self, value: RawValue) -> bool {
        self.object(value).is_some_and(|o| o.is_callable())
    }

    pub fn is_array(&self, value: RawValue) -> bool {
        self.object(value).is_some_and(|o| o.is_array())
    }

    pub fn is_bigint(&self, value: RawValue) -> bool {
        matches!(value, RawValue::BigInt(r) if self.heap.borrow().get(r).is_some())
    }

    // ---------------------------------------------------------------------
    // Exceptions
    // ---------------------------------------------------------------------

    pub fn has_exception(&self) -> bool {
        self.pending.borrow().is_some()
    }

    /// Exception marker naming the pending exception, owned by the caller.
    /// The bare `RawValue::EXCEPTION` if nothing is pending.
    pub fn pending_exception(&self) -> RawValue {
        let pending = self.pending.borrow().clone();
        match pending {
            Some((id, error)) => {
                self.exceptions.borrow_mut().attach(id, &error);
                RawValue::Exception(id)
            }
            None => RawValue::EXCEPTION,
        }
    }

    /// Collect the pending exception as a value, clearing it. Null if none.
    ///
    /// Markers that name it keep describing it after it is taken.
    pub fn take_exception(&self) -> RawValue {
        let pending = self.pending.borrow_mut().take();
        match pending {
            Some((_, error)) => {
                let value = self.with_context(|ctx| error.to_opaque(ctx));
                self.wrap(value)
            }
            None => RawValue::NULL,
        }
    }

    /// Raise a `TypeError` and return the exception marker.
    pub fn throw_type_error(&self, message: &str) -> RawValue {
        self.throw(JsNativeError::typ().with_message(message.to_owned()).into())
    }

    /// Describe the pending exception without clearing it.
    pub fn exception_details(&self) -> Option<ExceptionDetails> {
        let (_, error) = self.pending.borrow().clone()?;
        Some(self.with_context(|ctx| describe(&error, ctx)))
    }

    /// Describe the exception an exception marker was raised with, whether
    /// or not it is still pending. `None` for other values, for the bare
    /// marker and for markers already freed.
    pub fn exception_details_of(&self, value: RawValue) -> Option<ExceptionDetails> {
        let id = value.exception_id()?;
        let recorded = self.exceptions.borrow().error(id).cloned();
        let error = recorded.or_else(|| {
            self.pending
                .borrow()
                .as_ref()
                .filter(|(pending, _)| *pending == id)
                .map(|(_, error)| error.clone())
        })?;
        Some(self.with_context(|ctx| describe(&error, ctx)))
    }

    // ---------------------------------------------------------------------
    // Opaque association
    // ---------------------------------------------------------------------

    /// Attach a host token to an object under an engine-private key.
    pub fn set_opaque(&self, obj: RawValue, token: u64) -> bool {
        let (Some(object), Some(key)) = (self.object(obj), self.opaque_key.clone()) else {
            return false;
        };
        let descriptor = PropertyDescriptor::builder()
            .value(JsValue::from(token as f64))
            .writable(true)
            .enumerable(false)
            .configurable(true)
            .build();
        self.with_context(|ctx| object.define_property_or_throw(key, descriptor, ctx))
            .is_ok()
    }

    /// Token attached directly to `obj`; inherited tokens are ignored.
    pub fn get_opaque(&self, obj: RawValue) -> Option<u64> {
        let object = self.object(obj)?;
        let key = self.opaque_key.clone()?;
        self.with_context(|ctx| {
            let key = PropertyKey::from(key);
            if !object.has_own_property(key.clone(), ctx).ok()? {
                return None;
            }
            let value = object.get(key, ctx).ok()?;
            value.as_number().map(|n| n as u64)
        })
    }

    // ---------------------------------------------------------------------
    // JSON
    // ---------------------------------------------------------------------

    pub fn to_json(&self, value: RawValue) -> Option<serde_json::Value> {
        let js = self.to_js(value);
        let converted = self.with_context(|ctx| js.to_json(ctx));
        match converted {
            Ok(json) => Some(json),
            Err(error) => {
                self.raise(error);
                None
            }
        }
    }

    pub fn from_json(&self, json: &serde_json::Value) -> RawValue {
        let converted = self.with_context(|ctx| JsValue::from_json(json, ctx));
        match converted {
            Ok(value) => self.wrap(value),
            Err(error) => self.throw(error),
        }
    }

    pub fn stats(&self) -> HeapStats {
        let heap = self.heap.borrow();
        let exceptions = self.exceptions.borrow();
        HeapStats {
            live_values: heap.live(),
            total_refs: heap.total_refs(),
            live_atoms: self.atoms.borrow().live(),
            exported_strings: self.exported.get(),
            live_exceptions: exceptions.live.len(),
            stale_releases: heap.stale() + exceptions.stale,
        }
    }
}

fn wrap_int64(n: f64) -> i64 {
    if !n.is_finite() {
        return 0;
    }
    const TWO_64: f64 = 18_446_744_073_709_551_616.0;
    let reduced = n.trunc() % TWO_64;
    (reduced as i128) as i64
}

fn describe(error: &JsError, ctx: &mut Context) -> ExceptionDetails {
    let value = error.to_opaque(ctx);
    match value.as_object() {
        Some(object) => {
            let name = string_property(object, "name", ctx).unwrap_or_else(|| "Error".to_string());
            let message = string_property(object, "message", ctx)
                .unwrap_or_else(|| error.to_string());
            let stack = string_property(object, "stack", ctx);
            ExceptionDetails {
                name,
                message,
                stack,
            }
        }
        None => ExceptionDetails {
            name: "Error".to_string(),
            message: value
                .to_string(ctx)
                .map(|s| s.to_std_string_escaped())
                .unwrap_or_else(|_| "Unknown error".to_string()),
            stack: None,
        },
    }
}

fn string_property(object: &JsObject, name: &str, ctx: &mut Context) -> Option<String> {
    let value = object.get(JsString::from(name), ctx).ok()?;
    if value.is_undefined() {
        return None;
    }
    value
        .to_string(ctx)
        .ok()
        .map(|s| s.to_std_string_escaped())
}
