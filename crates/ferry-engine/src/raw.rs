//! Raw engine values as they cross the bridge boundary.
//!
//! A [`RawValue`] is a plain `Copy` tagged union. Scalars live inline;
//! strings, objects, symbols and bigints point into the engine heap through
//! a [`HeapRef`]. Copying a `RawValue` never touches reference counts, so two
//! copies alias the same heap slot exactly like two C `JSValue`s do.
//!
//! Exception markers carry an [`ExceptionId`] naming the raise they came
//! from. Like heap values they are reference counted, so each marker keeps
//! its own thrown value describable until it is freed.

/// Handle into the engine's reference-counted heap.
///
/// The generation is bumped every time a slot is released, so a handle that
/// outlived its slot is detected instead of silently aliasing a new value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapRef {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl HeapRef {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Identifies one raised exception. `ExceptionId::NONE` names none.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExceptionId(pub(crate) u32);

impl ExceptionId {
    pub const NONE: ExceptionId = ExceptionId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

/// Value tag, readable without an engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    BigInt,
    Symbol,
    String,
    Object,
    Int,
    Bool,
    Null,
    Undefined,
    Exception,
    Float64,
}

/// An engine value: inline scalar or reference into the engine heap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RawValue {
    Int(i32),
    Float(f64),
    Bool(bool),
    Null,
    Undefined,
    /// Marker returned when an operation raised. The thrown value is pending
    /// on the engine until taken, and stays describable through the id for
    /// as long as the marker is held.
    Exception(ExceptionId),
    String(HeapRef),
    Object(HeapRef),
    Symbol(HeapRef),
    BigInt(HeapRef),
}

impl RawValue {
    pub const NULL: RawValue = RawValue::Null;
    pub const UNDEFINED: RawValue = RawValue::Undefined;
    /// Exception marker without a recorded raise.
    pub const EXCEPTION: RawValue = RawValue::Exception(ExceptionId::NONE);
    pub const TRUE: RawValue = RawValue::Bool(true);
    pub const FALSE: RawValue = RawValue::Bool(false);

    /// Canonical number encoding: integral values in `i32` range are `Int`,
    /// everything else (including `-0` and NaN) is `Float`.
    pub fn number(n: f64) -> Self {
        let i = n as i32;
        if f64::from(i) == n && !(n == 0.0 && n.is_sign_negative()) {
            RawValue::Int(i)
        } else {
            RawValue::Float(n)
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            RawValue::Int(_) => Tag::Int,
            RawValue::Float(_) => Tag::Float64,
            RawValue::Bool(_) => Tag::Bool,
            RawValue::Null => Tag::Null,
            RawValue::Undefined => Tag::Undefined,
            RawValue::Exception(_) => Tag::Exception,
            RawValue::String(_) => Tag::String,
            RawValue::Object(_) => Tag::Object,
            RawValue::Symbol(_) => Tag::Symbol,
            RawValue::BigInt(_) => Tag::BigInt,
        }
    }

    /// Heap reference carried by this value, if any.
    pub fn heap_ref(&self) -> Option<HeapRef> {
        match *self {
            RawValue::String(r)
            | RawValue::Object(r)
            | RawValue::Symbol(r)
            | RawValue::BigInt(r) => Some(r),
            _ => None,
        }
    }

    /// Raise carried by an exception marker, if any.
    pub fn exception_id(&self) -> Option<ExceptionId> {
        match *self {
            RawValue::Exception(id) if !id.is_none() => Some(id),
            _ => None,
        }
    }

    /// Whether dup/free on this value touch a reference count.
    pub fn has_ref_count(&self) -> bool {
        self.heap_ref().is_some() || self.exception_id().is_some()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, RawValue::Undefined)
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, RawValue::Exception(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, RawValue::Object(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, RawValue::String(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, RawValue::Int(_) | RawValue::Float(_))
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, RawValue::Bool(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, RawValue::Symbol(_))
    }
}
