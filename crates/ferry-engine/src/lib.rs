//! Raw, manually reference-counted engine surface.
//!
//! This crate exposes a script engine through the small set of primitives a
//! value bridge needs: evaluate, dup/free, atoms, property get/set, call,
//! scalar coercions and string export. Values are plain [`RawValue`]s; the
//! caller owns every reference an operation returns and must give it back
//! with [`Engine::free`]. Use `ferry-core` for the RAII layer on top.
//!
//! # Example
//!
//! ```
//! use ferry_engine::{Engine, RawValue};
//!
//! let engine = Engine::default();
//! let value = engine.eval("'hi' + '!'", "<doc>");
//! assert!(value.is_string());
//!
//! let text = engine.to_cstring(value).unwrap();
//! assert_eq!(text.as_str(), "hi!");
//! engine.free_cstring(text);
//! engine.free(value);
//!
//! assert_eq!(engine.stats().live_values, 0);
//! ```
//!
//! # Thread Safety
//!
//! [`Engine`] is `!Send` and `!Sync`.
//!
//! ```compile_fail
//! use ferry_engine::Engine;
//!
//! let engine = Engine::default();
//! std::thread::spawn(move || {
//!     let _ = engine.eval("1", "<doc>");
//! });
//! ```

mod atom;
mod engine;
mod heap;
mod raw;

pub use atom::Atom;
pub use engine::{Engine, EngineConfig, ExceptionDetails, ExportedString, HeapStats, Thrown};
pub use raw::{ExceptionId, HeapRef, RawValue, Tag};

// Re-export the engine for embedders that need to reach past this surface
pub use boa_engine;
