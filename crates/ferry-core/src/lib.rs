//! Safe value bridge to an embedded script engine.
//!
//! This crate wraps the manually reference-counted values of
//! `ferry-engine` in RAII handles and converts them to and from native
//! Rust types.
//!
//! # Example
//!
//! ```
//! use ferry_core::Context;
//!
//! let ctx = Context::new().unwrap();
//! assert_eq!(ctx.eval("let i = 10; i;").to_int(), Some(10));
//!
//! let echo = ctx.eval("(param) => param");
//! assert_eq!(echo.call(&[&1]).to_int(), Some(1));
//! assert_eq!(echo.call(&[&"1"]).to_string().as_deref(), Some("1"));
//!
//! // Calling a non-function is host misuse, not a script exception.
//! let result = ctx.eval("({})").call(&[]);
//! assert!(result.is_undefined());
//! ```
//!
//! # Errors
//!
//! Conversions return `Option`: a value with the wrong tag simply does not
//! convert. Script exceptions come back as exception-tagged values that
//! [`FerryValue::to_error`] turns into an [`Exception`]. The `try_*`
//! operations report both through [`FerryError`] instead.
//!
//! # Thread Safety
//!
//! [`Context`] and [`FerryValue`] are `!Send` and `!Sync`: the engine is
//! single-threaded and performs no locking.
//!
//! ```compile_fail
//! use ferry_core::Context;
//!
//! let ctx = Context::new().unwrap();
//! std::thread::spawn(move || {
//!     let _ = ctx.eval("1 + 1"); // Error: Context is !Send
//! });
//! ```
//!
//! ```compile_fail
//! use ferry_core::Context;
//!
//! let ctx = Context::new().unwrap();
//! let value = ctx.eval("42");
//! std::thread::spawn(move || {
//!     let _ = value.to_int(); // Error: FerryValue is !Send
//! });
//! ```
//!
//! ```compile_fail
//! use ferry_core::Context;
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(Context::new().unwrap());
//! std::thread::spawn(move || {
//!     let _ctx = ctx; // Error: Context is !Sync
//! });
//! ```

mod atom;
mod config;
mod context;
mod convert;
mod error;
mod object;
mod opaque;
mod value;

pub use atom::ScopedAtom;
pub use config::{ContextConfig, MisusePolicy};
pub use context::Context;
pub use convert::{Exception, FromValue, IntoValue};
pub use error::{FerryError, FerryResult};
pub use opaque::OpaqueRegistry;
pub use value::FerryValue;

pub use ferry_engine::{ExceptionDetails, HeapStats, RawValue, Tag};

// Re-export the raw layer for direct engine access when needed
pub use ferry_engine;
