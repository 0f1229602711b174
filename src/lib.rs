//! This crate provides deferred values for an embedded, dynamically typed
//! object model: thunks that are not run until their result is needed, and
//! that stand in for that result transparently from then on.
//!
//! The pieces:
//! * `DeferredValue`: a zero-argument computation plus an optional
//!   memoization ("collapsing") flag. Observing it runs the computation, and
//!   keeps observing while the computation returns further deferred values.
//! * The proxy surface: a deferred value implements every capability of the
//!   `Object` table, so any generic operation on a `Value` (arithmetic,
//!   comparison, attribute access, calls, iteration, descriptors, ...)
//!   observes the deferred operands first and then runs on the results.
//! * `DeferredHandle`: an inspection facade that reads and writes a deferred
//!   value's fields without observing it, and the boundary operations
//!   `expose`, `freeze` and `snapshot`.
//! * `gc`: a per-thread cycle collector for the reference cycles that
//!   self-referential computations create.
//! * `host`: a small set of built-in host types to embed deferred values in.

pub mod deferred;
pub mod error;
pub mod gc;
pub mod handle;
pub mod host;
mod proxy;
pub mod value;


pub use deferred::DeferredValue;
pub use error::{Error, Exception, Result};
pub use handle::{expose, freeze, snapshot, DeferredHandle};
pub use value::{Arity, BinaryOp, Callable, CompareOp, Descriptor, Iterate, Number, Object, TernaryOp, UnaryOp,
                Value};


/// Defer a computation without memoizing it: every observation runs it again.
/// Fails with `NotInvocable` unless `computation` can be called with zero
/// arguments.
#[inline]
pub fn defer(computation: Value) -> Result<Value> {
    DeferredValue::construct(computation, false)
}


/// Defer a computation and keep its first observed result.
#[inline]
pub fn defer_collapsing(computation: Value) -> Result<Value> {
    DeferredValue::construct(computation, true)
}


/// Resolve `value` to a concrete value; identity on non-deferred values.
#[inline]
pub fn observe(value: &Value) -> Result<Value> {
    value.observe()
}
