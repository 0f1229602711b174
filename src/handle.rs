//! The inspection facade and the boundary operations built on it.
//!
//! A `DeferredHandle` reads and writes a deferred value's three fields without
//! observing it. It shares the deferred value rather than copying it, so every
//! change made through one handle is seen by the deferred value, by every
//! other handle on it, and by later observations.

use std::fmt;
use std::rc::Rc;

use crate::deferred::DeferredValue;
use crate::error::{Error, Result};
use crate::value::{no_attribute, Object, Value};


#[derive(Clone)]
pub struct DeferredHandle {
    target: Rc<DeferredValue>,
}


impl DeferredHandle {
    /// A handle on `value`, if it is a deferred value.
    pub fn expose(value: &Value) -> Option<DeferredHandle> {
        value.as_deferred().map(|target| DeferredHandle { target: Rc::clone(target) })
    }


    /// The deferred value itself, as a value that proxies to its result.
    pub fn target(&self) -> Value {
        Value::Deferred(Rc::clone(&self.target))
    }


    #[inline]
    pub fn collapsing(&self) -> bool {
        self.target.collapsing()
    }


    /// Only affects later observations; never fills the cache by itself.
    #[inline]
    pub fn set_collapsing(&self, collapsing: bool) {
        self.target.set_collapsing(collapsing);
    }


    pub fn computation(&self) -> Result<Value> {
        self.target.computation().ok_or(Error::FieldAbsent { field: "computation" })
    }


    /// Fails with `NotInvocable`, keeping the current computation, unless
    /// `computation` can be called with zero arguments.
    pub fn set_computation(&self, computation: Value) -> Result<()> {
        self.target.replace_computation(computation).map(drop)
    }


    pub fn cached_result(&self) -> Result<Value> {
        self.target.cached_result().ok_or(Error::FieldAbsent { field: "cached_result" })
    }


    /// Plant a result whatever `collapsing` currently says. It is only used
    /// once `collapsing` is set.
    pub fn set_cached_result(&self, result: Value) {
        drop(self.target.replace_cached_result(Some(result)));
    }


    /// Empty the cache, returning what it held.
    pub fn clear_cached_result(&self) -> Option<Value> {
        self.target.replace_cached_result(None)
    }
}


impl fmt::Debug for DeferredHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("DeferredHandle").field(&*self.target).finish()
    }
}


fn expect_bool(value: &Value) -> Result<bool> {
    value.as_bool()
        .ok_or_else(|| Error::raise("TypeError", format!("collapsing must be a bool, not '{}'", value.type_name())))
}


impl Object for DeferredHandle {
    fn type_name(&self) -> &'static str {
        "deferred_handle"
    }

    fn repr(&self) -> Result<String> {
        Ok(format!("<deferred_handle collapsing={} cached={}>",
                   self.collapsing(),
                   self.target.cached_result().is_some()))
    }

    fn get_attr(&self, name: &str) -> Result<Value> {
        match name {
            "collapsing" => Ok(self.collapsing().into()),
            "computation" => self.computation(),
            "cached_result" => self.cached_result(),
            _ => Err(no_attribute(self.type_name(), name)),
        }
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        match name {
            "collapsing" => {
                self.set_collapsing(expect_bool(&value)?);
                Ok(())
            }
            "computation" => self.set_computation(value),
            "cached_result" => {
                self.set_cached_result(value);
                Ok(())
            }
            _ => Err(no_attribute(self.type_name(), name)),
        }
    }

    fn del_attr(&self, name: &str) -> Result<()> {
        match name {
            "cached_result" => {
                drop(self.clear_cached_result());
                Ok(())
            }
            "collapsing" | "computation" => Err(Error::raise("TypeError", format!("cannot delete {}", name))),
            _ => Err(no_attribute(self.type_name(), name)),
        }
    }

    fn hash(&self) -> Result<u64> {
        Ok(Rc::as_ptr(&self.target) as usize as u64)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        visit(&self.target());
    }

    // Nothing to release: a cycle through a handle also runs through its
    // target, whose own `clear` breaks it.
}


/// A facade on `value` if it is a deferred value, or `value` itself.
pub fn expose(value: &Value) -> Value {
    match DeferredHandle::expose(value) {
        Some(handle) => Value::tracked(handle),
        None => value.clone(),
    }
}


/// Make `value` collapsing and observe it, so every later observation is a
/// cache hit. An existing cache is trusted, not recomputed. Non-deferred
/// values are returned unchanged.
pub fn freeze(value: &Value) -> Result<Value> {
    match value {
        Value::Deferred(deferred) => {
            deferred.set_collapsing(true);
            deferred.observe()
        }
        Value::Object(_) => Ok(value.clone()),
    }
}


/// Observe `value` under its current settings.
#[inline]
pub fn snapshot(value: &Value) -> Result<Value> {
    value.observe()
}
