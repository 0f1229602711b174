use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::gc;
use crate::host;
use crate::value::{Arity, Value};


/// A deferred value: a zero-argument computation that is not run until the
/// first operation that needs its result, and that stands in for that result
/// from then on.
///
/// A `DeferredValue` always lives behind an `Rc` inside a `Value`; every
/// generic operation on that `Value` observes it first and is then performed
/// on the observed result (see the `proxy` module).
pub struct DeferredValue {
    /// The computation. `None` only once the collector has released it.
    ///
    /// Interior mutability is used here, and for the other two fields, so that
    /// observation and the facade can mutate a deferred value reached through
    /// a shared `Rc`. No borrow is held across a call into host code.
    computation: RefCell<Option<Value>>,

    /// When set, the first observed result is kept and returned by every later
    /// observation.
    collapsing: Cell<bool>,

    /// The kept result. Ignored while `collapsing` is unset.
    cached: RefCell<Option<Value>>,
}


impl DeferredValue {
    /// Wrap `computation` in a new deferred value. Fails with `NotInvocable`
    /// unless it can be called with zero arguments.
    pub fn construct(computation: Value, collapsing: bool) -> Result<Value> {
        if !computation.is_invocable() {
            return Err(Error::NotInvocable { type_name: computation.type_name() });
        }

        let value = Value::Deferred(Rc::new(DeferredValue {
            computation: RefCell::new(Some(computation)),
            collapsing: Cell::new(collapsing),
            cached: RefCell::new(None),
        }));
        gc::track(&value);

        Ok(value)
    }


    /// A deferred value that is already collapsed onto `value`. Observing it
    /// is a cache hit; its computation just returns `value`.
    pub fn computed(value: Value) -> Result<Value> {
        let computation = host::closure("<computed>", Arity::Exact(0), vec![value.clone()], |env, _| {
            env.first().cloned().ok_or(Error::FieldAbsent { field: "computed value" })
        });

        let deferred = DeferredValue::construct(computation, true)?;
        if let Some(inner) = deferred.as_deferred() {
            inner.cached.replace(Some(value));
        }

        Ok(deferred)
    }


    /// The host-callable constructor: `(computation)` or
    /// `(computation, collapsing)`, the flag being truth-tested.
    pub fn constructor() -> Value {
        host::function("deferred", Arity::Between(1, 2), |args| {
            match args {
                [computation] => DeferredValue::construct(computation.clone(), false),
                [computation, collapsing] => DeferredValue::construct(computation.clone(), collapsing.truthy()?),
                _ => Err(Error::raise("TypeError", "deferred() takes from 1 to 2 positional arguments")),
            }
        })
    }


    /// Resolve to the concrete value.
    ///
    /// Returns the cached result when collapsing and one is present. Otherwise
    /// invokes the computation, observes through any chain of deferred values
    /// it returns, and keeps the final result if `collapsing` is set *after*
    /// the invocation: a computation that switches collapsing on for its own
    /// deferred value still gets memoized.
    ///
    /// A computation that returns its own deferred value, directly or through
    /// a cycle, recurses without bound.
    pub fn observe(&self) -> Result<Value> {
        if self.collapsing.get() {
            let cached = self.cached.borrow().clone();
            if let Some(cached) = cached {
                trace!("deferred value cache hit");
                // A result planted through a facade may itself be deferred.
                return cached.observe();
            }
        }

        let computation = self.computation
            .borrow()
            .clone()
            .ok_or(Error::FieldAbsent { field: "computation" })?;

        trace!(collapsing = self.collapsing.get(), "invoking deferred computation");
        let result = computation.call(&[])?;

        let result = match result {
            Value::Deferred(ref chained) => {
                trace!("deferred computation produced another deferred value");
                chained.observe()?
            }
            result => result,
        };

        if self.collapsing.get() {
            trace!("caching observed result");
            self.cached.replace(Some(result.clone()));
        }

        Ok(result)
    }


    #[inline]
    pub(crate) fn collapsing(&self) -> bool {
        self.collapsing.get()
    }


    #[inline]
    pub(crate) fn set_collapsing(&self, collapsing: bool) {
        self.collapsing.set(collapsing);
    }


    pub(crate) fn computation(&self) -> Option<Value> {
        self.computation.borrow().clone()
    }


    /// Swap in a new computation, keeping the old one if the new one cannot be
    /// called with zero arguments.
    pub(crate) fn replace_computation(&self, computation: Value) -> Result<Option<Value>> {
        if !computation.is_invocable() {
            return Err(Error::NotInvocable { type_name: computation.type_name() });
        }

        Ok(self.computation.replace(Some(computation)))
    }


    pub(crate) fn cached_result(&self) -> Option<Value> {
        self.cached.borrow().clone()
    }


    pub(crate) fn replace_cached_result(&self, cached: Option<Value>) -> Option<Value> {
        self.cached.replace(cached)
    }


    /// Visit the owned fields themselves, never the observed value.
    pub(crate) fn visit_fields(&self, visit: &mut dyn FnMut(&Value)) {
        if let Some(computation) = self.computation.borrow().as_ref() {
            visit(computation);
        }
        if let Some(cached) = self.cached.borrow().as_ref() {
            visit(cached);
        }
    }


    /// Release both owned fields. Only the collector does this.
    pub(crate) fn release(&self) {
        let computation = self.computation.replace(None);
        let cached = self.cached.replace(None);
        drop((computation, cached));
    }
}


/// Shows a field without following it into another deferred value, which may
/// be this one.
struct Shallow<'a>(&'a Option<Value>);


impl fmt::Debug for Shallow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            None => f.write_str("None"),
            Some(value @ Value::Deferred(_)) => write!(f, "<deferred at {:#x}>", value.addr()),
            Some(value) => write!(f, "{:?}", value),
        }
    }
}


impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("collapsing", &self.collapsing.get())
            .field("computation", &Shallow(&self.computation.borrow()))
            .field("cached", &Shallow(&self.cached.borrow()))
            .finish()
    }
}


#[cfg(test)]
mod test {
    use super::*;

    use std::cell::Cell;
    use std::rc::Rc;

    use crate::error::Exception;

    fn counting(calls: &Rc<Cell<usize>>, n: i64) -> Value {
        let calls = calls.clone();
        host::lambda(move || {
            calls.set(calls.get() + 1);
            Ok(n.into())
        })
    }

    #[test]
    fn thunk_deferred() {
        let calls = Rc::new(Cell::new(0));
        let deferred = DeferredValue::construct(counting(&calls, 2), false).unwrap();

        assert_eq!(calls.get(), 0);
        assert_eq!(deferred.observe().unwrap().as_int(), Some(2));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn thunk_computed() {
        let deferred = DeferredValue::computed(2.into()).unwrap();
        let inner = deferred.as_deferred().unwrap();

        assert!(inner.collapsing());
        assert_eq!(inner.cached_result().unwrap().as_int(), Some(2));
        assert_eq!(deferred.observe().unwrap().as_int(), Some(2));
    }

    #[test]
    fn not_invocable() {
        let err = DeferredValue::construct(1.into(), false).unwrap_err();
        assert_eq!(err, Error::NotInvocable { type_name: "int" });

        let unary = host::function("f", Arity::Exact(1), |args| Ok(args[0].clone()));
        assert!(DeferredValue::construct(unary, false).is_err());
    }

    #[test]
    fn non_collapsing_recomputes() {
        let calls = Rc::new(Cell::new(0));
        let deferred = DeferredValue::construct(counting(&calls, 7), false).unwrap();

        for _ in 0..3 {
            assert_eq!(deferred.observe().unwrap().as_int(), Some(7));
        }
        assert_eq!(calls.get(), 3);
        assert!(deferred.as_deferred().unwrap().cached_result().is_none());
    }

    #[test]
    fn collapsing_computes_once() {
        let calls = Rc::new(Cell::new(0));
        let deferred = DeferredValue::construct(counting(&calls, 7), true).unwrap();

        let first = deferred.observe().unwrap();
        let second = deferred.observe().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn chains_are_unwrapped() {
        let inner = DeferredValue::construct(host::lambda(|| Ok(42.into())), false).unwrap();
        let outer = DeferredValue::construct(host::closure("outer", Arity::Exact(0), vec![inner], |env, _| {
                                                 Ok(env[0].clone())
                                             }),
                                             false)
            .unwrap();

        let observed = outer.observe().unwrap();
        assert!(!observed.is_deferred());
        assert_eq!(observed.as_int(), Some(42));
    }

    #[test]
    fn chain_links_keep_their_own_collapsing() {
        let calls = Rc::new(Cell::new(0));
        let inner = DeferredValue::construct(counting(&calls, 1), true).unwrap();
        let outer = DeferredValue::construct(host::closure("outer", Arity::Exact(0), vec![inner.clone()], |env, _| {
                                                 Ok(env[0].clone())
                                             }),
                                             false)
            .unwrap();

        outer.observe().unwrap();
        outer.observe().unwrap();

        assert_eq!(calls.get(), 1);
        assert!(inner.as_deferred().unwrap().cached_result().is_some());
        assert!(outer.as_deferred().unwrap().cached_result().is_none());
    }

    #[test]
    fn failures_propagate_verbatim() {
        let exception = Exception::new("ValueError", "nope");
        let raised = exception.clone();
        let deferred = DeferredValue::construct(host::lambda(move || Err(Error::Propagated(raised.clone()))),
                                                true)
            .unwrap();

        assert_eq!(deferred.observe().unwrap_err(), Error::Propagated(exception));
        assert!(deferred.as_deferred().unwrap().cached_result().is_none());
    }

    #[test]
    fn collapsing_is_read_after_invocation() {
        let cell: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
        let target = cell.clone();
        let deferred = DeferredValue::construct(host::lambda(move || {
                                                    if let Some(Value::Deferred(me)) = target.borrow().as_ref() {
                                                        me.set_collapsing(true);
                                                    }
                                                    Ok(3.into())
                                                }),
                                                false)
            .unwrap();
        cell.replace(Some(deferred.clone()));

        deferred.observe().unwrap();
        assert_eq!(deferred.as_deferred().unwrap().cached_result().unwrap().as_int(), Some(3));

        // Break the Rust-side cycle the test built.
        cell.replace(None);
    }

    #[test]
    fn released_computation_is_absent() {
        let deferred = DeferredValue::construct(host::lambda(|| Ok(1.into())), false).unwrap();
        deferred.as_deferred().unwrap().release();

        assert_eq!(deferred.observe().unwrap_err(), Error::FieldAbsent { field: "computation" });
    }

    #[test]
    fn debug_does_not_follow_deferred_fields() {
        let deferred = DeferredValue::construct(host::lambda(|| Ok(1.into())), true).unwrap();
        let inner = deferred.as_deferred().unwrap();
        inner.replace_cached_result(Some(deferred.clone()));

        let shown = format!("{:?}", deferred);
        assert!(shown.contains(&format!("cached: <deferred at {:#x}>", deferred.addr())));
        assert!(shown.contains("computation: <function object at"));

        // Break the cycle the test built.
        inner.replace_cached_result(None);
    }

    #[test]
    fn host_constructor() {
        let constructor = DeferredValue::constructor();
        let lambda = host::lambda(|| Ok(5.into()));

        let plain = constructor.call(&[lambda.clone()]).unwrap();
        assert!(!plain.as_deferred().unwrap().collapsing());

        let collapsing = constructor.call(&[lambda, true.into()]).unwrap();
        assert!(collapsing.as_deferred().unwrap().collapsing());
        assert_eq!(collapsing.observe().unwrap().as_int(), Some(5));

        assert_eq!(constructor.call(&[1.into()]).unwrap_err(), Error::NotInvocable { type_name: "int" });
        assert_eq!(constructor.call(&[]).unwrap_err().exception().unwrap().kind(), "TypeError");
    }
}
