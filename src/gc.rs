//! Cycle collection for values that reference each other.
//!
//! Values are reference counted, which frees everything except cycles. A
//! deferred value's computation can capture the deferred value itself, so
//! cycles are routine. Every container object is registered here (weakly)
//! when created, and `collect` finds the tracked objects that are only kept
//! alive by each other:
//!
//! 1. start from each tracked object's strong count;
//! 2. subtract the references other tracked objects hold to it, found through
//!    `Object::traverse`;
//! 3. anything left with a positive count is referenced from outside, so it
//!    and everything it reaches stays;
//! 4. the rest is garbage: `Object::clear` drops its references, and plain
//!    reference counting frees it.
//!
//! References the collector cannot see (values captured by a Rust closure,
//! say) only ever keep objects alive; they never get a reachable object
//! cleared.

use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::deferred::DeferredValue;
use crate::value::{Object, Value};


/// Collector settings. Per thread, like the values themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Run a collection automatically once `threshold` objects have been
    /// tracked since the last one.
    pub enabled: bool,
    pub threshold: usize,
}


impl Default for Config {
    fn default() -> Config {
        Config {
            enabled: true,
            threshold: 700,
        }
    }
}


enum Tracked {
    Object(Weak<dyn Object>),
    Deferred(Weak<DeferredValue>),
}


impl Tracked {
    fn new(value: &Value) -> Tracked {
        match value {
            Value::Object(object) => Tracked::Object(Rc::downgrade(object)),
            Value::Deferred(deferred) => Tracked::Deferred(Rc::downgrade(deferred)),
        }
    }


    fn upgrade(&self) -> Option<Value> {
        match self {
            Tracked::Object(object) => object.upgrade().map(Value::Object),
            Tracked::Deferred(deferred) => deferred.upgrade().map(Value::Deferred),
        }
    }


    fn is_alive(&self) -> bool {
        match self {
            Tracked::Object(object) => object.strong_count() > 0,
            Tracked::Deferred(deferred) => deferred.strong_count() > 0,
        }
    }
}


struct Registry {
    config: Config,
    objects: Vec<Tracked>,
    allocations: usize,
    collecting: bool,
}


thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry {
        config: Config::default(),
        objects: Vec::new(),
        allocations: 0,
        collecting: false,
    });
}


pub fn config() -> Config {
    REGISTRY.with(|registry| registry.borrow().config)
}


pub fn configure(config: Config) {
    REGISTRY.with(|registry| registry.borrow_mut().config = config);
}


/// The number of live tracked objects.
pub fn tracked() -> usize {
    REGISTRY.with(|registry| registry.borrow().objects.iter().filter(|t| t.is_alive()).count())
}


/// Register a container object. Called by every constructor of a value that
/// can own other values.
pub(crate) fn track(value: &Value) {
    let due = REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        registry.objects.push(Tracked::new(value));
        registry.allocations += 1;

        if registry.collecting || registry.allocations <= registry.config.threshold {
            return false;
        }
        if registry.config.enabled {
            return true;
        }

        // Disabled: still drop the entries of objects that have gone.
        registry.allocations = 0;
        registry.objects.retain(Tracked::is_alive);
        false
    });

    if due {
        collect();
    }
}


/// Run a full collection and return the number of unreachable objects found.
/// Each has had `Object::clear` called on it, whether or not that released
/// anything.
pub fn collect() -> usize {
    let entries = REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        registry.collecting = true;
        registry.allocations = 0;
        mem::take(&mut registry.objects)
    });

    let live: Vec<Value> = entries.iter().filter_map(Tracked::upgrade).collect();
    let index: FxHashMap<usize, usize> = live.iter().enumerate().map(|(i, value)| (value.addr(), i)).collect();

    // `live` itself holds one reference to each.
    let mut refs: Vec<usize> = live.iter().map(|value| value.strong_count() - 1).collect();
    for value in &live {
        value.object().traverse(&mut |child| {
            if let Some(&i) = index.get(&child.addr()) {
                refs[i] = refs[i].saturating_sub(1);
            }
        });
    }

    let mut reachable = vec![false; live.len()];
    let mut pending: Vec<usize> = (0..live.len()).filter(|&i| refs[i] > 0).collect();
    for &i in &pending {
        reachable[i] = true;
    }
    while let Some(i) = pending.pop() {
        live[i].object().traverse(&mut |child| {
            if let Some(&j) = index.get(&child.addr()) {
                if !reachable[j] {
                    reachable[j] = true;
                    pending.push(j);
                }
            }
        });
    }

    let garbage: Vec<&Value> = live.iter().zip(&reachable).filter(|(_, r)| !**r).map(|(value, _)| value).collect();
    let unreachable = garbage.len();
    for value in garbage {
        value.object().clear();
    }

    debug!(tracked = live.len(), unreachable, "collected cycles");

    // Dropping the last references frees the cleared objects.
    drop(live);

    REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        let added = mem::take(&mut registry.objects);
        registry.objects = entries.into_iter().filter(Tracked::is_alive).chain(added).collect();
        registry.collecting = false;
    });

    unreachable
}


#[cfg(test)]
mod test {
    use super::*;

    use std::cell::Cell;

    use tracing_test::traced_test;

    use crate::host;
    use crate::value::Arity;

    /// Counts how many of these are alive.
    struct Probe(Rc<Cell<usize>>);

    impl Probe {
        fn new(alive: &Rc<Cell<usize>>) -> Value {
            alive.set(alive.get() + 1);
            Value::new(Probe(alive.clone()))
        }
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.set(self.0.get() - 1);
        }
    }

    impl Object for Probe {
        fn type_name(&self) -> &'static str {
            "probe"
        }
    }

    /// A deferred value whose computation captures the deferred value itself
    /// and a probe.
    fn self_referential(alive: &Rc<Cell<usize>>) -> Value {
        let computation = host::closure("cycle", Arity::Exact(0), vec![Probe::new(alive)], |env, _| {
            Ok(env[0].clone())
        });
        let deferred = DeferredValue::construct(computation.clone(), false).unwrap();
        computation.downcast_ref::<host::Function>().unwrap().bind(deferred.clone());
        deferred
    }

    #[test]
    fn self_cycle_is_reclaimed() {
        let alive = Rc::new(Cell::new(0));
        drop(self_referential(&alive));

        assert_eq!(alive.get(), 1);
        assert!(collect() >= 2);
        assert_eq!(alive.get(), 0);
    }

    #[test]
    fn externally_referenced_cycle_survives() {
        let alive = Rc::new(Cell::new(0));
        let deferred = self_referential(&alive);

        collect();
        assert_eq!(alive.get(), 1);
        assert!(deferred.observe().unwrap().downcast_ref::<Probe>().is_some());

        drop(deferred);
        collect();
        assert_eq!(alive.get(), 0);
    }

    #[test]
    fn mutual_cycle_through_a_list_is_reclaimed() {
        let alive = Rc::new(Cell::new(0));
        let holder = host::list(vec![Probe::new(&alive)]);
        let computation = host::closure("holder", Arity::Exact(0), vec![holder.clone()], |env, _| {
            Ok(env[0].clone())
        });
        let deferred = DeferredValue::construct(computation, true).unwrap();
        holder.downcast_ref::<host::List>().unwrap().push(deferred.clone());

        // Collapse so the cache holds the list too.
        deferred.observe().unwrap();
        drop((holder, deferred));

        assert_eq!(alive.get(), 1);
        collect();
        assert_eq!(alive.get(), 0);
    }

    #[test]
    fn mutual_deferred_cycle_is_reclaimed() {
        let alive = Rc::new(Cell::new(0));
        let first_computation = host::closure("first", Arity::Exact(0), vec![Probe::new(&alive)], |env, _| {
            Ok(env[0].clone())
        });
        let first = DeferredValue::construct(first_computation.clone(), false).unwrap();
        let second_computation = host::closure("second", Arity::Exact(0), vec![first.clone()], |env, _| {
            Ok(env[0].clone())
        });
        let second = DeferredValue::construct(second_computation, false).unwrap();
        first_computation.downcast_ref::<host::Function>().unwrap().bind(second.clone());

        assert!(second.observe().unwrap().downcast_ref::<Probe>().is_some());
        drop((first_computation, first, second));

        assert_eq!(alive.get(), 1);
        assert!(collect() >= 4);
        assert_eq!(alive.get(), 0);
    }

    #[test]
    fn unreachable_count_includes_objects_with_nothing_to_release() {
        collect();
        let tuple = host::tuple(Vec::new());
        let list = host::list(vec![tuple]);
        list.downcast_ref::<host::List>().unwrap().push(list.clone());
        drop(list);

        // The list and the empty tuple it held.
        assert_eq!(collect(), 2);
    }

    #[test]
    fn reachable_from_a_survivor_is_kept() {
        let alive = Rc::new(Cell::new(0));
        let inner = self_referential(&alive);
        let root = host::list(vec![inner]);

        collect();
        assert_eq!(alive.get(), 1);

        drop(root);
        collect();
        assert_eq!(alive.get(), 0);
    }

    #[test]
    fn automatic_collection() {
        let alive = Rc::new(Cell::new(0));
        let previous = config();
        configure(Config {
            enabled: true,
            threshold: 4,
        });

        drop(self_referential(&alive));
        for _ in 0..8 {
            host::list(Vec::new());
        }

        assert_eq!(alive.get(), 0);
        configure(previous);
    }

    #[test]
    fn disabled_collection_leaves_cycles() {
        let alive = Rc::new(Cell::new(0));
        let previous = config();
        configure(Config {
            enabled: false,
            threshold: 1,
        });

        drop(self_referential(&alive));
        for _ in 0..8 {
            host::list(Vec::new());
        }
        assert_eq!(alive.get(), 1);

        configure(previous);
        collect();
        assert_eq!(alive.get(), 0);
    }

    #[test]
    fn tracked_counts_live_objects() {
        collect();
        let before = tracked();
        let list = host::list(Vec::new());
        assert_eq!(tracked(), before + 1);
        drop(list);
        assert_eq!(tracked(), before);
    }

    #[traced_test]
    #[test]
    fn collection_is_logged() {
        collect();
        assert!(logs_contain("collected cycles"));
    }
}
