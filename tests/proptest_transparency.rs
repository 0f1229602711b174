//! Property-based tests for deferred values.
//!
//! 1. Binary operators give the same outcome with either operand deferred
//! 2. Comparisons give the same outcome with either operand deferred
//! 3. Unary operators give the same outcome on a deferred operand
//! 4. A collapsing value runs its computation once, a plain one every time
//! 5. Chains of any length observe to the innermost result

use std::cell::Cell;
use std::rc::Rc;

use defer_expr::{defer, host, Arity, BinaryOp, CompareOp, DeferredValue, Result, UnaryOp, Value};
use proptest::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn deferred(value: Value) -> Value {
    defer(host::closure("const", Arity::Exact(0), vec![value], |env, _| Ok(env[0].clone()))).unwrap()
}

/// Outcomes compared by rendering; host exceptions are fresh objects on each
/// run, so identity would never match.
fn outcome(result: Result<Value>) -> std::result::Result<String, String> {
    match result {
        Ok(value) => Ok(value.repr().unwrap()),
        Err(err) => Err(err.to_string()),
    }
}

fn arb_number() -> impl Strategy<Value = Value> {
    prop_oneof![(-10_000i64..10_000).prop_map(Value::from),
                (-100.0f64..100.0).prop_map(Value::from),]
}

fn arb_binary_op() -> impl Strategy<Value = BinaryOp> {
    proptest::sample::select(BinaryOp::ALL.to_vec())
}

fn arb_compare_op() -> impl Strategy<Value = CompareOp> {
    proptest::sample::select(CompareOp::ALL.to_vec())
}

fn arb_unary_op() -> impl Strategy<Value = UnaryOp> {
    proptest::sample::select(vec![UnaryOp::Negative,
                                  UnaryOp::Positive,
                                  UnaryOp::Absolute,
                                  UnaryOp::Float])
}

// ═════════════════════════════════════════════════════════════════════════
// 1-3. Transparency
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn binary_ops_are_transparent(a in arb_number(), b in arb_number(), op in arb_binary_op()) {
        let direct = outcome(a.binary(op, &b));

        prop_assert_eq!(&outcome(deferred(a.clone()).binary(op, &b)), &direct);
        prop_assert_eq!(&outcome(a.binary(op, &deferred(b.clone()))), &direct);
        prop_assert_eq!(&outcome(deferred(a).binary(op, &deferred(b))), &direct);
    }

    #[test]
    fn comparisons_are_transparent(a in arb_number(), b in arb_number(), op in arb_compare_op()) {
        let direct = outcome(a.compare(op, &b));

        prop_assert_eq!(&outcome(deferred(a.clone()).compare(op, &b)), &direct);
        prop_assert_eq!(&outcome(a.compare(op, &deferred(b))), &direct);
    }

    #[test]
    fn unary_ops_are_transparent(a in arb_number(), op in arb_unary_op()) {
        prop_assert_eq!(outcome(deferred(a.clone()).unary(op)), outcome(a.unary(op)));
    }

    #[test]
    fn hash_and_truth_are_transparent(n in any::<i64>()) {
        let a = Value::from(n);
        let d = deferred(a.clone());

        prop_assert_eq!(d.hash().unwrap(), a.hash().unwrap());
        prop_assert_eq!(d.truthy().unwrap(), n != 0);
        prop_assert_eq!(d.str().unwrap(), n.to_string());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Collapse counting
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn collapse_counts(observations in 1usize..20, collapsing in any::<bool>()) {
        let calls = Rc::new(Cell::new(0usize));
        let counter = calls.clone();
        let d = DeferredValue::construct(host::lambda(move || {
                                             counter.set(counter.get() + 1);
                                             Ok(Value::from(counter.get() as i64))
                                         }),
                                         collapsing)
            .unwrap();

        let results: Vec<i64> = (0..observations).map(|_| d.observe().unwrap().as_int().unwrap()).collect();

        if collapsing {
            prop_assert_eq!(calls.get(), 1);
            prop_assert!(results.iter().all(|&n| n == 1));
        } else {
            prop_assert_eq!(calls.get(), observations);
            prop_assert_eq!(results, (1..=observations as i64).collect::<Vec<_>>());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Chains
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn chains_unwrap_fully(depth in 1usize..32, n in any::<i64>()) {
        let mut value = Value::from(n);
        for _ in 0..depth {
            value = deferred(value);
        }

        let observed = value.observe().unwrap();
        prop_assert!(!observed.is_deferred());
        prop_assert_eq!(observed.as_int(), Some(n));
    }
}
