//! The capability table of a deferred value.
//!
//! Every slot has the same shape: observe each deferred operand, left to
//! right, stopping at the first failure; then perform the operation again on
//! the observed values, so the capability is looked up on what the deferred
//! value resolved to. A deferred value therefore claims every optional
//! capability, and the lookup failure (if any) names what the observed value
//! is missing.
//!
//! `traverse` and `clear` are the exception: they act on the deferred value's
//! own fields, so the collector sees what the deferred value owns rather than
//! what it resolves to.

use crate::deferred::DeferredValue;
use crate::error::Result;
use crate::value::{Arity, BinaryOp, Callable, CompareOp, Descriptor, Iterate, Number, Object, TernaryOp, UnaryOp,
                   Value};


impl Object for DeferredValue {
    fn type_name(&self) -> &'static str {
        "deferred"
    }

    fn repr(&self) -> Result<String> {
        self.observe()?.repr()
    }

    fn str(&self) -> Result<String> {
        self.observe()?.str()
    }

    fn get_attr(&self, name: &str) -> Result<Value> {
        self.observe()?.get_attr(name)
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.observe()?.set_attr(name, value)
    }

    fn del_attr(&self, name: &str) -> Result<()> {
        self.observe()?.del_attr(name)
    }

    /// Not memoized here: only a collapsing deferred value hashes stably
    /// without recomputing.
    fn hash(&self) -> Result<u64> {
        self.observe()?.hash()
    }

    fn truthy(&self) -> Result<bool> {
        self.observe()?.truthy()
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        let lhs = lhs.observe()?;
        let rhs = rhs.observe()?;
        lhs.compare(op, &rhs)
    }

    fn iter(&self, _this: &Value) -> Result<Value> {
        self.observe()?.iter()
    }

    fn as_number(&self) -> Option<&dyn Number> {
        Some(self)
    }

    fn as_callable(&self) -> Option<&dyn Callable> {
        Some(self)
    }

    fn as_iterator(&self) -> Option<&dyn Iterate> {
        Some(self)
    }

    fn as_descriptor(&self) -> Option<&dyn Descriptor> {
        Some(self)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        self.visit_fields(visit);
    }

    fn clear(&self) {
        self.release();
    }
}


impl Number for DeferredValue {
    fn unary(&self, op: UnaryOp, _operand: &Value) -> Result<Value> {
        self.observe()?.unary(op)
    }

    fn binary(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        let lhs = lhs.observe()?;
        let rhs = rhs.observe()?;
        lhs.binary(op, &rhs)
    }

    fn ternary(&self, op: TernaryOp, base: &Value, exponent: &Value, modulus: &Value) -> Result<Value> {
        let base = base.observe()?;
        let exponent = exponent.observe()?;
        let modulus = modulus.observe()?;
        base.ternary(op, &exponent, &modulus)
    }
}


impl Callable for DeferredValue {
    /// Unknown until observed.
    fn arity(&self) -> Arity {
        Arity::AtLeast(0)
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        self.observe()?.call(args)
    }
}


impl Iterate for DeferredValue {
    fn next(&self) -> Result<Option<Value>> {
        self.observe()?.next()
    }
}


impl Descriptor for DeferredValue {
    fn get(&self, instance: Option<&Value>, owner: Option<&Value>) -> Result<Value> {
        self.observe()?.descr_get(instance, owner)
    }

    fn set(&self, instance: &Value, value: Option<Value>) -> Result<()> {
        self.observe()?.descr_set(instance, value)
    }
}
