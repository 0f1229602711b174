//! The host value model as seen by deferred values: a `Value` handle, the
//! `Object` capability table every host type implements, and the generic
//! operations that dispatch through it.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::deferred::DeferredValue;
use crate::error::{Error, Result};
use crate::gc;


/// Downcasting support for `Object` implementors. Blanket-implemented; never
/// implement it by hand.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}


impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}


/// The capability table of a host type.
///
/// Every operation defaults to "not supported", so a type implements exactly
/// the capabilities it has. The optional capabilities (`as_number`,
/// `as_callable`, `as_iterator`, `as_descriptor`) are looked up rather than
/// called, so a missing capability can be reported by name.
pub trait Object: AsAny {
    fn type_name(&self) -> &'static str;

    fn repr(&self) -> Result<String> {
        Ok(format!("<{} object>", self.type_name()))
    }

    fn str(&self) -> Result<String> {
        self.repr()
    }

    fn get_attr(&self, name: &str) -> Result<Value> {
        Err(no_attribute(self.type_name(), name))
    }

    fn set_attr(&self, name: &str, _value: Value) -> Result<()> {
        Err(no_attribute(self.type_name(), name))
    }

    fn del_attr(&self, name: &str) -> Result<()> {
        Err(no_attribute(self.type_name(), name))
    }

    fn hash(&self) -> Result<u64> {
        Err(Error::unsupported(format!("unhashable type: '{}'", self.type_name())))
    }

    fn truthy(&self) -> Result<bool> {
        Ok(true)
    }

    /// Rich comparison. `lhs` or `rhs` is the value this table belongs to.
    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        identity_compare(op, lhs, rhs)
    }

    /// Produce an iterator over `this`, the value this table belongs to.
    fn iter(&self, _this: &Value) -> Result<Value> {
        Err(Error::unsupported("object is not iterable"))
    }

    fn as_number(&self) -> Option<&dyn Number> {
        None
    }

    fn as_callable(&self) -> Option<&dyn Callable> {
        None
    }

    fn as_iterator(&self) -> Option<&dyn Iterate> {
        None
    }

    fn as_descriptor(&self) -> Option<&dyn Descriptor> {
        None
    }

    /// Visit every `Value` this object owns. Used by the cycle collector.
    fn traverse(&self, _visit: &mut dyn FnMut(&Value)) {}

    /// Drop every `Value` this object owns. Called by the cycle collector on
    /// unreachable objects.
    fn clear(&self) {}
}


/// Numeric operator slots.
pub trait Number {
    fn unary(&self, op: UnaryOp, _operand: &Value) -> Result<Value> {
        Err(op.unsupported())
    }

    fn binary(&self, op: BinaryOp, _lhs: &Value, _rhs: &Value) -> Result<Value> {
        Err(op.unsupported())
    }

    fn ternary(&self, op: TernaryOp, _base: &Value, _exponent: &Value, _modulus: &Value) -> Result<Value> {
        Err(op.unsupported())
    }
}


pub trait Callable {
    fn arity(&self) -> Arity;

    fn call(&self, args: &[Value]) -> Result<Value>;
}


/// The "next element" half of the iteration protocol.
pub trait Iterate {
    /// `Ok(None)` once exhausted.
    fn next(&self) -> Result<Option<Value>>;
}


pub trait Descriptor {
    fn get(&self, instance: Option<&Value>, owner: Option<&Value>) -> Result<Value>;

    fn set(&self, _instance: &Value, _value: Option<Value>) -> Result<()> {
        Err(Error::unsupported("object has no descriptor setter"))
    }
}


/// How many positional arguments a callable accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}


impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(lo, hi) => lo <= count && count <= hi,
        }
    }
}


impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Arity::Exact(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Between(lo, hi) => write!(f, "from {} to {}", lo, hi),
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negative,
    Positive,
    Absolute,
    Invert,
    Int,
    Float,
    Index,
}


impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negative => "negative",
            UnaryOp::Positive => "positive",
            UnaryOp::Absolute => "absolute",
            UnaryOp::Invert => "invert",
            UnaryOp::Int => "int",
            UnaryOp::Float => "float",
            UnaryOp::Index => "index",
        }
    }


    pub fn unsupported(self) -> Error {
        Error::unsupported(format!("{} not supported", self.name()))
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Remainder,
    Divmod,
    LeftShift,
    RightShift,
    And,
    Xor,
    Or,
    FloorDivide,
    TrueDivide,
    MatrixMultiply,
    InplaceAdd,
    InplaceSubtract,
    InplaceMultiply,
    InplaceRemainder,
    InplaceLeftShift,
    InplaceRightShift,
    InplaceAnd,
    InplaceXor,
    InplaceOr,
    InplaceFloorDivide,
    InplaceTrueDivide,
    InplaceMatrixMultiply,
}


impl BinaryOp {
    pub const ALL: [BinaryOp; 25] = [
        BinaryOp::Add,
        BinaryOp::Subtract,
        BinaryOp::Multiply,
        BinaryOp::Remainder,
        BinaryOp::Divmod,
        BinaryOp::LeftShift,
        BinaryOp::RightShift,
        BinaryOp::And,
        BinaryOp::Xor,
        BinaryOp::Or,
        BinaryOp::FloorDivide,
        BinaryOp::TrueDivide,
        BinaryOp::MatrixMultiply,
        BinaryOp::InplaceAdd,
        BinaryOp::InplaceSubtract,
        BinaryOp::InplaceMultiply,
        BinaryOp::InplaceRemainder,
        BinaryOp::InplaceLeftShift,
        BinaryOp::InplaceRightShift,
        BinaryOp::InplaceAnd,
        BinaryOp::InplaceXor,
        BinaryOp::InplaceOr,
        BinaryOp::InplaceFloorDivide,
        BinaryOp::InplaceTrueDivide,
        BinaryOp::InplaceMatrixMultiply,
    ];


    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Subtract => "subtract",
            BinaryOp::Multiply => "multiply",
            BinaryOp::Remainder => "remainder",
            BinaryOp::Divmod => "divmod",
            BinaryOp::LeftShift => "lshift",
            BinaryOp::RightShift => "rshift",
            BinaryOp::And => "and",
            BinaryOp::Xor => "xor",
            BinaryOp::Or => "or",
            BinaryOp::FloorDivide => "floor_divide",
            BinaryOp::TrueDivide => "true_divide",
            BinaryOp::MatrixMultiply => "matrix_multiply",
            BinaryOp::InplaceAdd => "inplace_add",
            BinaryOp::InplaceSubtract => "inplace_subtract",
            BinaryOp::InplaceMultiply => "inplace_multiply",
            BinaryOp::InplaceRemainder => "inplace_remainder",
            BinaryOp::InplaceLeftShift => "inplace_lshift",
            BinaryOp::InplaceRightShift => "inplace_rshift",
            BinaryOp::InplaceAnd => "inplace_and",
            BinaryOp::InplaceXor => "inplace_xor",
            BinaryOp::InplaceOr => "inplace_or",
            BinaryOp::InplaceFloorDivide => "inplace_floor_divide",
            BinaryOp::InplaceTrueDivide => "inplace_true_divide",
            BinaryOp::InplaceMatrixMultiply => "inplace_matrix_multiply",
        }
    }


    /// The operator symbol, shared by an operator and its in-place variant.
    pub fn symbol(self) -> &'static str {
        match self.base() {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Remainder => "%",
            BinaryOp::Divmod => "divmod()",
            BinaryOp::LeftShift => "<<",
            BinaryOp::RightShift => ">>",
            BinaryOp::And => "&",
            BinaryOp::Xor => "^",
            BinaryOp::Or => "|",
            BinaryOp::FloorDivide => "//",
            BinaryOp::TrueDivide => "/",
            _ => "@",
        }
    }


    pub fn is_inplace(self) -> bool {
        self.base() != self
    }


    /// The plain operator an in-place operator falls back to.
    pub fn base(self) -> BinaryOp {
        match self {
            BinaryOp::InplaceAdd => BinaryOp::Add,
            BinaryOp::InplaceSubtract => BinaryOp::Subtract,
            BinaryOp::InplaceMultiply => BinaryOp::Multiply,
            BinaryOp::InplaceRemainder => BinaryOp::Remainder,
            BinaryOp::InplaceLeftShift => BinaryOp::LeftShift,
            BinaryOp::InplaceRightShift => BinaryOp::RightShift,
            BinaryOp::InplaceAnd => BinaryOp::And,
            BinaryOp::InplaceXor => BinaryOp::Xor,
            BinaryOp::InplaceOr => BinaryOp::Or,
            BinaryOp::InplaceFloorDivide => BinaryOp::FloorDivide,
            BinaryOp::InplaceTrueDivide => BinaryOp::TrueDivide,
            BinaryOp::InplaceMatrixMultiply => BinaryOp::MatrixMultiply,
            op => op,
        }
    }


    pub fn unsupported(self) -> Error {
        Error::unsupported(format!("{} not supported", self.name()))
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TernaryOp {
    Power,
    InplacePower,
}


impl TernaryOp {
    pub fn name(self) -> &'static str {
        match self {
            TernaryOp::Power => "power",
            TernaryOp::InplacePower => "inplace_power",
        }
    }


    pub fn unsupported(self) -> Error {
        Error::unsupported(format!("{} not supported", self.name()))
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}


impl CompareOp {
    pub const ALL: [CompareOp; 6] =
        [CompareOp::Lt, CompareOp::Le, CompareOp::Eq, CompareOp::Ne, CompareOp::Gt, CompareOp::Ge];


    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }


    /// Evaluate the operator against the outcome of a partial comparison.
    /// Unordered operands are unequal and compare false otherwise.
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            None => self == CompareOp::Ne,
            Some(ordering) => match self {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::Ne => ordering != Ordering::Equal,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
            },
        }
    }


    pub fn unsupported(self, lhs: &Value, rhs: &Value) -> Error {
        Error::unsupported(format!("'{}' not supported between instances of '{}' and '{}'",
                                   self.symbol(),
                                   lhs.type_name(),
                                   rhs.type_name()))
    }
}


/// A handle to a host value: either a plain host object, or a deferred value
/// standing in for one. Cloning is cheap and shares the object.
#[derive(Clone)]
pub enum Value {
    Object(Rc<dyn Object>),
    Deferred(Rc<DeferredValue>),
}


impl Value {
    /// Wrap a host object that owns no other values.
    pub fn new<T: Object + 'static>(object: T) -> Value {
        Value::Object(Rc::new(object))
    }


    /// Wrap a host object that may own other values, and register it with the
    /// cycle collector.
    pub fn tracked<T: Object + 'static>(object: T) -> Value {
        let value = Value::new(object);
        gc::track(&value);
        value
    }


    /// The capability table for this value. For a deferred value this is the
    /// proxying table, not the table of whatever it resolves to.
    #[inline]
    pub fn object(&self) -> &dyn Object {
        match self {
            Value::Object(object) => &**object,
            Value::Deferred(deferred) => &**deferred,
        }
    }


    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Value::Deferred(_))
    }


    #[inline]
    pub fn as_deferred(&self) -> Option<&Rc<DeferredValue>> {
        match self {
            Value::Deferred(deferred) => Some(deferred),
            Value::Object(_) => None,
        }
    }


    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(object) => (**object).as_any().downcast_ref::<T>(),
            Value::Deferred(_) => None,
        }
    }


    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.object().type_name()
    }


    /// Identity comparison.
    #[inline]
    pub fn ptr_eq(&self, other: &Value) -> bool {
        self.addr() == other.addr()
    }


    pub(crate) fn addr(&self) -> usize {
        match self {
            Value::Object(object) => Rc::as_ptr(object) as *const () as usize,
            Value::Deferred(deferred) => Rc::as_ptr(deferred) as *const () as usize,
        }
    }


    pub(crate) fn strong_count(&self) -> usize {
        match self {
            Value::Object(object) => Rc::strong_count(object),
            Value::Deferred(deferred) => Rc::strong_count(deferred),
        }
    }


    /// Resolve to a concrete value. Identity on anything that is not deferred.
    #[inline]
    pub fn observe(&self) -> Result<Value> {
        match self {
            Value::Deferred(deferred) => deferred.observe(),
            Value::Object(_) => Ok(self.clone()),
        }
    }


    /// Whether this value can be called with zero arguments. Deferred values
    /// always can: their call slot exists regardless of what they resolve to.
    pub fn is_invocable(&self) -> bool {
        match self {
            Value::Deferred(_) => true,
            Value::Object(object) => object.as_callable().is_some_and(|c| c.arity().accepts(0)),
        }
    }


    pub fn repr(&self) -> Result<String> {
        self.object().repr()
    }


    pub fn str(&self) -> Result<String> {
        self.object().str()
    }


    pub fn get_attr(&self, name: &str) -> Result<Value> {
        self.object().get_attr(name)
    }


    pub fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        self.object().set_attr(name, value)
    }


    pub fn del_attr(&self, name: &str) -> Result<()> {
        self.object().del_attr(name)
    }


    pub fn hash(&self) -> Result<u64> {
        self.object().hash()
    }


    pub fn truthy(&self) -> Result<bool> {
        self.object().truthy()
    }


    pub fn call(&self, args: &[Value]) -> Result<Value> {
        match self.object().as_callable() {
            Some(callable) => callable.call(args),
            None => Err(Error::unsupported("object is not callable")),
        }
    }


    pub fn compare(&self, op: CompareOp, other: &Value) -> Result<Value> {
        slot_owner(&[self, other]).object().compare(op, self, other)
    }


    pub fn equals(&self, other: &Value) -> Result<bool> {
        self.compare(CompareOp::Eq, other)?.truthy()
    }


    pub fn unary(&self, op: UnaryOp) -> Result<Value> {
        number(self)?.unary(op, self)
    }


    pub fn binary(&self, op: BinaryOp, rhs: &Value) -> Result<Value> {
        number(slot_owner(&[self, rhs]))?.binary(op, self, rhs)
    }


    /// `self ** exponent % modulus`; pass `host::none()` for no modulus.
    pub fn ternary(&self, op: TernaryOp, exponent: &Value, modulus: &Value) -> Result<Value> {
        number(slot_owner(&[self, exponent, modulus]))?.ternary(op, self, exponent, modulus)
    }


    #[inline]
    pub fn add(&self, rhs: &Value) -> Result<Value> {
        self.binary(BinaryOp::Add, rhs)
    }


    #[inline]
    pub fn sub(&self, rhs: &Value) -> Result<Value> {
        self.binary(BinaryOp::Subtract, rhs)
    }


    #[inline]
    pub fn mul(&self, rhs: &Value) -> Result<Value> {
        self.binary(BinaryOp::Multiply, rhs)
    }


    pub fn iter(&self) -> Result<Value> {
        self.object().iter(self)
    }


    /// Advance an iterator. `Ok(None)` once exhausted.
    pub fn next(&self) -> Result<Option<Value>> {
        match self.object().as_iterator() {
            Some(iterator) => iterator.next(),
            None => Err(Error::unsupported("object is not iterable")),
        }
    }


    /// Iterate with a Rust iterator, going through `iter` and then `next`.
    pub fn iterate(&self) -> Result<Values> {
        Ok(Values { iterator: self.iter()? })
    }


    pub fn descr_get(&self, instance: Option<&Value>, owner: Option<&Value>) -> Result<Value> {
        match self.object().as_descriptor() {
            Some(descriptor) => descriptor.get(instance, owner),
            None => Err(Error::unsupported("object has no descriptor getter")),
        }
    }


    /// Assign through a descriptor; `None` deletes.
    pub fn descr_set(&self, instance: &Value, value: Option<Value>) -> Result<()> {
        match self.object().as_descriptor() {
            Some(descriptor) => descriptor.set(instance, value),
            None => Err(Error::unsupported("object has no descriptor setter")),
        }
    }
}


impl fmt::Debug for Value {
    /// Never observes: a deferred value shows its state, not its result.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Object(object) => write!(f, "<{} object at {:#x}>", object.type_name(), self.addr()),
            Value::Deferred(deferred) => fmt::Debug::fmt(&**deferred, f),
        }
    }
}


/// A Rust iterator over a host iterator.
pub struct Values {
    iterator: Value,
}


impl Iterator for Values {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Result<Value>> {
        self.iterator.next().transpose()
    }
}


/// Pick whose slot handles a multi-operand operation: the first deferred
/// operand if there is one, so that deferred operands on either side get
/// observed, and the left operand otherwise.
fn slot_owner<'a>(operands: &[&'a Value]) -> &'a Value {
    operands.iter()
        .copied()
        .find(|operand| operand.is_deferred())
        .unwrap_or(operands[0])
}


fn number(value: &Value) -> Result<&dyn Number> {
    value.object()
        .as_number()
        .ok_or_else(|| Error::unsupported("object is not numeric"))
}


pub(crate) fn no_attribute(type_name: &str, name: &str) -> Error {
    Error::raise("AttributeError",
                 format!("'{}' object has no attribute '{}'", type_name, name))
}


/// The fallback comparison: equality is identity, ordering is unsupported.
pub fn identity_compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match op {
        CompareOp::Eq => Ok(lhs.ptr_eq(rhs).into()),
        CompareOp::Ne => Ok((!lhs.ptr_eq(rhs)).into()),
        _ => Err(op.unsupported(lhs, rhs)),
    }
}
