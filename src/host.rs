//! A minimal host object model: enough built-in types to embed deferred values
//! in, and to exercise every capability they proxy.
//!
//! Container types are registered with the cycle collector when built through
//! the constructors here. A native function's captured values must live in
//! its `env` for the collector to see them; values captured by the Rust
//! closure itself are invisible to it and will keep a cycle alive.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::error::{Error, Result};
use crate::value::{identity_compare, no_attribute, Arity, BinaryOp, Callable, CompareOp, Descriptor, Iterate, Number,
                   Object, TernaryOp, UnaryOp, Value};


thread_local! {
    static NONE: Value = Value::new(NoneType);
    static TRUE: Value = Value::new(Bool(true));
    static FALSE: Value = Value::new(Bool(false));
}


pub struct NoneType;
pub struct Bool(pub bool);
pub struct Int(pub i64);
pub struct Float(pub f64);
pub struct Str(pub String);


/// An immutable sequence.
pub struct Tuple(Vec<Value>);


/// A mutable sequence.
pub struct List(RefCell<Vec<Value>>);


/// Iterator over a `Tuple` or `List`.
pub struct SequenceIterator {
    sequence: RefCell<Option<Value>>,
    index: Cell<usize>,
}


/// A plain attribute bag.
pub struct Record {
    type_name: &'static str,
    attributes: RefCell<BTreeMap<String, Value>>,
}


/// A native function. `body` receives the captured environment, then the
/// arguments.
pub struct Function {
    name: String,
    arity: Arity,
    env: RefCell<Vec<Value>>,
    body: Box<dyn Fn(&[Value], &[Value]) -> Result<Value>>,
}


/// A descriptor calling `getter(instance)` and `setter(instance, value)`.
pub struct Property {
    getter: RefCell<Option<Value>>,
    setter: RefCell<Option<Value>>,
}


pub fn none() -> Value {
    NONE.with(Value::clone)
}


pub fn tuple(items: Vec<Value>) -> Value {
    Value::tracked(Tuple(items))
}


pub fn list(items: Vec<Value>) -> Value {
    Value::tracked(List(RefCell::new(items)))
}


pub fn record<I, S>(type_name: &'static str, attributes: I) -> Value
    where I: IntoIterator<Item = (S, Value)>,
          S: Into<String>
{
    let attributes = attributes.into_iter().map(|(name, value)| (name.into(), value)).collect();

    Value::tracked(Record {
        type_name,
        attributes: RefCell::new(attributes),
    })
}


/// A native function capturing nothing the collector needs to see.
pub fn function<F>(name: &str, arity: Arity, body: F) -> Value
    where F: Fn(&[Value]) -> Result<Value> + 'static
{
    closure(name, arity, Vec::new(), move |_, args| body(args))
}


/// A native function with a captured environment.
pub fn closure<F>(name: &str, arity: Arity, env: Vec<Value>, body: F) -> Value
    where F: Fn(&[Value], &[Value]) -> Result<Value> + 'static
{
    Value::tracked(Function {
        name: name.to_owned(),
        arity,
        env: RefCell::new(env),
        body: Box::new(body),
    })
}


/// A zero-argument native function.
pub fn lambda<F>(body: F) -> Value
    where F: Fn() -> Result<Value> + 'static
{
    function("<lambda>", Arity::Exact(0), move |_| body())
}


pub fn property(getter: Option<Value>, setter: Option<Value>) -> Value {
    Value::tracked(Property {
        getter: RefCell::new(getter),
        setter: RefCell::new(setter),
    })
}


impl From<bool> for Value {
    fn from(b: bool) -> Value {
        if b {
            TRUE.with(Value::clone)
        } else {
            FALSE.with(Value::clone)
        }
    }
}


impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::new(Int(n))
    }
}


impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::new(Float(x))
    }
}


impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Value {
        Value::new(Str(s.to_owned()))
    }
}


impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::new(Str(s))
    }
}


impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        self.downcast_ref::<Bool>().map(|b| b.0)
    }


    pub fn as_int(&self) -> Option<i64> {
        self.downcast_ref::<Int>().map(|n| n.0)
    }


    pub fn as_float(&self) -> Option<f64> {
        self.downcast_ref::<Float>().map(|x| x.0)
    }


    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<Str>().map(|s| s.0.as_str())
    }


    pub fn is_none(&self) -> bool {
        self.downcast_ref::<NoneType>().is_some()
    }
}


fn fx_hash<T: Hash + ?Sized>(t: &T) -> u64 {
    let mut hasher = FxHasher::default();
    t.hash(&mut hasher);
    hasher.finish()
}


fn type_error(message: impl Into<String>) -> Error {
    Error::raise("TypeError", message)
}


fn zero_division(message: &str) -> Error {
    Error::raise("ZeroDivisionError", message)
}


fn overflow() -> Error {
    Error::raise("OverflowError", "integer overflow")
}


impl Object for NoneType {
    fn type_name(&self) -> &'static str {
        "NoneType"
    }

    fn repr(&self) -> Result<String> {
        Ok("None".to_owned())
    }

    fn hash(&self) -> Result<u64> {
        Ok(fx_hash("None"))
    }

    fn truthy(&self) -> Result<bool> {
        Ok(false)
    }
}


impl Object for Bool {
    fn type_name(&self) -> &'static str {
        "bool"
    }

    fn repr(&self) -> Result<String> {
        Ok(if self.0 { "True" } else { "False" }.to_owned())
    }

    fn hash(&self) -> Result<u64> {
        Ok(fx_hash(&(self.0 as i64)))
    }

    fn truthy(&self) -> Result<bool> {
        Ok(self.0)
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        match (lhs.as_bool(), rhs.as_bool()) {
            (Some(a), Some(b)) => Ok(op.holds(Some(a.cmp(&b))).into()),
            _ => identity_compare(op, lhs, rhs),
        }
    }
}


/// Numeric view of a host value.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}


impl Num {
    fn of(value: &Value) -> Option<Num> {
        if let Some(n) = value.as_int() {
            Some(Num::Int(n))
        } else {
            value.as_float().map(Num::Float)
        }
    }


    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(x) => x,
        }
    }


    fn partial_cmp(self, other: Num) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}


fn operands(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<(Num, Num)> {
    match (Num::of(lhs), Num::of(rhs)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Error::unsupported(format!("unsupported operand type(s) for {}: '{}' and '{}'",
                                            op.symbol(),
                                            lhs.type_name(),
                                            rhs.type_name()))),
    }
}


/// In-place operators compute the same as their base operator; `op` itself is
/// kept so that errors name the operator actually requested.
fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match operands(op, lhs, rhs)? {
        (Num::Int(a), Num::Int(b)) => int_arithmetic(op, a, b),
        (a, b) => float_arithmetic(op, a.as_f64(), b.as_f64(), lhs, rhs),
    }
}


fn floor_div(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}


fn floor_mod(a: i64, b: i64) -> Result<i64> {
    if b == 0 {
        return Err(zero_division("integer division or modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    if r != 0 && (r < 0) != (b < 0) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}


fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let n = match op.base() {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinaryOp::Subtract => a.checked_sub(b).ok_or_else(overflow)?,
        BinaryOp::Multiply => a.checked_mul(b).ok_or_else(overflow)?,
        BinaryOp::Remainder => floor_mod(a, b)?,
        BinaryOp::FloorDivide => floor_div(a, b)?,
        BinaryOp::Divmod => return Ok(tuple(vec![floor_div(a, b)?.into(), floor_mod(a, b)?.into()])),
        BinaryOp::TrueDivide => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok((a as f64 / b as f64).into());
        }
        BinaryOp::LeftShift => {
            if b < 0 {
                return Err(Error::raise("ValueError", "negative shift count"));
            }
            if a == 0 {
                0
            } else if b >= 64 || (a << b) >> b != a {
                return Err(overflow());
            } else {
                a << b
            }
        }
        BinaryOp::RightShift => {
            if b < 0 {
                return Err(Error::raise("ValueError", "negative shift count"));
            }
            a >> b.min(63)
        }
        BinaryOp::And => a & b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::Or => a | b,
        _ => return Err(op.unsupported()),
    };

    Ok(n.into())
}


/// Floor division and modulo of floats, returned together. The remainder
/// takes the sign of `b`; the quotient is rounded to the nearest integer
/// below `a / b` that is consistent with that remainder.
fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut r = a % b;
    // `a - r` is exact, so this is an integer (or zero) unless `b` is infinite.
    let mut q = (a - r) / b;

    if r != 0.0 {
        if (b < 0.0) != (r < 0.0) {
            r += b;
            q -= 1.0;
        }
    } else {
        r = 0.0f64.copysign(b);
    }

    let q = if q != 0.0 {
        let floor = q.floor();
        if q - floor > 0.5 { floor + 1.0 } else { floor }
    } else {
        0.0f64.copysign(a / b)
    };

    (q, r)
}


fn float_arithmetic(op: BinaryOp, a: f64, b: f64, lhs: &Value, rhs: &Value) -> Result<Value> {
    let x = match op.base() {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::TrueDivide | BinaryOp::FloorDivide | BinaryOp::Remainder | BinaryOp::Divmod if b == 0.0 => {
            return Err(zero_division("float division by zero"));
        }
        BinaryOp::TrueDivide => a / b,
        BinaryOp::FloorDivide => float_divmod(a, b).0,
        BinaryOp::Remainder => float_divmod(a, b).1,
        BinaryOp::Divmod => {
            let (q, r) = float_divmod(a, b);
            return Ok(tuple(vec![q.into(), r.into()]));
        }
        BinaryOp::MatrixMultiply => return Err(op.unsupported()),
        _ => {
            return Err(Error::unsupported(format!("unsupported operand type(s) for {}: '{}' and '{}'",
                                                  op.symbol(),
                                                  lhs.type_name(),
                                                  rhs.type_name())))
        }
    };

    Ok(x.into())
}


fn power(base: &Value, exponent: &Value, modulus: &Value) -> Result<Value> {
    let (a, b) = operands(BinaryOp::Multiply, base, exponent)
        .map_err(|_| Error::unsupported(format!("unsupported operand type(s) for ** or pow(): '{}' and '{}'",
                                                base.type_name(),
                                                exponent.type_name())))?;

    if modulus.is_none() {
        return match (a, b) {
            // These never grow, whatever the exponent.
            (Num::Int(0), Num::Int(b)) if b > 0 => Ok(Value::from(0i64)),
            (Num::Int(1), Num::Int(b)) if b >= 0 => Ok(Value::from(1i64)),
            (Num::Int(-1), Num::Int(b)) if b >= 0 => Ok(Value::from(if b % 2 == 0 { 1i64 } else { -1 })),
            (Num::Int(a), Num::Int(b)) if b >= 0 => {
                let b = u32::try_from(b).map_err(|_| overflow())?;
                Ok(a.checked_pow(b).ok_or_else(overflow)?.into())
            }
            (a, b) => {
                if a.as_f64() == 0.0 && b.as_f64() < 0.0 {
                    return Err(zero_division("0.0 cannot be raised to a negative power"));
                }
                Ok(a.as_f64().powf(b.as_f64()).into())
            }
        };
    }

    match (a, b, modulus.as_int()) {
        (Num::Int(_), Num::Int(b), Some(_)) if b < 0 => {
            Err(Error::raise("ValueError", "pow() 2nd argument cannot be negative when 3rd argument specified"))
        }
        (Num::Int(_), Num::Int(_), Some(0)) => Err(Error::raise("ValueError", "pow() 3rd argument cannot be 0")),
        (Num::Int(a), Num::Int(b), Some(m)) => {
            let m = m as i128;
            let mut result: i128 = 1;
            let mut base = (a as i128).rem_euclid(m.abs());
            let mut exponent = b;
            while exponent > 0 {
                if exponent & 1 == 1 {
                    result = (result * base).rem_euclid(m.abs());
                }
                base = (base * base).rem_euclid(m.abs());
                exponent >>= 1;
            }
            if m < 0 && result != 0 {
                result += m;
            }
            Ok((result as i64).into())
        }
        _ => Err(type_error("pow() 3rd argument not allowed unless all arguments are integers")),
    }
}


impl Number for Int {
    fn unary(&self, op: UnaryOp, _operand: &Value) -> Result<Value> {
        let n = self.0;

        match op {
            UnaryOp::Negative => Ok(n.checked_neg().ok_or_else(overflow)?.into()),
            UnaryOp::Absolute => Ok(n.checked_abs().ok_or_else(overflow)?.into()),
            UnaryOp::Positive | UnaryOp::Int | UnaryOp::Index => Ok(n.into()),
            UnaryOp::Invert => Ok((!n).into()),
            UnaryOp::Float => Ok((n as f64).into()),
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        arithmetic(op, lhs, rhs)
    }

    fn ternary(&self, _op: TernaryOp, base: &Value, exponent: &Value, modulus: &Value) -> Result<Value> {
        power(base, exponent, modulus)
    }
}


impl Object for Int {
    fn type_name(&self) -> &'static str {
        "int"
    }

    fn repr(&self) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn hash(&self) -> Result<u64> {
        Ok(fx_hash(&self.0))
    }

    fn truthy(&self) -> Result<bool> {
        Ok(self.0 != 0)
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        numeric_compare(op, lhs, rhs)
    }

    fn as_number(&self) -> Option<&dyn Number> {
        Some(self)
    }
}


impl Number for Float {
    fn unary(&self, op: UnaryOp, operand: &Value) -> Result<Value> {
        let x = self.0;

        match op {
            UnaryOp::Negative => Ok((-x).into()),
            UnaryOp::Positive | UnaryOp::Float => Ok(x.into()),
            UnaryOp::Absolute => Ok(x.abs().into()),
            UnaryOp::Int => {
                if x.is_nan() {
                    Err(Error::raise("ValueError", "cannot convert float NaN to integer"))
                } else if x.trunc() < i64::MIN as f64 || x.trunc() >= i64::MAX as f64 {
                    Err(Error::raise("OverflowError", "cannot convert float to integer"))
                } else {
                    Ok((x.trunc() as i64).into())
                }
            }
            UnaryOp::Invert | UnaryOp::Index => {
                Err(Error::unsupported(format!("bad operand type for {}: '{}'", op.name(), operand.type_name())))
            }
        }
    }

    fn binary(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        arithmetic(op, lhs, rhs)
    }

    fn ternary(&self, _op: TernaryOp, base: &Value, exponent: &Value, modulus: &Value) -> Result<Value> {
        power(base, exponent, modulus)
    }
}


impl Object for Float {
    fn type_name(&self) -> &'static str {
        "float"
    }

    fn repr(&self) -> Result<String> {
        let x = self.0;

        Ok(if x.is_nan() {
            "nan".to_owned()
        } else if x.is_infinite() {
            (if x > 0.0 { "inf" } else { "-inf" }).to_owned()
        } else if x.fract() == 0.0 && x.abs() < 1e16 {
            format!("{:.1}", x)
        } else {
            x.to_string()
        })
    }

    fn hash(&self) -> Result<u64> {
        let x = self.0;

        // Equal ints and floats hash alike.
        if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
            Ok(fx_hash(&(x as i64)))
        } else {
            Ok(fx_hash(&x.to_bits()))
        }
    }

    fn truthy(&self) -> Result<bool> {
        Ok(self.0 != 0.0)
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        numeric_compare(op, lhs, rhs)
    }

    fn as_number(&self) -> Option<&dyn Number> {
        Some(self)
    }
}


fn numeric_compare(op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    match (Num::of(lhs), Num::of(rhs)) {
        (Some(a), Some(b)) => Ok(op.holds(a.partial_cmp(b)).into()),
        _ => identity_compare(op, lhs, rhs),
    }
}


impl Object for Str {
    fn type_name(&self) -> &'static str {
        "str"
    }

    fn repr(&self) -> Result<String> {
        Ok(format!("'{}'", self.0.replace('\\', "\\\\").replace('\'', "\\'")))
    }

    fn str(&self) -> Result<String> {
        Ok(self.0.clone())
    }

    fn hash(&self) -> Result<u64> {
        Ok(fx_hash(self.0.as_str()))
    }

    fn truthy(&self) -> Result<bool> {
        Ok(!self.0.is_empty())
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        match (lhs.as_str(), rhs.as_str()) {
            (Some(a), Some(b)) => Ok(op.holds(Some(a.cmp(b))).into()),
            _ => identity_compare(op, lhs, rhs),
        }
    }
}


fn join_reprs(items: &[Value]) -> Result<String> {
    let reprs = items.iter().map(Value::repr).collect::<Result<Vec<_>>>()?;
    Ok(reprs.join(", "))
}


/// Elementwise equality; ordering is not supported between sequences.
fn sequence_compare(op: CompareOp, lhs: &Value, rhs: &Value, a: &[Value], b: &[Value]) -> Result<Value> {
    let equal = || -> Result<bool> {
        if a.len() != b.len() {
            return Ok(false);
        }
        for (x, y) in a.iter().zip(b) {
            if !x.equals(y)? {
                return Ok(false);
            }
        }
        Ok(true)
    };

    match op {
        CompareOp::Eq => Ok(equal()?.into()),
        CompareOp::Ne => Ok((!equal()?).into()),
        _ => Err(op.unsupported(lhs, rhs)),
    }
}


fn items_of(value: &Value) -> Option<Vec<Value>> {
    if let Some(tuple) = value.downcast_ref::<Tuple>() {
        Some(tuple.0.clone())
    } else {
        value.downcast_ref::<List>().map(|list| list.0.borrow().clone())
    }
}


fn sequence_iter(this: &Value) -> Value {
    Value::tracked(SequenceIterator {
        sequence: RefCell::new(Some(this.clone())),
        index: Cell::new(0),
    })
}


impl Tuple {
    pub fn items(&self) -> &[Value] {
        &self.0
    }
}


impl Object for Tuple {
    fn type_name(&self) -> &'static str {
        "tuple"
    }

    fn repr(&self) -> Result<String> {
        if self.0.len() == 1 {
            Ok(format!("({},)", self.0[0].repr()?))
        } else {
            Ok(format!("({})", join_reprs(&self.0)?))
        }
    }

    fn hash(&self) -> Result<u64> {
        let mut hasher = FxHasher::default();
        for item in &self.0 {
            hasher.write_u64(item.hash()?);
        }
        Ok(hasher.finish())
    }

    fn truthy(&self) -> Result<bool> {
        Ok(!self.0.is_empty())
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        match (lhs.downcast_ref::<Tuple>(), rhs.downcast_ref::<Tuple>()) {
            (Some(a), Some(b)) => sequence_compare(op, lhs, rhs, &a.0, &b.0),
            _ => identity_compare(op, lhs, rhs),
        }
    }

    fn iter(&self, this: &Value) -> Result<Value> {
        Ok(sequence_iter(this))
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        self.0.iter().for_each(visit);
    }
}


impl List {
    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }


    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }


    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }


    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }
}


impl Object for List {
    fn type_name(&self) -> &'static str {
        "list"
    }

    fn repr(&self) -> Result<String> {
        let items = self.0.borrow().clone();
        Ok(format!("[{}]", join_reprs(&items)?))
    }

    fn truthy(&self) -> Result<bool> {
        Ok(!self.is_empty())
    }

    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> Result<Value> {
        match (lhs.downcast_ref::<List>(), rhs.downcast_ref::<List>()) {
            (Some(a), Some(b)) => {
                let (a, b) = (a.0.borrow().clone(), b.0.borrow().clone());
                sequence_compare(op, lhs, rhs, &a, &b)
            }
            _ => identity_compare(op, lhs, rhs),
        }
    }

    fn iter(&self, this: &Value) -> Result<Value> {
        Ok(sequence_iter(this))
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        self.0.borrow().iter().for_each(visit);
    }

    fn clear(&self) {
        let items = self.0.replace(Vec::new());
        drop(items);
    }
}


impl Iterate for SequenceIterator {
    fn next(&self) -> Result<Option<Value>> {
        let sequence = self.sequence.borrow().clone();
        let items = match sequence.as_ref().and_then(items_of) {
            Some(items) => items,
            None => return Ok(None),
        };

        let index = self.index.get();
        match items.get(index) {
            Some(item) => {
                self.index.set(index + 1);
                Ok(Some(item.clone()))
            }
            None => {
                // Exhausted iterators stay exhausted.
                self.sequence.replace(None);
                Ok(None)
            }
        }
    }
}


impl Object for SequenceIterator {
    fn type_name(&self) -> &'static str {
        "sequence_iterator"
    }

    fn iter(&self, this: &Value) -> Result<Value> {
        Ok(this.clone())
    }

    fn as_iterator(&self) -> Option<&dyn Iterate> {
        Some(self)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        if let Some(sequence) = self.sequence.borrow().as_ref() {
            visit(sequence);
        }
    }

    fn clear(&self) {
        let sequence = self.sequence.replace(None);
        drop(sequence);
    }
}


impl Object for Record {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn repr(&self) -> Result<String> {
        let attributes = self.attributes.borrow().clone();
        let fields = attributes.iter()
            .map(|(name, value)| Ok(format!("{}={}", name, value.repr()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("{}({})", self.type_name, fields.join(", ")))
    }

    fn get_attr(&self, name: &str) -> Result<Value> {
        self.attributes
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| no_attribute(self.type_name, name))
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<()> {
        let previous = self.attributes.borrow_mut().insert(name.to_owned(), value);
        drop(previous);
        Ok(())
    }

    fn del_attr(&self, name: &str) -> Result<()> {
        let removed = self.attributes.borrow_mut().remove(name);
        match removed {
            Some(_) => Ok(()),
            None => Err(no_attribute(self.type_name, name)),
        }
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        self.attributes.borrow().values().for_each(visit);
    }

    fn clear(&self) {
        let attributes = self.attributes.replace(BTreeMap::new());
        drop(attributes);
    }
}


impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }


    /// Append a captured value to the environment. This is how a function comes
    /// to capture a value that is only built after the function itself.
    pub fn bind(&self, value: Value) {
        self.env.borrow_mut().push(value);
    }


    pub fn env(&self) -> Vec<Value> {
        self.env.borrow().clone()
    }
}


impl Callable for Function {
    fn arity(&self) -> Arity {
        self.arity
    }

    fn call(&self, args: &[Value]) -> Result<Value> {
        if !self.arity.accepts(args.len()) {
            return Err(type_error(format!("{}() takes {} positional arguments ({} given)",
                                          self.name,
                                          self.arity,
                                          args.len())));
        }

        // The body may rebind the environment.
        let env = self.env.borrow().clone();
        (self.body)(&env, args)
    }
}


impl Object for Function {
    fn type_name(&self) -> &'static str {
        "function"
    }

    fn repr(&self) -> Result<String> {
        Ok(format!("<function {}>", self.name))
    }

    fn hash(&self) -> Result<u64> {
        Ok(fx_hash(&(self as *const Function as usize)))
    }

    fn as_callable(&self) -> Option<&dyn Callable> {
        Some(self)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        self.env.borrow().iter().for_each(visit);
    }

    fn clear(&self) {
        let env = self.env.replace(Vec::new());
        drop(env);
    }
}


impl Descriptor for Property {
    fn get(&self, instance: Option<&Value>, _owner: Option<&Value>) -> Result<Value> {
        let instance = instance.ok_or_else(|| type_error("property requires an instance"))?;
        let getter = self.getter.borrow().clone();

        match getter {
            Some(getter) => getter.call(&[instance.clone()]),
            None => Err(Error::raise("AttributeError", "unreadable attribute")),
        }
    }

    fn set(&self, instance: &Value, value: Option<Value>) -> Result<()> {
        let setter = self.setter.borrow().clone();

        match (setter, value) {
            (Some(setter), Some(value)) => setter.call(&[instance.clone(), value]).map(|_| ()),
            (Some(_), None) => Err(Error::raise("AttributeError", "can't delete attribute")),
            (None, _) => Err(Error::raise("AttributeError", "can't set attribute")),
        }
    }
}


impl Object for Property {
    fn type_name(&self) -> &'static str {
        "property"
    }

    fn as_descriptor(&self) -> Option<&dyn Descriptor> {
        Some(self)
    }

    fn traverse(&self, visit: &mut dyn FnMut(&Value)) {
        if let Some(getter) = self.getter.borrow().as_ref() {
            visit(getter);
        }
        if let Some(setter) = self.setter.borrow().as_ref() {
            visit(setter);
        }
    }

    fn clear(&self) {
        let getter = self.getter.replace(None);
        let setter = self.setter.replace(None);
        drop((getter, setter));
    }
}
