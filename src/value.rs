use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::host::{HostBinding, HostFn, HostObject};

/// Runtime value: a tagged union over the kinds the engine understands plus
/// host callables and opaque host objects reached through `HostBinding`.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Rc<Vec<Value>>),
    Map(Rc<HashMap<MapKey, Value>>),
    Func(HostFn),
    Opaque(Rc<dyn HostObject>),
}

/// Runtime tag used for dispatch and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Nil,
    Bool,
    Int,
    Float,
    Text,
    Array,
    Map,
    Callable,
    Struct,
}

/// Hashable subset of `Value` usable as a map key. Floats with a zero
/// fraction normalize to `Int` so numeric promotion carries over to lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Nil,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl MapKey {
    pub fn try_from(value: &Value) -> Result<MapKey, RuntimeError> {
        match value {
            Value::Nil => Ok(MapKey::Nil),
            Value::Bool(b) => Ok(MapKey::Bool(*b)),
            Value::Int(i) => Ok(MapKey::Int(*i)),
            Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => {
                Ok(MapKey::Int(*f as i64))
            }
            other => Err(RuntimeError::new(format!(
                "cannot use {} as map key",
                other.kind()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MapKey::Nil => Value::Nil,
            MapKey::Bool(b) => Value::Bool(*b),
            MapKey::Int(i) => Value::Int(*i),
            MapKey::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Text(_) => Kind::Text,
            Value::Array(_) => Kind::Array,
            Value::Map(_) => Kind::Map,
            Value::Func(_) => Kind::Callable,
            Value::Opaque(_) => Kind::Struct,
        }
    }

    /// Tag for a numeric literal: integral values carry the integer tag so
    /// both engines agree on promotion behavior.
    pub fn from_number(value: f64) -> Value {
        if value.fract() == 0.0
            && value.is_finite()
            && value >= i64::MIN as f64
            && value <= i64::MAX as f64
        {
            Value::Int(value as i64)
        } else {
            Value::Float(value)
        }
    }

    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(values))
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Map(Rc::new(
            entries
                .into_iter()
                .map(|(key, value)| (MapKey::Text(key.into()), value))
                .collect(),
        ))
    }

    pub fn func(f: impl Fn(&[Value]) -> Result<Value, RuntimeError> + 'static) -> Value {
        Value::Func(Rc::new(f))
    }

    pub fn opaque(object: impl HostObject + 'static) -> Value {
        Value::Opaque(Rc::new(object))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Rc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::Array(values) => f.debug_tuple("Array").field(values).finish(),
            Value::Map(entries) => f.debug_tuple("Map").field(entries).finish(),
            Value::Func(_) => f.write_str("Func"),
            Value::Opaque(object) => write!(f, "Opaque({})", object.type_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {value}", key.to_value())?;
                }
                f.write_str("}")
            }
            Value::Func(_) => f.write_str("<func>"),
            Value::Opaque(object) => write!(f, "<{}>", object.type_name()),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::Nil => "nil",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Text => "text",
            Kind::Array => "array",
            Kind::Map => "map",
            Kind::Callable => "func",
            Kind::Struct => "struct",
        })
    }
}

// --- operator kernels -------------------------------------------------------
//
// One implementation shared by the VM and the tree-walk evaluator; the
// equivalence guarantee between the two engines rests on this module.

enum Nums {
    Ints(i64, i64),
    Floats(f64, f64),
}

/// Numeric promotion: both operands integer stay integer, otherwise both
/// coerce to float.
fn nums(a: &Value, b: &Value) -> Option<Nums> {
    match (a, b) {
        (Value::Int(l), Value::Int(r)) => Some(Nums::Ints(*l, *r)),
        (Value::Int(l), Value::Float(r)) => Some(Nums::Floats(*l as f64, *r)),
        (Value::Float(l), Value::Int(r)) => Some(Nums::Floats(*l, *r as f64)),
        (Value::Float(l), Value::Float(r)) => Some(Nums::Floats(*l, *r)),
        _ => None,
    }
}

fn invalid_op(op: &str, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::new(format!(
        "invalid operation: {} {op} {}",
        a.kind(),
        b.kind()
    ))
}

pub(crate) fn to_bool(v: &Value) -> Result<bool, RuntimeError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(RuntimeError::new(format!(
            "cannot convert {} to bool",
            other.kind()
        ))),
    }
}

pub(crate) fn to_int(v: &Value) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        other => Err(RuntimeError::new(format!(
            "cannot convert {} to int",
            other.kind()
        ))),
    }
}

pub(crate) fn to_text(v: &Value) -> Result<&str, RuntimeError> {
    match v {
        Value::Text(s) => Ok(s),
        other => Err(RuntimeError::new(format!(
            "cannot convert {} to text",
            other.kind()
        ))),
    }
}

pub(crate) fn negate(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(RuntimeError::new(format!(
            "invalid operation: - {}",
            other.kind()
        ))),
    }
}

pub(crate) fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match nums(a, b) {
        Some(Nums::Ints(l, r)) => Ok(Value::Int(l.wrapping_add(r))),
        Some(Nums::Floats(l, r)) => Ok(Value::Float(l + r)),
        None => Err(invalid_op("+", a, b)),
    }
}

pub(crate) fn subtract(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match nums(a, b) {
        Some(Nums::Ints(l, r)) => Ok(Value::Int(l.wrapping_sub(r))),
        Some(Nums::Floats(l, r)) => Ok(Value::Float(l - r)),
        None => Err(invalid_op("-", a, b)),
    }
}

pub(crate) fn multiply(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match nums(a, b) {
        Some(Nums::Ints(l, r)) => Ok(Value::Int(l.wrapping_mul(r))),
        Some(Nums::Floats(l, r)) => Ok(Value::Float(l * r)),
        None => Err(invalid_op("*", a, b)),
    }
}

pub(crate) fn divide(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match nums(a, b) {
        Some(Nums::Ints(_, 0)) => Err(RuntimeError::new("division by zero")),
        Some(Nums::Ints(l, r)) => Ok(Value::Int(l.wrapping_div(r))),
        Some(Nums::Floats(l, r)) => {
            if r == 0.0 {
                Err(RuntimeError::new("division by zero"))
            } else {
                Ok(Value::Float(l / r))
            }
        }
        None => Err(invalid_op("/", a, b)),
    }
}

pub(crate) fn modulo(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeError::new("division by zero")),
        (Value::Int(l), Value::Int(r)) => Ok(Value::Int(l.wrapping_rem(*r))),
        _ => Err(invalid_op("%", a, b)),
    }
}

pub(crate) fn exponent(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match nums(a, b) {
        Some(Nums::Ints(l, r)) => Ok(Value::Float((l as f64).powf(r as f64))),
        Some(Nums::Floats(l, r)) => Ok(Value::Float(l.powf(r))),
        None => Err(invalid_op("**", a, b)),
    }
}

pub(crate) fn concat(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let l = to_text(a)?;
    let r = to_text(b)?;
    Ok(Value::Text(format!("{l}{r}")))
}

pub(crate) fn bit_or(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    bit_op("|", a, b, |l, r| l | r)
}

pub(crate) fn bit_xor(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    bit_op("^", a, b, |l, r| l ^ r)
}

pub(crate) fn bit_and(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    bit_op("&", a, b, |l, r| l & r)
}

fn bit_op(
    op: &str,
    a: &Value,
    b: &Value,
    f: impl Fn(i64, i64) -> i64,
) -> Result<Value, RuntimeError> {
    let l = to_int(a).map_err(|_| invalid_op(op, a, b))?;
    let r = to_int(b).map_err(|_| invalid_op(op, a, b))?;
    Ok(Value::Int(f(l, r)))
}

fn compare(op: &str, a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    if let (Value::Text(l), Value::Text(r)) = (a, b) {
        return Ok(Some(l.cmp(r)));
    }
    match nums(a, b) {
        Some(Nums::Ints(l, r)) => Ok(Some(l.cmp(&r))),
        Some(Nums::Floats(l, r)) => Ok(l.partial_cmp(&r)),
        None => Err(invalid_op(op, a, b)),
    }
}

pub(crate) fn less(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    Ok(compare("<", a, b)? == Some(Ordering::Less))
}

pub(crate) fn more(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    Ok(compare(">", a, b)? == Some(Ordering::Greater))
}

pub(crate) fn less_or_equal(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    Ok(matches!(
        compare("<=", a, b)?,
        Some(Ordering::Less | Ordering::Equal)
    ))
}

pub(crate) fn more_or_equal(a: &Value, b: &Value) -> Result<bool, RuntimeError> {
    Ok(matches!(
        compare(">=", a, b)?,
        Some(Ordering::Greater | Ordering::Equal)
    ))
}

/// Typed equality: numeric tags cross-compare, nil equals only nil, arrays
/// and maps compare deeply, host values compare by identity.
pub fn loosely_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::Text(l), Value::Text(r)) => l == r,
        (Value::Array(l), Value::Array(r)) => {
            l.len() == r.len()
                && l.iter()
                    .zip(r.iter())
                    .all(|(lv, rv)| loosely_equals(lv, rv))
        }
        (Value::Map(l), Value::Map(r)) => {
            l.len() == r.len()
                && l.iter().all(|(key, lv)| {
                    r.get(key).map(|rv| loosely_equals(lv, rv)).unwrap_or(false)
                })
        }
        (Value::Func(l), Value::Func(r)) => Rc::ptr_eq(l, r),
        (Value::Opaque(l), Value::Opaque(r)) => Rc::ptr_eq(l, r),
        _ => match nums(a, b) {
            Some(Nums::Ints(l, r)) => l == r,
            Some(Nums::Floats(l, r)) => l == r,
            None => false,
        },
    }
}

const MAX_RANGE_LEN: i128 = 1_000_000;

/// Builds the inclusive integer array `min..max`. Both endpoints must carry
/// the integer tag; the result is capped at 10^6 elements.
pub(crate) fn make_range(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (min, max) = match (a, b) {
        (Value::Int(l), Value::Int(r)) => (*l, *r),
        _ => return Err(invalid_op("..", a, b)),
    };

    let size = i128::from(max) - i128::from(min) + 1;
    if size > MAX_RANGE_LEN {
        return Err(RuntimeError::new(format!(
            "range {min}..{max} exceeded max size of 1e6"
        )));
    }
    if size <= 0 {
        return Ok(Value::array(Vec::new()));
    }

    Ok(Value::array((min..=max).map(Value::Int).collect()))
}

/// Membership test behind `in`/`not in`.
pub(crate) fn contains(
    needle: &Value,
    container: &Value,
    binding: &dyn HostBinding,
) -> Result<bool, RuntimeError> {
    match container {
        Value::Nil => Ok(false),
        Value::Array(values) => Ok(values.iter().any(|value| loosely_equals(value, needle))),
        Value::Map(entries) => {
            let key = MapKey::try_from(needle).map_err(|_| {
                RuntimeError::new(format!("cannot use {} as index to map", needle.kind()))
            })?;
            Ok(entries.contains_key(&key))
        }
        Value::Opaque(object) => match needle {
            Value::Text(name) => Ok(binding.get(container, name).is_some()),
            other => Err(RuntimeError::new(format!(
                "cannot use {} as field name of {}",
                other.kind(),
                object.type_name()
            ))),
        },
        other => Err(RuntimeError::new(format!(
            "operator \"in\" not defined on {}",
            other.kind()
        ))),
    }
}

/// `base[index]` for every indexable kind.
pub(crate) fn index_value(
    base: &Value,
    index: &Value,
    binding: &dyn HostBinding,
) -> Result<Value, RuntimeError> {
    match base {
        Value::Array(values) => {
            let i = to_int(index)
                .map_err(|_| RuntimeError::new(format!("invalid array index ({})", index.kind())))?;
            usize::try_from(i)
                .ok()
                .and_then(|i| values.get(i).cloned())
                .ok_or_else(|| {
                    RuntimeError::new(format!(
                        "index out of bounds: index {i}, len {}",
                        values.len()
                    ))
                })
        }
        Value::Text(s) => {
            let i = to_int(index)
                .map_err(|_| RuntimeError::new(format!("invalid text index ({})", index.kind())))?;
            usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Text(c.to_string()))
                .ok_or_else(|| {
                    RuntimeError::new(format!(
                        "index out of bounds: index {i}, len {}",
                        s.chars().count()
                    ))
                })
        }
        Value::Map(entries) => {
            let key = MapKey::try_from(index)?;
            entries.get(&key).cloned().ok_or_else(|| {
                RuntimeError::new(format!("cannot get {} from map", key.to_value()))
            })
        }
        Value::Opaque(object) => match index {
            Value::Text(name) => property_value(base, name, binding),
            other => Err(RuntimeError::new(format!(
                "cannot index {} with {}",
                object.type_name(),
                other.kind()
            ))),
        },
        other => Err(RuntimeError::new(format!(
            "cannot index {}",
            other.kind()
        ))),
    }
}

/// `base.name` field access.
pub(crate) fn property_value(
    base: &Value,
    name: &str,
    binding: &dyn HostBinding,
) -> Result<Value, RuntimeError> {
    if let Some(value) = binding.get(base, name) {
        return Ok(value);
    }
    match base {
        Value::Nil => Err(RuntimeError::new(format!("cannot get {name} from nil"))),
        Value::Opaque(object) => Err(RuntimeError::new(format!(
            "undefined (type {} has no field {name})",
            object.type_name()
        ))),
        other => Err(RuntimeError::new(format!(
            "undefined (type {} has no field {name})",
            other.kind()
        ))),
    }
}

/// Top-level name lookup on the environment.
pub(crate) fn fetch_name(
    env: &Value,
    name: &str,
    binding: &dyn HostBinding,
) -> Result<Value, RuntimeError> {
    binding
        .get(env, name)
        .ok_or_else(|| RuntimeError::new(format!("undefined: {name}")))
}

/// The `len` builtin: element count for arrays, char count for text.
pub(crate) fn len_value(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Array(values) => Ok(Value::Int(values.len() as i64)),
        Value::Text(s) => Ok(Value::Int(s.chars().count() as i64)),
        other => Err(RuntimeError::new(format!(
            "invalid argument for len (type {})",
            other.kind()
        ))),
    }
}
