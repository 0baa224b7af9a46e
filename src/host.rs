use std::any::Any;
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::{Kind, MapKey, Value};

/// A host callable bound into the environment: receives evaluated argument
/// values and produces exactly one result value.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Value, RuntimeError>>;

/// An opaque host object the engine can only reach through capabilities:
/// reading named fields and resolving bound methods. This is the seam where
/// a reflection-based host would plug in generated accessors.
pub trait HostObject: Debug {
    fn type_name(&self) -> &'static str {
        "struct"
    }

    fn field(&self, name: &str) -> Option<Value>;

    fn method(&self, _name: &str) -> Option<HostFn> {
        None
    }
}

/// Capability set used by both engines to read fields, index values and
/// invoke callables on host data.
pub trait HostBinding {
    /// Reads a struct field or a textual map entry.
    fn get(&self, host: &Value, name: &str) -> Option<Value>;

    /// Indexes sequences and text by position, maps by key, structs by
    /// field name.
    fn index(&self, host: &Value, key: &Value) -> Option<Value>;

    /// Resolves a method bound to the host, falling back to a field that
    /// holds a callable.
    fn resolve(&self, host: &Value, name: &str) -> Option<HostFn>;

    /// Invokes a resolved callable.
    fn invoke(&self, func: &HostFn, args: &[Value]) -> Result<Value, RuntimeError>;

    /// Runtime tag of a value, for dispatch.
    fn kind(&self, value: &Value) -> Kind;
}

/// Default binding over the built-in `Value` kinds, delegating opaque hosts
/// to their `HostObject` implementation.
pub struct Bindings;

impl HostBinding for Bindings {
    fn get(&self, host: &Value, name: &str) -> Option<Value> {
        match host {
            Value::Map(entries) => entries.get(&MapKey::Text(name.to_string())).cloned(),
            Value::Opaque(object) => object.field(name),
            _ => None,
        }
    }

    fn index(&self, host: &Value, key: &Value) -> Option<Value> {
        match host {
            Value::Array(values) => match key {
                Value::Int(i) => usize::try_from(*i).ok().and_then(|i| values.get(i).cloned()),
                _ => None,
            },
            Value::Text(s) => match key {
                Value::Int(i) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Text(c.to_string())),
                _ => None,
            },
            Value::Map(entries) => MapKey::try_from(key)
                .ok()
                .and_then(|key| entries.get(&key).cloned()),
            Value::Opaque(object) => match key {
                Value::Text(name) => object.field(name),
                _ => None,
            },
            _ => None,
        }
    }

    fn resolve(&self, host: &Value, name: &str) -> Option<HostFn> {
        match host {
            // Method set first, then a field holding a callable.
            Value::Opaque(object) => object.method(name).or_else(|| {
                match object.field(name) {
                    Some(Value::Func(func)) => Some(func),
                    _ => None,
                }
            }),
            Value::Map(entries) => {
                match entries.get(&MapKey::Text(name.to_string())) {
                    Some(Value::Func(func)) => Some(func.clone()),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn invoke(&self, func: &HostFn, args: &[Value]) -> Result<Value, RuntimeError> {
        func(args)
    }

    fn kind(&self, value: &Value) -> Kind {
        value.kind()
    }
}

/// Invokes a host callable, converting an escaping panic into a
/// `RuntimeError` so a host fault cannot crash the engine.
pub(crate) fn invoke_guarded(
    binding: &dyn HostBinding,
    func: &HostFn,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    match catch_unwind(AssertUnwindSafe(|| binding.invoke(func, args))) {
        Ok(result) => result,
        Err(payload) => Err(RuntimeError::new(format!(
            "host call failed: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown host fault")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Account {
        balance: i64,
    }

    impl HostObject for Account {
        fn type_name(&self) -> &'static str {
            "Account"
        }

        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "Balance" => Some(Value::Int(self.balance)),
                "Describe" => Some(Value::func(|_| Ok(Value::from("field callable")))),
                _ => None,
            }
        }

        fn method(&self, name: &str) -> Option<HostFn> {
            match name {
                "Doubled" => {
                    let balance = self.balance;
                    Some(Rc::new(move |_| Ok(Value::Int(balance * 2))))
                }
                _ => None,
            }
        }
    }

    #[test]
    fn reads_fields_from_maps_and_objects() {
        let bindings = Bindings;
        let map = Value::map([("name", Value::from("ada"))]);
        assert_eq!(bindings.get(&map, "name"), Some(Value::from("ada")));
        assert_eq!(bindings.get(&map, "missing"), None);

        let account = Value::opaque(Account { balance: 10 });
        assert_eq!(bindings.get(&account, "Balance"), Some(Value::Int(10)));
        assert_eq!(bindings.get(&Value::Nil, "x"), None);
    }

    #[test]
    fn indexes_by_position_key_and_field() {
        let bindings = Bindings;
        let array = Value::array(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(bindings.index(&array, &Value::Int(1)), Some(Value::Int(2)));
        assert_eq!(bindings.index(&array, &Value::Int(9)), None);

        let account = Value::opaque(Account { balance: 3 });
        assert_eq!(
            bindings.index(&account, &Value::from("Balance")),
            Some(Value::Int(3))
        );
    }

    #[test]
    fn resolve_prefers_methods_over_callable_fields() {
        let bindings = Bindings;
        let account = Value::opaque(Account { balance: 4 });

        let method = bindings
            .resolve(&account, "Doubled")
            .expect("method should resolve");
        assert_eq!(
            bindings.invoke(&method, &[]).expect("invoke"),
            Value::Int(8)
        );

        let field = bindings
            .resolve(&account, "Describe")
            .expect("callable field should resolve");
        assert_eq!(
            bindings.invoke(&field, &[]).expect("invoke"),
            Value::from("field callable")
        );

        assert!(bindings.resolve(&account, "Missing").is_none());
    }

    #[test]
    fn guarded_invoke_converts_panics() {
        let bindings = Bindings;
        let exploding: HostFn = Rc::new(|_| panic!("boom"));
        let err = invoke_guarded(&bindings, &exploding, &[]).expect_err("expected failure");
        assert_eq!(err.message, "host call failed: boom");
    }
}
