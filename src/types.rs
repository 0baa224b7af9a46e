use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Mapping from environment-visible name to semantic type. When absent,
/// every name checks as `Interface`.
pub type TypesTable = HashMap<String, Type>;

/// Semantic types assigned by the checker. `Interface` is the unknown/
/// dynamic type; `Ptr` is transparently dereferenced before any rule fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Nil,
    Bool,
    Number,
    Text,
    Array(Box<Type>),
    Map(Box<Type>),
    Struct(Rc<StructType>),
    Func(Rc<FuncType>),
    Interface,
    Ptr(Box<Type>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructType {
    pub name: String,
    pub fields: HashMap<String, Type>,
    pub methods: HashMap<String, Rc<FuncType>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncType {
    /// Declared return type; `Nil` when the callable declares none.
    pub ret: Type,
}

impl StructType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn with_method(mut self, name: impl Into<String>, ret: Type) -> Self {
        self.methods.insert(name.into(), Rc::new(FuncType { ret }));
        self
    }

    pub fn into_type(self) -> Type {
        Type::Struct(Rc::new(self))
    }
}

impl FuncType {
    pub fn returning(ret: Type) -> Type {
        Type::Func(Rc::new(FuncType { ret }))
    }
}

impl Type {
    /// Strips any number of pointer layers.
    pub fn deref(&self) -> &Type {
        match self {
            Type::Ptr(inner) => inner.deref(),
            other => other,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.deref(), Type::Nil)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.deref(), Type::Bool)
    }

    pub fn is_number(&self) -> bool {
        matches!(self.deref(), Type::Number)
    }

    pub fn is_text(&self) -> bool {
        matches!(self.deref(), Type::Text)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.deref(), Type::Array(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.deref(), Type::Map(_))
    }

    pub fn is_struct(&self) -> bool {
        matches!(self.deref(), Type::Struct(_))
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.deref(), Type::Interface)
    }

    /// Whether `==`/`!=` is defined between the two types: both numeric,
    /// either side nil or dynamic, or the same concrete type.
    pub fn comparable(&self, other: &Type) -> bool {
        let l = self.deref();
        let r = other.deref();

        if l.is_nil() || r.is_nil() {
            return true;
        }
        if l.is_number() && r.is_number() {
            return true;
        }
        if l.is_interface() || r.is_interface() {
            return true;
        }
        l == r
    }

    /// Type of a named field, for property access.
    pub fn field_type(&self, name: &str) -> Option<Type> {
        match self.deref() {
            Type::Interface => Some(Type::Interface),
            Type::Struct(s) => s.fields.get(name).cloned(),
            Type::Map(value) => Some((**value).clone()),
            _ => None,
        }
    }

    /// Element type produced by indexing.
    pub fn index_type(&self) -> Option<Type> {
        match self.deref() {
            Type::Interface => Some(Type::Interface),
            Type::Array(elem) => Some((**elem).clone()),
            Type::Map(value) => Some((**value).clone()),
            _ => None,
        }
    }

    /// Return type of a named method. Struct resolution tries the method
    /// set first, then a field holding a callable.
    pub fn method_type(&self, name: &str) -> Option<Type> {
        match self.deref() {
            Type::Interface => Some(Type::Interface),
            Type::Struct(s) => {
                if let Some(func) = s.methods.get(name) {
                    return Some(func.ret.clone());
                }
                s.fields.get(name).and_then(Type::func_return)
            }
            Type::Map(value) => value.func_return(),
            _ => None,
        }
    }

    /// Return type when this type is called as a function.
    pub fn func_return(&self) -> Option<Type> {
        match self.deref() {
            Type::Interface => Some(Type::Interface),
            Type::Func(func) => Some(func.ret.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Nil => f.write_str("nil"),
            Type::Bool => f.write_str("bool"),
            Type::Number => f.write_str("number"),
            Type::Text => f.write_str("text"),
            Type::Array(_) => f.write_str("array"),
            Type::Map(_) => f.write_str("map"),
            Type::Struct(s) if !s.name.is_empty() => f.write_str(&s.name),
            Type::Struct(_) => f.write_str("struct"),
            Type::Func(_) => f.write_str("func"),
            Type::Interface => f.write_str("interface"),
            Type::Ptr(inner) => write!(f, "*{inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_are_transparent() {
        let ty = Type::Ptr(Box::new(Type::Ptr(Box::new(Type::Number))));
        assert!(ty.is_number());
        assert!(ty.comparable(&Type::Number));
    }

    #[test]
    fn comparability_rules() {
        assert!(Type::Number.comparable(&Type::Number));
        assert!(Type::Nil.comparable(&Type::Text));
        assert!(Type::Interface.comparable(&Type::Bool));
        assert!(Type::Text.comparable(&Type::Text));
        assert!(!Type::Text.comparable(&Type::Number));
        assert!(!Type::Bool.comparable(&Type::Number));
    }

    #[test]
    fn struct_method_resolution_prefers_method_set() {
        let ty = StructType::new("account")
            .with_field("Rank", FuncType::returning(Type::Text))
            .with_method("Rank", Type::Number)
            .into_type();
        assert_eq!(ty.method_type("Rank"), Some(Type::Number));
    }

    #[test]
    fn struct_falls_back_to_callable_field() {
        let ty = StructType::new("account")
            .with_field("Rank", FuncType::returning(Type::Text))
            .into_type();
        assert_eq!(ty.method_type("Rank"), Some(Type::Text));
        assert_eq!(ty.method_type("Missing"), None);
    }

    #[test]
    fn index_type_exposes_element_types() {
        let array = Type::Array(Box::new(Type::Text));
        assert_eq!(array.index_type(), Some(Type::Text));
        let map = Type::Map(Box::new(Type::Number));
        assert_eq!(map.index_type(), Some(Type::Number));
        assert_eq!(Type::Text.index_type(), None);
    }
}
