use thiserror::Error;

use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::types::{Type, TypesTable};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TypeError {
    pub position: usize,
    pub message: String,
}

pub type CheckResult = Result<Type, TypeError>;

/// Validates the AST against an environment schema, assigning each node a
/// semantic type bottom-up. Without a table every name is `Interface` and
/// unknown names are accepted.
pub fn check(node: &Node, types: Option<&TypesTable>) -> CheckResult {
    Checker { types }.type_of(node)
}

struct Checker<'a> {
    types: Option<&'a TypesTable>,
}

impl Checker<'_> {
    fn type_of(&self, node: &Node) -> CheckResult {
        match &node.kind {
            NodeKind::Nil => Ok(Type::Nil),
            NodeKind::Bool(_) => Ok(Type::Bool),
            NodeKind::Number(_) => Ok(Type::Number),
            NodeKind::Text(_) | NodeKind::Identifier(_) => Ok(Type::Text),
            NodeKind::Name(name) => self.name_type(node, name),
            NodeKind::Unary { op, node: operand } => self.unary_type(node, *op, operand),
            NodeKind::Binary { op, left, right } => self.binary_type(node, *op, left, right),
            NodeKind::Matches { left, right, .. } => self.matches_type(node, left, right),
            NodeKind::Property {
                node: base,
                property,
            } => {
                let base_type = self.type_of(base)?;
                base_type.field_type(property).ok_or_else(|| {
                    self.error(
                        node,
                        format!("type {base_type} has no field {property}"),
                    )
                })
            }
            NodeKind::Index { node: base, index } => {
                let base_type = self.type_of(base)?;
                self.type_of(index)?;
                base_type.index_type().ok_or_else(|| {
                    self.error(
                        node,
                        format!("invalid operation: type {base_type} does not support indexing"),
                    )
                })
            }
            NodeKind::Method {
                node: base,
                method,
                arguments,
            } => {
                let base_type = self.type_of(base)?;
                for argument in arguments {
                    self.type_of(argument)?;
                }
                base_type.method_type(method).ok_or_else(|| {
                    self.error(node, format!("type {base_type} has no method {method}"))
                })
            }
            NodeKind::Builtin { name, arguments } => self.builtin_type(node, name, arguments),
            NodeKind::Function { name, arguments } => {
                for argument in arguments {
                    self.type_of(argument)?;
                }
                let Some(types) = self.types else {
                    return Ok(Type::Interface);
                };
                types
                    .get(name)
                    .and_then(Type::func_return)
                    .ok_or_else(|| self.error(node, format!("unknown func {name}")))
            }
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => self.conditional_type(cond, then, otherwise),
            NodeKind::Array(nodes) => {
                for node in nodes {
                    self.type_of(node)?;
                }
                Ok(Type::Array(Box::new(Type::Interface)))
            }
            NodeKind::Map(pairs) => {
                for (key, value) in pairs {
                    self.type_of(key)?;
                    self.type_of(value)?;
                }
                Ok(Type::Map(Box::new(Type::Interface)))
            }
        }
    }

    fn name_type(&self, node: &Node, name: &str) -> CheckResult {
        let Some(types) = self.types else {
            return Ok(Type::Interface);
        };
        types
            .get(name)
            .cloned()
            .ok_or_else(|| self.error(node, format!("unknown name {name}")))
    }

    fn unary_type(&self, node: &Node, op: UnaryOp, operand: &Node) -> CheckResult {
        let ty = self.type_of(operand)?;
        let ok = match op {
            UnaryOp::Not => ty.is_bool() || ty.is_interface(),
            UnaryOp::Minus | UnaryOp::Plus => ty.is_number() || ty.is_interface(),
        };
        if !ok {
            return Err(self.error(
                node,
                format!("invalid operation: {op} (mismatched type {ty})"),
            ));
        }
        Ok(match op {
            UnaryOp::Not => Type::Bool,
            UnaryOp::Minus | UnaryOp::Plus => Type::Number,
        })
    }

    fn binary_type(&self, node: &Node, op: BinaryOp, left: &Node, right: &Node) -> CheckResult {
        let ltype = self.type_of(left)?;
        let rtype = self.type_of(right)?;

        let mismatch = || {
            Err(self.error(
                node,
                format!("invalid operation: {op} (mismatched types {ltype} and {rtype})"),
            ))
        };

        let number_or_dynamic =
            |ty: &Type| ty.is_number() || ty.is_interface();
        let bool_or_dynamic = |ty: &Type| ty.is_bool() || ty.is_interface();
        let text_or_dynamic = |ty: &Type| ty.is_text() || ty.is_interface();

        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                if ltype.comparable(&rtype) {
                    Ok(Type::Bool)
                } else {
                    mismatch()
                }
            }
            BinaryOp::Or | BinaryOp::And => {
                if bool_or_dynamic(&ltype) && bool_or_dynamic(&rtype) {
                    Ok(Type::Bool)
                } else {
                    mismatch()
                }
            }
            BinaryOp::In | BinaryOp::NotIn => {
                if text_or_dynamic(&ltype) && rtype.is_struct() {
                    return Ok(Type::Bool);
                }
                if rtype.is_array() || rtype.is_map() || rtype.is_interface() {
                    return Ok(Type::Bool);
                }
                mismatch()
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::More | BinaryOp::MoreEq => {
                if number_or_dynamic(&ltype) && number_or_dynamic(&rtype) {
                    Ok(Type::Bool)
                } else {
                    mismatch()
                }
            }
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Mod
            | BinaryOp::Exp
            | BinaryOp::BitOr
            | BinaryOp::BitXor
            | BinaryOp::BitAnd => {
                if number_or_dynamic(&ltype) && number_or_dynamic(&rtype) {
                    Ok(Type::Number)
                } else {
                    mismatch()
                }
            }
            BinaryOp::Range => {
                if number_or_dynamic(&ltype) && number_or_dynamic(&rtype) {
                    Ok(Type::Array(Box::new(Type::Number)))
                } else {
                    mismatch()
                }
            }
            BinaryOp::Concat => {
                if text_or_dynamic(&ltype) && text_or_dynamic(&rtype) {
                    Ok(Type::Text)
                } else {
                    mismatch()
                }
            }
        }
    }

    fn matches_type(&self, node: &Node, left: &Node, right: &Node) -> CheckResult {
        let ltype = self.type_of(left)?;
        let rtype = self.type_of(right)?;
        if (ltype.is_text() || ltype.is_interface()) && (rtype.is_text() || rtype.is_interface()) {
            Ok(Type::Bool)
        } else {
            Err(self.error(
                node,
                format!("invalid operation: matches (mismatched types {ltype} and {rtype})"),
            ))
        }
    }

    fn builtin_type(&self, node: &Node, name: &str, arguments: &[Node]) -> CheckResult {
        for argument in arguments {
            self.type_of(argument)?;
        }
        match name {
            "len" => {
                if arguments.is_empty() {
                    return Err(self.error(node, "missing argument: len".to_string()));
                }
                if arguments.len() > 1 {
                    return Err(self.error(node, "too many arguments: len".to_string()));
                }
                let ty = self.type_of(&arguments[0])?;
                if ty.is_array() || ty.is_text() || ty.is_interface() {
                    Ok(Type::Number)
                } else {
                    Err(self.error(node, format!("invalid argument for len (type {ty})")))
                }
            }
            other => Err(self.error(node, format!("unknown builtin {other}"))),
        }
    }

    fn conditional_type(&self, cond: &Node, then: &Node, otherwise: &Node) -> CheckResult {
        let cond_type = self.type_of(cond)?;
        if !cond_type.is_bool() && !cond_type.is_interface() {
            return Err(self.error(
                cond,
                format!("non-bool (type {cond_type}) used as condition"),
            ));
        }

        let t1 = self.type_of(then)?;
        let t2 = self.type_of(otherwise)?;

        // A nil branch defers to the other; equal branches keep their type;
        // anything else decays to the dynamic type.
        if t1.is_nil() && !t2.is_nil() {
            return Ok(t2);
        }
        if !t1.is_nil() && t2.is_nil() {
            return Ok(t1);
        }
        if t1 == t2 {
            return Ok(t1);
        }
        Ok(Type::Interface)
    }

    fn error(&self, node: &Node, message: String) -> TypeError {
        TypeError {
            position: node.span.start,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use crate::types::{FuncType, StructType};

    fn parse(input: &str) -> Node {
        parse_tokens(tokenize(input).expect("tokenize should succeed"))
            .expect("parse should succeed")
    }

    fn schema() -> TypesTable {
        let mut types = TypesTable::new();
        types.insert(
            "user".to_string(),
            StructType::new("user")
                .with_field("Group", Type::Text)
                .with_field("Age", Type::Number)
                .with_method("IsMember", Type::Bool)
                .into_type(),
        );
        types.insert("name".to_string(), Type::Text);
        types.insert("count".to_string(), Type::Number);
        types.insert("flags".to_string(), Type::Map(Box::new(Type::Bool)));
        types.insert("items".to_string(), Type::Array(Box::new(Type::Text)));
        types.insert("Lookup".to_string(), FuncType::returning(Type::Text));
        types
    }

    fn check_with_schema(input: &str) -> CheckResult {
        check(&parse(input), Some(&schema()))
    }

    #[test]
    fn literals_have_their_own_types() {
        assert_eq!(check_with_schema("nil"), Ok(Type::Nil));
        assert_eq!(check_with_schema("true"), Ok(Type::Bool));
        assert_eq!(check_with_schema("1.5"), Ok(Type::Number));
        assert_eq!(check_with_schema("\"a\""), Ok(Type::Text));
    }

    #[test]
    fn arithmetic_requires_numbers() {
        assert_eq!(check_with_schema("count + 1"), Ok(Type::Number));
        let err = check_with_schema("name + 1").expect_err("expected type failure");
        assert_eq!(
            err.message,
            "invalid operation: + (mismatched types text and number)"
        );
    }

    #[test]
    fn comparisons_and_logic_produce_bool() {
        assert_eq!(check_with_schema("count > 1 and count < 10"), Ok(Type::Bool));
        let err = check_with_schema("name and true").expect_err("expected type failure");
        assert!(err.message.contains("mismatched types text and bool"));
    }

    #[test]
    fn equality_needs_comparable_operands() {
        assert_eq!(check_with_schema("name == \"x\""), Ok(Type::Bool));
        assert_eq!(check_with_schema("name == nil"), Ok(Type::Bool));
        let err = check_with_schema("name == 1").expect_err("expected type failure");
        assert!(err.message.contains("mismatched types text and number"));
    }

    #[test]
    fn membership_accepts_arrays_maps_and_structs() {
        assert_eq!(check_with_schema("name in items"), Ok(Type::Bool));
        assert_eq!(check_with_schema("name in flags"), Ok(Type::Bool));
        assert_eq!(check_with_schema("\"Group\" in user"), Ok(Type::Bool));
        let err = check_with_schema("count in user").expect_err("expected type failure");
        assert!(err.message.contains("invalid operation: in"));
    }

    #[test]
    fn property_and_method_resolution() {
        assert_eq!(check_with_schema("user.Group"), Ok(Type::Text));
        assert_eq!(check_with_schema("user.IsMember(name)"), Ok(Type::Bool));
        let err = check_with_schema("user.Missing").expect_err("expected type failure");
        assert_eq!(err.message, "type user has no field Missing");
    }

    #[test]
    fn index_exposes_element_type() {
        assert_eq!(check_with_schema("items[0]"), Ok(Type::Text));
        let err = check_with_schema("count[0]").expect_err("expected type failure");
        assert!(err.message.contains("does not support indexing"));
    }

    #[test]
    fn function_calls_use_declared_return_type() {
        assert_eq!(check_with_schema("Lookup(name)"), Ok(Type::Text));
        let err = check_with_schema("Unknown(1)").expect_err("expected type failure");
        assert_eq!(err.message, "unknown func Unknown");
    }

    #[test]
    fn len_accepts_arrays_and_text() {
        assert_eq!(check_with_schema("len(items)"), Ok(Type::Number));
        assert_eq!(check_with_schema("len(name)"), Ok(Type::Number));
        let err = check_with_schema("len(count)").expect_err("expected type failure");
        assert_eq!(err.message, "invalid argument for len (type number)");
    }

    #[test]
    fn conditional_branch_typing() {
        assert_eq!(check_with_schema("count > 0 ? 1 : 2"), Ok(Type::Number));
        assert_eq!(check_with_schema("count > 0 ? nil : name"), Ok(Type::Text));
        assert_eq!(
            check_with_schema("count > 0 ? 1 : name"),
            Ok(Type::Interface)
        );
        let err = check_with_schema("count ? 1 : 2").expect_err("expected type failure");
        assert!(err.message.contains("used as condition"));
    }

    #[test]
    fn unknown_name_is_an_error_only_with_a_table() {
        let err = check_with_schema("missing").expect_err("expected type failure");
        assert_eq!(err.message, "unknown name missing");
        assert_eq!(check(&parse("missing"), None), Ok(Type::Interface));
        assert_eq!(check(&parse("missing + 1"), None), Ok(Type::Number));
    }

    #[test]
    fn range_produces_a_numeric_array() {
        assert_eq!(
            check_with_schema("1..5"),
            Ok(Type::Array(Box::new(Type::Number)))
        );
        let err = check_with_schema("name..5").expect_err("expected type failure");
        assert!(err.message.contains("invalid operation: .."));
    }

    #[test]
    fn matches_requires_text_operands() {
        assert_eq!(check_with_schema("name matches \"^a\""), Ok(Type::Bool));
        let err = check_with_schema("count matches \"^a\"").expect_err("expected type failure");
        assert!(err.message.contains("invalid operation: matches"));
    }

    #[test]
    fn pointer_schema_entries_are_dereferenced() {
        let mut types = TypesTable::new();
        types.insert(
            "age".to_string(),
            Type::Ptr(Box::new(Type::Number)),
        );
        assert_eq!(check(&parse("age + 1"), Some(&types)), Ok(Type::Number));
    }
}
