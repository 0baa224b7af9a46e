use std::collections::HashMap;

use regex::Regex;

use crate::ast::{BinaryOp, Node, NodeKind, UnaryOp};
use crate::error::RuntimeError;
use crate::host::{invoke_guarded, HostBinding};
use crate::value::{self, MapKey, Value};

pub type EvalResult = Result<Value, RuntimeError>;

/// Reference tree-walk interpreter. Shares the operator kernels with the
/// VM so the two engines agree on every well-typed expression; the test
/// suite leans on that equivalence.
pub fn eval_node(node: &Node, env: &Value, binding: &dyn HostBinding) -> EvalResult {
    match &node.kind {
        NodeKind::Nil => Ok(Value::Nil),
        NodeKind::Bool(b) => Ok(Value::Bool(*b)),
        NodeKind::Number(n) => Ok(Value::from_number(*n)),
        NodeKind::Text(s) | NodeKind::Identifier(s) => Ok(Value::Text(s.clone())),
        NodeKind::Name(name) => value::fetch_name(env, name, binding),
        NodeKind::Unary { op, node: operand } => {
            let v = eval_node(operand, env, binding)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value::to_bool(&v)?)),
                UnaryOp::Minus => value::negate(&v),
                UnaryOp::Plus => Ok(v),
            }
        }
        NodeKind::Binary { op, left, right } => eval_binary(*op, left, right, env, binding),
        NodeKind::Matches {
            left,
            right,
            pattern,
        } => {
            let subject = eval_node(left, env, binding)?;
            if let Some(pattern) = pattern {
                return Ok(Value::Bool(pattern.is_match(value::to_text(&subject)?)));
            }

            // Both operands evaluate before either converts, as in the
            // compiled form.
            let pattern = eval_node(right, env, binding)?;
            let subject = value::to_text(&subject)?;
            let pattern = value::to_text(&pattern)?;
            let compiled = Regex::new(pattern).map_err(|err| {
                RuntimeError::new(format!("invalid regular expression '{pattern}': {err}"))
            })?;
            Ok(Value::Bool(compiled.is_match(subject)))
        }
        NodeKind::Property {
            node: base,
            property,
        } => {
            let base = eval_node(base, env, binding)?;
            value::property_value(&base, property, binding)
        }
        NodeKind::Index { node: base, index } => {
            let base = eval_node(base, env, binding)?;
            let index = eval_node(index, env, binding)?;
            value::index_value(&base, &index, binding)
        }
        NodeKind::Method {
            node: base,
            method,
            arguments,
        } => {
            let receiver = eval_node(base, env, binding)?;
            let args = eval_arguments(arguments, env, binding)?;
            let func = binding.resolve(&receiver, method).ok_or_else(|| {
                RuntimeError::new(format!(
                    "cannot get method {method} from {}",
                    receiver.kind()
                ))
            })?;
            invoke_guarded(binding, &func, &args)
        }
        NodeKind::Builtin { name, arguments } => match name.as_str() {
            "len" => {
                let args = eval_arguments(arguments, env, binding)?;
                match args.as_slice() {
                    [arg] => value::len_value(arg),
                    [] => Err(RuntimeError::new("missing argument: len")),
                    _ => Err(RuntimeError::new("too many arguments: len")),
                }
            }
            other => Err(RuntimeError::new(format!("unknown builtin {other}"))),
        },
        NodeKind::Function { name, arguments } => {
            let args = eval_arguments(arguments, env, binding)?;
            let func = binding
                .resolve(env, name)
                .ok_or_else(|| RuntimeError::new(format!("undefined: {name}")))?;
            invoke_guarded(binding, &func, &args)
        }
        NodeKind::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let cond = eval_node(cond, env, binding)?;
            if value::to_bool(&cond)? {
                eval_node(then, env, binding)
            } else {
                eval_node(otherwise, env, binding)
            }
        }
        NodeKind::Array(nodes) => {
            let mut values = Vec::with_capacity(nodes.len());
            for node in nodes {
                values.push(eval_node(node, env, binding)?);
            }
            Ok(Value::array(values))
        }
        NodeKind::Map(pairs) => {
            // Every pair evaluates before any key converts, as in the
            // compiled form.
            let mut evaluated = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let key = eval_node(key, env, binding)?;
                let value = eval_node(value, env, binding)?;
                evaluated.push((key, value));
            }
            let mut entries = HashMap::with_capacity(evaluated.len());
            for (key, value) in evaluated {
                entries.insert(MapKey::try_from(&key)?, value);
            }
            Ok(Value::Map(entries.into()))
        }
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Node,
    right: &Node,
    env: &Value,
    binding: &dyn HostBinding,
) -> EvalResult {
    let lhs = eval_node(left, env, binding)?;

    // Short-circuit before the right operand is touched.
    match op {
        BinaryOp::Or => {
            if value::to_bool(&lhs)? {
                return Ok(Value::Bool(true));
            }
            let rhs = eval_node(right, env, binding)?;
            return Ok(Value::Bool(value::to_bool(&rhs)?));
        }
        BinaryOp::And => {
            if !value::to_bool(&lhs)? {
                return Ok(Value::Bool(false));
            }
            let rhs = eval_node(right, env, binding)?;
            return Ok(Value::Bool(value::to_bool(&rhs)?));
        }
        _ => {}
    }

    let rhs = eval_node(right, env, binding)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(value::loosely_equals(&lhs, &rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!value::loosely_equals(&lhs, &rhs))),
        BinaryOp::In => value::contains(&lhs, &rhs, binding).map(Value::Bool),
        BinaryOp::NotIn => value::contains(&lhs, &rhs, binding).map(|found| Value::Bool(!found)),
        BinaryOp::Less => value::less(&lhs, &rhs).map(Value::Bool),
        BinaryOp::LessEq => value::less_or_equal(&lhs, &rhs).map(Value::Bool),
        BinaryOp::More => value::more(&lhs, &rhs).map(Value::Bool),
        BinaryOp::MoreEq => value::more_or_equal(&lhs, &rhs).map(Value::Bool),
        BinaryOp::Range => value::make_range(&lhs, &rhs),
        BinaryOp::Add => value::add(&lhs, &rhs),
        BinaryOp::Sub => value::subtract(&lhs, &rhs),
        BinaryOp::Concat => value::concat(&lhs, &rhs),
        BinaryOp::Mul => value::multiply(&lhs, &rhs),
        BinaryOp::Div => value::divide(&lhs, &rhs),
        BinaryOp::Mod => value::modulo(&lhs, &rhs),
        BinaryOp::Exp => value::exponent(&lhs, &rhs),
        BinaryOp::BitOr => value::bit_or(&lhs, &rhs),
        BinaryOp::BitXor => value::bit_xor(&lhs, &rhs),
        BinaryOp::BitAnd => value::bit_and(&lhs, &rhs),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_arguments(
    arguments: &[Node],
    env: &Value,
    binding: &dyn HostBinding,
) -> Result<Vec<Value>, RuntimeError> {
    let mut values = Vec::with_capacity(arguments.len());
    for argument in arguments {
        values.push(eval_node(argument, env, binding)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Bindings;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn eval_source(input: &str, env: &Value) -> EvalResult {
        let node = parse_tokens(tokenize(input).expect("tokenize should succeed"))
            .expect("parse should succeed");
        eval_node(&node, env, &Bindings)
    }

    #[test]
    fn integral_literals_carry_the_integer_tag() {
        assert_eq!(eval_source("2 + 3", &Value::Nil), Ok(Value::Int(5)));
        assert_eq!(eval_source("2.5 + 0.5", &Value::Nil), Ok(Value::Float(3.0)));
    }

    #[test]
    fn short_circuit_never_touches_the_right_operand() {
        assert_eq!(
            eval_source("false and (1 / 0 == 0)", &Value::Nil),
            Ok(Value::Bool(false))
        );
        assert_eq!(
            eval_source("true or (1 / 0 == 0)", &Value::Nil),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn resolves_names_properties_and_indexes() {
        let env = Value::map([(
            "user",
            Value::map([
                ("Group", Value::from("vip")),
                ("Tags", Value::array(vec![Value::from("a"), Value::from("b")])),
            ]),
        )]);
        assert_eq!(eval_source("user.Group", &env), Ok(Value::from("vip")));
        assert_eq!(eval_source("user.Tags[1]", &env), Ok(Value::from("b")));

        let err = eval_source("user.Missing", &env).expect_err("expected runtime failure");
        assert_eq!(err.message, "undefined (type map has no field Missing)");
        let err = eval_source("ghost", &env).expect_err("expected runtime failure");
        assert_eq!(err.message, "undefined: ghost");
    }

    #[test]
    fn evaluates_map_literals_with_computed_keys() {
        let result = eval_source("{a: 1, [\"b\" ~ \"c\"]: 2}", &Value::Nil).expect("eval");
        assert_eq!(
            result,
            Value::map([("a", Value::Int(1)), ("bc", Value::Int(2))])
        );
    }

    #[test]
    fn calls_environment_functions() {
        let env = Value::map([(
            "Greet",
            Value::func(|args| value::concat(&Value::from("hi "), &args[0])),
        )]);
        assert_eq!(
            eval_source("Greet(\"ada\")", &env),
            Ok(Value::from("hi ada"))
        );
        let err = eval_source("Gone()", &env).expect_err("expected runtime failure");
        assert_eq!(err.message, "undefined: Gone");
    }

    #[test]
    fn dynamic_matches_follows_the_pattern_value() {
        let env = Value::map([("pattern", Value::from("^h"))]);
        assert_eq!(
            eval_source("\"hello\" matches pattern", &env),
            Ok(Value::Bool(true))
        );
    }

    #[test]
    fn conditional_evaluates_one_branch() {
        assert_eq!(
            eval_source("1 < 2 ? \"yes\" : 1 / 0", &Value::Nil),
            Ok(Value::from("yes"))
        );
    }
}
