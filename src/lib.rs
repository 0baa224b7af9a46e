//! `ruleval` library crate.
//!
//! High-level layout:
//! - frontend: `lexer` + `parser` produce the AST (`ast`)
//! - static checking: `types` + `checker` validate against a schema
//! - execution: `compiler` + `bytecode` + `vm` run compiled programs,
//!   `eval` is the reference tree-walk interpreter
//! - host boundary: `value` runtime values, `host` capability traits
pub mod ast;
pub mod bytecode;
pub mod checker;
pub mod compiler;
pub mod error;
pub mod eval;
pub mod host;
pub mod lexer;
pub mod parser;
pub mod token;
pub mod types;
pub mod value;
pub mod vm;

pub use ast::Node;
pub use bytecode::Program;
pub use checker::TypeError;
pub use compiler::CompileError;
pub use error::{Error, RuntimeError};
pub use host::{Bindings, HostBinding, HostFn, HostObject};
pub use lexer::LexError;
pub use parser::ParseError;
pub use types::{FuncType, StructType, Type, TypesTable};
pub use value::{loosely_equals, Kind, MapKey, Value};

/// Lexes and parses a source expression.
pub fn parse(source: &str) -> Result<Node, Error> {
    let tokens = lexer::tokenize(source)?;
    Ok(parser::parse_tokens(tokens)?)
}

/// Type-checks an AST against an optional environment schema.
pub fn check(node: &Node, types: Option<&TypesTable>) -> Result<Type, TypeError> {
    checker::check(node, types)
}

/// Lowers an AST to a compiled program.
pub fn compile(node: &Node) -> Result<Program, CompileError> {
    compiler::compile(node)
}

/// Runs a compiled program against an environment.
pub fn run(program: &Program, env: &Value, binding: &dyn HostBinding) -> Result<Value, RuntimeError> {
    vm::run(program, env, binding)
}

/// Evaluates an AST directly with the reference interpreter.
pub fn eval_node(node: &Node, env: &Value, binding: &dyn HostBinding) -> Result<Value, RuntimeError> {
    eval::eval_node(node, env, binding)
}

/// Convenience pipeline: parse, check without a schema, compile, and run
/// with the default bindings.
pub fn eval(source: &str, env: &Value) -> Result<Value, Error> {
    let node = parse(source)?;
    checker::check(&node, None)?;
    let program = compiler::compile(&node)?;
    Ok(vm::run(&program, env, &Bindings)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_evaluates_expressions_end_to_end() {
        let result = eval("1 + 2 * 3", &Value::Nil).expect("eval should succeed");
        assert_eq!(result, Value::Int(7));

        let env = Value::map([("name", Value::from("world"))]);
        let result = eval("\"hello \" ~ name", &env).expect("eval should succeed");
        assert_eq!(result, Value::from("hello world"));
    }

    #[test]
    fn pipeline_surfaces_stage_errors() {
        assert!(matches!(eval("1 $ 2", &Value::Nil), Err(Error::Lex(_))));
        assert!(matches!(eval("1 +", &Value::Nil), Err(Error::Parse(_))));
        assert!(matches!(
            eval("missing.Field", &Value::map([("a", Value::Int(1))])),
            Err(Error::Runtime(_))
        ));
    }
}
