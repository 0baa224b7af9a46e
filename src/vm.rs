use std::collections::HashMap;

use regex::Regex;

use crate::bytecode::{Constant, Op, Program};
use crate::error::RuntimeError;
use crate::host::{invoke_guarded, HostBinding};
use crate::value::{self, MapKey, Value};

pub type RunResult = Result<Value, RuntimeError>;

/// Evaluates a compiled program against an environment. The program is
/// read-only; the stack and the dynamic-pattern cache live for one run.
pub fn run(program: &Program, env: &Value, binding: &dyn HostBinding) -> RunResult {
    Machine {
        program,
        env,
        binding,
        stack: Vec::new(),
        ip: 0,
        patterns: HashMap::new(),
    }
    .run()
}

struct Machine<'a> {
    program: &'a Program,
    env: &'a Value,
    binding: &'a dyn HostBinding,
    stack: Vec<Value>,
    ip: usize,
    patterns: HashMap<String, Regex>,
}

impl<'a> Machine<'a> {
    fn run(mut self) -> RunResult {
        let program = self.program;

        while self.ip < program.bytecode.len() {
            let byte = program.bytecode[self.ip];
            self.ip += 1;
            let op = Op::from_byte(byte)
                .ok_or_else(|| RuntimeError::new(format!("invalid opcode {byte:#04x}")))?;

            match op {
                Op::Push => {
                    let value = self.operand()?;
                    self.stack.push(Value::Int(i64::from(value)));
                }
                Op::Pop => {
                    self.pop()?;
                }
                Op::Const => {
                    let idx = self.operand()?;
                    let value = match self.constant(idx)? {
                        Constant::Int(i) => Value::Int(*i),
                        Constant::Float(v) => Value::Float(*v),
                        Constant::Text(s) => Value::Text(s.clone()),
                        other => {
                            return Err(RuntimeError::new(format!(
                                "constant {other} is not a value"
                            )));
                        }
                    };
                    self.stack.push(value);
                }
                Op::Fetch => {
                    let idx = self.operand()?;
                    let name = self.text_constant(idx)?;
                    let value = value::fetch_name(self.env, name, self.binding)?;
                    self.stack.push(value);
                }
                Op::True => self.stack.push(Value::Bool(true)),
                Op::False => self.stack.push(Value::Bool(false)),
                Op::Nil => self.stack.push(Value::Nil),
                Op::Negate => {
                    let v = self.pop()?;
                    self.stack.push(value::negate(&v)?);
                }
                Op::Not => {
                    let v = self.pop()?;
                    self.stack.push(Value::Bool(!value::to_bool(&v)?));
                }
                Op::Equal => self.binary(|a, b| Ok(Value::Bool(value::loosely_equals(a, b))))?,
                Op::NotEqual => {
                    self.binary(|a, b| Ok(Value::Bool(!value::loosely_equals(a, b))))?
                }
                Op::Less => self.binary(|a, b| value::less(a, b).map(Value::Bool))?,
                Op::More => self.binary(|a, b| value::more(a, b).map(Value::Bool))?,
                Op::LessEq => self.binary(|a, b| value::less_or_equal(a, b).map(Value::Bool))?,
                Op::MoreEq => self.binary(|a, b| value::more_or_equal(a, b).map(Value::Bool))?,
                Op::Add => self.binary(value::add)?,
                Op::Sub => self.binary(value::subtract)?,
                Op::Mul => self.binary(value::multiply)?,
                Op::Div => self.binary(value::divide)?,
                Op::Mod => self.binary(value::modulo)?,
                Op::Exp => self.binary(value::exponent)?,
                Op::Concat => self.binary(value::concat)?,
                Op::BitOr => self.binary(value::bit_or)?,
                Op::BitXor => self.binary(value::bit_xor)?,
                Op::BitAnd => self.binary(value::bit_and)?,
                Op::Range => self.binary(value::make_range)?,
                Op::Matches => {
                    let pattern = self.pop()?;
                    let subject = self.pop()?;
                    let matched =
                        self.match_dynamic(value::to_text(&subject)?, value::to_text(&pattern)?)?;
                    self.stack.push(Value::Bool(matched));
                }
                Op::MatchesConst => {
                    let idx = self.operand()?;
                    let pattern = match self.constant(idx)? {
                        Constant::Pattern(pattern) => pattern,
                        other => {
                            return Err(RuntimeError::new(format!(
                                "constant {other} is not a pattern"
                            )));
                        }
                    };
                    let subject = self.pop()?;
                    let matched = pattern.is_match(value::to_text(&subject)?);
                    self.stack.push(Value::Bool(matched));
                }
                Op::In => {
                    let container = self.pop()?;
                    let needle = self.pop()?;
                    let found = value::contains(&needle, &container, self.binding)?;
                    self.stack.push(Value::Bool(found));
                }
                Op::NotIn => {
                    let container = self.pop()?;
                    let needle = self.pop()?;
                    let found = value::contains(&needle, &container, self.binding)?;
                    self.stack.push(Value::Bool(!found));
                }
                Op::Index => {
                    let index = self.pop()?;
                    let base = self.pop()?;
                    let value = value::index_value(&base, &index, self.binding)?;
                    self.stack.push(value);
                }
                Op::Property => {
                    let idx = self.operand()?;
                    let name = self.text_constant(idx)?;
                    let base = self.pop()?;
                    let value = value::property_value(&base, name, self.binding)?;
                    self.stack.push(value);
                }
                Op::Jump => {
                    let delta = self.operand()? as i16;
                    self.jump(delta)?;
                }
                // The conditional jumps inspect but do not pop, so the
                // remaining value becomes the expression result on the
                // short-circuit path.
                Op::JumpIfTrue => {
                    let delta = self.operand()? as i16;
                    if value::to_bool(self.top()?)? {
                        self.jump(delta)?;
                    }
                }
                Op::JumpIfFalse => {
                    let delta = self.operand()? as i16;
                    if !value::to_bool(self.top()?)? {
                        self.jump(delta)?;
                    }
                }
                Op::Call => {
                    let idx = self.operand()?;
                    let (name, argc) = self.call_constant(idx)?;
                    let args = self.pop_many(argc)?;
                    let result = if name == "len" {
                        match args.as_slice() {
                            [arg] => value::len_value(arg)?,
                            [] => return Err(RuntimeError::new("missing argument: len")),
                            _ => return Err(RuntimeError::new("too many arguments: len")),
                        }
                    } else {
                        let func = self
                            .binding
                            .resolve(self.env, &name)
                            .ok_or_else(|| RuntimeError::new(format!("undefined: {name}")))?;
                        invoke_guarded(self.binding, &func, &args)?
                    };
                    self.stack.push(result);
                }
                Op::Method => {
                    let idx = self.operand()?;
                    let (name, argc) = self.call_constant(idx)?;
                    let args = self.pop_many(argc)?;
                    let receiver = self.pop()?;
                    let func = self.binding.resolve(&receiver, &name).ok_or_else(|| {
                        RuntimeError::new(format!(
                            "cannot get method {name} from {}",
                            receiver.kind()
                        ))
                    })?;
                    let result = invoke_guarded(self.binding, &func, &args)?;
                    self.stack.push(result);
                }
                Op::Array => {
                    let count = self.operand()? as usize;
                    let values = self.pop_many(count)?;
                    self.stack.push(Value::array(values));
                }
                Op::Map => {
                    let count = self.operand()? as usize;
                    let mut flat = self.pop_many(count * 2)?.into_iter();
                    let mut entries = HashMap::with_capacity(count);
                    while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                        entries.insert(MapKey::try_from(&key)?, value);
                    }
                    self.stack.push(Value::Map(entries.into()));
                }
            }
        }

        Ok(self.stack.pop().unwrap_or(Value::Nil))
    }

    fn operand(&mut self) -> Result<u16, RuntimeError> {
        let bytes = self
            .program
            .bytecode
            .get(self.ip..self.ip + 2)
            .ok_or_else(|| RuntimeError::new("truncated bytecode"))?;
        self.ip += 2;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn jump(&mut self, delta: i16) -> Result<(), RuntimeError> {
        let target = self.ip as isize + delta as isize;
        if target < 0 || target as usize > self.program.bytecode.len() {
            return Err(RuntimeError::new("jump out of bounds"));
        }
        self.ip = target as usize;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new("stack underflow"))
    }

    fn top(&self) -> Result<&Value, RuntimeError> {
        self.stack
            .last()
            .ok_or_else(|| RuntimeError::new("stack underflow"))
    }

    /// Pops `count` values, preserving push order.
    fn pop_many(&mut self, count: usize) -> Result<Vec<Value>, RuntimeError> {
        let start = self
            .stack
            .len()
            .checked_sub(count)
            .ok_or_else(|| RuntimeError::new("stack underflow"))?;
        Ok(self.stack.split_off(start))
    }

    fn binary(
        &mut self,
        f: impl Fn(&Value, &Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        self.stack.push(f(&left, &right)?);
        Ok(())
    }

    fn constant(&self, idx: u16) -> Result<&'a Constant, RuntimeError> {
        self.program
            .constants
            .get(idx as usize)
            .ok_or_else(|| RuntimeError::new(format!("invalid constant index {idx}")))
    }

    fn text_constant(&self, idx: u16) -> Result<&'a str, RuntimeError> {
        match self.constant(idx)? {
            Constant::Text(s) => Ok(s),
            other => Err(RuntimeError::new(format!(
                "constant {other} is not a text"
            ))),
        }
    }

    fn call_constant(&self, idx: u16) -> Result<(String, usize), RuntimeError> {
        match self.constant(idx)? {
            Constant::Call { name, argc } => Ok((name.clone(), *argc)),
            other => Err(RuntimeError::new(format!(
                "constant {other} is not a call"
            ))),
        }
    }

    fn match_dynamic(&mut self, subject: &str, pattern: &str) -> Result<bool, RuntimeError> {
        if !self.patterns.contains_key(pattern) {
            let compiled = Regex::new(pattern).map_err(|err| {
                RuntimeError::new(format!("invalid regular expression '{pattern}': {err}"))
            })?;
            self.patterns.insert(pattern.to_string(), compiled);
        }
        Ok(self.patterns[pattern].is_match(subject))
    }
}
