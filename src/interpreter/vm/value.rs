use crate::interpreter::errors::RuntimeError;
use crate::interpreter::program::FunctionId;
use std::cmp::Ordering;
use std::fmt;

/// Runtime value stored in a memory slot.
///
/// Values are owned: copying a compound copies its elements.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Compound(Vec<Value>),
    Function(FunctionId),
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

/// Both operands of a numeric operation, after int-to-float promotion.
enum Numbers {
    Ints(i64, i64),
    Floats(f64, f64),
}

fn numbers(instr: &'static str, a: &Value, b: &Value) -> Result<Numbers, RuntimeError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Numbers::Ints(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Ok(Numbers::Floats(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Ok(Numbers::Floats(*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Numbers::Floats(*x, *y)),
        (Value::Int(_) | Value::Float(_), other) | (other, _) => Err(RuntimeError::TypeMismatch {
            instruction: instr,
            expected: "a number",
            actual: other.type_name(),
        }),
    }
}

impl Value {
    /// Type tag as reported by `typ`.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Compound(_) => "compound",
            Value::Function(_) => "function",
        }
    }

    /// Returns the integer payload.
    ///
    /// Returns [`RuntimeError::TypeMismatch`] for any other type.
    pub fn as_int(&self, instr: &'static str) -> Result<i64, RuntimeError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(RuntimeError::TypeMismatch {
                instruction: instr,
                expected: "int",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_str(&self, instr: &'static str) -> Result<&str, RuntimeError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::TypeMismatch {
                instruction: instr,
                expected: "str",
                actual: other.type_name(),
            }),
        }
    }

    /// Numeric ordering for numbers, lexicographic for strings and compounds.
    /// Functions order by declaration, so distinct functions are never equal.
    /// `None` if the two values cannot be compared.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Compound(a), Value::Compound(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.compare(y)? {
                        Ordering::Equal => continue,
                        order => return Some(order),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            (Value::Function(a), Value::Function(b)) => Some(a.cmp(b)),
            (a, b) => match numbers("cmp", a, b).ok()? {
                Numbers::Ints(x, y) => Some(x.cmp(&y)),
                Numbers::Floats(x, y) => x.partial_cmp(&y),
            },
        }
    }

    pub fn add(&self, instr: &'static str, rhs: &Value) -> Result<Value, RuntimeError> {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            (Value::Compound(a), Value::Compound(b)) => {
                Ok(Value::Compound(a.iter().chain(b).cloned().collect()))
            }
            _ => Ok(match numbers(instr, self, rhs)? {
                Numbers::Ints(a, b) => Value::Int(a.wrapping_add(b)),
                Numbers::Floats(a, b) => Value::Float(a + b),
            }),
        }
    }

    pub fn sub(&self, instr: &'static str, rhs: &Value) -> Result<Value, RuntimeError> {
        Ok(match numbers(instr, self, rhs)? {
            Numbers::Ints(a, b) => Value::Int(a.wrapping_sub(b)),
            Numbers::Floats(a, b) => Value::Float(a - b),
        })
    }

    pub fn mul(&self, instr: &'static str, rhs: &Value) -> Result<Value, RuntimeError> {
        Ok(match numbers(instr, self, rhs)? {
            Numbers::Ints(a, b) => Value::Int(a.wrapping_mul(b)),
            Numbers::Floats(a, b) => Value::Float(a * b),
        })
    }

    pub fn div(&self, instr: &'static str, rhs: &Value) -> Result<Value, RuntimeError> {
        match numbers(instr, self, rhs)? {
            Numbers::Ints(_, 0) => Err(RuntimeError::DivisionByZero),
            Numbers::Ints(a, b) => Ok(Value::Int(a.wrapping_div(b))),
            Numbers::Floats(_, b) if b == 0.0 => Err(RuntimeError::DivisionByZero),
            Numbers::Floats(a, b) => Ok(Value::Float(a / b)),
        }
    }

    pub fn rem(&self, instr: &'static str, rhs: &Value) -> Result<Value, RuntimeError> {
        match numbers(instr, self, rhs)? {
            Numbers::Ints(_, 0) => Err(RuntimeError::DivisionByZero),
            Numbers::Ints(a, b) => Ok(Value::Int(a.wrapping_rem(b))),
            Numbers::Floats(_, b) if b == 0.0 => Err(RuntimeError::DivisionByZero),
            Numbers::Floats(a, b) => Ok(Value::Float(a % b)),
        }
    }

    /// Formats a value nested in a compound: strings are quoted.
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            other => write!(f, "{other}"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Str(s) => f.write_str(s),
            Value::Compound(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    item.fmt_nested(f)?;
                }
                f.write_str("}")
            }
            Value::Function(id) => write!(f, "<function {id}>"),
        }
    }
}
