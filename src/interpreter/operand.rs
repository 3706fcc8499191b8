//! Resolved operand model.
//!
//! Every operand the engine sees belongs to exactly one addressing mode:
//!
//! | Mode   | Meaning                              | Written as                                   |
//! |--------|--------------------------------------|----------------------------------------------|
//! | `val`  | immediate literal                    | `"s"`, `42`, `0x2a`, `1.5`, `{1 2}`          |
//! | `rval` | readable value                       | any `val`, `[expr]`, `(a b)`, `@fn`, `label` |
//! | `lval` | writable memory location             | `[expr]`                                     |
//! | `rvar` | readable binding                     | `[expr]`, `@fn`, `label`                     |
//! | `lvar` | writable binding                     | `[expr]`, or a parameter list for `fun`      |
//!
//! Names inside variable expressions are already resolved here: a global becomes
//! its absolute address, a function local its offset from the frame pointer.

use crate::interpreter::program::FunctionId;
use crate::interpreter::vm::Value;

/// Addressing mode of an operand position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Val,
    RVal,
    LVal,
    RVar,
    LVar,
}

impl Mode {
    /// Human-readable description for diagnostics.
    pub const fn describe(&self) -> &'static str {
        match self {
            Mode::Val => "a literal",
            Mode::RVal => "a readable value",
            Mode::LVal => "a variable expression",
            Mode::RVar => "a variable, function or label",
            Mode::LVar => "a variable expression or parameter list",
        }
    }
}

/// Address computation of a variable expression.
#[derive(Clone, Debug, PartialEq)]
pub enum AddrExpr {
    /// Integer literal.
    Const(i64),
    /// Absolute address of a global variable.
    Global(usize),
    /// Offset of a local variable from the frame pointer.
    Local(usize),
    /// Reads the integer stored at the inner address.
    Load(Box<AddrExpr>),
    Add(Box<AddrExpr>, Box<AddrExpr>),
    Sub(Box<AddrExpr>, Box<AddrExpr>),
}

/// Where a readable value comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    Literal(Value),
    Place(AddrExpr),
    /// Evaluates each element and packs them into a compound.
    Variadic(Vec<Source>),
    Function(FunctionId),
    /// Instruction index of a label.
    Label(usize),
}

/// A readable binding (`rvar`).
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Place(AddrExpr),
    Function(FunctionId),
    Label(usize),
}

/// A writable binding (`lvar`).
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Place(AddrExpr),
    /// Parameter list of the declared function.
    Params(FunctionId),
}

/// A fully resolved operand.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Val(Value),
    RVal(Source),
    LVal(AddrExpr),
    RVar(Binding),
    LVar(Target),
}

