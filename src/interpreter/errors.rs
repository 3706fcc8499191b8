//! Load-time and run-time error types.
//!
//! Two disjoint taxonomies:
//! - [`InterpreterError`]: lexical, syntactic and loader failures. Always fatal
//!   to the whole program load; carries the chain of `file: line` locations from
//!   the innermost error site out to the entry file.
//! - [`RuntimeError`]: raised while executing. Some are recoverable through the
//!   error flag (`jer`/`jnr`), the rest end the run as a [`Fault`].

use slang_derive::Error;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// A `file: line` position in source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub file: Rc<Path>,
    pub line: usize,
}

impl Location {
    pub fn new(file: Rc<Path>, line: usize) -> Self {
        Self { file, line }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.file.display(), self.line)
    }
}

/// Errors produced while splitting source text into tokens.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("Unclosed string")]
    UnclosedString { line: usize },
    #[error("Unclosed variable expression")]
    UnclosedExpression { line: usize },
    #[error("Unclosed variadic")]
    UnclosedVariadic { line: usize },
    #[error("Unclosed structure scope")]
    UnclosedScope { line: usize },
    #[error("Comments are not permitted in variable expressions")]
    CommentInExpression { line: usize },
    #[error("Variadics are not permitted in variable expressions")]
    VariadicInExpression { line: usize },
    #[error("Structure scopes are not permitted in variable expressions")]
    ScopeInExpression { line: usize },
    #[error("Variadics cannot be nested")]
    NestedVariadic { line: usize },
    #[error("Comments are not permitted in variadics")]
    CommentInVariadic { line: usize },
    #[error("Structure scopes are not permitted in variadics")]
    ScopeInVariadic { line: usize },
}

impl LexError {
    /// Line the error is reported at. Unclosed constructs report the line they were opened on.
    pub fn line(&self) -> usize {
        match self {
            LexError::UnclosedString { line }
            | LexError::UnclosedExpression { line }
            | LexError::UnclosedVariadic { line }
            | LexError::UnclosedScope { line }
            | LexError::CommentInExpression { line }
            | LexError::VariadicInExpression { line }
            | LexError::ScopeInExpression { line }
            | LexError::NestedVariadic { line }
            | LexError::CommentInVariadic { line }
            | LexError::ScopeInVariadic { line } => *line,
        }
    }
}

/// What went wrong while loading or assembling a program.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InterpreterErrorKind {
    #[error("{0}")]
    Lex(#[from] LexError),
    #[error("Unknown instruction '{name}'")]
    UnknownInstruction { name: String },
    #[error("Instruction '{mnemonic}' takes {expected} operand(s) but {supplied} were supplied")]
    ArityMismatch {
        mnemonic: String,
        expected: String,
        supplied: usize,
    },
    #[error("Operand {position} of '{mnemonic}' must be {expected}, got {actual} '{token}'")]
    OperandKind {
        mnemonic: &'static str,
        position: usize,
        expected: &'static str,
        actual: &'static str,
        token: String,
    },
    #[error("Expected an instruction, label or import, got '{token}'")]
    ExpectedStatement { token: String },
    #[error("Invalid literal '{token}'")]
    InvalidLiteral { token: String },
    #[error("Invalid variable expression '{text}': {reason}")]
    InvalidExpression { text: String, reason: &'static str },
    #[error("Invalid parameter list '{text}': {reason}")]
    InvalidParameters { text: String, reason: &'static str },
    #[error("Function declarations need a plain variable name, got '{text}'")]
    InvalidFunctionSlot { text: String },
    #[error("'{directive}' expects a quoted file path")]
    ExpectedPath { directive: String },
    #[error("Unresolved symbol '{name}'")]
    UnresolvedSymbol { name: String },
    #[error("Label '{name}' is an instruction name")]
    ReservedLabel { name: String },
    #[error("Duplicate label '{name}'")]
    DuplicateLabel { name: String },
    #[error("Duplicate function '{name}'")]
    DuplicateFunction { name: String },
    #[error("Too many global variables (limit {limit})")]
    GlobalsExhausted { limit: usize },
    #[error("Could not open file '{path}': {reason}")]
    FileOpen { path: String, reason: String },
    #[error("Recursive import of file '{path}'")]
    RecursiveImport { path: String },
}

/// A load/assembly failure with its location chain, innermost first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterpreterError {
    pub kind: InterpreterErrorKind,
    pub trace: Vec<Location>,
}

impl InterpreterError {
    /// Creates an error with no location (e.g. the entry file could not be opened).
    pub fn new(kind: InterpreterErrorKind) -> Self {
        Self {
            kind,
            trace: Vec::new(),
        }
    }

    /// Creates an error raised at `location`.
    pub fn at(kind: InterpreterErrorKind, location: Location) -> Self {
        Self {
            kind,
            trace: vec![location],
        }
    }

    /// Appends the locations of the enclosing import sites.
    pub fn within(mut self, outer: &[Location]) -> Self {
        self.trace.extend(outer.iter().cloned());
        self
    }
}

impl fmt::Display for InterpreterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterpreterError: {}", self.kind)?;
        for location in &self.trace {
            write!(f, "\n\t{location}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InterpreterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Errors raised during execution.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Invalid memory access at address {address}")]
    InvalidMemoryAccess { address: i64 },
    #[error("Out of memory: cannot allocate {requested} slot(s) within the {limit} slot heap limit")]
    OutOfMemory { requested: usize, limit: usize },
    #[error("Stack overflow: call depth limit of {depth} frames reached")]
    FrameOverflow { depth: usize },
    #[error("Stack overflow: data stack is full")]
    StackOverflow,
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("'{instruction}' expected {expected}, got {actual}")]
    TypeMismatch {
        instruction: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Cannot compare {left} with {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },
    #[error("Invalid shift amount {amount}")]
    InvalidShift { amount: i64 },
    #[error("Index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("Invalid allocation size {size}")]
    InvalidAllocationSize { size: i64 },
    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },
    #[error("Error raised by err")]
    Raised,
    #[error("Invalid jump target {target}")]
    InvalidJumpTarget { target: i64 },
    #[error("Return without call")]
    ReturnWithoutCall,
    #[error("No value has been returned")]
    NoReturnValue,
    #[error("Function takes {expected} argument(s) but {actual} were passed")]
    CallArity { expected: usize, actual: usize },
    #[error("Cannot call a value of type {actual}")]
    NotCallable { actual: &'static str },
    #[error("Corrupted call frame at address {address}")]
    CorruptFrame { address: usize },
    #[error("Malformed operands for '{instruction}'")]
    MalformedInstruction { instruction: &'static str },
    #[error("Output failed: {reason}")]
    Output { reason: String },
    #[error("Unchecked error: {0}")]
    Unchecked(Box<RuntimeError>),
}

impl RuntimeError {
    /// Recoverable errors set the error flag instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RuntimeError::DivisionByZero
                | RuntimeError::TypeMismatch { .. }
                | RuntimeError::Incomparable { .. }
                | RuntimeError::InvalidShift { .. }
                | RuntimeError::IndexOutOfRange { .. }
                | RuntimeError::InvalidAllocationSize { .. }
                | RuntimeError::UnknownVariable { .. }
                | RuntimeError::Raised
        )
    }
}

/// An unrecoverable runtime error, with the program counter it happened at.
#[derive(Clone, Debug, PartialEq)]
pub struct Fault {
    pub error: RuntimeError,
    pub pc: usize,
    pub location: Option<Location>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeError: {}\n\tat instruction {}", self.error, self.pc)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(file: &str, line: usize) -> Location {
        Location::new(Rc::from(Path::new(file)), line)
    }

    #[test]
    fn interpreter_error_renders_innermost_first() {
        let err = InterpreterError::at(
            InterpreterErrorKind::RecursiveImport {
                path: "a.sl".to_string(),
            },
            loc("b.sl", 2),
        )
        .within(&[loc("a.sl", 7)]);
        assert_eq!(
            err.to_string(),
            "InterpreterError: Recursive import of file 'a.sl'\n\tb.sl: 2\n\ta.sl: 7"
        );
    }

    #[test]
    fn lex_error_converts_into_kind() {
        let kind: InterpreterErrorKind = LexError::UnclosedString { line: 3 }.into();
        assert_eq!(kind.to_string(), "Unclosed string");
        assert!(std::error::Error::source(&kind).is_some());
    }

    #[test]
    fn recoverable_classification() {
        assert!(RuntimeError::DivisionByZero.is_recoverable());
        assert!(RuntimeError::Raised.is_recoverable());
        assert!(!RuntimeError::InvalidMemoryAccess { address: 0 }.is_recoverable());
        assert!(!RuntimeError::FrameOverflow { depth: 1 }.is_recoverable());
        assert!(!RuntimeError::StackUnderflow.is_recoverable());
    }

    #[test]
    fn fault_renders_pc_and_location() {
        let fault = Fault {
            error: RuntimeError::StackUnderflow,
            pc: 4,
            location: Some(loc("main.sl", 9)),
        };
        assert_eq!(
            fault.to_string(),
            "RuntimeError: Stack underflow\n\tat instruction 4 (main.sl: 9)"
        );
    }
}
