//! Assembler for slang source.
//!
//! Assembly happens in two passes:
//!
//! 1. [`parse`] classifies the tokens of one file and groups them into
//!    [`Statement`]s: label definitions, instructions with operands checked
//!    against their addressing modes, and import directives. A statement's
//!    operands are the tokens that start on the line where the previous token
//!    of the statement ended.
//! 2. [`Assembler`] collects the statements of every loaded file, then
//!    [`Assembler::finish`] assigns global addresses, builds function frames and
//!    resolves every name, label and function reference.
//!
//! # Scoping
//!
//! Labels are visible only inside the file that defines them. Functions and
//! global variables are program-wide. A name used in top-level code (or as a
//! function name) is a global; any other name used inside a function body is a
//! local of that function. Parameters are always locals.

use crate::config::Limits;
use crate::interpreter::errors::{InterpreterError, InterpreterErrorKind, Location};
use crate::interpreter::isa::{self, Opcode};
use crate::interpreter::operand::{AddrExpr, Binding, Mode, Operand, Source, Target};
use crate::interpreter::program::{
    Function, FunctionId, Instruction, Label, Origin, Program, Unit,
};
use crate::interpreter::tokenizer::{Token, Tokenizer};
use crate::interpreter::vm::Value;
use crate::interpreter::vm::memory::Layout;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::iter::Peekable;
use std::path::Path;
use std::rc::Rc;
use std::str::Chars;

// ----------------------------------------------------------------------------
// Token classification
// ----------------------------------------------------------------------------

/// Syntactic category of a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    StringLiteral,
    IntegerLiteral,
    FloatLiteral,
    /// `@name`
    FunctionName,
    Mnemonic,
    /// Bare identifier, a label reference.
    Label,
    /// `name:`
    LabelDefinition,
    /// `[...]`
    Expression,
    /// `(...)`
    Variadic,
    /// `{...}`
    Scope,
    /// `#import` or `#import_once`
    Directive,
    Invalid,
}

impl TokenKind {
    pub const fn describe(&self) -> &'static str {
        match self {
            TokenKind::StringLiteral => "string",
            TokenKind::IntegerLiteral => "integer",
            TokenKind::FloatLiteral => "float",
            TokenKind::FunctionName => "function name",
            TokenKind::Mnemonic => "instruction",
            TokenKind::Label => "label",
            TokenKind::LabelDefinition => "label definition",
            TokenKind::Expression => "variable expression",
            TokenKind::Variadic => "variadic",
            TokenKind::Scope => "compound literal",
            TokenKind::Directive => "directive",
            TokenKind::Invalid => "invalid token",
        }
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Parses a decimal or `0x` hexadecimal integer, optionally negative.
pub fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) if !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()) => {
            i64::from_str_radix(hex, 16).ok()?
        }
        Some(_) => return None,
        None if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<i64>().ok()?
        }
        None => return None,
    };
    Some(if negative { value.wrapping_neg() } else { value })
}

fn parse_float(text: &str) -> Option<f64> {
    let starts_numeric = text
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    let numeric_only = text
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+'));
    if !starts_numeric || !numeric_only || !text.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Classifies a raw token.
pub fn classify(text: &str) -> TokenKind {
    let Some(first) = text.chars().next() else {
        return TokenKind::Invalid;
    };
    match first {
        '"' if text.len() >= 2 && text.ends_with('"') => TokenKind::StringLiteral,
        '[' if text.ends_with(']') => TokenKind::Expression,
        '(' if text.ends_with(')') => TokenKind::Variadic,
        '{' if text.ends_with('}') => TokenKind::Scope,
        '#' if text == "#import" || text == "#import_once" => TokenKind::Directive,
        '@' if is_identifier(&text[1..]) => TokenKind::FunctionName,
        _ if isa::is_mnemonic(text) => TokenKind::Mnemonic,
        _ if is_identifier(text) => TokenKind::Label,
        _ if text.strip_suffix(':').is_some_and(is_identifier) => TokenKind::LabelDefinition,
        _ if parse_int(text).is_some() => TokenKind::IntegerLiteral,
        _ if parse_float(text).is_some() => TokenKind::FloatLiteral,
        _ => TokenKind::Invalid,
    }
}

/// Text between the first and last character of a delimited token.
fn inner(text: &str) -> &str {
    let mut chars = text.chars();
    chars.next();
    chars.next_back();
    chars.as_str()
}

// ----------------------------------------------------------------------------
// Unresolved operands
// ----------------------------------------------------------------------------

/// Variable expression with names not yet bound to addresses.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const(i64),
    Name(String),
    Load(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Name(name) => f.write_str(name),
            Expr::Load(inner) => write!(f, "[{inner}]"),
            Expr::Add(a, b) => write!(f, "{a} + {b}"),
            Expr::Sub(a, b) => write!(f, "{a} - {b}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawSource {
    Literal(Value),
    Place(Expr),
    Variadic(Vec<RawSource>),
    Function(String),
    Label(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawBinding {
    Place(Expr),
    Function(String),
    Label(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RawTarget {
    Place(Expr),
    Params(Vec<String>),
}

/// Operand as parsed, before name resolution.
#[derive(Clone, Debug, PartialEq)]
pub enum RawOperand {
    Val(Value),
    RVal(RawSource),
    LVal(Expr),
    RVar(RawBinding),
    LVar(RawTarget),
}

/// One parsed statement of a source file.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Label {
        name: String,
        line: usize,
    },
    Instruction {
        opcode: Opcode,
        operands: Vec<RawOperand>,
        line: usize,
    },
    Import {
        path: String,
        guarded: bool,
        line: usize,
    },
}

// ----------------------------------------------------------------------------
// Variable expressions
// ----------------------------------------------------------------------------

/// Recursive-descent parser for `[expr]`.
///
/// ```text
/// expr := term (('+' | '-') term)*
/// term := integer | name | '[' expr ']'
/// ```
struct ExprParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> ExprParser<'a> {
    fn parse(text: &'a str) -> Result<Expr, &'static str> {
        let mut parser = Self {
            chars: inner(text).chars().peekable(),
        };
        let expr = parser.expr()?;
        parser.skip_whitespace();
        match parser.chars.peek() {
            None => Ok(expr),
            Some(']') => Err("unbalanced brackets"),
            Some(_) => Err("expected '+' or '-' between terms"),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn expr(&mut self) -> Result<Expr, &'static str> {
        let mut lhs = self.term()?;
        loop {
            self.skip_whitespace();
            lhs = match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    Expr::Add(Box::new(lhs), Box::new(self.term()?))
                }
                Some('-') => {
                    self.chars.next();
                    Expr::Sub(Box::new(lhs), Box::new(self.term()?))
                }
                _ => return Ok(lhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, &'static str> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some('[') => {
                self.chars.next();
                let inner = self.expr()?;
                self.skip_whitespace();
                if self.chars.next() != Some(']') {
                    return Err("unbalanced brackets");
                }
                Ok(Expr::Load(Box::new(inner)))
            }
            Some(c) if c.is_ascii_digit() => {
                parse_int(&self.word()).map(Expr::Const).ok_or("invalid number")
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => Ok(Expr::Name(self.word())),
            Some(_) => Err("expected a number, a name or a nested expression"),
            None => Err("missing operand"),
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self
            .chars
            .next_if(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        {
            word.push(c);
        }
        word
    }
}

// ----------------------------------------------------------------------------
// Statement parsing
// ----------------------------------------------------------------------------

/// Operand position being parsed, for diagnostics.
struct Site {
    mnemonic: &'static str,
    position: usize,
    mode: Mode,
}

impl Site {
    fn mismatch(&self, expected: &'static str, token: &Token) -> InterpreterErrorKind {
        InterpreterErrorKind::OperandKind {
            mnemonic: self.mnemonic,
            position: self.position,
            expected,
            actual: classify(&token.text).describe(),
            token: token.text.clone(),
        }
    }
}

/// Tokenizes the inside of a variadic or scope.
fn inner_tokens(token: &Token) -> Result<Vec<Token>, InterpreterErrorKind> {
    Ok(Tokenizer::new(inner(&token.text).chars(), token.line).collect::<Result<Vec<_>, _>>()?)
}

fn literal(site: &Site, token: &Token) -> Result<Option<Value>, InterpreterErrorKind> {
    let text = &token.text;
    let invalid = || InterpreterErrorKind::InvalidLiteral {
        token: text.clone(),
    };
    Ok(match classify(text) {
        TokenKind::StringLiteral => Some(Value::Str(inner(text).to_string())),
        TokenKind::IntegerLiteral => Some(Value::Int(parse_int(text).ok_or_else(invalid)?)),
        TokenKind::FloatLiteral => Some(Value::Float(parse_float(text).ok_or_else(invalid)?)),
        TokenKind::Scope => {
            let mut items = Vec::new();
            for element in inner_tokens(token)? {
                items.push(literal(site, &element)?.ok_or_else(|| site.mismatch("a literal", &element))?);
            }
            Some(Value::Compound(items))
        }
        _ => None,
    })
}

fn expression(token: &Token) -> Result<Expr, InterpreterErrorKind> {
    ExprParser::parse(&token.text).map_err(|reason| InterpreterErrorKind::InvalidExpression {
        text: token.text.clone(),
        reason,
    })
}

fn source(site: &Site, token: &Token) -> Result<Option<RawSource>, InterpreterErrorKind> {
    if let Some(value) = literal(site, token)? {
        return Ok(Some(RawSource::Literal(value)));
    }
    let text = &token.text;
    Ok(match classify(text) {
        TokenKind::Expression => Some(RawSource::Place(expression(token)?)),
        TokenKind::Variadic => {
            let mut items = Vec::new();
            for element in inner_tokens(token)? {
                items.push(
                    source(site, &element)?
                        .ok_or_else(|| site.mismatch(Mode::RVal.describe(), &element))?,
                );
            }
            Some(RawSource::Variadic(items))
        }
        TokenKind::FunctionName => Some(RawSource::Function(text[1..].to_string())),
        TokenKind::Label => Some(RawSource::Label(text.clone())),
        _ => None,
    })
}

fn params(token: &Token) -> Result<Vec<String>, InterpreterErrorKind> {
    let invalid = |reason| InterpreterErrorKind::InvalidParameters {
        text: token.text.clone(),
        reason,
    };
    let mut names = Vec::new();
    for element in inner_tokens(token)? {
        if classify(&element.text) != TokenKind::Label {
            return Err(invalid("parameters must be plain names"));
        }
        if names.contains(&element.text) {
            return Err(invalid("duplicate parameter name"));
        }
        names.push(element.text);
    }
    Ok(names)
}

fn operand(site: &Site, opcode: Opcode, token: &Token) -> Result<RawOperand, InterpreterErrorKind> {
    let text = &token.text;
    let kind = classify(text);
    let mismatch = || site.mismatch(site.mode.describe(), token);

    match site.mode {
        Mode::Val => literal(site, token)?.map(RawOperand::Val).ok_or_else(mismatch),
        Mode::RVal => source(site, token)?.map(RawOperand::RVal).ok_or_else(mismatch),
        Mode::LVal => match kind {
            TokenKind::Expression => Ok(RawOperand::LVal(expression(token)?)),
            _ => Err(mismatch()),
        },
        Mode::RVar => match kind {
            TokenKind::Expression => Ok(RawOperand::RVar(RawBinding::Place(expression(token)?))),
            TokenKind::FunctionName => Ok(RawOperand::RVar(RawBinding::Function(text[1..].to_string()))),
            TokenKind::Label => Ok(RawOperand::RVar(RawBinding::Label(text.clone()))),
            _ => Err(mismatch()),
        },
        Mode::LVar => match (opcode, kind) {
            (Opcode::Fun, TokenKind::Variadic) => Ok(RawOperand::LVar(RawTarget::Params(params(token)?))),
            (Opcode::Fun, _) => Err(site.mismatch("a parameter list", token)),
            (_, TokenKind::Expression) => Ok(RawOperand::LVar(RawTarget::Place(expression(token)?))),
            _ => Err(site.mismatch(Mode::LVal.describe(), token)),
        },
    }
}

fn instruction(head: &Token, operands: &[Token]) -> Result<Statement, InterpreterErrorKind> {
    let opcode = isa::resolve(&head.text, operands.len())?;
    let operands = opcode
        .modes()
        .iter()
        .zip(operands)
        .enumerate()
        .map(|(i, (mode, token))| {
            let site = Site {
                mnemonic: opcode.mnemonic(),
                position: i + 1,
                mode: *mode,
            };
            operand(&site, opcode, token)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Statement::Instruction {
        opcode,
        operands,
        line: head.line,
    })
}

fn import(head: &Token, operands: &[Token]) -> Result<Statement, InterpreterErrorKind> {
    match operands {
        [path] if classify(&path.text) == TokenKind::StringLiteral => Ok(Statement::Import {
            path: inner(&path.text).to_string(),
            guarded: head.text == "#import_once",
            line: head.line,
        }),
        _ => Err(InterpreterErrorKind::ExpectedPath {
            directive: head.text.clone(),
        }),
    }
}

/// Groups the tokens of one file into statements.
pub fn parse(tokens: &[Token], file: &Rc<Path>) -> Result<Vec<Statement>, InterpreterError> {
    let fail = |kind, line| InterpreterError::at(kind, Location::new(Rc::clone(file), line));
    let mut statements = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let head = &tokens[i];
        match classify(&head.text) {
            TokenKind::LabelDefinition => {
                let name = &head.text[..head.text.len() - 1];
                if isa::is_mnemonic(name) {
                    return Err(fail(
                        InterpreterErrorKind::ReservedLabel {
                            name: name.to_string(),
                        },
                        head.line,
                    ));
                }
                statements.push(Statement::Label {
                    name: name.to_string(),
                    line: head.line,
                });
                i += 1;
            }
            kind @ (TokenKind::Mnemonic | TokenKind::Directive) => {
                let mut end = i + 1;
                let mut line = head.end_line;
                while end < tokens.len() && tokens[end].line == line {
                    line = tokens[end].end_line;
                    end += 1;
                }
                let operands = &tokens[i + 1..end];
                let statement = if kind == TokenKind::Mnemonic {
                    instruction(head, operands)
                } else {
                    import(head, operands)
                };
                statements.push(statement.map_err(|kind| fail(kind, head.line))?);
                i = end;
            }
            TokenKind::Label => {
                return Err(fail(
                    InterpreterErrorKind::UnknownInstruction {
                        name: head.text.clone(),
                    },
                    head.line,
                ));
            }
            _ => {
                return Err(fail(
                    InterpreterErrorKind::ExpectedStatement {
                        token: head.text.clone(),
                    },
                    head.line,
                ));
            }
        }
    }

    Ok(statements)
}

// ----------------------------------------------------------------------------
// Resolution
// ----------------------------------------------------------------------------

fn expr_names<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
    match expr {
        Expr::Const(_) => {}
        Expr::Name(name) => out.push(name),
        Expr::Load(inner) => expr_names(inner, out),
        Expr::Add(a, b) | Expr::Sub(a, b) => {
            expr_names(a, out);
            expr_names(b, out);
        }
    }
}

fn source_names<'a>(source: &'a RawSource, out: &mut Vec<&'a str>) {
    match source {
        RawSource::Place(expr) => expr_names(expr, out),
        RawSource::Variadic(items) => items.iter().for_each(|item| source_names(item, out)),
        RawSource::Literal(_) | RawSource::Function(_) | RawSource::Label(_) => {}
    }
}

/// Variable names referenced by an operand, in order of appearance.
fn operand_names<'a>(operand: &'a RawOperand, out: &mut Vec<&'a str>) {
    match operand {
        RawOperand::Val(_) => {}
        RawOperand::RVal(source) => source_names(source, out),
        RawOperand::LVal(expr)
        | RawOperand::RVar(RawBinding::Place(expr))
        | RawOperand::LVar(RawTarget::Place(expr)) => expr_names(expr, out),
        RawOperand::RVar(_) | RawOperand::LVar(RawTarget::Params(_)) => {}
    }
}

/// Binds names for the instructions of one scope.
struct Resolver<'a> {
    globals: &'a HashMap<String, usize>,
    locals: Option<&'a [String]>,
    functions: &'a HashMap<String, FunctionId>,
    labels: &'a HashMap<(usize, String), usize>,
    unit: usize,
}

impl Resolver<'_> {
    fn expr(&self, expr: &Expr) -> Result<AddrExpr, InterpreterErrorKind> {
        Ok(match expr {
            Expr::Const(c) => AddrExpr::Const(*c),
            Expr::Name(name) => {
                match self.locals.and_then(|locals| locals.iter().position(|l| l == name)) {
                    Some(offset) => AddrExpr::Local(offset),
                    None => AddrExpr::Global(*self.globals.get(name).ok_or_else(|| {
                        InterpreterErrorKind::UnresolvedSymbol { name: name.clone() }
                    })?),
                }
            }
            Expr::Load(inner) => AddrExpr::Load(Box::new(self.expr(inner)?)),
            Expr::Add(a, b) => AddrExpr::Add(Box::new(self.expr(a)?), Box::new(self.expr(b)?)),
            Expr::Sub(a, b) => AddrExpr::Sub(Box::new(self.expr(a)?), Box::new(self.expr(b)?)),
        })
    }

    fn function(&self, name: &str) -> Result<FunctionId, InterpreterErrorKind> {
        self.functions
            .get(name)
            .copied()
            .ok_or_else(|| InterpreterErrorKind::UnresolvedSymbol {
                name: format!("@{name}"),
            })
    }

    fn label(&self, name: &str) -> Result<usize, InterpreterErrorKind> {
        self.labels
            .get(&(self.unit, name.to_string()))
            .copied()
            .ok_or_else(|| InterpreterErrorKind::UnresolvedSymbol {
                name: name.to_string(),
            })
    }

    fn source(&self, source: &RawSource) -> Result<Source, InterpreterErrorKind> {
        Ok(match source {
            RawSource::Literal(value) => Source::Literal(value.clone()),
            RawSource::Place(expr) => Source::Place(self.expr(expr)?),
            RawSource::Variadic(items) => Source::Variadic(
                items
                    .iter()
                    .map(|item| self.source(item))
                    .collect::<Result<_, _>>()?,
            ),
            RawSource::Function(name) => Source::Function(self.function(name)?),
            RawSource::Label(name) => Source::Label(self.label(name)?),
        })
    }

    fn operand(
        &self,
        operand: &RawOperand,
        declares: Option<FunctionId>,
    ) -> Result<Operand, InterpreterErrorKind> {
        Ok(match operand {
            RawOperand::Val(value) => Operand::Val(value.clone()),
            RawOperand::RVal(source) => Operand::RVal(self.source(source)?),
            RawOperand::LVal(expr) => Operand::LVal(self.expr(expr)?),
            RawOperand::RVar(RawBinding::Place(expr)) => Operand::RVar(Binding::Place(self.expr(expr)?)),
            RawOperand::RVar(RawBinding::Function(name)) => {
                Operand::RVar(Binding::Function(self.function(name)?))
            }
            RawOperand::RVar(RawBinding::Label(name)) => Operand::RVar(Binding::Label(self.label(name)?)),
            RawOperand::LVar(RawTarget::Place(expr)) => Operand::LVar(Target::Place(self.expr(expr)?)),
            RawOperand::LVar(RawTarget::Params(names)) => {
                let id = declares.ok_or_else(|| InterpreterErrorKind::InvalidParameters {
                    text: names.join(" "),
                    reason: "parameter lists are only valid in fun",
                })?;
                Operand::LVar(Target::Params(id))
            }
        })
    }
}

struct Pending {
    opcode: Opcode,
    operands: Vec<RawOperand>,
    origin: Origin,
    /// Function whose body contains the instruction.
    scope: Option<FunctionId>,
    /// Function declared by a `fun` instruction.
    declares: Option<FunctionId>,
}

struct Declared {
    name: String,
    params: Vec<String>,
    entry: usize,
    end: usize,
    origin: Origin,
}

/// Accumulates statements from every loaded file and resolves them into a [`Program`].
pub struct Assembler {
    limits: Limits,
    units: Vec<Unit>,
    pending: Vec<Pending>,
    labels: HashMap<(usize, String), usize>,
    functions: Vec<Declared>,
    by_name: HashMap<String, FunctionId>,
    scope: Option<FunctionId>,
}

impl Assembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            units: Vec::new(),
            pending: Vec::new(),
            labels: HashMap::new(),
            functions: Vec::new(),
            by_name: HashMap::new(),
            scope: None,
        }
    }

    /// Starts a new file. Returns its unit index.
    pub fn begin_unit(&mut self, file: Rc<Path>, imported_from: Vec<Location>) -> usize {
        self.end_scope();
        self.units.push(Unit {
            file,
            imported_from,
        });
        self.units.len() - 1
    }

    /// Closes the body of the function being collected, if any.
    pub fn end_scope(&mut self) {
        if let Some(id) = self.scope.take() {
            self.functions[id.0].end = self.pending.len();
        }
    }

    fn error(&self, kind: InterpreterErrorKind, origin: Origin) -> InterpreterError {
        let unit = &self.units[origin.unit];
        InterpreterError::at(kind, Location::new(Rc::clone(&unit.file), origin.line))
            .within(&unit.imported_from)
    }

    /// Adds a statement of `unit`.
    pub fn push(&mut self, unit: usize, statement: Statement) -> Result<(), InterpreterError> {
        match statement {
            Statement::Label { name, line } => {
                let origin = Origin { unit, line };
                if self.labels.contains_key(&(unit, name.clone())) {
                    return Err(self.error(InterpreterErrorKind::DuplicateLabel { name }, origin));
                }
                self.labels.insert((unit, name), self.pending.len());
            }
            Statement::Instruction {
                opcode: Opcode::Fun,
                operands,
                line,
            } => {
                self.end_scope();
                let origin = Origin { unit, line };
                let (name, params) = match operands.as_slice() {
                    [
                        RawOperand::LVal(Expr::Name(name)),
                        RawOperand::LVar(RawTarget::Params(params)),
                    ] => (name.clone(), params.clone()),
                    [RawOperand::LVal(expr), ..] => {
                        return Err(self.error(
                            InterpreterErrorKind::InvalidFunctionSlot {
                                text: format!("[{expr}]"),
                            },
                            origin,
                        ));
                    }
                    _ => {
                        return Err(self.error(
                            InterpreterErrorKind::InvalidFunctionSlot {
                                text: String::new(),
                            },
                            origin,
                        ));
                    }
                };
                if self.by_name.contains_key(&name) {
                    return Err(self.error(InterpreterErrorKind::DuplicateFunction { name }, origin));
                }

                let id = FunctionId(self.functions.len());
                let entry = self.pending.len() + 1;
                self.by_name.insert(name.clone(), id);
                self.functions.push(Declared {
                    name,
                    params,
                    entry,
                    end: entry,
                    origin,
                });
                self.pending.push(Pending {
                    opcode: Opcode::Fun,
                    operands,
                    origin,
                    scope: None,
                    declares: Some(id),
                });
                self.scope = Some(id);
            }
            Statement::Instruction {
                opcode,
                operands,
                line,
            } => {
                self.pending.push(Pending {
                    opcode,
                    operands,
                    origin: Origin { unit, line },
                    scope: self.scope,
                    declares: None,
                });
            }
            Statement::Import { .. } => self.end_scope(),
        }
        Ok(())
    }

    /// Resolves every collected instruction into a runnable [`Program`].
    pub fn finish(mut self) -> Result<Program, InterpreterError> {
        self.end_scope();
        let layout = Layout::new(&self.limits);

        let mut globals: HashMap<String, usize> = HashMap::new();
        for pending in self.pending.iter().filter(|p| p.scope.is_none()) {
            let mut names = Vec::new();
            for operand in &pending.operands {
                operand_names(operand, &mut names);
            }
            for name in names {
                if globals.contains_key(name) {
                    continue;
                }
                if globals.len() == self.limits.globals {
                    return Err(self.error(
                        InterpreterErrorKind::GlobalsExhausted {
                            limit: self.limits.globals,
                        },
                        pending.origin,
                    ));
                }
                globals.insert(name.to_string(), layout.global_start + globals.len());
            }
        }

        let mut functions = Vec::with_capacity(self.functions.len());
        for declared in &self.functions {
            let mut locals = declared.params.clone();
            let mut seen: HashSet<&str> = declared.params.iter().map(String::as_str).collect();
            for pending in &self.pending[declared.entry..declared.end] {
                let mut names = Vec::new();
                for operand in &pending.operands {
                    operand_names(operand, &mut names);
                }
                for name in names {
                    if !globals.contains_key(name) && seen.insert(name) {
                        locals.push(name.to_string());
                    }
                }
            }
            let slot = globals.get(&declared.name).copied().ok_or_else(|| {
                self.error(
                    InterpreterErrorKind::UnresolvedSymbol {
                        name: declared.name.clone(),
                    },
                    declared.origin,
                )
            })?;
            functions.push(Function {
                name: declared.name.clone(),
                slot,
                entry: declared.entry,
                end: declared.end,
                params: declared.params.len(),
                locals,
            });
        }

        let mut instructions = Vec::with_capacity(self.pending.len());
        for pending in &self.pending {
            let resolver = Resolver {
                globals: &globals,
                locals: pending
                    .scope
                    .map(|id| functions[id.0].locals.as_slice()),
                functions: &self.by_name,
                labels: &self.labels,
                unit: pending.origin.unit,
            };
            let operands = pending
                .operands
                .iter()
                .map(|operand| resolver.operand(operand, pending.declares))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|kind| self.error(kind, pending.origin))?;
            instructions.push(Instruction {
                opcode: pending.opcode,
                operands,
                origin: pending.origin,
            });
        }

        let mut labels: Vec<Label> = self
            .labels
            .iter()
            .map(|((unit, name), address)| Label {
                unit: *unit,
                name: name.clone(),
                address: *address,
            })
            .collect();
        labels.sort_by(|a, b| (a.unit, a.address, &a.name).cmp(&(b.unit, b.address, &b.name)));

        Ok(Program {
            instructions,
            functions,
            globals,
            labels,
            units: self.units,
            limits: self.limits,
            loaded: HashSet::new(),
            loads: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::tokenizer::tokenize;

    fn file() -> Rc<Path> {
        Rc::from(Path::new("test.sl"))
    }

    fn statements(source: &str) -> Result<Vec<Statement>, InterpreterError> {
        parse(&tokenize(source).expect("tokenize failed"), &file())
    }

    fn assemble(source: &str) -> Result<Program, InterpreterError> {
        let mut assembler = Assembler::new(Limits::default());
        let unit = assembler.begin_unit(file(), Vec::new());
        for statement in statements(source)? {
            assembler.push(unit, statement)?;
        }
        assembler.finish()
    }

    fn kind(source: &str) -> InterpreterErrorKind {
        assemble(source).expect_err("expected an error").kind
    }

    #[test]
    fn classifies_tokens() {
        assert_eq!(classify("\"hi\""), TokenKind::StringLiteral);
        assert_eq!(classify("42"), TokenKind::IntegerLiteral);
        assert_eq!(classify("-0x1F"), TokenKind::IntegerLiteral);
        assert_eq!(classify("1.5"), TokenKind::FloatLiteral);
        assert_eq!(classify("-2e3"), TokenKind::FloatLiteral);
        assert_eq!(classify(".5"), TokenKind::FloatLiteral);
        assert_eq!(classify("@main"), TokenKind::FunctionName);
        assert_eq!(classify("cpy"), TokenKind::Mnemonic);
        assert_eq!(classify("loop"), TokenKind::Label);
        assert_eq!(classify("loop.end:"), TokenKind::LabelDefinition);
        assert_eq!(classify("[x]"), TokenKind::Expression);
        assert_eq!(classify("(a b)"), TokenKind::Variadic);
        assert_eq!(classify("{1 2}"), TokenKind::Scope);
        assert_eq!(classify("#import"), TokenKind::Directive);
        assert_eq!(classify("#import_once"), TokenKind::Directive);
        assert_eq!(classify("1x"), TokenKind::Invalid);
        assert_eq!(classify("a]"), TokenKind::Invalid);
        assert_eq!(classify(".end"), TokenKind::Invalid);
        assert_eq!(classify(".end:"), TokenKind::Invalid);
        assert_eq!(classify("_a.b"), TokenKind::Label);
    }

    #[test]
    fn parses_integers() {
        assert_eq!(parse_int("0x10"), Some(16));
        assert_eq!(parse_int("-12"), Some(-12));
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("0x-1"), None);
        assert_eq!(parse_int("+3"), None);
    }

    #[test]
    fn operands_follow_the_previous_token_line() {
        let parsed = statements("cpy [x]\n1").unwrap_err();
        assert!(matches!(
            parsed.kind,
            InterpreterErrorKind::ArityMismatch { supplied: 1, .. }
        ));

        // A multi-line compound carries the statement to the line it ends on.
        let parsed = statements("cpy [x] {1\n2} ; comment\nnop").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(matches!(
            &parsed[0],
            Statement::Instruction { opcode: Opcode::Cpy, operands, .. }
                if operands[1] == RawOperand::RVal(RawSource::Literal(Value::Compound(vec![Value::Int(1), Value::Int(2)])))
        ));
    }

    #[test]
    fn label_may_share_a_line_with_an_instruction() {
        let parsed = statements("top: inc [i]").unwrap();
        assert_eq!(
            parsed,
            vec![
                Statement::Label {
                    name: "top".into(),
                    line: 1
                },
                Statement::Instruction {
                    opcode: Opcode::Inc1,
                    operands: vec![RawOperand::LVal(Expr::Name("i".into()))],
                    line: 1
                },
            ]
        );
    }

    #[test]
    fn inc_and_dec_resolve_by_arity() {
        let program = assemble("inc [x]\ninc [x] 2\ndec [x]\ndec [x] 3").unwrap();
        let opcodes: Vec<_> = program.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Inc1, Opcode::Inc2, Opcode::Dec1, Opcode::Dec2]);
        assert!(matches!(
            kind("inc [x] 1 2"),
            InterpreterErrorKind::ArityMismatch { supplied: 3, .. }
        ));
    }

    #[test]
    fn parses_variable_expressions() {
        let parsed = statements("cpy [[p] + 2 - n] 0").unwrap();
        let Statement::Instruction { operands, .. } = &parsed[0] else {
            panic!("expected an instruction");
        };
        assert_eq!(
            operands[0],
            RawOperand::LVal(Expr::Sub(
                Box::new(Expr::Add(
                    Box::new(Expr::Load(Box::new(Expr::Name("p".into())))),
                    Box::new(Expr::Const(2)),
                )),
                Box::new(Expr::Name("n".into())),
            ))
        );
    }

    #[test]
    fn rejects_malformed_expressions() {
        for source in ["cpy [] 1", "cpy [x y] 1", "cpy [x +] 1", "cpy [\"s\"] 1", "cpy [1z] 1"] {
            assert!(
                matches!(kind(source), InterpreterErrorKind::InvalidExpression { .. }),
                "{source}"
            );
        }
    }

    #[test]
    fn enforces_addressing_modes() {
        assert!(matches!(
            kind("cpy 1 2"),
            InterpreterErrorKind::OperandKind { position: 1, .. }
        ));
        assert!(matches!(
            kind("prt [x]"),
            InterpreterErrorKind::OperandKind { mnemonic: "prt", .. }
        ));
        assert!(matches!(
            kind("run (1) 2"),
            InterpreterErrorKind::OperandKind { position: 2, .. }
        ));
        assert!(matches!(
            kind("get (a b)"),
            InterpreterErrorKind::OperandKind { .. }
        ));
        assert!(matches!(
            kind("fun [f] [x]"),
            InterpreterErrorKind::OperandKind { expected: "a parameter list", .. }
        ));
        assert!(matches!(
            kind("prt {1 [x]}"),
            InterpreterErrorKind::OperandKind { expected: "a literal", .. }
        ));
    }

    #[test]
    fn statement_must_start_with_instruction() {
        assert!(matches!(
            kind("foo [x]"),
            InterpreterErrorKind::UnknownInstruction { .. }
        ));
        assert!(matches!(
            kind("42"),
            InterpreterErrorKind::ExpectedStatement { .. }
        ));
    }

    #[test]
    fn parses_imports() {
        let parsed = statements("#import \"lib.sl\"\n#import_once \"util.sl\"").unwrap();
        assert_eq!(
            parsed,
            vec![
                Statement::Import {
                    path: "lib.sl".into(),
                    guarded: false,
                    line: 1
                },
                Statement::Import {
                    path: "util.sl".into(),
                    guarded: true,
                    line: 2
                },
            ]
        );
        assert!(matches!(
            statements("#import lib").unwrap_err().kind,
            InterpreterErrorKind::ExpectedPath { .. }
        ));
    }

    #[test]
    fn assigns_globals_in_order() {
        let program = assemble("cpy [a] 1\ncpy [b] [a]\ncpy [[b] + c] 0").unwrap();
        assert_eq!(program.globals["a"], 1);
        assert_eq!(program.globals["b"], 2);
        assert_eq!(program.globals["c"], 3);
        assert_eq!(
            program.instructions[2].operands[0],
            Operand::LVal(AddrExpr::Add(
                Box::new(AddrExpr::Load(Box::new(AddrExpr::Global(2)))),
                Box::new(AddrExpr::Global(3)),
            ))
        );
    }

    #[test]
    fn too_many_globals() {
        let source: String = (0..201).map(|i| format!("cpy [v{i}] 0\n")).collect();
        let err = assemble(&source).unwrap_err();
        assert_eq!(err.kind, InterpreterErrorKind::GlobalsExhausted { limit: 200 });
        assert_eq!(err.trace[0].line, 201);
    }

    #[test]
    fn function_locals_and_globals() {
        let program = assemble(
            "cpy [total] 0\n\
             fun [sum] (a b)\n\
             add [t] [a] [b]\n\
             add [total] [total] [t]\n\
             ret [t]\n\
             run (1 2) @sum",
        )
        .unwrap();

        let (id, sum) = program.function("sum").unwrap();
        assert_eq!(id, FunctionId(0));
        assert_eq!(sum.params, 2);
        assert_eq!(sum.locals, vec!["a", "b", "t"]);
        // The body runs to the end of the file.
        assert_eq!((sum.entry, sum.end), (2, 6));
        assert_eq!(sum.slot, program.globals["sum"]);
        assert_eq!(
            program.instructions[3].operands[0],
            Operand::LVal(AddrExpr::Global(program.globals["total"]))
        );
        assert_eq!(
            program.instructions[2].operands[0],
            Operand::LVal(AddrExpr::Local(2))
        );
        assert_eq!(
            program.instructions[5].operands[1],
            Operand::RVar(Binding::Function(FunctionId(0)))
        );
        assert!(!program.globals.contains_key("t"));
    }

    #[test]
    fn resolves_labels_and_functions() {
        let program = assemble("jmp end\nnop\nend: nop\nrun 0 @f\nfun [f] ()\nret [r]").unwrap();
        assert_eq!(
            program.instructions[0].operands[0],
            Operand::RVal(Source::Label(2))
        );
        assert_eq!(program.address_of("end"), Some(2));
        assert_eq!(program.address_of("@f"), Some(5));

        assert!(matches!(
            kind("jmp nowhere"),
            InterpreterErrorKind::UnresolvedSymbol { .. }
        ));
        assert!(matches!(
            kind("run 0 @missing"),
            InterpreterErrorKind::UnresolvedSymbol { .. }
        ));
    }

    #[test]
    fn labels_cannot_reuse_mnemonics() {
        assert_eq!(classify("nop:"), TokenKind::LabelDefinition);
        let err = statements("nop:\nnop").expect_err("expected an error");
        assert_eq!(
            err.kind,
            InterpreterErrorKind::ReservedLabel {
                name: "nop".into()
            }
        );
        assert_eq!(err.kind.to_string(), "Label 'nop' is an instruction name");
        assert_eq!(err.trace.len(), 1);
        assert!(statements("nops:\nnop").is_ok());
    }

    #[test]
    fn duplicate_definitions() {
        assert!(matches!(
            kind("a: nop\na: nop"),
            InterpreterErrorKind::DuplicateLabel { .. }
        ));
        assert!(matches!(
            kind("fun [f] ()\nret [r]\nfun [f] (x)\nret [r]"),
            InterpreterErrorKind::DuplicateFunction { .. }
        ));
        assert!(matches!(
            kind("fun [f] (x x)\nret [r]"),
            InterpreterErrorKind::InvalidParameters { .. }
        ));
        assert!(matches!(
            kind("fun [[f]] ()\nret [r]"),
            InterpreterErrorKind::InvalidFunctionSlot { .. }
        ));
    }

    #[test]
    fn errors_carry_file_and_line() {
        let err = assemble("nop\n\nbad [x]").unwrap_err();
        assert_eq!(
            err.to_string(),
            "InterpreterError: Unknown instruction 'bad'\n\ttest.sl: 3"
        );
    }
}
