//! Assembled program representation.

use crate::config::Limits;
use crate::interpreter::errors::Location;
use crate::interpreter::isa::Opcode;
use crate::interpreter::operand::Operand;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Index of a declared function in [`Program::functions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub usize);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source position of an instruction: loaded unit and line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Origin {
    pub unit: usize,
    pub line: usize,
}

/// One executable instruction.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub origin: Origin,
}

/// A loaded source file and the import sites that led to it, innermost first.
#[derive(Clone, Debug)]
pub struct Unit {
    pub file: Rc<Path>,
    pub imported_from: Vec<Location>,
}

/// A declared function.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    /// Global address holding the function reference.
    pub slot: usize,
    /// First instruction of the body.
    pub entry: usize,
    /// One past the last instruction of the body.
    pub end: usize,
    pub params: usize,
    /// Local names by frame offset, parameters first.
    pub locals: Vec<String>,
}

impl Function {
    pub fn frame_size(&self) -> usize {
        self.locals.len()
    }

    pub fn local(&self, name: &str) -> Option<usize> {
        self.locals.iter().position(|local| local == name)
    }
}

/// A label definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    pub unit: usize,
    pub name: String,
    pub address: usize,
}

/// Everything the engine needs to run, plus the bookkeeping of how it was loaded.
#[derive(Clone, Debug)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub functions: Vec<Function>,
    /// Global variable name to absolute address.
    pub globals: HashMap<String, usize>,
    pub labels: Vec<Label>,
    pub units: Vec<Unit>,
    /// Limits the program was assembled against.
    pub limits: Limits,
    /// Every file loaded so far.
    pub loaded: HashSet<PathBuf>,
    /// Files in load order. A file appears more than once if it was imported unguarded again.
    pub loads: Vec<PathBuf>,
}

impl Program {
    /// Source location of an instruction origin.
    pub fn location(&self, origin: Origin) -> Option<Location> {
        self.units
            .get(origin.unit)
            .map(|unit| Location::new(Rc::clone(&unit.file), origin.line))
    }

    /// Location of the instruction at `pc`.
    pub fn location_of(&self, pc: usize) -> Option<Location> {
        self.instructions
            .get(pc)
            .and_then(|instr| self.location(instr.origin))
    }

    pub fn function(&self, name: &str) -> Option<(FunctionId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
            .map(|(i, f)| (FunctionId(i), f))
    }

    /// Instruction address of a function (`@name`) or of a label in the entry file.
    pub fn address_of(&self, symbol: &str) -> Option<usize> {
        if let Some(name) = symbol.strip_prefix('@') {
            return self.function(name).map(|(_, f)| f.entry);
        }
        self.labels
            .iter()
            .find(|label| label.unit == 0 && label.name == symbol)
            .map(|label| label.address)
    }

    /// Number of times `path` was loaded.
    pub fn load_count(&self, path: &Path) -> usize {
        self.loads.iter().filter(|p| p.as_path() == path).count()
    }
}
