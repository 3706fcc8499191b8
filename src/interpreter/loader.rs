//! Module loading.
//!
//! The loader reads the entry file, tokenizes and parses it, and walks its
//! statements in order. An import directive suspends the current file, loads
//! the imported one in place (paths are relative to the importing file's
//! directory), and then resumes.
//!
//! - `#import "f"` loads `f` every time it is reached. Importing a file that is
//!   still being loaded (directly or through a cycle) is an error.
//! - `#import_once "f"` is skipped silently if `f` was loaded before.

use crate::config::Limits;
use crate::debug;
use crate::interpreter::assembler::{self, Assembler, Statement};
use crate::interpreter::errors::{InterpreterError, InterpreterErrorKind, Location};
use crate::interpreter::program::Program;
use crate::interpreter::tokenizer::tokenize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

/// Where source files come from.
pub trait Sources {
    fn read(&self, path: &Path) -> io::Result<String>;
}

/// Reads source files from disk.
pub struct FileSystem;

impl Sources for FileSystem {
    fn read(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// Source files held in memory, keyed by normalized path.
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    files: HashMap<PathBuf, String>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl AsRef<Path>, source: impl Into<String>) -> Self {
        self.insert(path, source);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, source: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), source.into());
    }
}

impl Sources for InMemory {
    fn read(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

/// Lexically normalizes a path: drops `.` and folds `..` into its parent.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Loads a program from disk, starting at `entry`.
pub fn load_program(entry: impl AsRef<Path>, limits: &Limits) -> Result<Program, InterpreterError> {
    let entry = entry.as_ref();
    let entry = std::path::absolute(entry).unwrap_or_else(|_| entry.to_path_buf());
    Loader::new(&FileSystem, *limits).load(&entry)
}

/// Assembles a single in-memory source file named `main.sl`.
pub fn assemble_source(source: &str) -> Result<Program, InterpreterError> {
    let sources = InMemory::new().with("main.sl", source);
    Loader::new(&sources, Limits::default()).load(Path::new("main.sl"))
}

/// Drives tokenizing, parsing and assembly over a set of files.
pub struct Loader<'a, S: Sources + ?Sized> {
    sources: &'a S,
    assembler: Assembler,
    /// Files currently being loaded, outermost first.
    open: Vec<PathBuf>,
    loaded: HashSet<PathBuf>,
    loads: Vec<PathBuf>,
}

impl<'a, S: Sources + ?Sized> Loader<'a, S> {
    pub fn new(sources: &'a S, limits: Limits) -> Self {
        Self {
            sources,
            assembler: Assembler::new(limits),
            open: Vec::new(),
            loaded: HashSet::new(),
            loads: Vec::new(),
        }
    }

    /// Loads `entry` and everything it imports, then resolves the program.
    pub fn load(mut self, entry: &Path) -> Result<Program, InterpreterError> {
        self.load_file(normalize(entry), Vec::new())?;
        let mut program = self.assembler.finish()?;
        program.loaded = self.loaded;
        program.loads = self.loads;
        debug!(
            "assembled {} instruction(s) from {} file(s)",
            program.instructions.len(),
            program.units.len()
        );
        Ok(program)
    }

    fn load_file(&mut self, path: PathBuf, imported_from: Vec<Location>) -> Result<(), InterpreterError> {
        let source = self.sources.read(&path).map_err(|e| {
            InterpreterError::new(InterpreterErrorKind::FileOpen {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
            .within(&imported_from)
        })?;
        debug!("loading {}", path.display());

        let file: Rc<Path> = Rc::from(path.as_path());
        let tokens = tokenize(&source).map_err(|e| {
            let line = e.line();
            InterpreterError::at(e.into(), Location::new(Rc::clone(&file), line)).within(&imported_from)
        })?;
        let statements = assembler::parse(&tokens, &file).map_err(|e| e.within(&imported_from))?;

        self.loaded.insert(path.clone());
        self.loads.push(path.clone());
        self.open.push(path.clone());
        let unit = self.assembler.begin_unit(Rc::clone(&file), imported_from.clone());

        for statement in statements {
            let (target, guarded, line) = match statement {
                Statement::Import {
                    path,
                    guarded,
                    line,
                } => (path, guarded, line),
                other => {
                    self.assembler.push(unit, other)?;
                    continue;
                }
            };

            self.assembler.end_scope();
            let site = Location::new(Rc::clone(&file), line);
            let base = path.parent().unwrap_or_else(|| Path::new(""));
            let resolved = normalize(&base.join(&target));

            if guarded && self.loaded.contains(&resolved) {
                debug!("skipping {}, already loaded", resolved.display());
                continue;
            }
            if self.open.contains(&resolved) {
                return Err(InterpreterError::at(
                    InterpreterErrorKind::RecursiveImport {
                        path: resolved.display().to_string(),
                    },
                    site,
                )
                .within(&imported_from));
            }

            let mut chain = Vec::with_capacity(imported_from.len() + 1);
            chain.push(site);
            chain.extend(imported_from.iter().cloned());
            self.load_file(resolved, chain)?;
        }

        self.assembler.end_scope();
        self.open.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(sources: &InMemory, entry: &str) -> Result<Program, InterpreterError> {
        Loader::new(sources, Limits::default()).load(Path::new(entry))
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize(Path::new("a/./b/../c.sl")), PathBuf::from("a/c.sl"));
        assert_eq!(normalize(Path::new("../x.sl")), PathBuf::from("../x.sl"));
        assert_eq!(normalize(Path::new("/a/../../b.sl")), PathBuf::from("/b.sl"));
    }

    #[test]
    fn imports_relative_to_importing_file() {
        let sources = InMemory::new()
            .with("app/main.sl", "#import \"lib/util.sl\"\nprt \"main\"")
            .with("app/lib/util.sl", "#import \"../shared.sl\"\nprt \"util\"")
            .with("app/shared.sl", "prt \"shared\"");
        let program = load(&sources, "app/main.sl").unwrap();
        assert_eq!(
            program.loads,
            vec![
                PathBuf::from("app/main.sl"),
                PathBuf::from("app/lib/util.sl"),
                PathBuf::from("app/shared.sl"),
            ]
        );
        assert_eq!(program.instructions.len(), 3);
        assert_eq!(program.instructions[0].origin.unit, 2);
        assert_eq!(program.instructions[2].origin.unit, 0);
    }

    #[test]
    fn unguarded_import_loads_every_time() {
        let sources = InMemory::new()
            .with("main.sl", "#import \"a.sl\"\n#import \"a.sl\"")
            .with("a.sl", "nop");
        let program = load(&sources, "main.sl").unwrap();
        assert_eq!(program.load_count(Path::new("a.sl")), 2);
        assert_eq!(program.instructions.len(), 2);
    }

    #[test]
    fn guarded_import_loads_once() {
        let sources = InMemory::new()
            .with("main.sl", "#import_once \"a.sl\"\n#import_once \"a.sl\"\n#import \"b.sl\"")
            .with("b.sl", "#import_once \"a.sl\"")
            .with("a.sl", "nop");
        let program = load(&sources, "main.sl").unwrap();
        assert_eq!(program.load_count(Path::new("a.sl")), 1);
        assert_eq!(program.loaded.len(), 3);
    }

    #[test]
    fn guarded_self_import_is_skipped() {
        let sources = InMemory::new().with("main.sl", "#import_once \"main.sl\"\nnop");
        let program = load(&sources, "main.sl").unwrap();
        assert_eq!(program.load_count(Path::new("main.sl")), 1);
    }

    #[test]
    fn recursive_import_is_rejected() {
        let sources = InMemory::new()
            .with("a.sl", "nop\n#import \"b.sl\"")
            .with("b.sl", "\n\n#import \"a.sl\"");
        let err = load(&sources, "a.sl").unwrap_err();
        assert_eq!(
            err.kind,
            InterpreterErrorKind::RecursiveImport {
                path: "a.sl".to_string()
            }
        );
        assert_eq!(
            err.to_string(),
            "InterpreterError: Recursive import of file 'a.sl'\n\tb.sl: 3\n\ta.sl: 2"
        );

        let direct = InMemory::new().with("a.sl", "#import \"a.sl\"");
        assert!(matches!(
            load(&direct, "a.sl").unwrap_err().kind,
            InterpreterErrorKind::RecursiveImport { .. }
        ));
    }

    #[test]
    fn errors_in_imported_files_carry_the_chain() {
        let sources = InMemory::new()
            .with("main.sl", "nop\n#import \"lib.sl\"")
            .with("lib.sl", "prt \"unterminated");
        let err = load(&sources, "main.sl").unwrap_err();
        assert_eq!(
            err.to_string(),
            "InterpreterError: Unclosed string\n\tlib.sl: 1\n\tmain.sl: 2"
        );
    }

    #[test]
    fn missing_files() {
        let err = load(&InMemory::new(), "main.sl").unwrap_err();
        assert!(matches!(err.kind, InterpreterErrorKind::FileOpen { .. }));
        assert!(err.trace.is_empty());

        let sources = InMemory::new().with("main.sl", "#import \"gone.sl\"");
        let err = load(&sources, "main.sl").unwrap_err();
        assert!(matches!(err.kind, InterpreterErrorKind::FileOpen { .. }));
        assert_eq!(err.trace[0].line, 1);
    }

    #[test]
    fn labels_are_local_to_their_file() {
        let sources = InMemory::new()
            .with("main.sl", "#import \"lib.sl\"\njmp done")
            .with("lib.sl", "done: nop");
        assert!(matches!(
            load(&sources, "main.sl").unwrap_err().kind,
            InterpreterErrorKind::UnresolvedSymbol { .. }
        ));
    }

    #[test]
    fn functions_and_globals_are_shared() {
        let sources = InMemory::new()
            .with("main.sl", "cpy [n] 2\n#import \"lib.sl\"\nrun [n] @double\nget [n]")
            .with("lib.sl", "fun [double] (x)\nmul [x] [x] 2\nret [x]");
        let program = load(&sources, "main.sl").unwrap();
        let (_, double) = program.function("double").unwrap();
        assert_eq!(double.entry, 2);
        assert_eq!(double.end, 4);
        assert!(program.globals.contains_key("n"));
    }

    #[test]
    fn import_ends_a_function_body() {
        let sources = InMemory::new()
            .with("main.sl", "fun [f] ()\nret [r]\n#import \"lib.sl\"\nprt \"after\"")
            .with("lib.sl", "nop");
        let program = load(&sources, "main.sl").unwrap();
        let (_, f) = program.function("f").unwrap();
        assert_eq!((f.entry, f.end), (1, 2));
    }
}
