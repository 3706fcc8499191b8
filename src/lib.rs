//! slang interpreter library.
//!
//! Provides the tokenizer, assembler, module loader and execution engine for
//! slang, a small line-oriented assembly-like language.

pub mod config;
pub mod interpreter;
pub mod utils;
