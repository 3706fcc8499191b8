//! Interpreter for slang programs.
//!
//! A program is a set of source files. Each file is a sequence of statements,
//! one per line: label definitions (`name:`), instructions (`mnemonic
//! operands...`) and import directives (`#import "file.sl"`). Execution works on
//! a flat, slot-addressed memory split into global, call-frame, stack and heap
//! regions.
//!
//! # Pipeline
//!
//! - [`tokenizer`]: splits source text into raw tokens
//! - [`assembler`]: classifies tokens, parses statements and resolves names
//! - [`loader`]: follows imports and produces a [`program::Program`]
//! - [`vm`]: executes a program
//!
//! # Modules
//!
//! - [`errors`]: load-time and run-time error types
//! - [`isa`]: instruction set definition, mnemonic and arity resolution
//! - [`operand`]: addressing modes and resolved operands
//! - [`program`]: assembled program representation

pub mod assembler;
pub mod errors;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod loader;
pub mod operand;
pub mod program;
pub mod tokenizer;
pub mod vm;
