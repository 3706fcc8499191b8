//! Derive macros for the slang interpreter.
//!
//! Provides `#[derive(Error)]`, a small `thiserror`-style derive used by the
//! interpreter's error enums.

mod error;

use proc_macro::TokenStream;

/// Implements `Display`, `Error` and optional `From` conversions for error types.
#[proc_macro_derive(Error, attributes(error, from))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
