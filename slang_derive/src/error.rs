//! Derive macro for error types.
//!
//! ```ignore
//! use slang_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum LoadError {
//!     #[error("could not open {path}")]
//!     Open { path: String },
//!
//!     #[error("lexical error: {0}")]
//!     Lex(#[from] LexError),
//!
//!     #[error("recursive import")]
//!     RecursiveImport,
//! }
//! ```
//!
//! Messages are ordinary format strings. Named fields are captured by name,
//! tuple fields by position (`{0}`, `{1:?}`). Only the fields a message
//! mentions are bound, so unused fields never trigger warnings.
//!
//! A `#[from]` attribute on the only field of a tuple variant generates a
//! `From` impl for that field's type and reports the field as the error's
//! `source()`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, parse_macro_input, spanned::Spanned};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

/// One `match` arm worth of generated code for a variant or struct body.
struct Rendered {
    display: TokenStream2,
    source: Option<TokenStream2>,
    from: Option<TokenStream2>,
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let (display_body, source_body, from_impls) = match &input.data {
        Data::Enum(data) => {
            let mut display_arms = Vec::new();
            let mut source_arms = Vec::new();
            let mut from_impls = Vec::new();

            for variant in &data.variants {
                let ident = &variant.ident;
                let message = message(&variant.attrs, variant.span(), &ident.to_string())?;
                let rendered = render(quote!(Self::#ident), &variant.fields, &message)?;

                display_arms.push(rendered.display);
                source_arms.extend(rendered.source);
                if let Some(ty) = rendered.from {
                    from_impls.push(quote! {
                        impl #impl_generics ::std::convert::From<#ty> for #name #ty_generics #where_clause {
                            fn from(source: #ty) -> Self {
                                Self::#ident(source)
                            }
                        }
                    });
                }
            }

            (
                quote! { match self { #(#display_arms)* } },
                quote! {
                    match self {
                        #(#source_arms)*
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                },
                from_impls,
            )
        }
        Data::Struct(data) => {
            let message = message(&input.attrs, input.span(), &name.to_string())?;
            let rendered = render(quote!(Self), &data.fields, &message)?;
            let display = rendered.display;
            (
                quote! { match self { #display } },
                quote! { None },
                Vec::new(),
            )
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                input,
                "Error derive does not support unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #display_body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {
            fn source(&self) -> ::std::option::Option<&(dyn ::std::error::Error + 'static)> {
                #source_body
            }
        }

        #(#from_impls)*
    })
}

/// Builds the display arm (and `source`/`From` pieces) for one set of fields.
fn render(path: TokenStream2, fields: &Fields, message: &LitStr) -> syn::Result<Rendered> {
    let text = message.value();

    match fields {
        Fields::Unit => Ok(Rendered {
            display: quote! { #path => write!(f, #message), },
            source: None,
            from: None,
        }),
        Fields::Named(named) => {
            for field in &named.named {
                reject_from(&field.attrs)?;
            }
            let used: Vec<_> = named
                .named
                .iter()
                .filter_map(|field| field.ident.as_ref())
                .filter(|ident| mentions(&text, &ident.to_string()))
                .collect();
            Ok(Rendered {
                display: quote! { #path { #(#used,)* .. } => write!(f, #message), },
                source: None,
                from: None,
            })
        }
        Fields::Unnamed(unnamed) => {
            let count = unnamed.unnamed.len();
            let bindings: Vec<_> = (0..count)
                .map(|i| {
                    if mentions(&text, &i.to_string()) {
                        let ident = format_ident!("_{}", i);
                        quote!(#ident)
                    } else {
                        quote!(_)
                    }
                })
                .collect();
            let format = LitStr::new(&positional_to_named(&text, count), message.span());

            let from_field = unnamed
                .unnamed
                .iter()
                .position(|field| has_from(&field.attrs));
            let (source, from) = match from_field {
                Some(0) if count == 1 => {
                    let ty = &unnamed.unnamed[0].ty;
                    (
                        Some(quote! {
                            #path(inner) => Some(inner as &(dyn ::std::error::Error + 'static)),
                        }),
                        Some(quote!(#ty)),
                    )
                }
                Some(_) => {
                    return Err(syn::Error::new_spanned(
                        unnamed,
                        "#[from] is only supported on the single field of a tuple variant",
                    ));
                }
                None => (None, None),
            };

            Ok(Rendered {
                display: quote! { #path(#(#bindings),*) => write!(f, #format), },
                source,
                from,
            })
        }
    }
}

/// Returns the `#[error("...")]` message attached to an item.
fn message(attrs: &[Attribute], span: proc_macro2::Span, what: &str) -> syn::Result<LitStr> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new(
                span,
                format!("missing #[error(\"...\")] attribute on `{what}`"),
            )
        })?;
    attr.parse_args::<LitStr>().map_err(|_| {
        syn::Error::new_spanned(
            attr,
            "expected a string literal, e.g. #[error(\"unknown instruction {name}\")]",
        )
    })
}

fn has_from(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| attr.path().is_ident("from"))
}

fn reject_from(attrs: &[Attribute]) -> syn::Result<()> {
    match attrs.iter().find(|attr| attr.path().is_ident("from")) {
        Some(attr) => Err(syn::Error::new_spanned(
            attr,
            "#[from] is only supported on tuple variants",
        )),
        None => Ok(()),
    }
}

/// True if `text` contains a `{name}` or `{name:...}` placeholder.
fn mentions(text: &str, name: &str) -> bool {
    text.match_indices('{').any(|(at, _)| {
        let rest = &text[at + 1..];
        rest.strip_prefix(name)
            .is_some_and(|tail| tail.starts_with('}') || tail.starts_with(':'))
            && !text[..at].ends_with('{')
    })
}

/// Rewrites `{0}`/`{0:?}` placeholders to the `_0` bindings used in match arms.
fn positional_to_named(text: &str, count: usize) -> String {
    let mut out = text.to_string();
    for i in (0..count).rev() {
        out = out
            .replace(&format!("{{{i}}}"), &format!("{{_{i}}}"))
            .replace(&format!("{{{i}:"), &format!("{{_{i}:"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_named_and_positional() {
        assert!(mentions("unknown {name}", "name"));
        assert!(mentions("at {line:>4}", "line"));
        assert!(mentions("{0} and {1}", "1"));
        assert!(!mentions("unknown {names}", "name"));
        assert!(!mentions("escaped {{name}}", "name"));
    }

    #[test]
    fn positional_placeholders_are_renamed() {
        assert_eq!(positional_to_named("{0} vs {1:?}", 2), "{_0} vs {_1:?}");
        assert_eq!(positional_to_named("no fields", 0), "no fields");
    }
}
