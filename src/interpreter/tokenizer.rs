//! Lexical analysis.
//!
//! The tokenizer is a small state machine over a character stream. Outside of
//! any construct, whitespace separates tokens and `;` starts a comment that
//! runs to the end of the line. Four delimited constructs are read as a single
//! token, delimiters included:
//!
//! | Opener | Construct           | Closes on        | Nests          |
//! |--------|---------------------|------------------|----------------|
//! | `"`    | string literal      | unescaped `"`    | no             |
//! | `[`    | variable expression | matching `]`     | `[` only       |
//! | `(`    | variadic            | `)`              | never          |
//! | `{`    | structure scope     | matching `}`     | `{` only       |
//!
//! String literals have their escapes expanded (`\n`, `\t`, and `\x` for any
//! other `x`). Variadics and scopes keep their text raw: they are tokenized
//! again when the assembler looks inside them, and any string literal inside
//! them is skipped over so its delimiters do not count.
//!
//! Classification of tokens (literal, mnemonic, label, ...) is a separate pass,
//! see [`assembler::classify`](super::assembler::classify).

use crate::interpreter::errors::LexError;
use std::iter::Peekable;

/// A raw token with the line it starts on and the line it ends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub line: usize,
    pub end_line: usize,
}

/// Lexical mode of the token being read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Default,
    Comment,
    Quoted { escaped: bool },
    Expression { depth: usize },
    /// `string` is `Some(escaped)` while inside a string literal.
    Variadic { string: Option<bool> },
    Scope { depth: usize, string: Option<bool> },
}

/// Advances the state of a string literal nested in a raw construct.
/// Returns the new state, `None` once the literal is closed.
fn nested_string(escaped: bool, c: char) -> Option<bool> {
    match (escaped, c) {
        (true, _) => Some(false),
        (false, '\\') => Some(true),
        (false, '"') => None,
        (false, _) => Some(false),
    }
}

/// Splits a character stream into [`Token`]s.
pub struct Tokenizer<I: Iterator<Item = char>> {
    chars: Peekable<I>,
    line: usize,
    done: bool,
}

impl<I: Iterator<Item = char>> Tokenizer<I> {
    /// Creates a tokenizer whose first character sits on `first_line`.
    pub fn new(chars: I, first_line: usize) -> Self {
        Self {
            chars: chars.peekable(),
            line: first_line,
            done: false,
        }
    }

    /// Line of the next unread character.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Reads the next token, `Ok(None)` at end of input.
    pub fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        let mut text = String::new();
        let mut start = self.line;
        let mut end = self.line;
        let mut mode = Mode::Default;

        loop {
            let Some(&c) = self.chars.peek() else {
                return match mode {
                    Mode::Default | Mode::Comment => Ok(Self::emit(text, start, end)),
                    Mode::Quoted { .. } => Err(LexError::UnclosedString { line: start }),
                    Mode::Expression { .. } => Err(LexError::UnclosedExpression { line: start }),
                    Mode::Variadic { .. } => Err(LexError::UnclosedVariadic { line: start }),
                    Mode::Scope { .. } => Err(LexError::UnclosedScope { line: start }),
                };
            };

            // A pending plain token ends where a delimited construct or comment begins.
            if mode == Mode::Default
                && !text.is_empty()
                && matches!(c, ';' | '"' | '[' | '(' | '{')
            {
                return Ok(Self::emit(text, start, end));
            }

            self.chars.next();
            let line = self.line;
            if c == '\n' {
                self.line += 1;
            }

            match mode {
                Mode::Default => match c {
                    c if c.is_whitespace() => {
                        if !text.is_empty() {
                            return Ok(Self::emit(text, start, end));
                        }
                    }
                    ';' => mode = Mode::Comment,
                    _ => {
                        if text.is_empty() {
                            start = line;
                        }
                        text.push(c);
                        end = line;
                        mode = match c {
                            '"' => Mode::Quoted { escaped: false },
                            '[' => Mode::Expression { depth: 1 },
                            '(' => Mode::Variadic { string: None },
                            '{' => Mode::Scope {
                                depth: 1,
                                string: None,
                            },
                            _ => Mode::Default,
                        };
                    }
                },
                Mode::Comment => {
                    if c == '\n' {
                        mode = Mode::Default;
                    }
                }
                Mode::Quoted { escaped: true } => {
                    text.push(match c {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    end = line;
                    mode = Mode::Quoted { escaped: false };
                }
                Mode::Quoted { escaped: false } => match c {
                    '\\' => mode = Mode::Quoted { escaped: true },
                    '"' => {
                        text.push(c);
                        return Ok(Self::emit(text, start, line));
                    }
                    _ => {
                        text.push(c);
                        end = line;
                    }
                },
                Mode::Expression { depth } => {
                    let depth = match c {
                        ';' => return Err(LexError::CommentInExpression { line }),
                        '(' | ')' => return Err(LexError::VariadicInExpression { line }),
                        '{' | '}' => return Err(LexError::ScopeInExpression { line }),
                        '[' => depth + 1,
                        ']' => depth - 1,
                        _ => depth,
                    };
                    text.push(c);
                    end = line;
                    if depth == 0 {
                        return Ok(Self::emit(text, start, end));
                    }
                    mode = Mode::Expression { depth };
                }
                Mode::Variadic { string: Some(escaped) } => {
                    text.push(c);
                    end = line;
                    mode = Mode::Variadic {
                        string: nested_string(escaped, c),
                    };
                }
                Mode::Variadic { string: None } => {
                    match c {
                        '(' => return Err(LexError::NestedVariadic { line }),
                        ';' => return Err(LexError::CommentInVariadic { line }),
                        '{' | '}' => return Err(LexError::ScopeInVariadic { line }),
                        _ => {}
                    }
                    text.push(c);
                    end = line;
                    match c {
                        ')' => return Ok(Self::emit(text, start, end)),
                        '"' => mode = Mode::Variadic { string: Some(false) },
                        _ => {}
                    }
                }
                Mode::Scope {
                    depth,
                    string: Some(escaped),
                } => {
                    text.push(c);
                    end = line;
                    mode = Mode::Scope {
                        depth,
                        string: nested_string(escaped, c),
                    };
                }
                Mode::Scope {
                    depth,
                    string: None,
                } => {
                    text.push(c);
                    end = line;
                    mode = match c {
                        '{' => Mode::Scope {
                            depth: depth + 1,
                            string: None,
                        },
                        '}' if depth == 1 => return Ok(Self::emit(text, start, end)),
                        '}' => Mode::Scope {
                            depth: depth - 1,
                            string: None,
                        },
                        '"' => Mode::Scope {
                            depth,
                            string: Some(false),
                        },
                        _ => mode,
                    };
                }
            }
        }
    }

    fn emit(text: String, line: usize, end_line: usize) -> Option<Token> {
        (!text.is_empty()).then_some(Token {
            text,
            line,
            end_line,
        })
    }
}

impl<I: Iterator<Item = char>> Iterator for Tokenizer<I> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token() {
            Ok(Some(token)) => Some(Ok(token)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Tokenizes a whole source file, starting at line 1.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Tokenizer::new(source.chars(), 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        tokenize(source)
            .expect("tokenize failed")
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn splits_on_whitespace_and_skips_comments() {
        assert_eq!(
            texts("cpy [x] 1 ; set x\n  prt \"done\"\t; trailing"),
            vec!["cpy", "[x]", "1", "prt", "\"done\""]
        );
    }

    #[test]
    fn expands_string_escapes() {
        let tokens = tokenize(r#"prt "a\"b\\c\nd\te\q""#).unwrap();
        assert_eq!(tokens[1].text, "\"a\"b\\c\nd\teq\"");
    }

    #[test]
    fn delimiters_inside_strings_are_plain_text() {
        assert_eq!(texts(r#""; [x] (y) {z}""#), vec![r#""; [x] (y) {z}""#]);
    }

    #[test]
    fn nested_expressions_are_one_token() {
        assert_eq!(texts("cpy [[p] + 1] [a]"), vec!["cpy", "[[p] + 1]", "[a]"]);
    }

    #[test]
    fn nested_scopes_are_one_token() {
        assert_eq!(texts("{1 {2 3} \"}\"} x"), vec!["{1 {2 3} \"}\"}", "x"]);
    }

    #[test]
    fn variadic_keeps_raw_text_and_skips_strings() {
        assert_eq!(
            texts(r#"run ("a)\"" [b]) @f"#),
            vec!["run", r#"("a)\"" [b])"#, "@f"]
        );
    }

    #[test]
    fn constructs_flush_pending_text() {
        assert_eq!(texts("abc[x]def(y)"), vec!["abc", "[x]", "def", "(y)"]);
        assert_eq!(texts("abc;comment\nd"), vec!["abc", "d"]);
    }

    #[test]
    fn stray_closers_are_ordinary_characters() {
        assert_eq!(texts("a] b) c}"), vec!["a]", "b)", "c}"]);
    }

    #[test]
    fn tracks_start_and_end_lines() {
        let tokens = tokenize("nop\n\ncpy [x]\n  {1\n 2}\n").unwrap();
        let lines: Vec<_> = tokens.iter().map(|t| (t.line, t.end_line)).collect();
        assert_eq!(lines, vec![(1, 1), (3, 3), (3, 3), (4, 5)]);
    }

    #[test]
    fn unclosed_constructs_report_opening_line() {
        assert_eq!(
            tokenize("nop\nprt \"abc\n\n").unwrap_err(),
            LexError::UnclosedString { line: 2 }
        );
        assert_eq!(
            tokenize("cpy [[x] 1").unwrap_err(),
            LexError::UnclosedExpression { line: 1 }
        );
        assert_eq!(
            tokenize("\nrun (1 2").unwrap_err(),
            LexError::UnclosedVariadic { line: 2 }
        );
        assert_eq!(
            tokenize("cpy [x] {1 {2}").unwrap_err(),
            LexError::UnclosedScope { line: 1 }
        );
    }

    #[test]
    fn forbidden_characters_in_expressions() {
        assert_eq!(
            tokenize("[x ; y]").unwrap_err(),
            LexError::CommentInExpression { line: 1 }
        );
        assert_eq!(
            tokenize("[(x)]").unwrap_err(),
            LexError::VariadicInExpression { line: 1 }
        );
        assert_eq!(
            tokenize("\n[{x}]").unwrap_err(),
            LexError::ScopeInExpression { line: 2 }
        );
    }

    #[test]
    fn forbidden_characters_in_variadics() {
        assert_eq!(
            tokenize("(a (b))").unwrap_err(),
            LexError::NestedVariadic { line: 1 }
        );
        assert_eq!(
            tokenize("(a ; b)").unwrap_err(),
            LexError::CommentInVariadic { line: 1 }
        );
        assert_eq!(
            tokenize("(a {b})").unwrap_err(),
            LexError::ScopeInVariadic { line: 1 }
        );
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut tokenizer = Tokenizer::new("a \"b".chars(), 1);
        assert!(matches!(tokenizer.next(), Some(Ok(_))));
        assert!(matches!(tokenizer.next(), Some(Err(_))));
        assert!(tokenizer.next().is_none());
    }

    #[test]
    fn empty_and_comment_only_input() {
        assert!(texts("").is_empty());
        assert!(texts("   ; only a comment").is_empty());
        assert!(texts("\n\n").is_empty());
    }
}
