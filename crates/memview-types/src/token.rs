//! Token model and line scanner.
//!
//! Tokens are produced per logical line, after the preprocessor has stripped
//! comments, joined continuations, and substituted macros. The scanner keeps
//! the raw spelling alongside the kind because the expression evaluator and
//! declaration parser both dispatch on operator/punctuation text.

use crate::error::{TypeError, TypeResult};

/// Keywords the declaration parser recognizes.
const KEYWORDS: &[&str] = &[
    "struct", "union", "enum", "typedef", "signed", "unsigned", "const", "volatile",
];

/// Multi-character operators, longest-match first.
const OPERATORS2: &[&str] = &["||", "&&", "==", "!=", "<=", ">=", "<<", ">>"];

/// Single-character operators.
const OPERATORS1: &str = "|^&<>+-*/%!=";

/// Punctuation characters.
const PUNCT: &str = ";,{}[]():";

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier (type name, field name, macro remnant).
    Ident,
    /// Reserved word (`struct`, `typedef`, ...).
    Keyword,
    /// Operator (`*`, `<<`, `&&`, ...).
    Operator,
    /// Punctuation (`;`, `{`, `[`, ...).
    Punct,
    /// Integer literal (decimal or hex).
    Int,
    /// `true` or `false`.
    Bool,
}

/// One token, with its source line for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Numeric value for `Int`/`Bool` tokens.
    pub value: Option<i64>,
    /// 1-based source line.
    pub line: u32,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }

    /// Identifier text, if this token is an identifier.
    pub fn ident(&self) -> Option<&str> {
        self.is_ident().then_some(self.text.as_str())
    }
}

/// Scan one comment-free, macro-substituted line into tokens.
pub fn scan_line(line: &str, lineno: u32) -> TypeResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = line.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let ch = bytes[pos] as char;

        if ch.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let start = pos;
            while pos < bytes.len()
                && ((bytes[pos] as char).is_ascii_alphanumeric() || bytes[pos] == b'_')
            {
                pos += 1;
            }
            let text = &line[start..pos];
            let token = match text {
                "true" => Token {
                    kind: TokenKind::Bool,
                    text: text.to_string(),
                    value: Some(1),
                    line: lineno,
                },
                "false" => Token {
                    kind: TokenKind::Bool,
                    text: text.to_string(),
                    value: Some(0),
                    line: lineno,
                },
                _ if KEYWORDS.contains(&text) => Token {
                    kind: TokenKind::Keyword,
                    text: text.to_string(),
                    value: None,
                    line: lineno,
                },
                _ => Token {
                    kind: TokenKind::Ident,
                    text: text.to_string(),
                    value: None,
                    line: lineno,
                },
            };
            tokens.push(token);
            continue;
        }

        if ch.is_ascii_digit() {
            let (token, next) = scan_number(line, pos, lineno)?;
            tokens.push(token);
            pos = next;
            continue;
        }

        if let Some(op) = OPERATORS2
            .iter()
            .find(|op| line[pos..].starts_with(**op))
        {
            tokens.push(Token {
                kind: TokenKind::Operator,
                text: (*op).to_string(),
                value: None,
                line: lineno,
            });
            pos += op.len();
            continue;
        }

        if OPERATORS1.contains(ch) {
            tokens.push(Token {
                kind: TokenKind::Operator,
                text: ch.to_string(),
                value: None,
                line: lineno,
            });
            pos += 1;
            continue;
        }

        if PUNCT.contains(ch) {
            tokens.push(Token {
                kind: TokenKind::Punct,
                text: ch.to_string(),
                value: None,
                line: lineno,
            });
            pos += 1;
            continue;
        }

        let actual = line[pos..].chars().next().unwrap_or(ch);
        return Err(TypeError::lex(
            lineno,
            format!("unexpected character '{}'", actual),
        ));
    }

    Ok(tokens)
}

fn scan_number(line: &str, start: usize, lineno: u32) -> TypeResult<(Token, usize)> {
    let bytes = line.as_bytes();
    let mut pos = start;

    let value = if line[pos..].starts_with("0x") || line[pos..].starts_with("0X") {
        pos += 2;
        let digits_start = pos;
        while pos < bytes.len() && (bytes[pos] as char).is_ascii_hexdigit() {
            pos += 1;
        }
        i64::from_str_radix(&line[digits_start..pos], 16)
            .map_err(|_| TypeError::lex(lineno, format!("invalid hex literal: {}", &line[start..pos])))?
    } else {
        while pos < bytes.len() && (bytes[pos] as char).is_ascii_digit() {
            pos += 1;
        }
        line[start..pos]
            .parse()
            .map_err(|_| TypeError::lex(lineno, format!("invalid literal: {}", &line[start..pos])))?
    };

    // Tolerate u/l suffixes (0x10UL, 4L)
    while pos < bytes.len() && matches!(bytes[pos], b'u' | b'U' | b'l' | b'L') {
        pos += 1;
    }

    Ok((
        Token {
            kind: TokenKind::Int,
            text: line[start..pos].to_string(),
            value: Some(value),
            line: lineno,
        },
        pos,
    ))
}
