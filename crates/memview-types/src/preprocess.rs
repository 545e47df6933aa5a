//! Lexer/preprocessor: header text to token stream.
//!
//! Works line-by-line on comment-stripped text: backslash continuations are
//! joined, directive lines (`#define`, `#if`, `#ifdef`, `#ifndef`, `#else`,
//! `#endif`) mutate the macro table and conditional stack without emitting
//! tokens, and every other line is macro-substituted and scanned. A line is
//! emitted only while every entry of the conditional stack is true.

use crate::error::{TypeError, TypeResult};
use crate::expr::{self, EvalScope};
use crate::token::{scan_line, Token};
use std::collections::{HashMap, HashSet, VecDeque};

/// Substitution passes per line before giving up on self-referential macros.
const MAX_SUBST_PASSES: usize = 64;

/// String-substitution macro table.
///
/// Function-like defines are recorded by name only; this engine has no
/// expansion capability for them.
#[derive(Debug, Clone, Default)]
pub struct MacroTable {
    values: HashMap<String, String>,
    function_like: HashSet<String>,
}

impl MacroTable {
    pub fn new(starting: HashMap<String, String>) -> Self {
        Self {
            values: starting,
            function_like: HashSet::new(),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn define_function_like(&mut self, name: impl Into<String>) {
        self.function_like.insert(name.into());
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.values.contains_key(name) || self.function_like.contains(name)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Substitute macro names in `line`, word-boundary safe, repeating until
    /// the current macro set is exhausted for the line. With
    /// `protect_defined`, the argument of `defined(NAME)` / `defined NAME` is
    /// left untouched.
    pub fn substitute(&self, line: &str, protect_defined: bool) -> String {
        let mut text = line.to_string();
        for _ in 0..MAX_SUBST_PASSES {
            let (next, changed) = self.substitute_once(&text, protect_defined);
            text = next;
            if !changed {
                break;
            }
        }
        text
    }

    fn substitute_once(&self, line: &str, protect_defined: bool) -> (String, bool) {
        let mut out = String::with_capacity(line.len());
        let mut changed = false;
        let bytes = line.as_bytes();
        let mut pos = 0;
        let mut prev: Option<char> = None;

        while pos < bytes.len() {
            let ch = bytes[pos] as char;
            let boundary_before = !prev.is_some_and(|p| p.is_ascii_alphanumeric() || p == '_');

            if (ch.is_ascii_alphabetic() || ch == '_') && boundary_before {
                let start = pos;
                while pos < bytes.len()
                    && ((bytes[pos] as char).is_ascii_alphanumeric() || bytes[pos] == b'_')
                {
                    pos += 1;
                }
                let word = &line[start..pos];
                prev = line[..pos].chars().last();

                if protect_defined && word == "defined" {
                    out.push_str(word);
                    // Copy the protected argument verbatim: `(NAME)` or NAME
                    let rest = &line[pos..];
                    let skipped = copy_defined_argument(rest, &mut out);
                    pos += skipped;
                    prev = out.chars().last();
                    continue;
                }

                match self.values.get(word) {
                    Some(replacement) => {
                        out.push_str(replacement);
                        changed = true;
                    }
                    None => out.push_str(word),
                }
            } else {
                let Some(ch) = line[pos..].chars().next() else { break };
                out.push(ch);
                prev = Some(ch);
                pos += ch.len_utf8();
            }
        }

        (out, changed)
    }
}

/// Copy `(NAME)` or ` NAME` following `defined` without substitution; returns
/// the number of bytes consumed from `rest`.
fn copy_defined_argument(rest: &str, out: &mut String) -> usize {
    let mut consumed = 0;
    let bytes = rest.as_bytes();

    while consumed < bytes.len() && (bytes[consumed] as char).is_ascii_whitespace() {
        out.push(bytes[consumed] as char);
        consumed += 1;
    }
    let parenthesized = bytes.get(consumed) == Some(&b'(');
    if parenthesized {
        out.push('(');
        consumed += 1;
        while consumed < bytes.len() && (bytes[consumed] as char).is_ascii_whitespace() {
            out.push(bytes[consumed] as char);
            consumed += 1;
        }
    }
    while consumed < bytes.len()
        && ((bytes[consumed] as char).is_ascii_alphanumeric() || bytes[consumed] == b'_')
    {
        out.push(bytes[consumed] as char);
        consumed += 1;
    }
    if parenthesized {
        while consumed < bytes.len() && (bytes[consumed] as char).is_ascii_whitespace() {
            out.push(bytes[consumed] as char);
            consumed += 1;
        }
        if bytes.get(consumed) == Some(&b')') {
            out.push(')');
            consumed += 1;
        }
    }
    consumed
}

/// `#if` conditions see the macro table for `defined()`; everything else
/// delegates to the surrounding parse scope.
struct IfScope<'a> {
    macros: &'a MacroTable,
    outer: &'a dyn EvalScope,
}

impl EvalScope for IfScope<'_> {
    fn enum_value(&self, name: &str) -> Option<i64> {
        self.outer.enum_value(name)
    }

    fn size_of(&self, type_name: &str, pointer_depth: u32) -> TypeResult<usize> {
        self.outer.size_of(type_name, pointer_depth)
    }

    fn is_defined(&self, name: &str) -> bool {
        self.macros.is_defined(name)
    }
}

/// Pull-based preprocessing tokenizer over one header.
///
/// The token sequence is lazy and single-pass; restart by re-construction.
pub struct Preprocessor {
    /// Logical lines (continuations joined) with their first physical line.
    lines: Vec<(String, u32)>,
    next_line: usize,
    macros: MacroTable,
    /// One entry per open `#if`/`#ifdef`/`#ifndef`, with the directive line.
    cond_stack: Vec<(bool, u32)>,
    queue: VecDeque<Token>,
}

impl Preprocessor {
    pub fn new(text: &str, starting_macros: HashMap<String, String>) -> TypeResult<Self> {
        let stripped = strip_comments(text)?;
        let lines = join_continuations(&stripped);
        Ok(Self {
            lines,
            next_line: 0,
            macros: MacroTable::new(starting_macros),
            cond_stack: Vec::new(),
            queue: VecDeque::new(),
        })
    }

    pub fn macros(&self) -> &MacroTable {
        &self.macros
    }

    /// Next token, or `None` at end of header.
    pub fn next_token(&mut self, scope: &dyn EvalScope) -> TypeResult<Option<Token>> {
        loop {
            if let Some(token) = self.queue.pop_front() {
                return Ok(Some(token));
            }

            let Some((line, lineno)) = self.lines.get(self.next_line).cloned() else {
                if let Some(&(_, open_line)) = self.cond_stack.last() {
                    return Err(TypeError::lex(open_line, "unterminated conditional"));
                }
                return Ok(None);
            };
            self.next_line += 1;

            let trimmed = line.trim();
            if let Some(directive) = trimmed.strip_prefix('#') {
                self.handle_directive(directive.trim_start(), lineno, scope)?;
                continue;
            }

            if self.active() && !trimmed.is_empty() {
                let substituted = self.macros.substitute(&line, false);
                self.queue.extend(scan_line(&substituted, lineno)?);
            }
        }
    }

    /// Is the current line inside an included branch of every open conditional?
    fn active(&self) -> bool {
        self.cond_stack.iter().all(|&(included, _)| included)
    }

    fn handle_directive(
        &mut self,
        directive: &str,
        lineno: u32,
        scope: &dyn EvalScope,
    ) -> TypeResult<()> {
        let (word, rest) = match directive.find(|c: char| c.is_ascii_whitespace()) {
            Some(split) => (&directive[..split], directive[split..].trim()),
            None => (directive, ""),
        };

        match word {
            "define" => {
                if self.active() {
                    self.handle_define(rest);
                }
            }
            "ifdef" | "ifndef" => {
                let included = if self.active() {
                    let defined = self.macros.is_defined(first_word(rest));
                    (word == "ifdef") == defined
                } else {
                    false
                };
                self.cond_stack.push((included, lineno));
            }
            "if" => {
                let included = if self.active() {
                    let substituted = self.macros.substitute(rest, true);
                    let tokens = scan_line(&substituted, lineno)?;
                    let mut pos = 0;
                    let if_scope = IfScope {
                        macros: &self.macros,
                        outer: scope,
                    };
                    expr::evaluate(&tokens, &mut pos, &if_scope, None)? != 0
                } else {
                    false
                };
                self.cond_stack.push((included, lineno));
            }
            "else" => match self.cond_stack.last_mut() {
                Some((included, _)) => *included = !*included,
                None => return Err(TypeError::lex(lineno, "#else without matching #if")),
            },
            "endif" => {
                if self.cond_stack.pop().is_none() {
                    return Err(TypeError::lex(lineno, "#endif without matching #if"));
                }
            }
            // #include, #pragma, #undef and friends are outside this engine's
            // preprocessor subset; their lines emit nothing.
            _ => {}
        }
        Ok(())
    }

    fn handle_define(&mut self, rest: &str) {
        let name_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if name.is_empty() {
            return;
        }
        // `NAME(` with no gap is a function-like define: recognized, not expanded
        if rest[name_end..].starts_with('(') {
            self.macros.define_function_like(name);
            return;
        }
        let value = rest[name_end..].trim();
        // Macros may alias macros: the body is substituted before storage
        let value = self.macros.substitute(value, false);
        self.macros.define(name, value);
    }
}

fn first_word(s: &str) -> &str {
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    &s[..end]
}

/// Replace comments with whitespace, preserving newlines so line numbers
/// survive. Fails on an unterminated block comment.
fn strip_comments(text: &str) -> TypeResult<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut line: u32 = 1;

    while let Some((pos, ch)) = chars.next() {
        if ch == '/' && text[pos..].starts_with("//") {
            while let Some(&(_, next)) = chars.peek() {
                if next == '\n' {
                    break;
                }
                chars.next();
            }
        } else if ch == '/' && text[pos..].starts_with("/*") {
            let start_line = line;
            chars.next();
            let mut closed = false;
            while let Some((inner_pos, inner)) = chars.next() {
                if inner == '*' && text[inner_pos..].starts_with("*/") {
                    chars.next();
                    closed = true;
                    break;
                }
                if inner == '\n' {
                    line += 1;
                    out.push('\n');
                }
            }
            if !closed {
                return Err(TypeError::lex(start_line, "unterminated block comment"));
            }
            out.push(' ');
        } else {
            if ch == '\n' {
                line += 1;
            }
            out.push(ch);
        }
    }
    Ok(out)
}

/// Split into logical lines, joining backslash-newline continuations.
fn join_continuations(text: &str) -> Vec<(String, u32)> {
    let mut lines = Vec::new();
    let mut pending: Option<(String, u32)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx as u32 + 1;
        let (mut logical, start) = match pending.take() {
            Some((prefix, start)) => (prefix, start),
            None => (String::new(), lineno),
        };
        if let Some(stripped) = raw.strip_suffix('\\') {
            logical.push_str(stripped);
            pending = Some((logical, start));
        } else {
            logical.push_str(raw);
            lines.push((logical, start));
        }
    }
    if let Some(rest) = pending {
        lines.push(rest);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TypeResult;

    struct NullScope;

    impl EvalScope for NullScope {
        fn enum_value(&self, _name: &str) -> Option<i64> {
            None
        }

        fn size_of(&self, type_name: &str, _pointer_depth: u32) -> TypeResult<usize> {
            Err(TypeError::UnknownType(type_name.to_string()))
        }

        fn is_defined(&self, _name: &str) -> bool {
            false
        }
    }

    fn all_tokens(text: &str) -> TypeResult<Vec<String>> {
        let mut pre = Preprocessor::new(text, HashMap::new())?;
        let mut out = Vec::new();
        while let Some(tok) = pre.next_token(&NullScope)? {
            out.push(tok.text);
        }
        Ok(out)
    }

    #[test]
    fn test_plain_lines_tokenized() {
        let toks = all_tokens("int x;\nint y;").unwrap();
        assert_eq!(toks, vec!["int", "x", ";", "int", "y", ";"]);
    }

    #[test]
    fn test_macro_substitution() {
        let toks = all_tokens("#define COUNT 4\nchar buf[COUNT];").unwrap();
        assert_eq!(toks, vec!["char", "buf", "[", "4", "]", ";"]);
    }

    #[test]
    fn test_word_boundary_substitution() {
        // FOOBAR and XFOO must not change; isolated FOO becomes 2
        let toks = all_tokens("#define FOO 2\nFOOBAR XFOO FOO").unwrap();
        assert_eq!(toks, vec!["FOOBAR", "XFOO", "2"]);
    }

    #[test]
    fn test_macro_aliasing_macro() {
        let toks = all_tokens("#define A 7\n#define B A\nB").unwrap();
        assert_eq!(toks, vec!["7"]);
    }

    #[test]
    fn test_chained_substitution_on_line() {
        // C expands to B which expands to A's value within one line
        let toks = all_tokens("#define A 1\n#define B A + 1\nB + 1").unwrap();
        assert_eq!(toks, vec!["1", "+", "1", "+", "1"]);
    }

    #[test]
    fn test_self_referential_macro_terminates() {
        // No fixed point exists; substitution must still terminate
        let text = "#define LOOP 1 + LOOP\nLOOP";
        let mut pre = Preprocessor::new(text, HashMap::new()).unwrap();
        while let Ok(Some(_)) = pre.next_token(&NullScope) {}
    }

    #[test]
    fn test_function_like_define_not_expanded() {
        let toks = all_tokens("#define MAX(a, b) ((a) > (b) ? (a) : (b))\nMAX").unwrap();
        assert_eq!(toks, vec!["MAX"]);
    }

    #[test]
    fn test_ifdef_suppression() {
        let text = "#ifdef MISSING\nint hidden;\n#endif\nint kept;";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "kept", ";"]);
    }

    #[test]
    fn test_ifdef_else() {
        let text = "#ifdef MISSING\nint a;\n#else\nint b;\n#endif";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "b", ";"]);
    }

    #[test]
    fn test_ifndef() {
        let text = "#ifndef MISSING\nint a;\n#endif";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "a", ";"]);
    }

    #[test]
    fn test_nested_conditional_suppression_is_transitive() {
        let text = "#ifdef OUTER\n#ifndef INNER\nint a;\n#endif\n#endif\nint b;";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "b", ";"]);
    }

    #[test]
    fn test_if_expression() {
        let text = "#define VER 3\n#if VER >= 2\nint a;\n#endif";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "a", ";"]);
    }

    #[test]
    fn test_if_defined_protected_from_substitution() {
        let text = "#define FOO 1\n#if defined(FOO) && FOO\nint a;\n#endif";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "a", ";"]);
    }

    #[test]
    fn test_if_unknown_identifier_is_false() {
        let text = "#if TOTALLY_UNKNOWN\nint a;\n#endif\nint b;";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "b", ";"]);
    }

    #[test]
    fn test_if_unknown_call_form_is_true() {
        let text = "#if PROBE(x)\nint a;\n#endif";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "a", ";"]);
    }

    #[test]
    fn test_define_inside_suppressed_branch_ignored() {
        let text = "#ifdef MISSING\n#define FOO 1\n#endif\n#ifdef FOO\nint a;\n#endif\nint b;";
        assert_eq!(all_tokens(text).unwrap(), vec!["int", "b", ";"]);
    }

    #[test]
    fn test_starting_macros() {
        let mut start = HashMap::new();
        start.insert("WIDTH".to_string(), "16".to_string());
        let mut pre = Preprocessor::new("char b[WIDTH];", start).unwrap();
        let mut toks = Vec::new();
        while let Some(t) = pre.next_token(&NullScope).unwrap() {
            toks.push(t.text);
        }
        assert_eq!(toks, vec!["char", "b", "[", "16", "]", ";"]);
    }

    #[test]
    fn test_continuation_joining() {
        let toks = all_tokens("#define WIDE \\\n8\nchar b[WIDE];").unwrap();
        assert_eq!(toks, vec!["char", "b", "[", "8", "]", ";"]);
    }

    #[test]
    fn test_comments_stripped_before_substitution() {
        let toks = all_tokens("#define N 2\nint /* N */ x; // N\n").unwrap();
        assert_eq!(toks, vec!["int", "x", ";"]);
    }

    #[test]
    fn test_multiline_block_comment() {
        let toks = all_tokens("/* a\nb\nc */int x;").unwrap();
        assert_eq!(toks, vec!["int", "x", ";"]);
    }

    #[test]
    fn test_multibyte_chars_inside_comments() {
        let toks = all_tokens("/* café — header */\nstruct A { int x; };").unwrap();
        assert_eq!(
            toks,
            vec!["struct", "A", "{", "int", "x", ";", "}", ";"]
        );
        let toks = all_tokens("// über\nint y;").unwrap();
        assert_eq!(toks, vec!["int", "y", ";"]);
    }

    #[test]
    fn test_multibyte_chars_outside_comments_error_cleanly() {
        // Non-ASCII source text is a lex error, never a panic.
        let err = all_tokens("int €;").unwrap_err();
        assert!(matches!(err, TypeError::Lex { .. }));
    }

    #[test]
    fn test_unterminated_block_comment_is_fatal() {
        let err = all_tokens("int x;\n/* oops").unwrap_err();
        assert!(matches!(err, TypeError::Lex { line: 2, .. }));
    }

    #[test]
    fn test_unterminated_conditional_is_fatal() {
        let err = all_tokens("#ifdef FOO\nint x;").unwrap_err();
        assert!(matches!(err, TypeError::Lex { line: 1, .. }));
    }

    #[test]
    fn test_else_without_if_is_fatal() {
        assert!(all_tokens("#else").is_err());
        assert!(all_tokens("#endif").is_err());
    }

    #[test]
    fn test_unknown_directives_skipped() {
        let toks = all_tokens("#include <stdio.h>\n#pragma once\nint x;").unwrap();
        assert_eq!(toks, vec!["int", "x", ";"]);
    }

    #[test]
    fn test_line_numbers_preserved_across_comments() {
        let mut pre = Preprocessor::new("/* one\ntwo */\nint x;", HashMap::new()).unwrap();
        let tok = pre.next_token(&NullScope).unwrap().unwrap();
        assert_eq!(tok.line, 3);
    }
}
