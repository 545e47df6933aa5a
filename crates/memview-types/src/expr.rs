//! Constant-expression evaluator.
//!
//! Two-stack (operand/operator) evaluation with the C operator-precedence
//! table, used both for `#if` conditions and for array-length expressions in
//! declarations. Deliberately permissive: a bare identifier that is neither an
//! enumerant nor a macro evaluates to 0, and an unrecognized call-form inside
//! a condition evaluates to true, because real headers reference platform
//! macros this engine does not model.

use crate::error::{TypeError, TypeResult};
use crate::token::{Token, TokenKind};

/// Name resolution available to an expression.
///
/// `#if` conditions also see the macro table (via `is_defined`); declaration
/// expressions see enumerants and the layout engine (via `size_of`).
pub trait EvalScope {
    /// Value of an in-scope enumerant, if one exists with this name.
    fn enum_value(&self, name: &str) -> Option<i64>;

    /// Size in bytes of a named type; `pointer_depth > 0` asks for the size
    /// of a pointer to it.
    fn size_of(&self, type_name: &str, pointer_depth: u32) -> TypeResult<usize>;

    /// Is `name` a defined macro?
    fn is_defined(&self, name: &str) -> bool;
}

/// Operator stack entry.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Binary(&'static str),
    Neg,
    Not,
}

impl Op {
    fn prec(self) -> u8 {
        match self {
            Op::Neg | Op::Not => 14,
            Op::Binary(op) => binary_prec(op).unwrap_or(0),
        }
    }
}

fn binary_prec(op: &str) -> Option<u8> {
    Some(match op {
        "||" | "&&" => 3,
        "|" => 5,
        "^" => 6,
        "&" => 7,
        "==" | "!=" => 8,
        "<" | "<=" | ">" | ">=" => 9,
        "<<" | ">>" => 10,
        "+" | "-" => 11,
        "*" | "/" | "%" => 12,
        _ => return None,
    })
}

/// Interned operator spelling for the stack.
fn intern(op: &str) -> Option<&'static str> {
    const ALL: &[&str] = &[
        "||", "&&", "|", "^", "&", "==", "!=", "<", "<=", ">", ">=", "<<", ">>", "+", "-", "*",
        "/", "%",
    ];
    ALL.iter().find(|s| **s == op).copied()
}

/// Evaluate a constant expression starting at `tokens[*pos]`.
///
/// Evaluation stops without consuming when it reaches `stop` (e.g. `)` or
/// `]`) or any token that cannot continue the expression; the caller decides
/// whether that is expected.
pub fn evaluate(
    tokens: &[Token],
    pos: &mut usize,
    scope: &dyn EvalScope,
    stop: Option<&str>,
) -> TypeResult<i64> {
    let line = tokens.get(*pos).map(|t| t.line).unwrap_or(0);
    let mut operands: Vec<i64> = Vec::new();
    let mut ops: Vec<Op> = Vec::new();
    let mut expect_operand = true;

    loop {
        let Some(tok) = tokens.get(*pos) else { break };
        if let Some(stop) = stop {
            if tok.is(stop) {
                break;
            }
        }

        if expect_operand {
            match tok.kind {
                TokenKind::Int | TokenKind::Bool => {
                    let value = tok.value.unwrap_or(0);
                    *pos += 1;
                    push_operand(value, &mut operands, &mut ops);
                    expect_operand = false;
                }
                TokenKind::Operator if tok.is("-") => {
                    ops.push(Op::Neg);
                    *pos += 1;
                }
                TokenKind::Operator if tok.is("!") => {
                    ops.push(Op::Not);
                    *pos += 1;
                }
                TokenKind::Punct if tok.is("(") => {
                    *pos += 1;
                    let inner = evaluate(tokens, pos, scope, Some(")"))?;
                    expect_punct(tokens, pos, ")", line)?;
                    push_operand(inner, &mut operands, &mut ops);
                    expect_operand = false;
                }
                TokenKind::Ident | TokenKind::Keyword => {
                    let value = operand_from_name(tokens, pos, scope, line)?;
                    push_operand(value, &mut operands, &mut ops);
                    expect_operand = false;
                }
                _ => break,
            }
        } else {
            let Some(op) = intern(&tok.text).filter(|op| binary_prec(op).is_some()) else {
                break;
            };
            let prec = binary_prec(op).unwrap_or(0);
            while ops.last().is_some_and(|top| top.prec() >= prec) {
                reduce(&mut operands, &mut ops, line)?;
            }
            ops.push(Op::Binary(op));
            *pos += 1;
            expect_operand = true;
        }
    }

    while !ops.is_empty() {
        reduce(&mut operands, &mut ops, line)?;
    }

    match operands.as_slice() {
        [value] => Ok(*value),
        _ => Err(TypeError::parse(line, "malformed constant expression")),
    }
}

/// Resolve an identifier in operand position: `sizeof(T)`, `defined(NAME)`,
/// an unknown call-form (truthy), or an enumerant/unknown name.
fn operand_from_name(
    tokens: &[Token],
    pos: &mut usize,
    scope: &dyn EvalScope,
    line: u32,
) -> TypeResult<i64> {
    let name = tokens[*pos].text.clone();
    *pos += 1;

    match name.as_str() {
        "sizeof" => {
            expect_punct(tokens, pos, "(", line)?;
            let mut words: Vec<&str> = Vec::new();
            let mut pointer_depth = 0u32;
            while let Some(tok) = tokens.get(*pos) {
                if tok.is(")") {
                    break;
                }
                match tok.kind {
                    TokenKind::Ident | TokenKind::Keyword => words.push(&tok.text),
                    TokenKind::Operator if tok.is("*") => pointer_depth += 1,
                    _ => return Err(TypeError::parse(tok.line, "malformed sizeof operand")),
                }
                *pos += 1;
            }
            expect_punct(tokens, pos, ")", line)?;
            // Tag keywords are not part of the registered name.
            words.retain(|w| !matches!(*w, "struct" | "union" | "enum"));
            if words.is_empty() {
                return Err(TypeError::parse(line, "sizeof with empty operand"));
            }
            let size = scope.size_of(&words.join(" "), pointer_depth)?;
            Ok(size as i64)
        }
        "defined" => {
            let parenthesized = tokens.get(*pos).is_some_and(|t| t.is("("));
            if parenthesized {
                *pos += 1;
            }
            let macro_name = tokens
                .get(*pos)
                .and_then(|t| t.ident().map(str::to_string))
                .ok_or_else(|| TypeError::parse(line, "defined() requires a name"))?;
            *pos += 1;
            if parenthesized {
                expect_punct(tokens, pos, ")", line)?;
            }
            Ok(scope.is_defined(&macro_name) as i64)
        }
        _ => {
            // An unexpanded function-like invocation is opaque: skip the
            // argument list and treat the whole call as true.
            if tokens.get(*pos).is_some_and(|t| t.is("(")) {
                skip_balanced_parens(tokens, pos, line)?;
                return Ok(1);
            }
            Ok(scope.enum_value(&name).unwrap_or(0))
        }
    }
}

fn skip_balanced_parens(tokens: &[Token], pos: &mut usize, line: u32) -> TypeResult<()> {
    let mut depth = 0usize;
    while let Some(tok) = tokens.get(*pos) {
        if tok.is("(") {
            depth += 1;
        } else if tok.is(")") {
            depth -= 1;
            if depth == 0 {
                *pos += 1;
                return Ok(());
            }
        }
        *pos += 1;
    }
    Err(TypeError::parse(line, "unbalanced parentheses"))
}

fn expect_punct(tokens: &[Token], pos: &mut usize, text: &str, line: u32) -> TypeResult<()> {
    match tokens.get(*pos) {
        Some(tok) if tok.is(text) => {
            *pos += 1;
            Ok(())
        }
        Some(tok) => Err(TypeError::parse(
            tok.line,
            format!("expected '{}', got '{}'", text, tok.text),
        )),
        None => Err(TypeError::parse(line, format!("expected '{}'", text))),
    }
}

/// Push an operand, immediately applying any pending unary operators.
fn push_operand(value: i64, operands: &mut Vec<i64>, ops: &mut Vec<Op>) {
    let mut value = value;
    while let Some(op) = ops.last() {
        match op {
            Op::Neg => value = value.wrapping_neg(),
            Op::Not => value = (value == 0) as i64,
            Op::Binary(_) => break,
        }
        ops.pop();
    }
    operands.push(value);
}

fn reduce(operands: &mut Vec<i64>, ops: &mut Vec<Op>, line: u32) -> TypeResult<()> {
    let op = match ops.pop() {
        Some(Op::Binary(op)) => op,
        // Pending unaries are applied at operand push; one here means the
        // operand never arrived.
        _ => return Err(TypeError::parse(line, "dangling operator")),
    };
    let (Some(rhs), Some(lhs)) = (operands.pop(), operands.pop()) else {
        return Err(TypeError::parse(line, "missing operand"));
    };
    let value = match op {
        "||" => ((lhs != 0) || (rhs != 0)) as i64,
        "&&" => ((lhs != 0) && (rhs != 0)) as i64,
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => (lhs == rhs) as i64,
        "!=" => (lhs != rhs) as i64,
        "<" => (lhs < rhs) as i64,
        "<=" => (lhs <= rhs) as i64,
        ">" => (lhs > rhs) as i64,
        ">=" => (lhs >= rhs) as i64,
        "<<" => lhs.wrapping_shl(rhs as u32),
        ">>" => lhs.wrapping_shr(rhs as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" => {
            if rhs == 0 {
                return Err(TypeError::parse(line, "division by zero"));
            }
            lhs.wrapping_div(rhs)
        }
        "%" => {
            if rhs == 0 {
                return Err(TypeError::parse(line, "division by zero"));
            }
            lhs.wrapping_rem(rhs)
        }
        _ => return Err(TypeError::parse(line, format!("unknown operator '{}'", op))),
    };
    operands.push(value);
    Ok(())
}
