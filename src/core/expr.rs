// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Constant-expression evaluation for `.define`, `.if` conditions and
//! `ORG` operands.
//!
//! The grammar is the restricted arithmetic/bitwise/comparison set
//! `+ - * / % & | ^ ~ << >> == != < > <= >=` with parentheses. Every
//! identifier is substituted with its constant (or label) value before
//! evaluation; arithmetic wraps to 16-bit two's complement after each
//! operation.

use crate::core::error::{AsmError, AsmErrorKind};

/// Context for expression evaluation: resolves identifiers to values.
pub trait EvalContext {
    fn lookup_symbol(&self, name: &str) -> Option<i64>;
}

/// Simple evaluation context wrapping a symbol lookup function.
pub struct SimpleEvalContext<F>
where
    F: Fn(&str) -> Option<i64>,
{
    lookup: F,
}

impl<F> SimpleEvalContext<F>
where
    F: Fn(&str) -> Option<i64>,
{
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F> EvalContext for SimpleEvalContext<F>
where
    F: Fn(&str) -> Option<i64>,
{
    fn lookup_symbol(&self, name: &str) -> Option<i64> {
        (self.lookup)(name)
    }
}

/// Parse a number literal: `$2A` / `0x2A` hex, decimal, or `'c'` char.
pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(hex) = text.strip_prefix('$') {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if let Some(rest) = text.strip_prefix('\'') {
        let mut chars = rest.chars();
        let c = chars.next()?;
        if chars.next() == Some('\'') && chars.next().is_none() {
            return Some(c as i64);
        }
        return None;
    }
    text.parse::<i64>().ok()
}

/// Evaluate an expression string against the given context.
pub fn evaluate(text: &str, ctx: &dyn EvalContext) -> Result<i64, AsmError> {
    let tokens = tokenize(text)?;
    let mut parser = ExprParser { tokens, pos: 0, ctx };
    let value = parser.parse_expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(expr_error("Unexpected trailing token in expression", Some(text)));
    }
    Ok(value)
}

fn expr_error(msg: &str, param: Option<&str>) -> AsmError {
    AsmError::new(AsmErrorKind::Expression, msg, param)
}

fn wrap16(value: i64) -> i64 {
    i64::from(value as u16 as i16)
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Tok>, AsmError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let c = bytes[pos];
        match c {
            b' ' | b'\t' => {
                pos += 1;
            }
            b'(' => {
                tokens.push(Tok::LParen);
                pos += 1;
            }
            b')' => {
                tokens.push(Tok::RParen);
                pos += 1;
            }
            b'<' | b'>' | b'=' | b'!' => {
                let two = &text[pos..(pos + 2).min(text.len())];
                let op = match two {
                    "<<" => Some("<<"),
                    ">>" => Some(">>"),
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    "==" => Some("=="),
                    "!=" => Some("!="),
                    _ => None,
                };
                if let Some(op) = op {
                    tokens.push(Tok::Op(op));
                    pos += 2;
                } else if c == b'<' || c == b'>' {
                    tokens.push(Tok::Op(if c == b'<' { "<" } else { ">" }));
                    pos += 1;
                } else {
                    return Err(expr_error("Invalid operator in expression", Some(two)));
                }
            }
            b'+' | b'-' | b'*' | b'/' | b'%' | b'&' | b'|' | b'^' | b'~' => {
                let op = match c {
                    b'+' => "+",
                    b'-' => "-",
                    b'*' => "*",
                    b'/' => "/",
                    b'%' => "%",
                    b'&' => "&",
                    b'|' => "|",
                    b'^' => "^",
                    _ => "~",
                };
                tokens.push(Tok::Op(op));
                pos += 1;
            }
            b'$' | b'0'..=b'9' | b'\'' => {
                let start = pos;
                pos += 1;
                if c == b'\'' {
                    while pos < bytes.len() && bytes[pos] != b'\'' {
                        pos += 1;
                    }
                    pos = (pos + 1).min(bytes.len());
                } else {
                    while pos < bytes.len()
                        && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_')
                    {
                        pos += 1;
                    }
                }
                let lexeme: String = text[start..pos].chars().filter(|&c| c != '_').collect();
                let value = parse_number(&lexeme)
                    .ok_or_else(|| expr_error("Invalid number in expression", Some(&lexeme)))?;
                tokens.push(Tok::Num(value));
            }
            _ if c.is_ascii_alphabetic() || c == b'_' || c == b'.' => {
                let start = pos;
                while pos < bytes.len()
                    && (bytes[pos].is_ascii_alphanumeric()
                        || bytes[pos] == b'_'
                        || bytes[pos] == b'.')
                {
                    pos += 1;
                }
                tokens.push(Tok::Ident(text[start..pos].to_string()));
            }
            _ => {
                let ch: String = text[pos..].chars().take(1).collect();
                return Err(expr_error("Invalid character in expression", Some(&ch)));
            }
        }
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: Vec<Tok>,
    pos: usize,
    ctx: &'a dyn EvalContext,
}

/// Binding powers, loosest first: `|` < `^` < `&` < `== !=` <
/// `< > <= >=` < `<< >>` < `+ -` < `* / %`.
fn precedence(op: &str) -> Option<u8> {
    Some(match op {
        "|" => 1,
        "^" => 2,
        "&" => 3,
        "==" | "!=" => 4,
        "<" | ">" | "<=" | ">=" => 5,
        "<<" | ">>" => 6,
        "+" | "-" => 7,
        "*" | "/" | "%" => 8,
        _ => return None,
    })
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn parse_expr(&mut self, min_prec: u8) -> Result<i64, AsmError> {
        let mut lhs = self.parse_unary()?;
        while let Some(Tok::Op(op)) = self.peek() {
            let op = *op;
            let Some(prec) = precedence(op) else { break };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.parse_expr(prec + 1)?;
            lhs = apply_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<i64, AsmError> {
        match self.peek() {
            Some(Tok::Op("-")) => {
                self.pos += 1;
                Ok(wrap16(-self.parse_unary()?))
            }
            Some(Tok::Op("+")) => {
                self.pos += 1;
                self.parse_unary()
            }
            Some(Tok::Op("~")) => {
                self.pos += 1;
                Ok(wrap16(!self.parse_unary()?))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<i64, AsmError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Tok::Num(value)) => {
                self.pos += 1;
                Ok(value)
            }
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                self.ctx.lookup_symbol(&name).ok_or_else(|| {
                    AsmError::new(AsmErrorKind::Resolution, "Undefined constant", Some(&name))
                })
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let value = self.parse_expr(0)?;
                match self.peek() {
                    Some(Tok::RParen) => {
                        self.pos += 1;
                        Ok(value)
                    }
                    _ => Err(expr_error("Missing closing parenthesis", None)),
                }
            }
            _ => Err(expr_error("Expected operand in expression", None)),
        }
    }
}

/// Apply a binary operator, wrapping results to the 16-bit domain.
pub fn apply_binary(op: &str, l: i64, r: i64) -> Result<i64, AsmError> {
    Ok(match op {
        "+" => wrap16(l.wrapping_add(r)),
        "-" => wrap16(l.wrapping_sub(r)),
        "*" => wrap16(l.wrapping_mul(r)),
        "/" => {
            if r == 0 {
                return Err(expr_error("Division by zero", None));
            }
            wrap16(l.wrapping_div(r))
        }
        "%" => {
            if r == 0 {
                return Err(expr_error("Modulo by zero", None));
            }
            wrap16(l.wrapping_rem(r))
        }
        "&" => wrap16(l & r),
        "|" => wrap16(l | r),
        "^" => wrap16(l ^ r),
        "<<" => wrap16(l.wrapping_shl((r & 0x3f) as u32)),
        ">>" => wrap16(((l as u16 as u64) >> (r & 0x3f)) as i64),
        "==" => (l == r) as i64,
        "!=" => (l != r) as i64,
        "<" => (l < r) as i64,
        ">" => (l > r) as i64,
        "<=" => (l <= r) as i64,
        ">=" => (l >= r) as i64,
        _ => return Err(expr_error("Invalid operator in expression", Some(op))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval(text: &str) -> i64 {
        evaluate(text, &SimpleEvalContext::new(|_| None)).unwrap()
    }

    fn eval_with(text: &str, syms: &[(&str, i64)]) -> Result<i64, AsmError> {
        let map: HashMap<String, i64> = syms
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        evaluate(
            text,
            &SimpleEvalContext::new(move |name| map.get(name).copied()),
        )
    }

    #[test]
    fn literal_formats() {
        assert_eq!(eval("42"), 42);
        assert_eq!(eval("$2A"), 42);
        assert_eq!(eval("0x2A"), 42);
        assert_eq!(eval("'*'"), 42);
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(eval("2+3*4"), 14);
        assert_eq!(eval("(2+3)*4"), 20);
        assert_eq!(eval("1<<4|1"), 17);
        assert_eq!(eval("16>>2"), 4);
        assert_eq!(eval("~0&$F"), 15);
    }

    #[test]
    fn comparisons_yield_zero_or_one() {
        assert_eq!(eval("3<4"), 1);
        assert_eq!(eval("4<=4"), 1);
        assert_eq!(eval("5==6"), 0);
        assert_eq!(eval("5!=6"), 1);
        assert_eq!(eval("5>6"), 0);
        assert_eq!(eval("6>=6"), 1);
    }

    #[test]
    fn arithmetic_wraps_to_16_bits() {
        assert_eq!(eval("$7FFF+1"), -32768);
        assert_eq!(eval("$FFFF&$FFFF"), -1);
        assert_eq!(eval("-1>>12"), 15);
    }

    #[test]
    fn identifiers_resolve_through_context() {
        assert_eq!(eval_with("BASE+4", &[("BASE", 0x100)]).unwrap(), 0x104);
        let err = eval_with("MISSING+1", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Undefined constant: MISSING");
    }

    #[test]
    fn division_by_zero_is_reported() {
        let err = eval_with("4/0", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Division by zero");
        let err = eval_with("4%0", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Modulo by zero");
    }

    #[test]
    fn unary_operators() {
        assert_eq!(eval("-5+10"), 5);
        assert_eq!(eval("~0"), -1);
        assert_eq!(eval("+7"), 7);
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        let none = SimpleEvalContext::new(|_| None);
        assert!(evaluate("4+", &none).is_err());
        assert!(evaluate("(4", &none).is_err());
        assert!(evaluate("4 5", &none).is_err());
    }
}
