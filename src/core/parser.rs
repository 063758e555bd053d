// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source-text front end: line tokenizer plus statement builder.
//!
//! The output is the typed statement sequence consumed by the assembler
//! core ([`crate::core::statement`]); operand literals are parsed and
//! range-checked here, control constructs arrive as nested blocks, and
//! the core never has to look at source text again.
//!
//! Comments are `\` to end of line and inline `( ... )`; a parenthesized
//! comment directly after a macro or colon-definition name is kept as its
//! stack-effect comment. `.define`, `.if` and `ORG` take the rest of the
//! line as an expression string.

use crate::core::error::{AsmError, AsmErrorKind, Diagnostic, Severity};
use crate::core::isa;
use crate::core::statement::{ControlKind, JumpKind, SourceLoc, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Word,
    StackComment,
    Str,
    Expr,
}

#[derive(Debug, Clone)]
struct Tok {
    kind: TokKind,
    text: String,
    line: u32,
    col: usize,
}

/// Parse a whole source file into a statement sequence.
pub fn parse_source(file: &str, source: &str) -> Result<Vec<Statement>, Diagnostic> {
    let lines: Vec<String> = source.lines().map(str::to_string).collect();
    let tokens = tokenize(file, &lines)?;
    let mut builder = Builder {
        file,
        lines: &lines,
        tokens,
        pos: 0,
    };
    let (statements, _) = builder.parse_block(&[], None)?;
    Ok(statements)
}

/// Directives whose operand is the untokenized rest of the line.
fn takes_expr_operand(word: &str) -> bool {
    word.eq_ignore_ascii_case("org") || word == ".if"
}

fn tokenize(file: &str, lines: &[String]) -> Result<Vec<Tok>, Diagnostic> {
    let mut tokens = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let line_num = idx as u32 + 1;
        tokenize_line(file, line, line_num, &mut tokens)?;
    }
    Ok(tokens)
}

fn tokenize_line(
    file: &str,
    line: &str,
    line_num: u32,
    tokens: &mut Vec<Tok>,
) -> Result<(), Diagnostic> {
    let bytes = line.as_bytes();
    let mut pos = 0;
    loop {
        while pos < bytes.len() && (bytes[pos] == b' ' || bytes[pos] == b'\t') {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] == b'\\' {
            return Ok(());
        }
        let col = pos + 1;
        match bytes[pos] {
            b'(' => {
                let Some(end) = line[pos + 1..].find(')') else {
                    return Err(parse_diag(
                        file,
                        line,
                        line_num,
                        col,
                        "Unterminated ( comment",
                        None,
                    ));
                };
                let content = line[pos + 1..pos + 1 + end].trim().to_string();
                tokens.push(Tok {
                    kind: TokKind::StackComment,
                    text: content,
                    line: line_num,
                    col,
                });
                pos += end + 2;
            }
            b'"' => {
                let Some(end) = line[pos + 1..].find('"') else {
                    return Err(parse_diag(
                        file,
                        line,
                        line_num,
                        col,
                        "Unterminated string",
                        None,
                    ));
                };
                tokens.push(Tok {
                    kind: TokKind::Str,
                    text: line[pos + 1..pos + 1 + end].to_string(),
                    line: line_num,
                    col,
                });
                pos += end + 2;
            }
            _ => {
                let start = pos;
                while pos < bytes.len() && !matches!(bytes[pos], b' ' | b'\t' | b'\\') {
                    pos += 1;
                }
                let word = line[start..pos].to_string();
                let prev_is_define = matches!(tokens.last(),
                    Some(prev) if prev.line == line_num && prev.text == ".define");
                let capture_expr = takes_expr_operand(&word) || prev_is_define;
                let is_define = word == ".define";
                tokens.push(Tok {
                    kind: TokKind::Word,
                    text: word,
                    line: line_num,
                    col,
                });
                if is_define {
                    continue;
                }
                if capture_expr {
                    let rest = line[pos..]
                        .split('\\')
                        .next()
                        .unwrap_or("")
                        .trim()
                        .to_string();
                    tokens.push(Tok {
                        kind: TokKind::Expr,
                        text: rest,
                        line: line_num,
                        col: pos + 1,
                    });
                    return Ok(());
                }
            }
        }
    }
}

fn parse_diag(
    file: &str,
    source_line: &str,
    line: u32,
    col: usize,
    msg: &str,
    param: Option<&str>,
) -> Diagnostic {
    Diagnostic::new(line, Severity::Error, AsmError::new(AsmErrorKind::Parse, msg, param))
        .with_file(Some(file.to_string()))
        .with_column(Some(col))
        .with_source(Some(source_line.to_string()))
}

struct Builder<'a> {
    file: &'a str,
    lines: &'a [String],
    tokens: Vec<Tok>,
    pos: usize,
}

/// Closers that are only legal while their opener's block is active.
static DANGLING_CLOSERS: &[(&str, &str)] = &[
    ("THEN", "IF"),
    ("ELSE", "IF"),
    ("UNTIL", "BEGIN"),
    ("WHILE", "BEGIN"),
    ("REPEAT", "BEGIN"),
    ("LOOP", "DO"),
    ("+LOOP", "DO"),
    (";", ":"),
    (".ENDMACRO", ".macro"),
    (".ENDIF", ".if"),
];

impl<'a> Builder<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn loc(&self, tok: &Tok) -> SourceLoc {
        let source_line = self
            .lines
            .get(tok.line.saturating_sub(1) as usize)
            .cloned()
            .unwrap_or_default();
        SourceLoc::new(self.file, tok.line, tok.col, source_line)
    }

    fn error(&self, tok: &Tok, kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Diagnostic {
        let loc = self.loc(tok);
        Diagnostic::new(tok.line, Severity::Error, AsmError::new(kind, msg, param))
            .with_file(Some(self.file.to_string()))
            .with_column(Some(tok.col))
            .with_source(Some(loc.source_line))
    }

    /// Parse statements until one of `terminators` (case-insensitive) or
    /// end of input. Returns the statements and the matched terminator.
    fn parse_block(
        &mut self,
        terminators: &[&str],
        opener: Option<(&str, &Tok)>,
    ) -> Result<(Vec<Statement>, Option<String>), Diagnostic> {
        let mut statements = Vec::new();
        loop {
            let Some(tok) = self.peek().cloned() else {
                if let Some((open_word, open_tok)) = opener {
                    let msg = format!(
                        "{open_word} without matching {}",
                        expected_closer(open_word)
                    );
                    return Err(self.error(open_tok, AsmErrorKind::Control, &msg, None));
                }
                return Ok((statements, None));
            };
            if tok.kind == TokKind::Word {
                if let Some(term) = terminators
                    .iter()
                    .find(|t| tok.text.eq_ignore_ascii_case(t))
                {
                    self.pos += 1;
                    return Ok((statements, Some(term.to_uppercase())));
                }
            }
            self.parse_statement(&mut statements)?;
        }
    }

    fn parse_statement(&mut self, out: &mut Vec<Statement>) -> Result<(), Diagnostic> {
        let tok = self.next().expect("token available");
        match tok.kind {
            TokKind::StackComment => Ok(()),
            TokKind::Str => Err(self.error(&tok, AsmErrorKind::Parse, "Unexpected string", None)),
            TokKind::Expr => Err(self.error(
                &tok,
                AsmErrorKind::Parse,
                "Unexpected expression operand",
                None,
            )),
            TokKind::Word => self.parse_word_statement(tok, out),
        }
    }

    fn parse_word_statement(&mut self, tok: Tok, out: &mut Vec<Statement>) -> Result<(), Diagnostic> {
        let text = tok.text.as_str();
        let loc = self.loc(&tok);

        if let Some((_, opener)) = DANGLING_CLOSERS
            .iter()
            .find(|(closer, _)| text.eq_ignore_ascii_case(closer))
        {
            let msg = format!("{text} without matching {opener}");
            return Err(self.error(&tok, AsmErrorKind::Control, &msg, None));
        }

        if text.len() > 1 && text.ends_with(':') && !text.contains('[') {
            out.push(Statement::Label {
                name: text[..text.len() - 1].to_string(),
                loc,
            });
            return Ok(());
        }

        match text {
            ":" => {
                let (name, stack_effect) = self.definition_header(&tok, "subroutine")?;
                let (body, _) = self.parse_block(&[";"], Some((":", &tok)))?;
                out.push(Statement::SubroutineDef {
                    name,
                    stack_effect,
                    body,
                    loc,
                });
                return Ok(());
            }
            ".macro" => {
                let (name, stack_effect) = self.definition_header(&tok, "macro")?;
                let (body, _) = self.parse_block(&[".endmacro"], Some((".macro", &tok)))?;
                out.push(Statement::MacroDef {
                    name,
                    stack_effect,
                    body,
                    loc,
                });
                return Ok(());
            }
            ".arch_flag" => {
                let name = self.expect_word(&tok, "Missing architecture flag name")?;
                let value = self.expect_word(&tok, "Missing architecture flag value")?;
                out.push(Statement::ArchFlag {
                    name: name.text,
                    value: value.text,
                    loc,
                });
                return Ok(());
            }
            ".define" => {
                let name = self.expect_word(&tok, "Missing constant name")?;
                let expr = self.expect_expr(&tok, "Missing constant value")?;
                out.push(Statement::Define {
                    name: name.text,
                    expr,
                    loc,
                });
                return Ok(());
            }
            ".if" => {
                let condition = self.expect_expr(&tok, "Missing .if condition")?;
                let (body, _) = self.parse_block(&[".endif"], Some((".if", &tok)))?;
                out.push(Statement::IfBlock {
                    condition,
                    body,
                    loc,
                });
                return Ok(());
            }
            _ => {}
        }

        if text.eq_ignore_ascii_case("org") {
            let expr = self.expect_expr(&tok, "Missing ORG address")?;
            out.push(Statement::Org { expr, loc });
            return Ok(());
        }
        if text.eq_ignore_ascii_case("include") {
            let path = match self.peek() {
                Some(next) if next.kind == TokKind::Str => self.next().expect("peeked").text,
                _ => {
                    return Err(self.error(
                        &tok,
                        AsmErrorKind::Parse,
                        "Missing include file name",
                        None,
                    ))
                }
            };
            out.push(Statement::Include { path, loc });
            return Ok(());
        }
        for (word, kind) in [
            ("JMP", JumpKind::Jmp),
            ("ZJMP", JumpKind::ZJmp),
            ("CALL", JumpKind::Call),
        ] {
            if text.eq_ignore_ascii_case(word) {
                let target = self.expect_word(&tok, "Missing jump target")?;
                out.push(Statement::Jump {
                    kind,
                    target: target.text,
                    loc,
                });
                return Ok(());
            }
        }
        if text.eq_ignore_ascii_case("if") {
            let (true_body, term) = self.parse_block(&["ELSE", "THEN"], Some(("IF", &tok)))?;
            let kind = if term.as_deref() == Some("ELSE") {
                let (false_body, _) = self.parse_block(&["THEN"], Some(("IF", &tok)))?;
                ControlKind::IfElse {
                    true_body,
                    false_body,
                }
            } else {
                ControlKind::If { body: true_body }
            };
            out.push(Statement::Control { kind, loc });
            return Ok(());
        }
        if text.eq_ignore_ascii_case("begin") {
            let (head, term) = self.parse_block(&["UNTIL", "WHILE"], Some(("BEGIN", &tok)))?;
            let kind = if term.as_deref() == Some("WHILE") {
                let (tail, _) = self.parse_block(&["REPEAT"], Some(("BEGIN", &tok)))?;
                ControlKind::BeginWhileRepeat { head, tail }
            } else {
                ControlKind::BeginUntil { body: head }
            };
            out.push(Statement::Control { kind, loc });
            return Ok(());
        }
        if text.eq_ignore_ascii_case("do") {
            let (body, term) = self.parse_block(&["LOOP", "+LOOP"], Some(("DO", &tok)))?;
            let plus = term.as_deref() == Some("+LOOP");
            out.push(Statement::Control {
                kind: ControlKind::DoLoop { body, plus },
                loc,
            });
            return Ok(());
        }
        for (word, depth) in [("i", 0u8), ("j", 1), ("k", 2)] {
            if text.eq_ignore_ascii_case(word) {
                out.push(Statement::LoopIndex { depth, loc });
                return Ok(());
            }
        }
        if let Some(rest) = text.strip_prefix('#') {
            out.push(self.parse_literal(&tok, rest, loc)?);
            return Ok(());
        }

        let (name, modifiers) = split_modifiers(text);
        out.push(Statement::Word {
            name,
            modifiers,
            loc,
        });
        Ok(())
    }

    fn definition_header(
        &mut self,
        opener: &Tok,
        what: &str,
    ) -> Result<(String, Option<String>), Diagnostic> {
        let msg = format!("Missing {what} name");
        let name = self.expect_word(opener, &msg)?;
        let stack_effect = match self.peek() {
            Some(next) if next.kind == TokKind::StackComment => {
                Some(self.next().expect("peeked").text)
            }
            _ => None,
        };
        Ok((name.text, stack_effect))
    }

    fn expect_word(&mut self, at: &Tok, msg: &str) -> Result<Tok, Diagnostic> {
        match self.peek() {
            Some(next) if next.kind == TokKind::Word => Ok(self.next().expect("peeked")),
            _ => Err(self.error(at, AsmErrorKind::Parse, msg, None)),
        }
    }

    fn expect_expr(&mut self, at: &Tok, msg: &str) -> Result<String, Diagnostic> {
        match self.peek() {
            Some(next) if next.kind == TokKind::Expr && !next.text.is_empty() => {
                Ok(self.next().expect("peeked").text)
            }
            _ => Err(self.error(at, AsmErrorKind::Parse, msg, None)),
        }
    }

    fn parse_literal(
        &self,
        tok: &Tok,
        rest: &str,
        loc: SourceLoc,
    ) -> Result<Statement, Diagnostic> {
        if rest.starts_with('-') {
            return Err(self.error(
                tok,
                AsmErrorKind::Encoding,
                "Negative literals are not supported; push the absolute value, decrement, then invert with ~T",
                None,
            ));
        }
        if let Some(value) = crate::core::expr::parse_number(rest) {
            if value > i64::from(isa::LITERAL_MAX) {
                return Err(self.error(
                    tok,
                    AsmErrorKind::Encoding,
                    "Literal out of range",
                    Some(rest),
                ));
            }
            return Ok(Statement::Literal {
                value: value as u16,
                loc,
            });
        }
        if rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            && rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return Ok(Statement::LabelRef {
                name: rest.to_string(),
                loc,
            });
        }
        Err(self.error(tok, AsmErrorKind::Parse, "Invalid literal", Some(rest)))
    }
}

fn expected_closer(opener: &str) -> &'static str {
    match opener {
        ":" => ";",
        ".macro" => ".endmacro",
        ".if" => ".endif",
        "IF" => "THEN",
        "BEGIN" => "UNTIL or WHILE/REPEAT",
        "DO" => "LOOP",
        _ => "terminator",
    }
}

/// Split `OP[mod,mod]` into operation and modifier list. Compound ALU
/// names like `io[T]` are matched against the table first, so
/// `io[T][IORD]` splits at the second bracket.
fn split_modifiers(text: &str) -> (String, Vec<String>) {
    if isa::alu_op(text).is_some() || !text.ends_with(']') {
        return (text.to_string(), Vec::new());
    }
    for (idx, _) in text.char_indices().filter(|&(_, c)| c == '[') {
        let prefix = &text[..idx];
        if prefix.is_empty() {
            continue;
        }
        if isa::alu_op(prefix).is_some() {
            let inner = &text[idx + 1..text.len() - 1];
            let modifiers = inner
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            return (prefix.to_string(), modifiers);
        }
    }
    (text.to_string(), Vec::new())
}
