// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The final program artifact and the second resolution pass.
//!
//! Pass 2 is a pure function from the pass-1 instruction list plus the
//! label table to a new resolved [`Program`]; the input list is never
//! mutated, and re-resolving an already-resolved list is a no-op.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::core::error::{AsmError, AsmErrorKind, Diagnostic, Severity};
use crate::core::isa::JUMP_TARGET_MASK;
use crate::core::statement::{Instruction, InstrKind};
use crate::core::symbol_table::SymbolTable;

/// An address-indexed sparse map of resolved machine words, plus the
/// label and instruction metadata for symbol/listing output. Read-only
/// once built.
#[derive(Debug, Default)]
pub struct Program {
    words: BTreeMap<u16, u16>,
    labels: BTreeMap<u16, String>,
    instructions: Vec<Instruction>,
}

impl Program {
    pub fn word(&self, addr: u16) -> u16 {
        self.words.get(&addr).copied().unwrap_or(0)
    }

    pub fn words(&self) -> &BTreeMap<u16, u16> {
        &self.words
    }

    pub fn labels(&self) -> &BTreeMap<u16, String> {
        &self.labels
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn max_address(&self) -> Option<u16> {
        self.words.keys().next_back().copied()
    }

    /// The flat machine image: one hex word per line from address zero
    /// through the highest used address, gaps zero-filled.
    pub fn write_hex<W: Write>(&self, mut out: W) -> io::Result<()> {
        let Some(max) = self.max_address() else {
            return Ok(());
        };
        for addr in 0..=max {
            writeln!(out, "{:04X}", self.word(addr))?;
        }
        Ok(())
    }

    /// Symbol file: `ADDR label` per line, sorted by address.
    pub fn write_symbols<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (addr, name) in &self.labels {
            writeln!(out, "{addr:04X} {name}")?;
        }
        Ok(())
    }
}

/// Resolve every deferred jump/label reference against the label table,
/// producing a new program. References that cannot be resolved are fatal
/// in the main compilation unit; inside an included file they are
/// tolerated as warnings so mutually-including library files still
/// assemble.
pub fn resolve(
    instructions: &[Instruction],
    symbols: &SymbolTable,
    main_file: &str,
    warnings: &mut Vec<Diagnostic>,
) -> Result<Program, Diagnostic> {
    let mut program = Program::default();
    for instr in instructions {
        let mut resolved = instr.clone();
        match instr.kind {
            InstrKind::Label => {
                if let (Some(addr), Some(name)) = (instr.word_addr, &instr.label_name) {
                    program.labels.insert(addr, name.clone());
                }
            }
            InstrKind::MacroDef | InstrKind::Directive => {}
            InstrKind::ByteCode => {
                let addr = require_addr(instr)?;
                program.words.insert(addr, instr.value);
            }
            InstrKind::Jump | InstrKind::LabelRef => {
                let addr = require_addr(instr)?;
                let name = instr.label_name.as_deref().unwrap_or("");
                match symbols.label(name) {
                    Some(target) => {
                        resolved.value = instr.value | (target & JUMP_TARGET_MASK);
                    }
                    None => {
                        let error =
                            AsmError::new(AsmErrorKind::Resolution, "Undefined label", Some(name));
                        let diag = diagnostic_at(instr, error, Severity::Error);
                        if instr.source.file == main_file {
                            return Err(diag);
                        }
                        warnings.push(Diagnostic {
                            severity: Severity::Warning,
                            ..diag
                        });
                    }
                }
                program.words.insert(addr, resolved.value);
            }
        }
        program.instructions.push(resolved);
    }
    Ok(program)
}

fn require_addr(instr: &Instruction) -> Result<u16, Diagnostic> {
    instr.word_addr.ok_or_else(|| {
        diagnostic_at(
            instr,
            AsmError::new(
                AsmErrorKind::Resolution,
                "Instruction has no address",
                Some(&instr.text),
            ),
            Severity::Error,
        )
    })
}

fn diagnostic_at(instr: &Instruction, error: AsmError, severity: Severity) -> Diagnostic {
    Diagnostic::new(instr.source.line, severity, error)
        .with_file(Some(instr.source.file.clone()))
        .with_column(Some(instr.source.column))
        .with_source(Some(instr.source.source_line.clone()))
}
