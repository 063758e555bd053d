// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Listing file generation.

use std::io::Write;

use crate::core::error::PassCounts;
use crate::core::statement::Instruction;
use crate::core::symbol_table::SymbolTable;

/// Writer for listing file output.
pub struct ListingWriter<W: Write> {
    out: W,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self, title: &str) -> std::io::Result<()> {
        writeln!(self.out, "{title}")?;
        writeln!(self.out, "ADDR  WORD   LINE  SOURCE")?;
        writeln!(self.out, "----  ----   ----  ------")?;
        Ok(())
    }

    pub fn write_instruction(&mut self, instr: &Instruction) -> std::io::Result<()> {
        let addr = match instr.word_addr {
            Some(addr) => format!("{addr:04X}"),
            None => "----".to_string(),
        };
        let word = if instr.occupies_word() {
            format!("{:04X}", instr.value)
        } else {
            String::new()
        };
        let provenance = match &instr.provenance {
            Some(name) => format!("  ; [macro {name}]"),
            None => String::new(),
        };
        writeln!(
            self.out,
            "{addr}  {:<5}  {:>4}  {}{provenance}",
            word, instr.source.line, instr.text
        )
    }

    pub fn footer(&mut self, counts: &PassCounts, symbols: &SymbolTable) -> std::io::Result<()> {
        writeln!(
            self.out,
            "\nStatements: {}  Words: {}  Warnings: {}",
            counts.statements, counts.words, counts.warnings
        )?;
        writeln!(self.out, "\nSYMBOL TABLE\n")?;
        symbols.dump(&mut self.out)?;
        Ok(())
    }
}
