// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// Symbol table for labels and constants.

use std::collections::HashMap;
use std::io::{self, Write};

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::expr::EvalContext;
use crate::core::statement::SourceLoc;

/// A label with its address and definition site.
///
/// A label is write-once; its address may be rewritten exactly once, when
/// the authoritative post-lowering pass commits the final addresses.
#[derive(Debug, Clone)]
pub struct LabelEntry {
    pub addr: u16,
    pub corrected: bool,
    pub loc: SourceLoc,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    labels: HashMap<String, LabelEntry>,
    constants: HashMap<String, i64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a label definition at its provisional address.
    pub fn define_label(&mut self, name: &str, addr: u16, loc: SourceLoc) -> Result<(), AsmError> {
        if self.labels.contains_key(name) {
            return Err(AsmError::new(
                AsmErrorKind::Structural,
                "Duplicate label",
                Some(name),
            ));
        }
        self.labels.insert(
            name.to_string(),
            LabelEntry {
                addr,
                corrected: false,
                loc,
            },
        );
        Ok(())
    }

    /// Commit a label's authoritative address from the final instruction
    /// list. Inserts labels the lowering passes generated; corrects a
    /// provisional address at most once.
    pub fn commit_label(&mut self, name: &str, addr: u16, loc: &SourceLoc) -> Result<(), AsmError> {
        match self.labels.get_mut(name) {
            Some(entry) => {
                if entry.corrected {
                    return Err(AsmError::new(
                        AsmErrorKind::Structural,
                        "Label address rewritten twice",
                        Some(name),
                    ));
                }
                entry.addr = addr;
                entry.corrected = true;
                Ok(())
            }
            None => {
                self.labels.insert(
                    name.to_string(),
                    LabelEntry {
                        addr,
                        corrected: true,
                        loc: loc.clone(),
                    },
                );
                Ok(())
            }
        }
    }

    pub fn label(&self, name: &str) -> Option<u16> {
        self.labels.get(name).map(|entry| entry.addr)
    }

    pub fn label_entry(&self, name: &str) -> Option<&LabelEntry> {
        self.labels.get(name)
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }

    /// Drop every label not in `keep`. Used to retract definitions made
    /// inside a false conditional block.
    pub fn retain_labels(&mut self, keep: &[String]) {
        self.labels.retain(|name, _| keep.iter().any(|k| k == name));
    }

    pub fn define_constant(&mut self, name: &str, value: i64) -> Result<(), AsmError> {
        if self.constants.contains_key(name) {
            return Err(AsmError::new(
                AsmErrorKind::Structural,
                "Duplicate constant definition",
                Some(name),
            ));
        }
        self.constants.insert(name.to_string(), value);
        Ok(())
    }

    /// Set a build-time constant, overwriting any previous value. Used by
    /// architecture-flag directives, which may legitimately be re-issued.
    pub fn set_constant(&mut self, name: &str, value: i64) {
        self.constants.insert(name.to_string(), value);
    }

    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    pub fn constant_names(&self) -> Vec<String> {
        self.constants.keys().cloned().collect()
    }

    pub fn retain_constants(&mut self, keep: &[String]) {
        self.constants
            .retain(|name, _| keep.iter().any(|k| k == name));
    }

    /// Resolve an identifier: constants first, then labels.
    pub fn lookup(&self, name: &str) -> Option<i64> {
        self.constant(name)
            .or_else(|| self.label(name).map(i64::from))
    }

    /// All labels sorted by address, for symbol file output.
    pub fn labels_by_address(&self) -> Vec<(u16, &str)> {
        let mut out: Vec<(u16, &str)> = self
            .labels
            .iter()
            .map(|(name, entry)| (entry.addr, name.as_str()))
            .collect();
        out.sort();
        out
    }

    pub fn dump<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (addr, name) in self.labels_by_address() {
            writeln!(out, "{:<16}: {:04x} ({})", name, addr, addr)?;
        }
        Ok(())
    }
}

impl EvalContext for SymbolTable {
    fn lookup_symbol(&self, name: &str) -> Option<i64> {
        self.lookup(name)
    }
}
