// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler directives: architecture flags, named constants, and
//! conditional-assembly conditions.

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::expr;
use crate::core::symbol_table::SymbolTable;

/// Build-time architecture flag state.
///
/// Each flag publishes an `ARCH_*` constant for `.if` conditions:
/// `fetch_type` sets `ARCH_FETCH_TYPE` (dualport = 1, quickstore = 0),
/// `alu_ops` sets `ARCH_ALU_OPS` (extended = 1, original = 0).
#[derive(Debug)]
pub struct ArchFlags {
    fetch_type: String,
    alu_ops: String,
}

impl Default for ArchFlags {
    fn default() -> Self {
        Self {
            fetch_type: "dualport".to_string(),
            alu_ops: "extended".to_string(),
        }
    }
}

impl ArchFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fetch_type(&self) -> &str {
        &self.fetch_type
    }

    pub fn alu_ops(&self) -> &str {
        &self.alu_ops
    }

    pub fn apply(
        &mut self,
        name: &str,
        value: &str,
        symbols: &mut SymbolTable,
    ) -> Result<(), AsmError> {
        match name {
            "fetch_type" => {
                let normalized = match value {
                    "dualport" | "1" => "dualport",
                    "quickstore" | "0" => "quickstore",
                    _ => {
                        return Err(AsmError::new(
                            AsmErrorKind::Directive,
                            "Invalid value for fetch_type",
                            Some(value),
                        ))
                    }
                };
                self.fetch_type = normalized.to_string();
                symbols.set_constant(
                    "ARCH_FETCH_TYPE",
                    i64::from(normalized == "dualport"),
                );
                Ok(())
            }
            "alu_ops" => {
                let normalized = match value {
                    "extended" | "1" => "extended",
                    "original" | "0" => "original",
                    _ => {
                        return Err(AsmError::new(
                            AsmErrorKind::Directive,
                            "Invalid value for alu_ops",
                            Some(value),
                        ))
                    }
                };
                self.alu_ops = normalized.to_string();
                symbols.set_constant("ARCH_ALU_OPS", i64::from(normalized == "extended"));
                Ok(())
            }
            _ => Err(AsmError::new(
                AsmErrorKind::Directive,
                "Unknown architecture flag",
                Some(name),
            )),
        }
    }
}

/// `.define NAME expr`: evaluate against known constants and labels,
/// then record the constant.
pub fn apply_define(name: &str, text: &str, symbols: &mut SymbolTable) -> Result<(), AsmError> {
    let value = expr::evaluate(text, symbols)?;
    symbols.define_constant(name, value)
}

/// `.if` condition: any nonzero value selects the block.
pub fn eval_condition(text: &str, symbols: &SymbolTable) -> Result<bool, AsmError> {
    Ok(expr::evaluate(text, symbols)? != 0)
}

#[cfg(test)]
mod tests {
    use super::{apply_define, eval_condition, ArchFlags};
    use crate::core::symbol_table::SymbolTable;

    #[test]
    fn fetch_type_aliases_normalize() {
        let mut flags = ArchFlags::new();
        let mut symbols = SymbolTable::new();
        flags.apply("fetch_type", "1", &mut symbols).unwrap();
        assert_eq!(flags.fetch_type(), "dualport");
        assert_eq!(symbols.constant("ARCH_FETCH_TYPE"), Some(1));
        flags.apply("fetch_type", "quickstore", &mut symbols).unwrap();
        assert_eq!(symbols.constant("ARCH_FETCH_TYPE"), Some(0));
    }

    #[test]
    fn alu_ops_flag_publishes_constant() {
        let mut flags = ArchFlags::new();
        let mut symbols = SymbolTable::new();
        flags.apply("alu_ops", "original", &mut symbols).unwrap();
        assert_eq!(symbols.constant("ARCH_ALU_OPS"), Some(0));
    }

    #[test]
    fn unknown_flag_and_value_are_rejected() {
        let mut flags = ArchFlags::new();
        let mut symbols = SymbolTable::new();
        let err = flags.apply("endian", "big", &mut symbols).unwrap_err();
        assert_eq!(err.to_string(), "Unknown architecture flag: endian");
        let err = flags.apply("fetch_type", "triple", &mut symbols).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for fetch_type: triple");
    }

    #[test]
    fn define_evaluates_against_existing_symbols() {
        let mut symbols = SymbolTable::new();
        apply_define("BASE", "$100", &mut symbols).unwrap();
        apply_define("NEXT", "BASE+2", &mut symbols).unwrap();
        assert_eq!(symbols.constant("NEXT"), Some(0x102));
        let err = apply_define("BASE", "0", &mut symbols).unwrap_err();
        assert_eq!(err.to_string(), "Duplicate constant definition: BASE");
    }

    #[test]
    fn conditions_are_full_expressions() {
        let mut symbols = SymbolTable::new();
        symbols.set_constant("ARCH_FETCH_TYPE", 1);
        assert!(eval_condition("ARCH_FETCH_TYPE == 1", &symbols).unwrap());
        assert!(!eval_condition("ARCH_FETCH_TYPE == 0", &symbols).unwrap());
        assert!(eval_condition("1+1", &symbols).unwrap());
    }
}
