// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Instruction set tables and the pure opcode encoder.
//!
//! Word layout: bit 15 set means literal push (bits 14-0 unsigned).
//! Otherwise bits 15-13 select the class (000 JMP, 001 ZJMP, 010 CALL,
//! 011 ALU), ALU words carry the operation in bits 12-8, one bus action
//! in bits 7-4, the return-stack delta in bits 3-2 and the data-stack
//! delta in bits 1-0. Jump classes carry a 13-bit word target.

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::statement::JumpKind;

pub const INST_LIT: u16 = 0x8000;
pub const INST_JMP: u16 = 0x0000;
pub const INST_ZJMP: u16 = 0x2000;
pub const INST_CALL: u16 = 0x4000;
pub const INST_ALU: u16 = 0x6000;

pub const JUMP_TARGET_MASK: u16 = 0x1FFF;
pub const LITERAL_MAX: u16 = 0x7FFF;

/// An ALU operation selector (bits 12-8, pre-shifted).
pub struct AluOpEntry {
    pub name: &'static str,
    pub bits: u16,
}

pub static ALU_OPS: &[AluOpEntry] = &[
    AluOpEntry { name: "T", bits: 0x0000 },
    AluOpEntry { name: "N", bits: 0x0100 },
    AluOpEntry { name: "T+N", bits: 0x0200 },
    AluOpEntry { name: "T&N", bits: 0x0300 },
    AluOpEntry { name: "T|N", bits: 0x0400 },
    AluOpEntry { name: "T^N", bits: 0x0500 },
    AluOpEntry { name: "~T", bits: 0x0600 },
    AluOpEntry { name: "N==T", bits: 0x0700 },
    AluOpEntry { name: "N<T", bits: 0x0800 },
    AluOpEntry { name: "T2/", bits: 0x0900 },
    AluOpEntry { name: "T2*", bits: 0x0A00 },
    AluOpEntry { name: "rT", bits: 0x0B00 },
    AluOpEntry { name: "N-T", bits: 0x0C00 },
    AluOpEntry { name: "io[T]", bits: 0x0D00 },
    AluOpEntry { name: "status", bits: 0x0E00 },
    AluOpEntry { name: "Nu<T", bits: 0x0F00 },
    // Extended set.
    AluOpEntry { name: "NlshiftT", bits: 0x1000 },
    AluOpEntry { name: "NrshiftT", bits: 0x1100 },
    AluOpEntry { name: "NarshiftT", bits: 0x1200 },
    AluOpEntry { name: "rstatus", bits: 0x1300 },
    AluOpEntry { name: "L-UM*", bits: 0x1400 },
    AluOpEntry { name: "H-UM*", bits: 0x1500 },
    AluOpEntry { name: "T+1", bits: 0x1600 },
    AluOpEntry { name: "T-1", bits: 0x1700 },
    AluOpEntry { name: "3OS", bits: 0x1800 },
    AluOpEntry { name: "mem[T]", bits: 0x1900 },
];

/// Which bit field a modifier occupies. At most one modifier per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierField {
    Bus,
    RStack,
    DStack,
}

pub struct ModifierEntry {
    pub name: &'static str,
    pub bits: u16,
    pub field: ModifierField,
}

pub static MODIFIERS: &[ModifierEntry] = &[
    ModifierEntry { name: "T->N", bits: 0x0010, field: ModifierField::Bus },
    ModifierEntry { name: "T->R", bits: 0x0020, field: ModifierField::Bus },
    ModifierEntry { name: "N->[T]", bits: 0x0030, field: ModifierField::Bus },
    ModifierEntry { name: "N->io[T]", bits: 0x0040, field: ModifierField::Bus },
    ModifierEntry { name: "IORD", bits: 0x0050, field: ModifierField::Bus },
    ModifierEntry { name: "fDINT", bits: 0x0060, field: ModifierField::Bus },
    ModifierEntry { name: "fEINT", bits: 0x0070, field: ModifierField::Bus },
    ModifierEntry { name: "RET", bits: 0x0080, field: ModifierField::Bus },
    ModifierEntry { name: "r+0", bits: 0x0000, field: ModifierField::RStack },
    ModifierEntry { name: "r+1", bits: 0x0004, field: ModifierField::RStack },
    ModifierEntry { name: "r-2", bits: 0x0008, field: ModifierField::RStack },
    ModifierEntry { name: "r-1", bits: 0x000C, field: ModifierField::RStack },
    ModifierEntry { name: "d+0", bits: 0x0000, field: ModifierField::DStack },
    ModifierEntry { name: "d+1", bits: 0x0001, field: ModifierField::DStack },
    ModifierEntry { name: "d-2", bits: 0x0002, field: ModifierField::DStack },
    ModifierEntry { name: "d-1", bits: 0x0003, field: ModifierField::DStack },
];

// Synthesized words used by control-structure lowering and colon
// definitions. Each is the OR of its table entries; see the tests.
pub const W_TO_R: u16 = 0x6127; // >r : N[T->R,r+1,d-1]
pub const W_R_FROM: u16 = 0x6B1D; // r> : rT[T->N,r-1,d+1]
pub const W_DUP: u16 = 0x6011; // dup : T[T->N,d+1]
pub const W_SWAP: u16 = 0x6110; // swap : N[T->N]
pub const W_OVER: u16 = 0x6111; // over : N[T->N,d+1]
pub const W_ONE_PLUS: u16 = 0x7600; // 1+ : T+1
pub const W_PLUS: u16 = 0x6203; // + : T+N[d-1]
pub const W_LESS: u16 = 0x6803; // < : N<T[d-1]
pub const W_THIRD: u16 = 0x7801; // 3os : 3OS[d+1]
pub const W_RDROP: u16 = 0x600C; // rdrop : T[r-1]
pub const W_RET: u16 = 0x608C; // ret : T[RET,r-1]

pub fn alu_op(name: &str) -> Option<u16> {
    ALU_OPS
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.bits)
}

pub fn modifier(name: &str) -> Option<&'static ModifierEntry> {
    MODIFIERS.iter().find(|entry| entry.name == name)
}

pub fn jump_base(kind: JumpKind) -> u16 {
    match kind {
        JumpKind::Jmp => INST_JMP,
        JumpKind::ZJmp => INST_ZJMP,
        JumpKind::Call => INST_CALL,
    }
}

/// Encode an ALU operation with its modifiers into a machine word.
///
/// Total and side-effect-free. Modifiers combine by OR; two modifiers
/// from the same bit field cannot both be honored and are rejected.
pub fn encode(op: &str, modifiers: &[String]) -> Result<u16, AsmError> {
    let Some(op_bits) = alu_op(op) else {
        return Err(AsmError::new(
            AsmErrorKind::Encoding,
            "Unknown operation",
            Some(op),
        ));
    };

    let mut value = INST_ALU | op_bits;
    let mut seen: Vec<ModifierField> = Vec::new();
    for name in modifiers {
        let Some(entry) = modifier(name) else {
            return Err(AsmError::new(
                AsmErrorKind::Encoding,
                "Unknown modifier",
                Some(name),
            ));
        };
        if seen.contains(&entry.field) {
            return Err(AsmError::new(
                AsmErrorKind::Encoding,
                "Conflicting instruction modifiers",
                Some(name),
            ));
        }
        seen.push(entry.field);
        value |= entry.bits;
    }
    Ok(value)
}

/// Whether an already-encoded word is an ALU instruction carrying the
/// return-from-subroutine bus action.
pub fn is_return(value: u16) -> bool {
    (value & 0xE000) == INST_ALU && (value & 0x00F0) == 0x0080
}
