// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Structured-control-flow lowering.
//!
//! Every construct is lowered by backpatching: the body's instructions
//! already occupy addresses assigned while the block was processed; the
//! transform synthesizes jump/label words around the body, shifts the
//! body's addresses by the number of words inserted before it, and
//! advances the allocator by the total inserted count so the global
//! cursor stays consistent.

use crate::core::address_space::AddressSpace;
use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::isa::{
    INST_JMP, INST_LIT, INST_ZJMP, W_DUP, W_LESS, W_ONE_PLUS, W_OVER, W_PLUS, W_RDROP, W_R_FROM,
    W_SWAP, W_THIRD, W_TO_R,
};
use crate::core::statement::{Instruction, InstrKind, SourceLoc};

/// One element of a lowering plan: either a synthesized instruction
/// (address assigned while the plan is laid out) or an already-addressed
/// body to shift into place.
enum Piece {
    Synth(Instruction),
    Body(Vec<Instruction>),
}

fn synth_word(value: u16, text: &str, loc: &SourceLoc) -> Piece {
    Piece::Synth(Instruction {
        kind: InstrKind::ByteCode,
        value,
        word_addr: None,
        label_name: None,
        source: loc.clone(),
        provenance: None,
        text: text.to_string(),
    })
}

fn synth_jump(base: u16, target: &str, text: String, loc: &SourceLoc) -> Piece {
    Piece::Synth(Instruction {
        kind: InstrKind::Jump,
        value: base,
        word_addr: None,
        label_name: Some(target.to_string()),
        source: loc.clone(),
        provenance: None,
        text,
    })
}

fn synth_label(name: &str, loc: &SourceLoc) -> Piece {
    Piece::Synth(Instruction {
        kind: InstrKind::Label,
        value: 0,
        word_addr: None,
        label_name: Some(name.to_string()),
        source: loc.clone(),
        provenance: None,
        text: format!("{name}:"),
    })
}

#[derive(Debug, Default)]
pub struct ControlStructures {
    label_counter: u32,
    loop_depth: u32,
}

impl ControlStructures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a unique label for control structures, from a counter
    /// scoped to one assembly run.
    fn unique_label(&mut self, base: &str) -> String {
        let label = format!("{base}_{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    pub fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub fn exit_loop(&mut self) {
        self.loop_depth = self.loop_depth.saturating_sub(1);
    }

    pub fn loop_depth(&self) -> u32 {
        self.loop_depth
    }

    /// `IF body THEN`: jump over the body when top-of-stack is zero.
    pub fn lower_if(
        &mut self,
        body: Vec<Instruction>,
        start: u16,
        space: &mut AddressSpace,
        loc: &SourceLoc,
    ) -> Vec<Instruction> {
        let false_label = self.unique_label("if");
        let plan = vec![
            synth_jump(INST_ZJMP, &false_label, format!("ZJMP {false_label}"), loc),
            Piece::Body(body),
            synth_label(&false_label, loc),
        ];
        assemble_plan(plan, start, space)
    }

    /// `IF tbody ELSE fbody THEN`.
    pub fn lower_if_else(
        &mut self,
        true_body: Vec<Instruction>,
        false_body: Vec<Instruction>,
        start: u16,
        space: &mut AddressSpace,
        loc: &SourceLoc,
    ) -> Vec<Instruction> {
        let false_label = self.unique_label("else");
        let end_label = self.unique_label("endif");
        let plan = vec![
            synth_jump(INST_ZJMP, &false_label, format!("ZJMP {false_label}"), loc),
            Piece::Body(true_body),
            synth_jump(INST_JMP, &end_label, format!("JMP {end_label}"), loc),
            synth_label(&false_label, loc),
            Piece::Body(false_body),
            synth_label(&end_label, loc),
        ];
        assemble_plan(plan, start, space)
    }

    /// `BEGIN body UNTIL`: repeats while top-of-stack is zero.
    pub fn lower_begin_until(
        &mut self,
        body: Vec<Instruction>,
        start: u16,
        space: &mut AddressSpace,
        loc: &SourceLoc,
    ) -> Vec<Instruction> {
        let begin_label = self.unique_label("begin");
        let plan = vec![
            synth_label(&begin_label, loc),
            Piece::Body(body),
            synth_jump(INST_ZJMP, &begin_label, format!("ZJMP {begin_label}"), loc),
        ];
        assemble_plan(plan, start, space)
    }

    /// `BEGIN head WHILE tail REPEAT`.
    pub fn lower_begin_while_repeat(
        &mut self,
        head: Vec<Instruction>,
        tail: Vec<Instruction>,
        start: u16,
        space: &mut AddressSpace,
        loc: &SourceLoc,
    ) -> Vec<Instruction> {
        let begin_label = self.unique_label("begin");
        let exit_label = self.unique_label("repeat");
        let plan = vec![
            synth_label(&begin_label, loc),
            Piece::Body(head),
            synth_jump(INST_ZJMP, &exit_label, format!("ZJMP {exit_label}"), loc),
            Piece::Body(tail),
            synth_jump(INST_JMP, &begin_label, format!("JMP {begin_label}"), loc),
            synth_label(&exit_label, loc),
        ];
        assemble_plan(plan, start, space)
    }

    /// `DO body LOOP` / `DO body +LOOP`.
    ///
    /// The prologue moves index then limit to the return stack. The LOOP
    /// epilogue pops the pair, increments the index, duplicates both for
    /// the comparison, pushes the pair back, and loops while the index is
    /// in range; the two `rdrop`s discard the pair on exit. The +LOOP
    /// variant takes a signed increment from the data stack and swaps the
    /// comparison operands when it is negative, so the same `<` serves
    /// ascending and descending ranges.
    pub fn lower_do_loop(
        &mut self,
        body: Vec<Instruction>,
        plus: bool,
        start: u16,
        space: &mut AddressSpace,
        loc: &SourceLoc,
    ) -> Vec<Instruction> {
        let do_label = self.unique_label("do");
        let mut plan = vec![
            synth_word(W_TO_R, ">r", loc),
            synth_word(W_TO_R, ">r", loc),
            synth_label(&do_label, loc),
            Piece::Body(body),
        ];

        if plus {
            let skip_label = self.unique_label("ploop");
            plan.extend([
                synth_word(W_R_FROM, "r>", loc),
                synth_word(W_SWAP, "swap", loc),
                synth_word(W_R_FROM, "r>", loc),
                synth_word(W_OVER, "over", loc),
                synth_word(W_PLUS, "+", loc),
                synth_word(W_THIRD, "3os", loc),
                synth_word(W_OVER, "over", loc),
                synth_word(W_TO_R, ">r", loc),
                synth_word(W_TO_R, ">r", loc),
                synth_word(W_SWAP, "swap", loc),
                synth_word(INST_LIT, "#0", loc),
                synth_word(W_LESS, "<", loc),
                synth_jump(INST_ZJMP, &skip_label, format!("ZJMP {skip_label}"), loc),
                synth_word(W_SWAP, "swap", loc),
                synth_label(&skip_label, loc),
                synth_word(W_LESS, "<", loc),
                synth_jump(INST_ZJMP, &do_label, format!("ZJMP {do_label}"), loc),
                synth_word(W_RDROP, "rdrop", loc),
                synth_word(W_RDROP, "rdrop", loc),
            ]);
        } else {
            plan.extend([
                synth_word(W_R_FROM, "r>", loc),
                synth_word(W_R_FROM, "r>", loc),
                synth_word(W_ONE_PLUS, "1+", loc),
                synth_word(W_OVER, "over", loc),
                synth_word(W_OVER, "over", loc),
                synth_word(W_TO_R, ">r", loc),
                synth_word(W_TO_R, ">r", loc),
                synth_word(W_LESS, "<", loc),
                synth_jump(INST_ZJMP, &do_label, format!("ZJMP {do_label}"), loc),
                synth_word(W_RDROP, "rdrop", loc),
                synth_word(W_RDROP, "rdrop", loc),
            ]);
        }
        assemble_plan(plan, start, space)
    }

    /// Loop index words `i`/`j`/`k`: reach `depth` pairs into the return
    /// stack, duplicate the targeted index onto the data stack, and
    /// restore the return stack exactly. Misuse is a diagnostic, not an
    /// error; code is still produced.
    pub fn loop_index(
        &mut self,
        depth: u8,
        space: &mut AddressSpace,
        loc: &SourceLoc,
    ) -> (Vec<Instruction>, Option<AsmError>) {
        let name = ["i", "j", "k"][usize::from(depth.min(2))];
        let warning = if self.loop_depth == 0 {
            Some(AsmError::new(
                AsmErrorKind::Control,
                "Loop index word used outside of a loop",
                Some(name),
            ))
        } else if u32::from(depth) + 1 > self.loop_depth {
            Some(AsmError::new(
                AsmErrorKind::Control,
                "Loop index word exceeds loop nesting depth",
                Some(name),
            ))
        } else {
            None
        };

        let pairs = usize::from(depth) + 1;
        let mut out = Vec::new();
        let mut emit = |value: u16, text: &str| {
            let addr = space.advance(1);
            out.push(Instruction::byte_code(value, addr, text, loc.clone()));
        };
        for _ in 0..2 * pairs {
            emit(W_R_FROM, "r>");
        }
        emit(W_DUP, "dup");
        emit(W_TO_R, ">r");
        for _ in 0..2 * pairs - 1 {
            emit(W_SWAP, "swap");
            emit(W_TO_R, ">r");
        }
        (out, warning)
    }
}

/// Lay out a lowering plan from `start`: synthesized words are assigned
/// consecutive addresses, labels take the address of the next word, and
/// each body is shifted by the number of words inserted before it. The
/// allocator is advanced once per inserted word.
fn assemble_plan(plan: Vec<Piece>, start: u16, space: &mut AddressSpace) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut running = start;
    let mut inserted: u16 = 0;
    for piece in plan {
        match piece {
            Piece::Synth(mut instr) => {
                instr.word_addr = Some(running);
                if instr.occupies_word() {
                    running = running.wrapping_add(1);
                    inserted += 1;
                }
                out.push(instr);
            }
            Piece::Body(body) => {
                for mut instr in body {
                    if let Some(addr) = instr.word_addr {
                        instr.word_addr = Some(addr.wrapping_add(inserted));
                    }
                    if instr.occupies_word() {
                        running = running.wrapping_add(1);
                    }
                    out.push(instr);
                }
            }
        }
    }
    for _ in 0..inserted {
        space.advance(1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::ControlStructures;
    use crate::core::address_space::AddressSpace;
    use crate::core::isa::{
        INST_ZJMP, W_DUP, W_LESS, W_ONE_PLUS, W_OVER, W_RDROP, W_R_FROM, W_SWAP, W_TO_R,
    };
    use crate::core::statement::{Instruction, InstrKind, SourceLoc};

    fn loc() -> SourceLoc {
        SourceLoc::new("test.asm", 1, 1, "")
    }

    fn body_word(value: u16, addr: u16) -> Instruction {
        Instruction::byte_code(value, addr, "T", loc())
    }

    #[test]
    fn if_lowering_inserts_one_word_and_shifts_the_body() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        let body = vec![body_word(0x6000, 0)];
        let out = control.lower_if(body, 0, &mut space, &loc());

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].kind, InstrKind::Jump);
        assert_eq!(out[0].value, INST_ZJMP);
        assert_eq!(out[0].word_addr, Some(0));
        assert_eq!(out[0].label_name.as_deref(), Some("if_0"));
        assert_eq!(out[1].word_addr, Some(1));
        assert_eq!(out[2].kind, InstrKind::Label);
        assert_eq!(out[2].word_addr, Some(2));
        assert_eq!(space.word_address(), 2);
    }

    #[test]
    fn if_else_lowering_inserts_two_words() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        space.advance(1);
        let true_body = vec![body_word(0x6000, 0)];
        let false_body = vec![body_word(0x6100, 1)];
        let out = control.lower_if_else(true_body, false_body, 0, &mut space, &loc());

        // ZJMP, body, JMP, label, body, label
        assert_eq!(out[0].word_addr, Some(0));
        assert_eq!(out[1].word_addr, Some(1));
        assert_eq!(out[2].word_addr, Some(2));
        assert_eq!(out[3].kind, InstrKind::Label);
        assert_eq!(out[3].word_addr, Some(3));
        assert_eq!(out[4].word_addr, Some(3));
        assert_eq!(out[5].kind, InstrKind::Label);
        assert_eq!(out[5].word_addr, Some(4));
        assert_eq!(space.word_address(), 4);
    }

    #[test]
    fn begin_until_appends_a_conditional_jump_back() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        let body = vec![body_word(0x6000, 0)];
        let out = control.lower_begin_until(body, 0, &mut space, &loc());

        assert_eq!(out[0].kind, InstrKind::Label);
        assert_eq!(out[0].word_addr, Some(0));
        assert_eq!(out[1].word_addr, Some(0));
        assert_eq!(out[2].kind, InstrKind::Jump);
        assert_eq!(out[2].word_addr, Some(1));
        assert_eq!(out[2].label_name, out[0].label_name);
        assert_eq!(space.word_address(), 2);
    }

    #[test]
    fn begin_while_repeat_shifts_only_the_tail() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        space.advance(1);
        let head = vec![body_word(0x6000, 0)];
        let tail = vec![body_word(0x6100, 1)];
        let out = control.lower_begin_while_repeat(head, tail, 0, &mut space, &loc());

        assert_eq!(out[1].word_addr, Some(0)); // head unshifted
        assert_eq!(out[2].word_addr, Some(1)); // ZJMP exit
        assert_eq!(out[3].word_addr, Some(2)); // tail shifted +1
        assert_eq!(out[4].word_addr, Some(3)); // JMP begin
        assert_eq!(out[5].kind, InstrKind::Label);
        assert_eq!(out[5].word_addr, Some(4));
        assert_eq!(space.word_address(), 4);
    }

    #[test]
    fn do_loop_epilogue_word_sequence() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        let body = vec![body_word(0x6000, 0)];
        let out = control.lower_do_loop(body, false, 0, &mut space, &loc());

        let values: Vec<u16> = out
            .iter()
            .filter(|i| i.occupies_word())
            .map(|i| i.value)
            .collect();
        assert_eq!(
            values,
            vec![
                W_TO_R, W_TO_R, 0x6000, W_R_FROM, W_R_FROM, W_ONE_PLUS, W_OVER, W_OVER, W_TO_R,
                W_TO_R, W_LESS, INST_ZJMP, W_RDROP, W_RDROP,
            ]
        );
        // 13 inserted words + 1 body word.
        assert_eq!(space.word_address(), 14);
        // The loop label sits on the first body word, after the two >r.
        let label = out.iter().find(|i| i.kind == InstrKind::Label).unwrap();
        assert_eq!(label.word_addr, Some(2));
    }

    #[test]
    fn plus_loop_inserts_twenty_words() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        let body = vec![body_word(0x8002, 0)];
        let out = control.lower_do_loop(body, true, 0, &mut space, &loc());
        let words = out.iter().filter(|i| i.occupies_word()).count();
        assert_eq!(words, 21);
        assert_eq!(space.word_address(), 21);
        // Two generated labels: the loop head and the sign-test skip.
        let labels = out.iter().filter(|i| i.kind == InstrKind::Label).count();
        assert_eq!(labels, 2);
    }

    #[test]
    fn loop_index_i_restores_the_return_stack() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        control.enter_loop();
        let (out, warning) = control.loop_index(0, &mut space, &loc());
        assert!(warning.is_none());
        let values: Vec<u16> = out.iter().map(|i| i.value).collect();
        assert_eq!(
            values,
            vec![W_R_FROM, W_R_FROM, W_DUP, W_TO_R, W_SWAP, W_TO_R]
        );
        assert_eq!(space.word_address(), 6);
    }

    #[test]
    fn loop_index_j_reaches_two_pairs() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        control.enter_loop();
        control.enter_loop();
        let (out, warning) = control.loop_index(1, &mut space, &loc());
        assert!(warning.is_none());
        assert_eq!(out.len(), 12);
        assert_eq!(out[..4].iter().filter(|i| i.value == W_R_FROM).count(), 4);
    }

    #[test]
    fn loop_index_misuse_is_a_warning_not_an_error() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        let (out, warning) = control.loop_index(0, &mut space, &loc());
        assert!(!out.is_empty());
        assert_eq!(
            warning.unwrap().to_string(),
            "Loop index word used outside of a loop: i"
        );

        let mut control = ControlStructures::new();
        control.enter_loop();
        let (_, warning) = control.loop_index(1, &mut space, &loc());
        assert_eq!(
            warning.unwrap().to_string(),
            "Loop index word exceeds loop nesting depth: j"
        );
    }

    #[test]
    fn generated_labels_are_unique_across_constructs() {
        let mut control = ControlStructures::new();
        let mut space = AddressSpace::new();
        space.advance(1);
        let a = control.lower_if(vec![body_word(0x6000, 0)], 0, &mut space, &loc());
        let start = space.word_address();
        space.advance(1);
        let b = control.lower_if(vec![body_word(0x6000, start)], start, &mut space, &loc());
        let name_a = a[0].label_name.as_deref().unwrap();
        let name_b = b[0].label_name.as_deref().unwrap();
        assert_ne!(name_a, name_b);
    }
}
