// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use std::fs;
use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{Assembler, Assembly};
use crate::core::error::{AsmRunError, Severity};
use crate::core::isa::{
    W_DUP, W_LESS, W_ONE_PLUS, W_OVER, W_PLUS, W_RDROP, W_RET, W_R_FROM, W_SWAP, W_THIRD, W_TO_R,
};

fn assemble(source: &str) -> Assembly {
    Assembler::new()
        .assemble_source("main.asm", source)
        .unwrap_or_else(|err| panic!("assembly failed: {err}"))
}

fn assemble_err(source: &str) -> AsmRunError {
    Assembler::new()
        .assemble_source("main.asm", source)
        .err()
        .expect("assembly should fail")
}

fn words(source: &str) -> Vec<u16> {
    let assembly = assemble(source);
    let max = assembly.program.max_address().expect("program is empty");
    (0..=max).map(|addr| assembly.program.word(addr)).collect()
}

fn create_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("target")
        .join(format!("test-{label}-{}-{nanos}", process::id()));
    fs::create_dir_all(&dir).expect("Create temp dir");
    dir
}

#[test]
fn bare_alu_pass_through() {
    assert_eq!(words("T"), vec![0x6000]);
}

#[test]
fn duplicate_top_idiom() {
    assert_eq!(words("T[T->N,d+1]"), vec![0x6011]);
}

#[test]
fn jump_label_resolution() {
    let source = "start: JMP end\nmiddle: ZJMP start\nend: CALL middle";
    assert_eq!(words(source), vec![0x0002, 0x2000, 0x4001]);
}

#[test]
fn literal_formats() {
    assert_eq!(words("#$2A"), vec![0x802A]);
    assert_eq!(words("#255"), vec![0x80FF]);
    assert_eq!(words("#'A'"), vec![0x8041]);
}

#[test]
fn label_reference_pushes_the_address() {
    assert_eq!(words("T\ntarget: #target"), vec![0x6000, 0x8001]);
}

#[test]
fn duplicate_label_reports_the_second_occurrence() {
    let err = assemble_err("loop:\nT\nloop:");
    assert_eq!(err.error().to_string(), "Duplicate label: loop");
    let fatal = err.diagnostics().last().expect("diagnostic");
    assert!(fatal.format().starts_with("main.asm:3"));
}

#[test]
fn unknown_operation_is_fatal() {
    let err = assemble_err("FROB");
    assert_eq!(err.error().to_string(), "Unknown operation: FROB");
}

#[test]
fn undefined_label_in_main_unit_is_fatal() {
    let err = assemble_err("JMP nowhere");
    assert_eq!(err.error().to_string(), "Undefined label: nowhere");
}

#[test]
fn negative_literals_are_rejected_with_guidance() {
    let err = assemble_err("#-5");
    assert!(err.error().to_string().contains("Negative literals"));
}

#[test]
fn if_then_lowering() {
    // ZJMP over the body, label behind it.
    assert_eq!(words("#1 IF T THEN N"), vec![0x8001, 0x2003, 0x6000, 0x6100]);
}

#[test]
fn if_else_then_lowering() {
    assert_eq!(
        words("#1 IF T ELSE N THEN"),
        vec![0x8001, 0x2004, 0x6000, 0x0005, 0x6100]
    );
}

#[test]
fn begin_until_lowering() {
    assert_eq!(words("BEGIN T UNTIL"), vec![0x6000, 0x2000]);
}

#[test]
fn begin_while_repeat_lowering() {
    assert_eq!(
        words("BEGIN T WHILE N REPEAT"),
        vec![0x6000, 0x2004, 0x6100, 0x0000]
    );
}

#[test]
fn do_loop_lowering() {
    let expected = vec![
        0x8005,     // #5 limit
        0x8000,     // #0 index
        W_TO_R,     // >r
        W_TO_R,     // >r
        0x6000,     // body
        W_R_FROM,   // r>
        W_R_FROM,   // r>
        W_ONE_PLUS, // 1+
        W_OVER,
        W_OVER,
        W_TO_R,
        W_TO_R,
        W_LESS,
        0x2004, // ZJMP do label (first body word)
        W_RDROP,
        W_RDROP,
    ];
    assert_eq!(words("#5 #0 DO T LOOP"), expected);
}

#[test]
fn plus_loop_lowering() {
    let out = words("#10 #0 DO T #2 +LOOP");
    let expected = vec![
        0x800A,
        0x8000,
        W_TO_R,
        W_TO_R,
        0x6000, // body
        0x8002, // increment pushed by the body
        W_R_FROM,
        W_SWAP,
        W_R_FROM,
        W_OVER,
        W_PLUS,
        W_THIRD,
        W_OVER,
        W_TO_R,
        W_TO_R,
        W_SWAP,
        0x8000, // #0 for the sign test
        W_LESS,
        0x2014, // ZJMP past the operand swap
        W_SWAP,
        W_LESS,
        0x2004, // ZJMP back to the loop head
        W_RDROP,
        W_RDROP,
    ];
    assert_eq!(out, expected);
}

#[test]
fn loop_index_words_inside_nested_loops() {
    let assembly = assemble("#3 #0 DO #2 #0 DO j i LOOP LOOP");
    assert!(assembly.diagnostics.is_empty());
    // j reaches two pairs: 4 pops, dup, push, 3 swap/push pairs.
    let source = "#2 #0 DO i LOOP";
    let assembly = assemble(source);
    assert!(assembly.diagnostics.is_empty());
    let i_words: Vec<u16> = (4..10).map(|a| assembly.program.word(a)).collect();
    assert_eq!(
        i_words,
        vec![W_R_FROM, W_R_FROM, W_DUP, W_TO_R, W_SWAP, W_TO_R]
    );
}

#[test]
fn loop_index_outside_a_loop_is_a_warning() {
    let assembly = assemble("i");
    assert_eq!(assembly.diagnostics.len(), 1);
    assert_eq!(assembly.diagnostics[0].severity(), Severity::Warning);
    assert_eq!(
        assembly.diagnostics[0].error().to_string(),
        "Loop index word used outside of a loop: i"
    );
    // Code is still produced.
    assert_eq!(assembly.program.word_count(), 6);
}

#[test]
fn shallow_loop_nesting_for_j_is_a_warning() {
    let assembly = assemble("#2 #0 DO j LOOP");
    assert_eq!(assembly.diagnostics.len(), 1);
    assert_eq!(
        assembly.diagnostics[0].error().to_string(),
        "Loop index word exceeds loop nesting depth: j"
    );
}

#[test]
fn dangling_loop_closer_is_fatal() {
    let err = assemble_err("T LOOP");
    assert_eq!(err.error().to_string(), "LOOP without matching DO");
}

#[test]
fn macro_expansion_is_hygienic() {
    let assembly = assemble(".macro 2dup ( a b -- a b a b )\nover over\n.endmacro\n2dup\n2dup");
    let expanded: Vec<_> = assembly
        .program
        .instructions()
        .iter()
        .filter(|i| i.provenance.as_deref() == Some("2dup"))
        .collect();
    assert_eq!(expanded.len(), 4);
    let addrs: Vec<u16> = expanded.iter().map(|i| i.word_addr.unwrap()).collect();
    assert_eq!(addrs, vec![0, 1, 2, 3]);
    assert!(expanded.iter().all(|i| i.value == W_OVER));
    // Both expansions report the call site, not the definition.
    assert_eq!(expanded[0].source.line, 4);
    assert_eq!(expanded[2].source.line, 5);
}

#[test]
fn macros_expand_inside_control_structures_with_fresh_labels() {
    let source = ".macro guard ( f -- )\nIF T THEN\n.endmacro\n#1 guard\n#0 guard";
    let assembly = assemble(source);
    // Each expansion lowers its own IF with a distinct generated label.
    let labels: Vec<&String> = assembly.program.labels().values().collect();
    assert_eq!(labels.len(), 2);
    assert_ne!(labels[0], labels[1]);
}

#[test]
fn direct_macro_recursion_is_caught() {
    let err = assemble_err(".macro s\ns\n.endmacro\ns");
    assert_eq!(
        err.error().to_string(),
        "Recursive macro expansion detected: s"
    );
}

#[test]
fn mutual_macro_recursion_is_caught() {
    let err = assemble_err(".macro a\nb\n.endmacro\n.macro b\na\n.endmacro\na");
    assert_eq!(
        err.error().to_string(),
        "Recursive macro expansion detected: a"
    );
}

#[test]
fn duplicate_macro_is_fatal() {
    let err = assemble_err(".macro m\nT\n.endmacro\n.macro m\nN\n.endmacro");
    assert_eq!(err.error().to_string(), "Duplicate macro definition: m");
}

#[test]
fn labels_inside_macros_are_forbidden() {
    let err = assemble_err(".macro m\nspot: T\n.endmacro");
    assert_eq!(
        err.error().to_string(),
        "Labels are not allowed inside macros: m"
    );
}

#[test]
fn subroutines_get_an_implicit_return() {
    let assembly = assemble(": noop T ;\nnoop");
    assert_eq!(assembly.program.word(0), 0x6000);
    assert_eq!(assembly.program.word(1), W_RET);
    assert_eq!(assembly.program.word(2), 0x4000);
}

#[test]
fn explicit_return_suppresses_the_implicit_one() {
    let assembly = assemble(": quick T[RET,r-1] ;\nquick");
    assert_eq!(assembly.program.word(0), W_RET);
    assert_eq!(assembly.program.word(1), 0x4000);
    assert_eq!(assembly.program.max_address(), Some(1));
}

#[test]
fn org_relocates_and_hex_zero_fills() {
    let assembly = assemble("T\nORG $4\nN");
    let mut out = Vec::new();
    assembly.program.write_hex(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "6000\n0000\n0000\n0000\n6100\n"
    );
}

#[test]
fn org_backward_is_fatal() {
    let err = assemble_err("ORG $10\nT\nORG $2");
    assert!(err.error().to_string().contains("backward"));
}

#[test]
fn conditional_block_selects_on_arch_flags() {
    let source = "\
.arch_flag fetch_type dualport
.if ARCH_FETCH_TYPE == 1
T
.endif
.if ARCH_FETCH_TYPE == 0
N N N
.endif
N";
    assert_eq!(words(source), vec![0x6000, 0x6100]);
}

#[test]
fn skipped_conditional_consumes_no_address_space() {
    let source = ".if 0\nT T T T\n.endif\nN";
    assert_eq!(words(source), vec![0x6100]);
}

#[test]
fn skipped_conditional_retracts_definitions() {
    let source = ".if 0\nspot:\n.define X 1\n.endif\nspot: T";
    // The label inside the false block must not collide.
    assert_eq!(words(source), vec![0x6000]);
}

#[test]
fn defines_feed_literal_expressions_and_org() {
    let source = ".define BASE $10\n.define NEXT BASE+2\nORG NEXT\nT";
    let assembly = assemble(source);
    assert_eq!(assembly.program.word(0x12), 0x6000);
    assert_eq!(assembly.program.max_address(), Some(0x12));
}

#[test]
fn duplicate_define_is_fatal() {
    let err = assemble_err(".define X 1\n.define X 2");
    assert_eq!(err.error().to_string(), "Duplicate constant definition: X");
}

#[test]
fn unknown_arch_flag_is_fatal() {
    let err = assemble_err(".arch_flag endian big");
    assert_eq!(err.error().to_string(), "Unknown architecture flag: endian");
}

#[test]
fn include_pulls_in_definitions() {
    let dir = create_temp_dir("include-defs");
    fs::write(dir.join("words.asm"), ".macro nip\nN[d-1]\n.endmacro\n").unwrap();
    let main = dir.join("main.asm");
    fs::write(&main, "include \"words.asm\"\nnip\n").unwrap();

    let mut assembler = Assembler::new();
    let assembly = assembler.assemble_file(&main).unwrap();
    assert_eq!(assembly.program.word(0), 0x6103);
}

#[test]
fn include_file_not_found_is_fatal() {
    let dir = create_temp_dir("include-missing");
    let main = dir.join("main.asm");
    fs::write(&main, "include \"nope.asm\"\n").unwrap();
    let mut assembler = Assembler::new();
    let err = assembler.assemble_file(&main).unwrap_err();
    assert_eq!(err.error().to_string(), "Include file not found: nope.asm");
}

#[test]
fn undefined_label_inside_include_is_a_warning() {
    let dir = create_temp_dir("include-forward");
    fs::write(dir.join("fwd.asm"), "JMP later\n").unwrap();
    let main = dir.join("main.asm");
    fs::write(&main, "include \"fwd.asm\"\nT\n").unwrap();

    let mut assembler = Assembler::new();
    let assembly = assembler.assemble_file(&main).unwrap();
    assert_eq!(assembly.diagnostics.len(), 1);
    assert_eq!(assembly.diagnostics[0].severity(), Severity::Warning);
    // The unresolved jump keeps its bare opcode.
    assert_eq!(assembly.program.word(0), 0x0000);
    assert_eq!(assembly.program.word(1), 0x6000);
}

#[test]
fn include_restores_the_compile_context() {
    let dir = create_temp_dir("include-context");
    fs::write(dir.join("ok.asm"), "T\n").unwrap();
    let main = dir.join("main.asm");
    fs::write(&main, "include \"ok.asm\"\nFROB\n").unwrap();

    let mut assembler = Assembler::new();
    let err = assembler.assemble_file(&main).unwrap_err();
    let fatal = err.diagnostics().last().expect("diagnostic");
    // The failure after the include reports the main file and line.
    assert!(fatal.format().contains("main.asm:2"));
}

#[test]
fn include_cycles_are_cut_off() {
    let dir = create_temp_dir("include-cycle");
    let main = dir.join("main.asm");
    fs::write(&main, "include \"main.asm\"\n").unwrap();
    let mut assembler = Assembler::new();
    let err = assembler.assemble_file(&main).unwrap_err();
    assert!(err.error().to_string().starts_with("Include depth exceeded"));
}

#[test]
fn stdlib_is_searched_last_and_can_be_disabled() {
    let dir = create_temp_dir("stdlib");
    let lib = dir.join("lib");
    fs::create_dir_all(&lib).unwrap();
    fs::write(lib.join("core.asm"), ".macro nop2\nT T\n.endmacro\n").unwrap();
    let main = dir.join("main.asm");
    fs::write(&main, "include \"core.asm\"\nnop2\n").unwrap();

    let mut assembler = Assembler::new().with_stdlib(Some(lib));
    let assembly = assembler.assemble_file(&main).unwrap();
    assert_eq!(assembly.program.word_count(), 2);

    let mut assembler = Assembler::new();
    let err = assembler.assemble_file(&main).unwrap_err();
    assert_eq!(err.error().to_string(), "Include file not found: core.asm");
}

#[test]
fn symbol_file_lists_labels_sorted_by_address() {
    let assembly = assemble("start: T\nloop: JMP loop");
    let mut out = Vec::new();
    assembly.program.write_symbols(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "0000 start\n0001 loop\n");
}

#[test]
fn labels_inside_control_bodies_are_shifted_with_the_body() {
    // The label records the body's pre-lowering cursor; the lowering
    // shift must carry it to the final address of the jump target.
    let assembly = assemble("#1 IF spot: T THEN\nJMP spot");
    assert_eq!(
        assembly.program.labels().get(&2).map(String::as_str),
        Some("spot")
    );
    assert_eq!(assembly.program.word(3), 0x0002);
}

#[test]
fn word_resolution_prefers_alu_over_macro() {
    // A macro may not shadow an ALU operation.
    let assembly = assemble(".macro T\nN\n.endmacro\nT");
    assert_eq!(assembly.program.word(0), 0x6000);
}
