// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembler driver: two-pass orchestration over the parsed statement
//! sequence.
//!
//! Pass 1 walks the statements once, dispatching to the encoder, macro
//! processor, control lowering and directive handlers while every emitted
//! word draws its address from the allocator; labels record the current
//! cursor without allocating. After the walk the label table is committed
//! from the final instruction list (the one sanctioned address
//! correction), then pass 2 resolves all deferred references into a new
//! [`Program`].

pub mod cli;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::fs::{self, File};
use std::mem;
use std::path::{Path, PathBuf};

use clap::Parser as ClapParser;

use crate::core::address_space::AddressSpace;
use crate::core::control::ControlStructures;
use crate::core::directives::{self, ArchFlags};
use crate::core::error::{
    AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, PassCounts, Severity,
};
use crate::core::expr;
use crate::core::isa;
use crate::core::listing::ListingWriter;
use crate::core::macro_processor::MacroProcessor;
use crate::core::parser::parse_source;
use crate::core::program::{self, Program};
use crate::core::statement::{ControlKind, Instruction, InstrKind, SourceLoc, Statement};
use crate::core::symbol_table::SymbolTable;

use cli::{validate_cli, Cli};

pub use cli::VERSION;

const MAX_INCLUDE_DEPTH: usize = 32;

/// Assembler-wide mutable state that include processing must snapshot
/// and restore exactly, on success and error paths alike.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    pub current_file: String,
    pub source_lines: Vec<String>,
    pub include_depth: usize,
}

/// Result of a successful assembly: the resolved program plus the
/// non-fatal diagnostics collected along the way.
#[derive(Debug)]
pub struct Assembly {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
    pub source_lines: Vec<String>,
    pub counts: PassCounts,
}

struct MacroFrame {
    name: String,
    call_site: SourceLoc,
}

pub struct Assembler {
    ctx: CompileContext,
    space: AddressSpace,
    symbols: SymbolTable,
    macros: MacroProcessor,
    control: ControlStructures,
    arch_flags: ArchFlags,
    subroutines: HashSet<String>,
    expansion_stack: Vec<String>,
    macro_frame: Option<MacroFrame>,
    diagnostics: Vec<Diagnostic>,
    include_paths: Vec<PathBuf>,
    stdlib_path: Option<PathBuf>,
    counts: PassCounts,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            ctx: CompileContext::default(),
            space: AddressSpace::new(),
            symbols: SymbolTable::new(),
            macros: MacroProcessor::new(),
            control: ControlStructures::new(),
            arch_flags: ArchFlags::new(),
            subroutines: HashSet::new(),
            expansion_stack: Vec::new(),
            macro_frame: None,
            diagnostics: Vec::new(),
            include_paths: Vec::new(),
            stdlib_path: None,
            counts: PassCounts::new(),
        }
    }

    pub fn with_include_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.include_paths = paths;
        self
    }

    pub fn with_stdlib(mut self, path: Option<PathBuf>) -> Self {
        self.stdlib_path = path;
        self
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn assemble_file(&mut self, path: &Path) -> Result<Assembly, AsmRunError> {
        let text = fs::read_to_string(path).map_err(|err| {
            AsmRunError::new(
                AsmError::new(AsmErrorKind::Io, "Error reading input file", Some(&err.to_string())),
                Vec::new(),
                Vec::new(),
            )
        })?;
        self.assemble_source(&path.to_string_lossy(), &text)
    }

    /// Run the whole pipeline over one compilation unit.
    pub fn assemble_source(&mut self, file: &str, text: &str) -> Result<Assembly, AsmRunError> {
        let source_lines: Vec<String> = text.lines().map(str::to_string).collect();
        self.ctx = CompileContext {
            current_file: file.to_string(),
            source_lines: source_lines.clone(),
            include_depth: 0,
        };

        let statements = match parse_source(file, text) {
            Ok(statements) => statements,
            Err(diag) => return Err(self.run_error(diag, source_lines)),
        };

        let instructions = match self.pass1(&statements) {
            Ok(instructions) => instructions,
            Err(diag) => return Err(self.run_error(diag, source_lines)),
        };

        if let Err(diag) = self.commit_labels(&instructions) {
            return Err(self.run_error(diag, source_lines));
        }

        let mut warnings = mem::take(&mut self.diagnostics);
        let program = match program::resolve(&instructions, &self.symbols, file, &mut warnings) {
            Ok(program) => program,
            Err(diag) => return Err(self.run_error(diag, source_lines)),
        };

        self.counts.words = instructions.iter().filter(|i| i.occupies_word()).count() as u32;
        self.counts.warnings = warnings
            .iter()
            .filter(|d| d.severity() == Severity::Warning)
            .count() as u32;

        Ok(Assembly {
            program,
            diagnostics: warnings,
            source_lines,
            counts: self.counts,
        })
    }

    fn run_error(&mut self, diag: Diagnostic, source_lines: Vec<String>) -> AsmRunError {
        AsmRunError::from_diagnostic(diag, mem::take(&mut self.diagnostics), source_lines)
    }

    fn pass1(&mut self, statements: &[Statement]) -> Result<Vec<Instruction>, Diagnostic> {
        let mut out = Vec::new();
        self.process_statements(statements, &mut out)?;
        Ok(out)
    }

    /// Commit every label's authoritative post-lowering address.
    fn commit_labels(&mut self, instructions: &[Instruction]) -> Result<(), Diagnostic> {
        for instr in instructions {
            if instr.kind != InstrKind::Label {
                continue;
            }
            let (Some(name), Some(addr)) = (instr.label_name.as_deref(), instr.word_addr) else {
                continue;
            };
            self.symbols
                .commit_label(name, addr, &instr.source)
                .map_err(|err| self.fail(err, &instr.source))?;
        }
        Ok(())
    }

    fn process_statements(
        &mut self,
        statements: &[Statement],
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        for stmt in statements {
            self.process_statement(stmt, out)?;
        }
        Ok(())
    }

    fn process_block(&mut self, statements: &[Statement]) -> Result<Vec<Instruction>, Diagnostic> {
        let mut out = Vec::new();
        self.process_statements(statements, &mut out)?;
        Ok(out)
    }

    fn process_statement(
        &mut self,
        stmt: &Statement,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        self.counts.statements += 1;
        match stmt {
            Statement::Word {
                name,
                modifiers,
                loc,
            } => self.process_word(name, modifiers, loc, out),
            Statement::Literal { value, loc } => {
                let eloc = self.effective_loc(loc);
                let addr = self.space.advance(1);
                self.push(
                    Instruction::byte_code(isa::INST_LIT | value, addr, format!("#{value}"), eloc),
                    out,
                );
                Ok(())
            }
            Statement::LabelRef { name, loc } => {
                let eloc = self.effective_loc(loc);
                let addr = self.space.advance(1);
                self.push(
                    Instruction::label_ref(isa::INST_LIT, name, addr, format!("#{name}"), eloc),
                    out,
                );
                Ok(())
            }
            Statement::Jump { kind, target, loc } => {
                let eloc = self.effective_loc(loc);
                let addr = self.space.advance(1);
                let base = isa::jump_base(*kind);
                let text = format!(
                    "{} {target}",
                    match kind {
                        crate::core::statement::JumpKind::Jmp => "JMP",
                        crate::core::statement::JumpKind::ZJmp => "ZJMP",
                        crate::core::statement::JumpKind::Call => "CALL",
                    }
                );
                self.push(Instruction::jump(base, target, addr, text, eloc), out);
                Ok(())
            }
            Statement::Label { name, loc } => {
                let eloc = self.effective_loc(loc);
                let cursor = self.space.word_address();
                self.symbols
                    .define_label(name, cursor, eloc.clone())
                    .map_err(|err| self.fail(err, &eloc))?;
                self.push(Instruction::label(name, cursor, eloc), out);
                Ok(())
            }
            Statement::MacroDef {
                name,
                stack_effect,
                body,
                loc,
            } => {
                let eloc = self.effective_loc(loc);
                self.macros
                    .define_macro(name, stack_effect.clone(), body.clone(), &eloc)
                    .map_err(|err| self.fail(err, &eloc))?;
                self.push(
                    Instruction::marker(InstrKind::MacroDef, format!(".macro {name}"), eloc),
                    out,
                );
                Ok(())
            }
            Statement::SubroutineDef {
                name, body, loc, ..
            } => self.process_subroutine(name, body, loc, out),
            Statement::Control { kind, loc } => self.process_control(kind, loc, out),
            Statement::LoopIndex { depth, loc } => {
                let eloc = self.effective_loc(loc);
                let (instrs, warning) = self.control.loop_index(*depth, &mut self.space, &eloc);
                if let Some(warning) = warning {
                    self.warn(warning, &eloc);
                }
                self.push_all(instrs, out);
                Ok(())
            }
            Statement::ArchFlag { name, value, loc } => {
                let eloc = self.effective_loc(loc);
                self.arch_flags
                    .apply(name, value, &mut self.symbols)
                    .map_err(|err| self.fail(err, &eloc))?;
                self.push(
                    Instruction::marker(
                        InstrKind::Directive,
                        format!(".arch_flag {name} {value}"),
                        eloc,
                    ),
                    out,
                );
                Ok(())
            }
            Statement::Define { name, expr, loc } => {
                let eloc = self.effective_loc(loc);
                directives::apply_define(name, expr, &mut self.symbols)
                    .map_err(|err| self.fail(err, &eloc))?;
                self.push(
                    Instruction::marker(InstrKind::Directive, format!(".define {name} {expr}"), eloc),
                    out,
                );
                Ok(())
            }
            Statement::IfBlock {
                condition,
                body,
                loc,
            } => self.process_conditional(condition, body, loc, out),
            Statement::Org { expr, loc } => {
                let eloc = self.effective_loc(loc);
                let value = expr::evaluate(expr, &self.symbols)
                    .map_err(|err| self.fail(err, &eloc))?;
                if !(0..=0xFFFF).contains(&value) {
                    return Err(self.fail(
                        AsmError::new(AsmErrorKind::AddressSpace, "ORG address out of range", Some(expr)),
                        &eloc,
                    ));
                }
                self.space
                    .set_org(value as u16)
                    .map_err(|err| self.fail(err, &eloc))?;
                self.push(
                    Instruction::marker(InstrKind::Directive, format!("ORG ${value:04X}"), eloc),
                    out,
                );
                Ok(())
            }
            Statement::Include { path, loc } => self.process_include(path, loc, out),
        }
    }

    /// Resolve a bare word: ALU operation, macro call, then subroutine
    /// call.
    fn process_word(
        &mut self,
        name: &str,
        modifiers: &[String],
        loc: &SourceLoc,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        let eloc = self.effective_loc(loc);
        if isa::alu_op(name).is_some() || !modifiers.is_empty() {
            let value = isa::encode(name, modifiers).map_err(|err| self.fail(err, &eloc))?;
            let text = if modifiers.is_empty() {
                name.to_string()
            } else {
                format!("{name}[{}]", modifiers.join(","))
            };
            let addr = self.space.advance(1);
            self.push(Instruction::byte_code(value, addr, text, eloc), out);
            return Ok(());
        }
        if self.macros.is_macro(name) {
            return self.expand_macro(name, &eloc, out);
        }
        if self.subroutines.contains(name) {
            let addr = self.space.advance(1);
            self.push(
                Instruction::jump(isa::INST_CALL, name, addr, format!("CALL {name}"), eloc),
                out,
            );
            return Ok(());
        }
        Err(self.fail(
            AsmError::new(AsmErrorKind::Encoding, "Unknown operation", Some(name)),
            &eloc,
        ))
    }

    /// Expand a macro call: process the template at the call site with
    /// the macro's name pushed on the expansion stack. The stack and the
    /// provenance frame are restored on every exit path.
    fn expand_macro(
        &mut self,
        name: &str,
        call_site: &SourceLoc,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        let template = self
            .macros
            .template(name, &self.expansion_stack)
            .map_err(|err| self.fail(err, call_site))?;
        let body = template.body.clone();

        self.expansion_stack.push(name.to_string());
        let saved_frame = self.macro_frame.replace(MacroFrame {
            name: name.to_string(),
            call_site: call_site.clone(),
        });
        let result = self.process_statements(&body, out);
        self.macro_frame = saved_frame;
        self.expansion_stack.pop();
        result
    }

    /// `: name body ;` — label, body, and an appended return unless the
    /// body already ends in one.
    fn process_subroutine(
        &mut self,
        name: &str,
        body: &[Statement],
        loc: &SourceLoc,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        let eloc = self.effective_loc(loc);
        let cursor = self.space.word_address();
        self.symbols
            .define_label(name, cursor, eloc.clone())
            .map_err(|err| self.fail(err, &eloc))?;
        self.subroutines.insert(name.to_string());
        self.push(Instruction::label(name, cursor, eloc.clone()), out);

        let body_start = out.len();
        self.process_statements(body, out)?;

        let ends_in_return = out[body_start..]
            .iter()
            .rev()
            .find(|i| i.occupies_word())
            .is_some_and(|i| i.kind == InstrKind::ByteCode && isa::is_return(i.value));
        if !ends_in_return {
            let addr = self.space.advance(1);
            self.push(Instruction::byte_code(isa::W_RET, addr, "ret", eloc), out);
        }
        Ok(())
    }

    fn process_control(
        &mut self,
        kind: &ControlKind,
        loc: &SourceLoc,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        let eloc = self.effective_loc(loc);
        let start = self.space.word_address();
        let lowered = match kind {
            ControlKind::If { body } => {
                let body = self.process_block(body)?;
                self.control.lower_if(body, start, &mut self.space, &eloc)
            }
            ControlKind::IfElse {
                true_body,
                false_body,
            } => {
                let true_body = self.process_block(true_body)?;
                let false_body = self.process_block(false_body)?;
                self.control
                    .lower_if_else(true_body, false_body, start, &mut self.space, &eloc)
            }
            ControlKind::BeginUntil { body } => {
                let body = self.process_block(body)?;
                self.control
                    .lower_begin_until(body, start, &mut self.space, &eloc)
            }
            ControlKind::BeginWhileRepeat { head, tail } => {
                let head = self.process_block(head)?;
                let tail = self.process_block(tail)?;
                self.control
                    .lower_begin_while_repeat(head, tail, start, &mut self.space, &eloc)
            }
            ControlKind::DoLoop { body, plus } => {
                self.control.enter_loop();
                let body = self.process_block(body);
                self.control.exit_loop();
                self.control
                    .lower_do_loop(body?, *plus, start, &mut self.space, &eloc)
            }
        };
        self.push_all(lowered, out);
        Ok(())
    }

    /// `.if` block: the body is processed either way; a false condition
    /// retracts every address it allocated and every definition it made.
    fn process_conditional(
        &mut self,
        condition: &str,
        body: &[Statement],
        loc: &SourceLoc,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        let eloc = self.effective_loc(loc);
        let selected = directives::eval_condition(condition, &self.symbols)
            .map_err(|err| self.fail(err, &eloc))?;

        let kept_labels = self.symbols.label_names();
        let kept_constants = self.symbols.constant_names();
        let kept_macros = self.macros.names();
        let kept_subroutines = self.subroutines.clone();

        let block = self.process_block(body)?;
        self.push(
            Instruction::marker(InstrKind::Directive, format!(".if {condition}"), eloc.clone()),
            out,
        );
        if selected {
            self.push_all(block, out);
        } else {
            let words = block.iter().filter(|i| i.occupies_word()).count();
            self.space
                .undo_advance(words)
                .map_err(|err| self.fail(err, &eloc))?;
            self.symbols.retain_labels(&kept_labels);
            self.symbols.retain_constants(&kept_constants);
            self.macros.retain(&kept_macros);
            self.subroutines = kept_subroutines;
        }
        Ok(())
    }

    fn process_include(
        &mut self,
        path: &str,
        loc: &SourceLoc,
        out: &mut Vec<Instruction>,
    ) -> Result<(), Diagnostic> {
        let eloc = self.effective_loc(loc);
        if self.ctx.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(self.fail(
                AsmError::new(AsmErrorKind::Io, "Include depth exceeded", Some(path)),
                &eloc,
            ));
        }
        let Some(resolved) = self.resolve_include(path) else {
            return Err(self.fail(
                AsmError::new(AsmErrorKind::Io, "Include file not found", Some(path)),
                &eloc,
            ));
        };
        let text = fs::read_to_string(&resolved).map_err(|err| {
            self.fail(
                AsmError::new(AsmErrorKind::Io, "Error reading include file", Some(&err.to_string())),
                &eloc,
            )
        })?;
        let file_name = resolved.to_string_lossy().to_string();
        let statements = parse_source(&file_name, &text)?;

        self.push(
            Instruction::marker(InstrKind::Directive, format!("include \"{path}\""), eloc),
            out,
        );

        let depth = self.ctx.include_depth;
        let saved = mem::replace(
            &mut self.ctx,
            CompileContext {
                current_file: file_name,
                source_lines: text.lines().map(str::to_string).collect(),
                include_depth: depth + 1,
            },
        );
        let result = self.process_statements(&statements, out);
        self.ctx = saved;
        result
    }

    /// Include search order: the including file's directory, the `-I`
    /// paths in order, then the standard library unless disabled.
    fn resolve_include(&self, path: &str) -> Option<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(dir) = Path::new(&self.ctx.current_file).parent() {
            candidates.push(dir.join(path));
        }
        for dir in &self.include_paths {
            candidates.push(dir.join(path));
        }
        if let Some(stdlib) = &self.stdlib_path {
            candidates.push(stdlib.join(path));
        }
        candidates.into_iter().find(|candidate| candidate.is_file())
    }

    /// Inside a macro expansion, emitted instructions report the call
    /// site and carry the macro name as provenance.
    fn effective_loc(&self, loc: &SourceLoc) -> SourceLoc {
        match &self.macro_frame {
            Some(frame) => frame.call_site.clone(),
            None => loc.clone(),
        }
    }

    fn push(&mut self, instr: Instruction, out: &mut Vec<Instruction>) {
        out.push(self.finish(instr));
    }

    fn push_all(&mut self, instrs: Vec<Instruction>, out: &mut Vec<Instruction>) {
        for instr in instrs {
            self.push(instr, out);
        }
    }

    fn finish(&self, mut instr: Instruction) -> Instruction {
        if let Some(frame) = &self.macro_frame {
            if instr.provenance.is_none() {
                instr.provenance = Some(frame.name.clone());
            }
        }
        instr
    }

    fn fail(&self, error: AsmError, loc: &SourceLoc) -> Diagnostic {
        Diagnostic::new(loc.line, Severity::Error, error)
            .with_file(Some(loc.file.clone()))
            .with_column(Some(loc.column))
            .with_source(Some(loc.source_line.clone()))
    }

    fn warn(&mut self, error: AsmError, loc: &SourceLoc) {
        self.diagnostics.push(
            Diagnostic::new(loc.line, Severity::Warning, error)
                .with_file(Some(loc.file.clone()))
                .with_column(Some(loc.column))
                .with_source(Some(loc.source_line.clone())),
        );
    }
}

/// Run the assembler with command-line arguments.
pub fn run() -> Result<AsmRunReport, AsmRunError> {
    let cli = Cli::parse();
    let config = validate_cli(&cli)?;
    run_with(&cli, &config)
}

fn run_with(cli: &Cli, config: &cli::CliConfig) -> Result<AsmRunReport, AsmRunError> {
    let mut assembler = Assembler::new()
        .with_include_paths(cli.include_paths.clone())
        .with_stdlib(config.stdlib.clone());
    let assembly = assembler.assemble_file(&cli.input)?;

    for diag in &assembly.diagnostics {
        if cli.debug {
            eprintln!(
                "{}",
                diag.format_with_context(Some(assembly.source_lines.as_slice()))
            );
        } else {
            eprintln!("{}", diag.format());
        }
    }

    write_output(&config.output, |out| assembly.program.write_hex(out))
        .map_err(|err| output_error(&config.output, err))?;

    if let Some(path) = &config.symbol_path {
        write_output(path, |out| assembly.program.write_symbols(out))
            .map_err(|err| output_error(path, err))?;
    }

    if let Some(path) = &config.list_path {
        write_output(path, |out| {
            let mut listing = ListingWriter::new(out);
            listing.header(&format!("j1forge v{VERSION}"))?;
            for instr in assembly.program.instructions() {
                listing.write_instruction(instr)?;
            }
            listing.footer(&assembly.counts, assembler.symbols())
        })
        .map_err(|err| output_error(path, err))?;
    }

    Ok(AsmRunReport::new(assembly.diagnostics, assembly.source_lines))
}

fn write_output<F>(path: &str, write: F) -> std::io::Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let mut file = File::create(path)?;
    write(&mut file)
}

fn output_error(path: &str, err: std::io::Error) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Io, &err.to_string(), Some(path)),
        Vec::new(),
        Vec::new(),
    )
}
