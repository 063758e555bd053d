// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::core::error::{AsmError, AsmErrorKind, AsmRunError};

pub const VERSION: &str = "1.0";

const LONG_ABOUT: &str = "Assembler for the J1 dual-stack Forth CPU.

Produces a flat hex-word-per-line machine image (default aout.hex).
Symbol and listing outputs are opt-in via -s/--symbols and -l/--list;
when their filenames are omitted, the output base name is used with a
.sym or .lst extension. Includes are resolved against the including
file's directory, then -I/--include paths in order, then the standard
library directory unless --no-stdlib is given.";

#[derive(Parser, Debug)]
#[command(
    name = "j1forge",
    version = VERSION,
    about = "Assembler for the J1 dual-stack Forth CPU",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(value_name = "FILE", help = "Input assembly file")]
    pub input: PathBuf,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        long_help = "Output hex image path. Defaults to aout.hex."
    )]
    pub output: Option<String>,
    #[arg(
        short = 's',
        long = "symbols",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a symbol file (address label per line, sorted by address). FILE is optional; when omitted, the output base is used and a .sym extension is added."
    )]
    pub symbol_name: Option<String>,
    #[arg(
        short = 'l',
        long = "list",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a listing file correlating address, machine word, source line and macro provenance. FILE is optional; when omitted, the output base is used and a .lst extension is added."
    )]
    pub list_name: Option<String>,
    #[arg(
        short = 'd',
        long = "debug",
        action = ArgAction::SetTrue,
        long_help = "Print diagnostics with a source-context caret line."
    )]
    pub debug: bool,
    #[arg(
        short = 'I',
        long = "include",
        value_name = "PATH",
        action = ArgAction::Append,
        long_help = "Add an include search path (repeatable, searched in order)."
    )]
    pub include_paths: Vec<PathBuf>,
    #[arg(
        long = "no-stdlib",
        action = ArgAction::SetTrue,
        long_help = "Do not search the standard library directory for includes."
    )]
    pub no_stdlib: bool,
    #[arg(
        long = "stdlib-path",
        value_name = "DIR",
        long_help = "Standard library directory. Defaults to a lib directory next to the input file, when present."
    )]
    pub stdlib_path: Option<PathBuf>,
}

/// Validated CLI configuration.
#[derive(Debug)]
pub struct CliConfig {
    pub output: String,
    pub symbol_path: Option<String>,
    pub list_path: Option<String>,
    pub stdlib: Option<PathBuf>,
}

pub fn resolve_output_path(base: &str, name: Option<String>, extension: &str) -> Option<String> {
    let name = name?;
    if name.is_empty() {
        return Some(format!("{base}.{extension}"));
    }
    let mut path = PathBuf::from(&name);
    if path.extension().is_none() {
        path = PathBuf::from(format!("{name}.{extension}"));
    }
    Some(path.to_string_lossy().to_string())
}

/// Validate CLI arguments and return the run configuration.
pub fn validate_cli(cli: &Cli) -> Result<CliConfig, AsmRunError> {
    if cli.input.as_os_str().is_empty() {
        return Err(cli_error("No input file specified"));
    }

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| "aout.hex".to_string());
    let base = output
        .strip_suffix(".hex")
        .unwrap_or(output.as_str())
        .to_string();

    let stdlib = if cli.no_stdlib {
        None
    } else if let Some(path) = &cli.stdlib_path {
        if !path.is_dir() {
            return Err(cli_error(&format!(
                "Standard library directory not found: {}",
                path.display()
            )));
        }
        Some(path.clone())
    } else {
        cli.input
            .parent()
            .map(|dir| dir.join("lib"))
            .filter(|dir| dir.is_dir())
    };

    Ok(CliConfig {
        output: output.clone(),
        symbol_path: resolve_output_path(&base, cli.symbol_name.clone(), "sym"),
        list_path: resolve_output_path(&base, cli.list_name.clone(), "lst"),
        stdlib,
    })
}

fn cli_error(msg: &str) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Cli, msg, None),
        Vec::new(),
        Vec::new(),
    )
}
