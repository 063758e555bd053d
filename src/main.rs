// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for j1forge.

fn main() {
    match j1forge::assembler::run() {
        Ok(_) => {}
        Err(err) => {
            for diag in err.diagnostics() {
                eprintln!("{}", diag.format_with_context(Some(err.source_lines())));
            }
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
