// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Macro definition storage and expansion guarding.
//!
//! A macro captures its body as unprocessed statements; the assembler
//! core processes the template at every call site, which gives each
//! expansion fresh addresses, fresh generated labels and call-site source
//! locations. Recursion protection is an explicit expansion stack owned
//! by the caller, so the guard is released on every exit path.

use std::collections::HashMap;

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::statement::{ControlKind, SourceLoc, Statement};

/// A named, inline-expanded instruction template.
#[derive(Debug, Clone)]
pub struct MacroDefinition {
    pub name: String,
    /// Stack-effect comment, documentation only.
    pub stack_effect: Option<String>,
    pub body: Vec<Statement>,
    pub defined_at: SourceLoc,
}

#[derive(Debug, Default)]
pub struct MacroProcessor {
    macros: HashMap<String, MacroDefinition>,
}

impl MacroProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_macro(
        &mut self,
        name: &str,
        stack_effect: Option<String>,
        body: Vec<Statement>,
        site: &SourceLoc,
    ) -> Result<(), AsmError> {
        if self.macros.contains_key(name) {
            return Err(AsmError::new(
                AsmErrorKind::Structural,
                "Duplicate macro definition",
                Some(name),
            ));
        }
        validate_template(name, &body)?;
        self.macros.insert(
            name.to_string(),
            MacroDefinition {
                name: name.to_string(),
                stack_effect,
                body,
                defined_at: site.clone(),
            },
        );
        Ok(())
    }

    pub fn is_macro(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MacroDefinition> {
        self.macros.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.macros.keys().cloned().collect()
    }

    /// Drop every macro not in `keep`. Used to retract definitions made
    /// inside a false conditional block.
    pub fn retain(&mut self, keep: &[String]) {
        self.macros.retain(|name, _| keep.iter().any(|k| k == name));
    }

    /// Fetch a macro's template for expansion, enforcing the recursion
    /// guard against the caller's expansion stack.
    pub fn template(
        &self,
        name: &str,
        expansion_stack: &[String],
    ) -> Result<&MacroDefinition, AsmError> {
        let Some(def) = self.macros.get(name) else {
            return Err(AsmError::new(
                AsmErrorKind::Resolution,
                "Undefined macro",
                Some(name),
            ));
        };
        if expansion_stack.iter().any(|n| n == name) {
            return Err(AsmError::new(
                AsmErrorKind::Resolution,
                "Recursive macro expansion detected",
                Some(name),
            ));
        }
        Ok(def)
    }
}

/// Templates may not define labels or nest macro/subroutine definitions.
fn validate_template(name: &str, body: &[Statement]) -> Result<(), AsmError> {
    for stmt in body {
        match stmt {
            Statement::Label { .. } => {
                return Err(AsmError::new(
                    AsmErrorKind::Structural,
                    "Labels are not allowed inside macros",
                    Some(name),
                ));
            }
            Statement::MacroDef { .. } | Statement::SubroutineDef { .. } => {
                return Err(AsmError::new(
                    AsmErrorKind::Structural,
                    "Nested definitions are not allowed inside macros",
                    Some(name),
                ));
            }
            Statement::Control { kind, .. } => match kind {
                ControlKind::If { body } => validate_template(name, body)?,
                ControlKind::IfElse {
                    true_body,
                    false_body,
                } => {
                    validate_template(name, true_body)?;
                    validate_template(name, false_body)?;
                }
                ControlKind::BeginUntil { body } => validate_template(name, body)?,
                ControlKind::BeginWhileRepeat { head, tail } => {
                    validate_template(name, head)?;
                    validate_template(name, tail)?;
                }
                ControlKind::DoLoop { body, .. } => validate_template(name, body)?,
            },
            Statement::IfBlock { body, .. } => validate_template(name, body)?,
            _ => {}
        }
    }
    Ok(())
}
