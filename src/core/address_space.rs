// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Memory layout management: ORG relocation, collision detection, and
//! reversible word-address allocation.

use std::collections::HashMap;

use crate::core::error::{AsmError, AsmErrorKind};

pub const SECTION_CODE: &str = ".code";
pub const SECTION_DATA: &str = ".data";

/// Monotonic word-address allocator.
///
/// `advance` returns the address held before advancing and records the
/// allocated range; `undo_advance` pops recorded ranges to reclaim space
/// for skipped conditional blocks. Collision checks are a linear scan of
/// the used ranges, which is fine at the instruction counts involved.
#[derive(Debug)]
pub struct AddressSpace {
    cursor: u16,
    used_ranges: Vec<(u16, u16)>,
    sections: HashMap<&'static str, Option<u16>>,
    current_section: &'static str,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    pub fn new() -> Self {
        let mut sections = HashMap::new();
        sections.insert(SECTION_CODE, Some(0x0000));
        sections.insert(SECTION_DATA, None);
        Self {
            cursor: 0x0000,
            used_ranges: Vec::new(),
            sections,
            current_section: SECTION_CODE,
        }
    }

    /// Switch the active section. Within `.code` the cursor may only move
    /// forward; `.data` has no direction restriction.
    pub fn select_section(&mut self, name: &str) -> Result<(), AsmError> {
        let key = match name {
            SECTION_CODE => SECTION_CODE,
            SECTION_DATA => SECTION_DATA,
            _ => {
                return Err(AsmError::new(
                    AsmErrorKind::AddressSpace,
                    "Unknown section",
                    Some(name),
                ))
            }
        };
        self.sections.insert(self.current_section, Some(self.cursor));
        self.current_section = key;
        if let Some(Some(cursor)) = self.sections.get(key) {
            self.cursor = *cursor;
        }
        Ok(())
    }

    pub fn current_section(&self) -> &'static str {
        self.current_section
    }

    /// Set a new origin address, checking direction and collisions.
    pub fn set_org(&mut self, address: u16) -> Result<(), AsmError> {
        if address < self.cursor && self.current_section == SECTION_CODE {
            return Err(AsmError::new(
                AsmErrorKind::AddressSpace,
                &format!(
                    "ORG {address:04x} attempts to move backward in {} section",
                    SECTION_CODE
                ),
                None,
            ));
        }
        if self.is_used(address) {
            return Err(AsmError::new(
                AsmErrorKind::AddressSpace,
                &format!("Address collision at {address:04x}"),
                None,
            ));
        }
        self.cursor = address;
        self.sections.insert(self.current_section, Some(address));
        Ok(())
    }

    /// Advance the address pointer by `size` words and return the previous
    /// address. Records one range per call so `undo_advance` can retract
    /// allocations one `advance` at a time.
    pub fn advance(&mut self, size: u16) -> u16 {
        let prev = self.cursor;
        self.cursor = self.cursor.wrapping_add(size);
        self.used_ranges.push((prev, prev.wrapping_add(size)));
        prev
    }

    /// Undo the most recent `count` advance operations.
    pub fn undo_advance(&mut self, count: usize) -> Result<(), AsmError> {
        for _ in 0..count {
            let Some((start, _end)) = self.used_ranges.pop() else {
                return Err(AsmError::new(
                    AsmErrorKind::AddressSpace,
                    "Cannot retract more addresses than were advanced",
                    None,
                ));
            };
            self.cursor = start;
        }
        Ok(())
    }

    pub fn word_address(&self) -> u16 {
        self.cursor
    }

    pub fn byte_address(&self) -> u32 {
        u32::from(self.cursor) * 2
    }

    fn is_used(&self, address: u16) -> bool {
        self.used_ranges
            .iter()
            .any(|&(start, end)| start <= address && address < end)
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressSpace, SECTION_DATA};

    #[test]
    fn advance_returns_previous_address() {
        let mut space = AddressSpace::new();
        assert_eq!(space.advance(1), 0);
        assert_eq!(space.advance(1), 1);
        assert_eq!(space.advance(3), 2);
        assert_eq!(space.word_address(), 5);
        assert_eq!(space.byte_address(), 10);
    }

    #[test]
    fn undo_restores_cursor() {
        let mut space = AddressSpace::new();
        space.advance(1);
        space.advance(1);
        space.undo_advance(1).unwrap();
        assert_eq!(space.word_address(), 1);
        space.undo_advance(1).unwrap();
        assert_eq!(space.word_address(), 0);
    }

    #[test]
    fn undo_without_advance_underflows() {
        let mut space = AddressSpace::new();
        let err = space.undo_advance(1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot retract more addresses than were advanced"
        );
    }

    #[test]
    fn net_cursor_matches_net_advance_count() {
        let mut space = AddressSpace::new();
        for _ in 0..10 {
            space.advance(1);
        }
        space.undo_advance(4).unwrap();
        for _ in 0..2 {
            space.advance(1);
        }
        assert_eq!(space.word_address(), 8);
    }

    #[test]
    fn org_backward_in_code_fails() {
        let mut space = AddressSpace::new();
        space.set_org(0x0100).unwrap();
        let err = space.set_org(0x0080).unwrap_err();
        assert!(err.to_string().contains("backward"));
    }

    #[test]
    fn org_forward_over_gap_succeeds() {
        let mut space = AddressSpace::new();
        space.advance(4);
        space.set_org(0x0010).unwrap();
        space.advance(4);
        space.set_org(0x0100).unwrap();
        assert_eq!(space.word_address(), 0x0100);
    }

    #[test]
    fn org_into_used_range_collides() {
        let mut space = AddressSpace::new();
        space.set_org(0x0010).unwrap();
        space.advance(4);
        space.select_section(SECTION_DATA).unwrap();
        let err = space.set_org(0x0012).unwrap_err();
        assert_eq!(err.to_string(), "Address collision at 0012");
        assert!(space.set_org(0x0014).is_ok());
    }
}
