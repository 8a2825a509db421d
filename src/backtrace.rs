// SPDX-License-Identifier: GPL-3.0-or-later

//! Call-stack backtraces (spec.md §6).
//!
//! Walking the current PC and the operand stack for saved program counters
//! is this crate's job; rendering the values found there is not — the
//! pretty-printer belongs to the surrounding system and is explicitly out
//! of scope (spec.md §1). [`Renderer`] is the narrow seam a host crosses
//! to supply one.

#[cfg(test)]
#[path = "backtrace_test.rs"]
mod backtrace_test;

use crate::word::Word;
use alloc::vec::Vec;

/// One saved return address found on the stack, innermost call first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub return_pc: u32,
}

/// Collect the current PC and every saved program counter on `stack`,
/// innermost call first (spec.md §6: "pretty-print the current PC and any
/// PC-tagged stack words").
///
/// `CALL` and `CATCH_OOM` are the only instructions that push a PC-tagged
/// word (spec.md §4.5), so beyond the leading current-PC frame this is
/// simply every `is_pc` stack word, read back to front.
#[must_use]
pub fn unwind(current_pc: u32, stack: &[Word]) -> Vec<Frame> {
    core::iter::once(Frame { return_pc: current_pc })
        .chain(stack.iter().rev().filter(|w| w.is_pc()).map(|w| Frame { return_pc: w.as_pc_offset() }))
        .collect()
}

/// Host-supplied formatter for a value found on the stack. This crate
/// never decides how a cons cell, tuple, or string prints — only which
/// stack words a backtrace is built from.
pub trait Renderer {
    /// Render one call frame's return address.
    fn render_frame(&mut self, index: usize, frame: Frame) -> core::fmt::Result;
}

/// Render a full backtrace through `renderer`: the current PC first, then
/// every saved call frame, outermost call last.
pub fn render<R: Renderer>(current_pc: u32, stack: &[Word], renderer: &mut R) -> core::fmt::Result {
    for (index, frame) in unwind(current_pc, stack).into_iter().enumerate() {
        renderer.render_frame(index, frame)?;
    }
    Ok(())
}
