// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types (spec.md §7).
//!
//! Hand-rolled enums with `core::fmt::Display` impls, matching the style
//! the teacher crate uses throughout (`reader::ReadError`,
//! `intrinsics::IntrinsicError`) rather than pulling in `thiserror`.

use core::fmt;

/// Errors surfaced across `verify` and `step` (spec.md §6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Magic, length, alignment, or checksum failed verification.
    ProgramCorrupt,
    /// The version byte does not match this interpreter's `BCODE_VERSION`.
    ProgramWrongVersion,
    /// The heap is exhausted and no `out-of-memory` catch frame was found.
    HeapFull,
    /// A per-instruction invariant check failed (testing builds only).
    Check(CheckError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProgramCorrupt => write!(f, "program image is corrupt"),
            Self::ProgramWrongVersion => write!(f, "program image has the wrong bytecode version"),
            Self::HeapFull => write!(f, "heap exhausted with no out-of-memory handler on the stack"),
            Self::Check(c) => write!(f, "instruction check failed: {c}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Per-instruction invariant failures, reported only in testing builds.
///
/// Release builds elide these checks entirely (spec.md §7), matching the
/// original's `HH_CHECK` macro which compiles to nothing outside
/// `HH_TESTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckError {
    /// An instruction required a fixnum but found something else.
    NotFixnum,
    /// An instruction required a pointer but found something else.
    NotPointer,
    /// An instruction required a cons cell but found a different kind.
    NotCons,
    /// An instruction required a tuple but found a different kind.
    NotTuple,
    /// An instruction required an AVL node but found a different kind.
    NotAvlNode,
    /// A tuple or string index was out of bounds.
    IndexOutOfBounds,
    /// The operand stack underflowed.
    StackUnderflow,
    /// The operand stack overflowed.
    StackOverflow,
    /// A `call` target was not a valid program offset.
    BadCallTarget,
    /// An opcode byte (or `ext` opcode) had no defined meaning.
    UnknownOpcode,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFixnum => "expected a fixnum",
            Self::NotPointer => "expected a pointer",
            Self::NotCons => "expected a cons cell",
            Self::NotTuple => "expected a tuple",
            Self::NotAvlNode => "expected an AVL node",
            Self::IndexOutOfBounds => "index out of bounds",
            Self::StackUnderflow => "operand stack underflow",
            Self::StackOverflow => "operand stack overflow",
            Self::BadCallTarget => "invalid call target",
            Self::UnknownOpcode => "unknown opcode",
        };
        write!(f, "{msg}")
    }
}
