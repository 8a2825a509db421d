// SPDX-License-Identifier: GPL-3.0-or-later

//! A stack-based bytecode interpreter with a copying garbage collector
//! for an embedded LISP dialect.
//!
//! This crate is the runtime core only: it verifies and executes an
//! already-compiled bytecode image in bounded time slices over a
//! two-semispace heap. It does not compile LISP source, read or write
//! bytecode image files, or pretty-print values — those live above this
//! layer, against the narrow seams [`backtrace::Renderer`] and
//! [`trace::Tracer`] expose.
//!
//! ```text
//! image::verify(bytes) -> Image
//!     -> context::Context::new(&Image, heap_words, stack_words)
//!         -> vm::run(&mut Context, max_instructions) -> StepOutcome
//! ```
//!
//! A collection runs automatically whenever an instruction's allocation
//! would not fit (spec.md §4.6); it is never triggered explicitly by a
//! caller of this crate.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod backtrace;
pub mod context;
pub mod error;
pub mod gc;
pub mod heap;
pub mod image;
pub mod opcode;
pub mod trace;
pub mod vm;
pub mod word;

pub use context::Context;
pub use error::{CheckError, Error};
pub use image::{verify, Image, BCODE_VERSION};
pub use trace::{GcReason, NullTracer, Tracer};
pub use vm::{run, StepOutcome, MIN_RESERVE_WORDS};
pub use word::{Small, Word, OUT_OF_MEMORY_CATCH_TAG};
