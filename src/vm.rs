// SPDX-License-Identifier: GPL-3.0-or-later

//! The dispatch engine (spec.md §4.5, §4.7).
//!
//! [`run`] executes instructions out of a [`Context`] until either the
//! time slice's instruction budget is spent or `HALT` runs, decoding the
//! variable-width instruction stream one opcode at a time. Every
//! instruction pre-reserves [`MIN_RESERVE_WORDS`] before it touches any
//! state; an instruction whose allocation need might exceed that (`mk
//! tuple dyn`, `mk string`) reserves its actual size explicitly before
//! mutating anything, so a mid-instruction collection is always safe to
//! restart from the top of the same instruction (spec.md §4.2, §4.7).

#[cfg(test)]
#[path = "vm_test.rs"]
mod vm_test;

use crate::context::Context;
use crate::error::{CheckError, Error};
use crate::gc;
use crate::heap::{avl_layout, cons_layout, string_words, tuple_words, TUPLE_ELEMS_OFFSET};
#[cfg(feature = "testing")]
use crate::heap::{ObjKind, TUPLE_LEN_FIELD};
use crate::opcode::{base, ext, ImmKind};
use crate::trace::{GcReason, Tracer};
use crate::word::Word;
use alloc::vec::Vec;

/// Words reserved before every instruction, regardless of what it
/// allocates (spec.md §4.2). Large enough to cover a cons cell, an AVL
/// node, or a small fixed-size tuple without a special case.
pub const MIN_RESERVE_WORDS: usize = 16;

/// Outcome of a bounded run (spec.md §4.7: "bounded time slices").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The slice's instruction budget ran out; the program is still
    /// runnable and a later call to [`run`] resumes it.
    BudgetExhausted,
    /// `HALT` executed.
    Halted,
}

macro_rules! check {
    ($cond:expr, $err:expr) => {
        #[cfg(feature = "testing")]
        {
            if !($cond) {
                return Err(Error::Check($err));
            }
        }
    };
}

/// Run up to `max_instructions` instructions of `ctx`'s program.
///
/// # Errors
///
/// Returns [`Error::HeapFull`] if an allocation cannot be satisfied even
/// after a collection and no `out-of-memory` catch frame is found on the
/// stack; returns a [`Error::Check`] variant (testing builds only) if an
/// instruction's invariants are violated.
pub fn run<T: Tracer>(ctx: &mut Context<'_, T>, max_instructions: u32) -> Result<StepOutcome, Error> {
    for _ in 0..max_instructions {
        if step_one(ctx)? {
            return Ok(StepOutcome::Halted);
        }
    }
    Ok(StepOutcome::BudgetExhausted)
}

/// Decode a sign-extended immediate: the first byte is sign-extended,
/// then each remaining byte is shifted in and OR'd, matching the
/// original interpreter's byte assembly (spec.md §4.5, `SPEC_FULL.md` §2).
fn decode_immediate(bytes: &[u8]) -> i32 {
    let Some((&first, rest)) = bytes.split_first() else {
        return 0;
    };
    let mut v = i32::from(first.cast_signed());
    for &b in rest {
        v = (v << 8) | i32::from(b);
    }
    v
}

enum Reserved {
    Ready,
    /// An `out-of-memory` catch frame absorbed the failure; `pc`/`env`/
    /// the stack were already unwound to the handler, so the current
    /// instruction must not run.
    Recovered,
}

fn ensure_reserve<T: Tracer>(ctx: &mut Context<'_, T>, words: usize) -> Result<Reserved, Error> {
    if ctx.active_heap().can_allocate(words) {
        return Ok(Reserved::Ready);
    }
    gc::collect(ctx, GcReason::ReserveFailed);
    if ctx.active_heap().can_allocate(words) {
        return Ok(Reserved::Ready);
    }
    ctx.find_oom_catch_frame().map_or(Err(Error::HeapFull), |tag_index| {
        ctx.unwind_to_catch_frame(tag_index);
        Ok(Reserved::Recovered)
    })
}

fn cons_field<T: Tracer>(ctx: &Context<'_, T>, w: Word, field: usize) -> Result<Word, Error> {
    check!(w.is_ptr(), CheckError::NotCons);
    let addr = w.as_ptr_index();
    check!(ctx.active_heap().header(addr).kind() == ObjKind::Cons, CheckError::NotCons);
    Ok(ctx.active_heap().read(addr + field))
}

#[expect(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    reason = "tuple lengths are always written non-negative by alloc_tuple, and fit in a usize on every supported target"
)]
fn tuple_ref<T: Tracer>(ctx: &Context<'_, T>, w: Word, index: usize) -> Result<Word, Error> {
    check!(w.is_ptr(), CheckError::NotTuple);
    let addr = w.as_ptr_index();
    let heap = ctx.active_heap();
    check!(heap.header(addr).kind() == ObjKind::Tuple, CheckError::NotTuple);
    #[cfg(feature = "testing")]
    {
        let len = heap.read(addr + TUPLE_LEN_FIELD).as_fixnum() as usize;
        check!(index < len, CheckError::IndexOutOfBounds);
    }
    Ok(heap.read(addr + TUPLE_ELEMS_OFFSET + 1 + index))
}

fn avl_field<T: Tracer>(ctx: &Context<'_, T>, w: Word, field: usize) -> Result<Word, Error> {
    check!(w.is_ptr(), CheckError::NotAvlNode);
    let addr = w.as_ptr_index();
    check!(ctx.active_heap().header(addr).kind() == ObjKind::AvlNode, CheckError::NotAvlNode);
    Ok(ctx.active_heap().read(addr + field))
}

/// Execute one instruction. Returns `true` if it was `HALT`.
#[allow(clippy::too_many_lines)]
#[expect(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    reason = "immediates are masked with .max(0) before narrowing, and pc deltas are small by construction"
)]
fn step_one<T: Tracer>(ctx: &mut Context<'_, T>) -> Result<bool, Error> {
    if matches!(ensure_reserve(ctx, MIN_RESERVE_WORDS)?, Reserved::Recovered) {
        return Ok(false);
    }

    let pc = ctx.pc as usize;
    let byte = ctx.program()[pc];
    let mnemonic = byte & 0x3F;
    let imm_kind = ImmKind::from_insn_class(byte >> 6);
    let width = imm_kind.n_bytes();
    let imm = decode_immediate(&ctx.program()[pc + 1..pc + 1 + width]);
    let mut next_pc = (pc + 1 + width) as u32;

    if ctx.insn_trace_enabled {
        let (trace_pc, accu) = (ctx.pc, ctx.accu);
        ctx.tracer_mut().instruction(trace_pc, mnemonic, accu);
    }

    let mut halted = false;
    match mnemonic {
        base::NOP => {}
        base::RETURN => {
            let env = ctx.pop()?;
            let pc_word = ctx.pop()?;
            check!(pc_word.is_pc(), CheckError::BadCallTarget);
            ctx.env = env;
            next_pc = pc_word.as_pc_offset();
        }
        base::PUSH => ctx.push(ctx.accu)?,
        base::POPN => ctx.popn(imm.max(0) as usize)?,
        base::LD_FIXNUM => ctx.accu = Word::fixnum(i64::from(imm)),
        base::LD_NIL => ctx.accu = Word::nil(),
        base::LD_TRUE => ctx.accu = Word::bool(true),
        base::LD_FALSE => ctx.accu = Word::bool(false),
        base::ENV_GET => {
            let mut cell = ctx.env;
            for _ in 0..imm.max(0) {
                cell = cons_field(ctx, cell, cons_layout::CDR)?;
            }
            ctx.accu = cons_field(ctx, cell, cons_layout::CAR)?;
        }
        base::ENV_EXTEND => {
            let (accu, env) = (ctx.accu, ctx.env);
            let addr = ctx.active_heap_mut().alloc_cons(accu, env);
            ctx.new_env = Word::ptr(addr);
        }
        base::ENTER_FRAME => {
            ctx.env = ctx.new_env;
            ctx.new_env = Word::nil();
        }
        base::CONS => {
            let car = ctx.pop()?;
            let cdr = ctx.accu;
            let addr = ctx.active_heap_mut().alloc_cons(car, cdr);
            ctx.accu = Word::ptr(addr);
        }
        base::CAR => ctx.accu = cons_field(ctx, ctx.accu, cons_layout::CAR)?,
        base::CDR => ctx.accu = cons_field(ctx, ctx.accu, cons_layout::CDR)?,
        base::MK_TUPLE => {
            let n = imm.max(0) as usize;
            if matches!(ensure_reserve(ctx, tuple_words(n))?, Reserved::Recovered) {
                return Ok(false);
            }
            let mut elems = Vec::with_capacity(n);
            for _ in 0..n {
                elems.push(ctx.pop()?);
            }
            elems.reverse();
            let addr = ctx.active_heap_mut().alloc_tuple(&elems);
            ctx.accu = Word::ptr(addr);
        }
        base::MK_TUPLE_DYN => {
            check!(ctx.accu.is_fixnum(), CheckError::NotFixnum);
            let n = ctx.accu.as_fixnum().max(0) as usize;
            if matches!(ensure_reserve(ctx, tuple_words(n))?, Reserved::Recovered) {
                return Ok(false);
            }
            let mut elems = Vec::with_capacity(n);
            for _ in 0..n {
                elems.push(ctx.pop()?);
            }
            elems.reverse();
            let addr = ctx.active_heap_mut().alloc_tuple(&elems);
            ctx.accu = Word::ptr(addr);
        }
        base::TUPLE_REF => ctx.accu = tuple_ref(ctx, ctx.accu, imm.max(0) as usize)?,
        base::TUPLE_SET => {
            let value = ctx.pop()?;
            check!(ctx.accu.is_ptr(), CheckError::NotTuple);
            let addr = ctx.accu.as_ptr_index();
            let index = imm.max(0) as usize;
            #[cfg(feature = "testing")]
            {
                let heap = ctx.active_heap();
                check!(heap.header(addr).kind() == ObjKind::Tuple, CheckError::NotTuple);
                let len = heap.read(addr + TUPLE_LEN_FIELD).as_fixnum() as usize;
                check!(index < len, CheckError::IndexOutOfBounds);
            }
            ctx.active_heap_mut().write(addr + TUPLE_ELEMS_OFFSET + 1 + index, value);
        }
        base::ADD => {
            let lhs = ctx.pop()?;
            check!(lhs.is_fixnum() && ctx.accu.is_fixnum(), CheckError::NotFixnum);
            ctx.accu = Word::fixnum(lhs.as_fixnum().wrapping_add(ctx.accu.as_fixnum()));
        }
        base::SUB => {
            let lhs = ctx.pop()?;
            check!(lhs.is_fixnum() && ctx.accu.is_fixnum(), CheckError::NotFixnum);
            ctx.accu = Word::fixnum(lhs.as_fixnum().wrapping_sub(ctx.accu.as_fixnum()));
        }
        base::MUL => {
            let lhs = ctx.pop()?;
            check!(lhs.is_fixnum() && ctx.accu.is_fixnum(), CheckError::NotFixnum);
            ctx.accu = Word::fixnum(lhs.as_fixnum().wrapping_mul(ctx.accu.as_fixnum()));
        }
        base::LT => {
            let lhs = ctx.pop()?;
            check!(lhs.is_fixnum() && ctx.accu.is_fixnum(), CheckError::NotFixnum);
            ctx.accu = Word::bool(lhs.as_fixnum() < ctx.accu.as_fixnum());
        }
        base::NUM_EQ => {
            let lhs = ctx.pop()?;
            check!(lhs.is_fixnum() && ctx.accu.is_fixnum(), CheckError::NotFixnum);
            ctx.accu = Word::bool(lhs.as_fixnum() == ctx.accu.as_fixnum());
        }
        base::JMP => next_pc = (pc as i64 + i64::from(imm)) as u32,
        base::JMP_IF_FALSE => {
            if !ctx.accu.is_truthy() {
                next_pc = (pc as i64 + i64::from(imm)) as u32;
            }
        }
        base::CALL => {
            let target = imm.max(0) as u32;
            ctx.push(Word::pc(next_pc))?;
            ctx.push(ctx.env)?;
            next_pc = target;
        }
        base::CATCH_OOM => {
            let target = imm.max(0) as u32;
            ctx.push(crate::word::OUT_OF_MEMORY_CATCH_TAG)?;
            ctx.push(Word::pc(target))?;
            ctx.push(ctx.env)?;
        }
        base::MK_STRING => {
            let offset = imm.max(0) as usize;
            let pool = ctx.constant_pool();
            check!(offset + 4 <= pool.len(), CheckError::IndexOutOfBounds);
            let len = u32::from_be_bytes([pool[offset], pool[offset + 1], pool[offset + 2], pool[offset + 3]]) as usize;
            check!(offset + 4 + len <= pool.len(), CheckError::IndexOutOfBounds);
            let bytes = &pool[offset + 4..offset + 4 + len];
            if matches!(ensure_reserve(ctx, string_words(len))?, Reserved::Recovered) {
                return Ok(false);
            }
            let addr = ctx.active_heap_mut().alloc_string(bytes);
            ctx.accu = Word::ptr(addr);
        }
        base::HALT => halted = true,
        base::EXT => {
            let sub = imm.max(0) as u8;
            run_ext(ctx, sub)?;
        }
        _ => return Err(Error::Check(CheckError::UnknownOpcode)),
    }

    ctx.record_executed(ctx.pc);
    ctx.pc = next_pc;
    Ok(halted)
}

fn run_ext<T: Tracer>(ctx: &mut Context<'_, T>, sub: u8) -> Result<(), Error> {
    match sub {
        ext::MK_AVL => {
            let key = ctx.pop()?;
            let value = ctx.accu;
            let addr = ctx.active_heap_mut().alloc_avl_node(key, value);
            ctx.accu = Word::ptr(addr);
        }
        ext::AVL_KEY => ctx.accu = avl_field(ctx, ctx.accu, avl_layout::KEY)?,
        ext::AVL_VALUE => ctx.accu = avl_field(ctx, ctx.accu, avl_layout::VALUE)?,
        ext::AVL_LEFT => ctx.accu = avl_field(ctx, ctx.accu, avl_layout::LEFT)?,
        ext::AVL_RIGHT => ctx.accu = avl_field(ctx, ctx.accu, avl_layout::RIGHT)?,
        ext::AVL_SET_LEFT => {
            let left = ctx.pop()?;
            check!(ctx.accu.is_ptr(), CheckError::NotAvlNode);
            let addr = ctx.accu.as_ptr_index();
            check!(ctx.active_heap().header(addr).kind() == ObjKind::AvlNode, CheckError::NotAvlNode);
            ctx.active_heap_mut().write(addr + avl_layout::LEFT, left);
        }
        ext::AVL_SET_RIGHT => {
            let right = ctx.pop()?;
            check!(ctx.accu.is_ptr(), CheckError::NotAvlNode);
            let addr = ctx.accu.as_ptr_index();
            check!(ctx.active_heap().header(addr).kind() == ObjKind::AvlNode, CheckError::NotAvlNode);
            ctx.active_heap_mut().write(addr + avl_layout::RIGHT, right);
        }
        _ => return Err(Error::Check(CheckError::UnknownOpcode)),
    }
    Ok(())
}
