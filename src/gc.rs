// SPDX-License-Identifier: GPL-3.0-or-later

//! Two-semispace copying collector (spec.md §4.6).
//!
//! A collection copies every object reachable from the root set — `accu`,
//! `env`, `new_env`, and the operand stack — into the reserve semispace,
//! leaving a forwarding header over the old copy so a second reference to
//! the same object reuses it instead of duplicating it. This is Cheney's
//! algorithm: copied objects are themselves scanned in the order they
//! land in the new space, so no separate work list is needed — the
//! to-space's own bump pointer is the queue.

#[cfg(test)]
#[path = "gc_test.rs"]
mod gc_test;

use crate::context::Context;
use crate::heap::{avl_layout, cons_layout, Header, Heap, ObjKind, TUPLE_ELEMS_OFFSET, TUPLE_LEN_FIELD};
use crate::trace::{GcReason, Tracer};
use crate::word::Word;

/// Forward `w` into `to`, copying its referent out of `from` on first
/// visit and leaving a forwarding header behind so later references to
/// the same address reuse the copy. Non-pointer words pass through
/// unchanged — fixnums, saved PCs, and small constants never move.
fn forward(w: Word, from: &mut Heap, to: &mut Heap) -> Word {
    if !w.is_ptr() {
        return w;
    }
    let addr = w.as_ptr_index();
    let header = from.header(addr);
    if header.is_forwarding() {
        return Word::ptr(header.forward_addr());
    }
    let size = header.size_words();
    let new_addr = to.bump(size);
    for i in 0..size {
        let word = from.read(addr + i);
        to.write(new_addr + i, word);
    }
    from.write_header(addr, Header::forwarding(new_addr));
    Word::ptr(new_addr)
}

/// Forward the pointer fields of the already-copied object at `addr` in
/// `to`-space, copying whatever they still point to out of `from`-space.
#[expect(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    reason = "tuple lengths are always written non-negative by alloc_tuple, and fit in a usize on every supported target"
)]
fn scan_object(addr: usize, from: &mut Heap, to: &mut Heap) {
    let header = to.header(addr);
    match header.kind() {
        ObjKind::Cons => {
            for field in [cons_layout::CAR, cons_layout::CDR] {
                let fw = forward(to.read(addr + field), from, to);
                to.write(addr + field, fw);
            }
        }
        ObjKind::Tuple => {
            let len = to.read(addr + TUPLE_LEN_FIELD).as_fixnum() as usize;
            for i in 0..len {
                let field = addr + TUPLE_ELEMS_OFFSET + 1 + i;
                let fw = forward(to.read(field), from, to);
                to.write(field, fw);
            }
        }
        ObjKind::Str => {
            // Packed bytes, no pointer fields to forward.
        }
        ObjKind::AvlNode => {
            for field in [avl_layout::KEY, avl_layout::VALUE, avl_layout::LEFT, avl_layout::RIGHT] {
                let fw = forward(to.read(addr + field), from, to);
                to.write(addr + field, fw);
            }
        }
        ObjKind::Forwarding => unreachable!("to-space object has a forwarding header mid-scan"),
    }
}

/// Run a full collection: copy every object reachable from the roots into
/// the reserve semispace.
///
/// Scan the copies, then make the reserve space
/// active. Called by the dispatcher when a `RESERVE`d allocation does not
/// fit (spec.md §4.2, §4.6).
pub fn collect<T: Tracer>(ctx: &mut Context<'_, T>, reason: GcReason) {
    ctx.reserve_heap_mut().reset();

    // `forward` needs both semispaces at once; each root is read into a
    // local before the borrow starts and written back after it ends.
    let (old_accu, old_env, old_new_env) = (ctx.accu, ctx.env, ctx.new_env);
    let accu = {
        let (from, to) = ctx.semispaces_mut();
        forward(old_accu, from, to)
    };
    let env = {
        let (from, to) = ctx.semispaces_mut();
        forward(old_env, from, to)
    };
    let new_env = {
        let (from, to) = ctx.semispaces_mut();
        forward(old_new_env, from, to)
    };
    ctx.accu = accu;
    ctx.env = env;
    ctx.new_env = new_env;

    {
        let (stack, from, to) = ctx.stack_and_semispaces_mut();
        for w in stack.iter_mut() {
            *w = forward(*w, from, to);
        }
    }

    let mut scan = 0;
    loop {
        let to_free = ctx.semispaces_mut().1.free();
        if scan >= to_free {
            break;
        }
        let (from, to) = ctx.semispaces_mut();
        scan_object(scan, from, to);
        scan += to.header(scan).size_words();
    }

    let words_copied = ctx.semispaces_mut().1.free();
    ctx.swap_semispaces();
    let heap_used_after = ctx.active_heap().used();
    ctx.tracer_mut().gc(reason, words_copied, heap_used_after);
}
