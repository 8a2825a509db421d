use super::*;
use crate::context::Context;
use crate::image;
use crate::trace::{CountingTracer, GcReason};

fn dummy_image_bytes() -> alloc::vec::Vec<u8> {
    let mut v = alloc::vec![0_u8; image::PROGRAM_BASE + 4];
    v[0..4].copy_from_slice(&image::MAGIC);
    v[8] = image::BCODE_VERSION;
    let checksum = image::compute_checksum(&v[8..]);
    v[4..8].copy_from_slice(&checksum.to_be_bytes());
    v
}

#[test]
fn collect_preserves_a_reachable_cons() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::new(&img, 32, 16);
    let addr = ctx.active_heap_mut().alloc_cons(Word::fixnum(10), Word::fixnum(20));
    ctx.accu = Word::ptr(addr);

    collect(&mut ctx, GcReason::ReserveFailed);

    assert!(ctx.accu.is_ptr());
    let new_addr = ctx.accu.as_ptr_index();
    assert_eq!(ctx.active_heap().read(new_addr + cons_layout::CAR), Word::fixnum(10));
    assert_eq!(ctx.active_heap().read(new_addr + cons_layout::CDR), Word::fixnum(20));
}

#[test]
fn collect_reclaims_unrooted_garbage() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::new(&img, 32, 16);
    // Garbage: allocated but never rooted.
    ctx.active_heap_mut().alloc_cons(Word::fixnum(1), Word::fixnum(2));
    // The only reachable object.
    let live = ctx.active_heap_mut().alloc_cons(Word::fixnum(3), Word::fixnum(4));
    ctx.accu = Word::ptr(live);

    collect(&mut ctx, GcReason::ReserveFailed);

    assert_eq!(ctx.active_heap().used(), cons_layout::WORDS);
}

#[test]
fn collect_preserves_shared_structure_without_duplicating() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::new(&img, 32, 16);
    let shared = ctx.active_heap_mut().alloc_cons(Word::fixnum(99), Word::nil());
    ctx.accu = Word::ptr(shared);
    ctx.env = Word::ptr(shared);

    collect(&mut ctx, GcReason::ReserveFailed);

    assert!(ctx.accu.is_ptr());
    assert_eq!(ctx.accu, ctx.env);
    assert_eq!(ctx.active_heap().used(), cons_layout::WORDS);
}

#[test]
fn collect_follows_pointers_through_a_chain() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::new(&img, 32, 16);
    let tail = ctx.active_heap_mut().alloc_cons(Word::fixnum(2), Word::nil());
    let head = ctx.active_heap_mut().alloc_cons(Word::fixnum(1), Word::ptr(tail));
    ctx.accu = Word::ptr(head);

    collect(&mut ctx, GcReason::ReserveFailed);

    let new_head = ctx.accu.as_ptr_index();
    assert_eq!(ctx.active_heap().read(new_head + cons_layout::CAR), Word::fixnum(1));
    let new_tail_word = ctx.active_heap().read(new_head + cons_layout::CDR);
    assert!(new_tail_word.is_ptr());
    let new_tail = new_tail_word.as_ptr_index();
    assert_eq!(ctx.active_heap().read(new_tail + cons_layout::CAR), Word::fixnum(2));
}

#[test]
fn collect_is_idempotent_across_back_to_back_runs() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::new(&img, 32, 16);
    let addr = ctx.active_heap_mut().alloc_cons(Word::fixnum(10), Word::fixnum(20));
    ctx.accu = Word::ptr(addr);

    collect(&mut ctx, GcReason::ReserveFailed);
    let addr_after_first = ctx.accu.as_ptr_index();
    let head_value = ctx.active_heap().read(addr_after_first + cons_layout::CAR);
    let tail_value = ctx.active_heap().read(addr_after_first + cons_layout::CDR);

    collect(&mut ctx, GcReason::ReserveFailed);

    assert_eq!(ctx.accu.as_ptr_index(), addr_after_first);
    assert_eq!(ctx.active_heap().read(addr_after_first + cons_layout::CAR), head_value);
    assert_eq!(ctx.active_heap().read(addr_after_first + cons_layout::CDR), tail_value);
}

#[test]
fn collect_reports_to_the_tracer() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::with_tracer(&img, 32, 16, CountingTracer::default());
    let addr = ctx.active_heap_mut().alloc_cons(Word::fixnum(1), Word::fixnum(2));
    ctx.accu = Word::ptr(addr);

    collect(&mut ctx, GcReason::ReserveFailed);

    assert_eq!(ctx.tracer_mut().collections, 1);
}

#[test]
fn collect_preserves_a_stack_rooted_tuple() {
    let bytes = dummy_image_bytes();
    let img = image::verify(&bytes).unwrap();
    let mut ctx = Context::new(&img, 32, 16);
    let addr = ctx.active_heap_mut().alloc_tuple(&[Word::fixnum(7), Word::fixnum(8)]);
    ctx.push(Word::ptr(addr)).unwrap();

    collect(&mut ctx, GcReason::ReserveFailed);

    let new_word = ctx.stack_slice()[0];
    assert!(new_word.is_ptr());
    let new_addr = new_word.as_ptr_index();
    assert_eq!(
        ctx.active_heap().read(new_addr + crate::heap::TUPLE_ELEMS_OFFSET + 1),
        Word::fixnum(7)
    );
}
