// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for the tagged word model.

use super::*;

#[test]
fn fixnum_roundtrip() {
    for n in [0_i64, 1, -1, 42, -42, 1_000_000, -1_000_000, i64::MAX >> 2, i64::MIN >> 2] {
        let w = Word::fixnum(n);
        assert!(w.is_fixnum());
        assert!(!w.is_ptr());
        assert!(!w.is_pc());
        assert!(!w.is_small());
        assert!(w.is_immediate());
        assert_eq!(w.as_fixnum(), n);
    }
}

#[test]
fn ptr_roundtrip() {
    for idx in [0_usize, 1, 7, 1024, 1 << 20] {
        let w = Word::ptr(idx);
        assert!(w.is_ptr());
        assert!(!w.is_fixnum());
        assert!(!w.is_pc());
        assert!(!w.is_small());
        assert!(!w.is_immediate());
        assert_eq!(w.as_ptr_index(), idx);
    }
}

#[test]
fn pc_roundtrip() {
    for off in [0_u32, 12, 255, 65536] {
        let w = Word::pc(off);
        assert!(w.is_pc());
        assert!(!w.is_fixnum());
        assert!(!w.is_ptr());
        assert!(!w.is_small());
        assert!(!w.is_immediate());
        assert_eq!(w.as_pc_offset(), off);
    }
}

#[test]
fn small_constants_roundtrip() {
    for s in [Small::Nil, Small::True, Small::False, Small::Unbound] {
        let w = Word::small(s);
        assert!(w.is_small());
        assert!(!w.is_ptr());
        assert!(!w.is_pc());
        assert!(w.is_immediate());
        assert_eq!(w.as_small(), s);
    }
}

#[test]
fn classification_is_exhaustive_and_exclusive() {
    // Sample across the whole bit space, not just constructed values.
    for raw in 0..64_u64 {
        let w = Word::from_raw(raw);
        let flags = [w.is_ptr(), w.is_pc(), w.is_immediate()];
        assert_eq!(flags.iter().filter(|&&b| b).count(), 1, "raw = {raw:#b}");
    }
}

#[test]
fn nil_and_truthiness() {
    assert!(Word::nil().is_nil());
    assert!(!Word::nil().is_truthy());
    assert!(!Word::bool(false).is_truthy());
    assert!(Word::bool(true).is_truthy());
    assert!(Word::fixnum(0).is_truthy());
    assert!(Word::ptr(0).is_truthy());
}

#[test]
fn catch_tag_is_a_bare_sentinel() {
    assert_eq!(OUT_OF_MEMORY_CATCH_TAG.raw(), 0x312);
    // It classifies as a fixnum (low bit clear); callers recognize it by
    // raw equality, not by its tag, exactly as in the original interpreter.
    assert!(OUT_OF_MEMORY_CATCH_TAG.is_fixnum());
}
