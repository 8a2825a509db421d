// SPDX-License-Identifier: GPL-3.0-or-later

//! Bytecode image verification (spec.md §4.3).
//!
//! A program image is a byte blob with a 12-byte header (magic, checksum,
//! version, program length) followed by the program block and a
//! byte-order-normalized constant pool. `verify` checks the whole thing
//! before a [`crate::context::Context`] is ever allocated around it.

#[cfg(test)]
#[path = "image_test.rs"]
mod image_test;

use crate::error::Error;

/// Bytes 0..4 of every valid image.
pub const MAGIC: [u8; 4] = [0x4E, 0xD6, 0xE4, 0x06];

/// Offset of the program block within the image; execution begins here.
pub const PROGRAM_BASE: usize = 12;

/// Minimum legal image length.
const MIN_IMAGE_LEN: usize = 16;

/// The bytecode format version this interpreter understands.
pub const BCODE_VERSION: u8 = 1;

/// A checksum seed folding in a cookie for the instruction set the image
/// was compiled against (spec.md §4.3, §9 open question 1).
///
/// Derived here
/// from this crate's own opcode table rather than an external compiler's;
/// see [`crate::opcode::INSN_COOKIE`].
pub const fn checksum_seed() -> u32 {
    crate::opcode::INSN_COOKIE
}

/// Verified, immutable view of a bytecode image.
#[derive(Debug, Clone, Copy)]
pub struct Image<'a> {
    bytes: &'a [u8],
    proglen: u32,
}

impl<'a> Image<'a> {
    /// The full image, including the 12-byte header.
    #[must_use]
    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The program block: `bytes[PROGRAM_BASE .. PROGRAM_BASE + proglen]`.
    #[must_use]
    pub fn program(&self) -> &'a [u8] {
        &self.bytes[PROGRAM_BASE..PROGRAM_BASE + self.proglen as usize]
    }

    /// The constant pool following the program block.
    #[must_use]
    pub fn constant_pool(&self) -> &'a [u8] {
        &self.bytes[PROGRAM_BASE + self.proglen as usize..]
    }

    /// Length of the program block, in bytes.
    #[must_use]
    pub const fn proglen(&self) -> u32 {
        self.proglen
    }
}

fn rolling_checksum(seed: u32, bytes: &[u8]) -> u32 {
    let mut h = seed;
    for &b in bytes {
        h = h.wrapping_add(u32::from(b));
        h = h.wrapping_add(h << 10);
        h ^= h >> 7;
    }
    h
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_u24_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Verify a bytecode image: length, word alignment, magic cookie, version,
/// and checksum (spec.md §4.3).
///
/// The constant pool is assumed to already be
/// in host byte order; a compiler-facing image loader normalizes it before
/// this step (spec.md §1 lists bytecode image file I/O as out of scope).
///
/// # Errors
///
/// Returns [`Error::ProgramCorrupt`] if the image is too short, misaligned,
/// has a bad magic cookie, or fails the checksum; returns
/// [`Error::ProgramWrongVersion`] if the version byte does not match
/// [`BCODE_VERSION`].
pub fn verify(bytes: &[u8]) -> Result<Image<'_>, Error> {
    if bytes.len() < MIN_IMAGE_LEN {
        return Err(Error::ProgramCorrupt);
    }
    if (bytes.as_ptr() as usize) & 0x3 != 0 {
        return Err(Error::ProgramCorrupt);
    }
    if bytes[0..4] != MAGIC {
        return Err(Error::ProgramCorrupt);
    }
    if bytes[8] != BCODE_VERSION {
        return Err(Error::ProgramWrongVersion);
    }

    let stored_checksum = read_u32_be(&bytes[4..8]);
    let computed = rolling_checksum(checksum_seed(), &bytes[8..]);
    if stored_checksum != computed {
        return Err(Error::ProgramCorrupt);
    }

    let proglen = read_u24_be(&bytes[9..12]);
    if PROGRAM_BASE as u64 + u64::from(proglen) > bytes.len() as u64 {
        return Err(Error::ProgramCorrupt);
    }

    Ok(Image { bytes, proglen })
}

/// Compute the checksum field for an otherwise-assembled image, for use by
/// test fixtures and tooling that hand-builds images (the compiler itself
/// is out of scope per spec.md §1).
#[must_use]
pub fn compute_checksum(bytes_from_offset_8: &[u8]) -> u32 {
    rolling_checksum(checksum_seed(), bytes_from_offset_8)
}
