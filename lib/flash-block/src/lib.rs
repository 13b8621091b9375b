// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block-device contract for raw NOR flash.
//!
//! The log engines in this workspace speak to flash through exactly three
//! operations: `read`, `program`, and `erase`. The asymmetry between them is
//! what drives every design decision upstack:
//!
//! - `read` is random-access and always succeeds.
//! - `program` operates on whole pages and can only clear bits (1 → 0).
//! - `erase` operates on whole sectors and sets every bit (to 1).
//!
//! Page and sector sizes are compile-time constants of the driver. The
//! values here are the common 256-byte-page / 4 KiB-sector NOR geometry.
//!
//! Interrupt masking, wait states, and bus details are the driver's
//! business; implementations of [`Flash`] are expected to run each call to
//! completion before returning.

#![cfg_attr(not(test), no_std)]

use static_assertions::const_assert;

/// Smallest programmable unit, in bytes.
pub const PAGE_SIZE_BYTES: usize = 256;

/// Smallest erasable unit, in bytes.
pub const SECTOR_SIZE_BYTES: usize = 4096;

/// Number of program pages in one erase sector.
pub const PAGES_PER_SECTOR: usize = SECTOR_SIZE_BYTES / PAGE_SIZE_BYTES;

const_assert!(PAGE_SIZE_BYTES.is_power_of_two());
const_assert!(SECTOR_SIZE_BYTES.is_power_of_two());
const_assert!(SECTOR_SIZE_BYTES % PAGE_SIZE_BYTES == 0);

/// A byte-addressed flash device (or a region of one).
///
/// Offsets are device-relative, not CPU addresses. An implementation covers
/// some contiguous span of storage; callers are responsible for staying
/// inside it.
pub trait Flash {
    /// Copies `out.len()` bytes starting at `offset` into `out`.
    ///
    /// Reads see the last committed contents and cannot fail.
    fn read(&self, offset: u32, out: &mut [u8]);

    /// Programs one full page at `offset`, which must be page-aligned.
    ///
    /// Every bit of the destination must either be 1 (erased) or already
    /// equal the corresponding source bit: programming can only clear bits.
    /// Violating this is a caller bug, not a recoverable condition.
    fn program(&mut self, offset: u32, data: &[u8; PAGE_SIZE_BYTES]);

    /// Erases `len` bytes starting at `offset`. Both must be multiples of
    /// [`SECTOR_SIZE_BYTES`]. Afterwards the range reads as all `0xFF`.
    fn erase(&mut self, offset: u32, len: u32);
}

/// Rounds `offset` down to the page containing it.
#[inline]
pub fn page_base(offset: u32) -> u32 {
    offset & !(PAGE_SIZE_BYTES as u32 - 1)
}

/// Byte position of `offset` within its page.
#[inline]
pub fn page_offset(offset: u32) -> usize {
    (offset & (PAGE_SIZE_BYTES as u32 - 1)) as usize
}

/// Rounds `offset` down to the sector containing it.
#[inline]
pub fn sector_base(offset: u32) -> u32 {
    offset & !(SECTOR_SIZE_BYTES as u32 - 1)
}

/// Byte position of `offset` within its sector.
#[inline]
pub fn sector_offset(offset: u32) -> usize {
    (offset & (SECTOR_SIZE_BYTES as u32 - 1)) as usize
}

/// RAM-backed flash device.
///
/// This is the device every test in the workspace runs against. It does not
/// merely emulate NOR behavior, it polices it: out-of-range access,
/// misaligned programs or erases, and any attempted 0 → 1 bit transition
/// panic instead of silently doing what physical flash would not.
///
/// `N` is the device size in bytes and must be a whole number of sectors.
pub struct RamFlash<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> RamFlash<N> {
    /// Creates a device in the fully-erased state.
    pub const fn new() -> Self {
        assert!(N % SECTOR_SIZE_BYTES == 0);
        Self { data: [0xFF; N] }
    }

    /// Direct view of the backing store, for test assertions.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Direct mutable view of the backing store, for tests that need to
    /// plant corruption or simulate an interrupted operation.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl<const N: usize> Default for RamFlash<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Flash for RamFlash<N> {
    fn read(&self, offset: u32, out: &mut [u8]) {
        let offset = offset as usize;
        assert!(offset + out.len() <= N, "read out of range");
        out.copy_from_slice(&self.data[offset..offset + out.len()]);
    }

    fn program(&mut self, offset: u32, data: &[u8; PAGE_SIZE_BYTES]) {
        assert_eq!(page_offset(offset), 0, "program not page-aligned");
        let offset = offset as usize;
        assert!(offset + PAGE_SIZE_BYTES <= N, "program out of range");
        for (cur, &new) in self.data[offset..offset + PAGE_SIZE_BYTES]
            .iter_mut()
            .zip(data.iter())
        {
            // A source 1 over a programmed 0 would be a bit set, which NOR
            // cannot do.
            assert!(new & !*cur == 0, "program would set bits 0 -> 1");
            *cur &= new;
        }
    }

    fn erase(&mut self, offset: u32, len: u32) {
        assert_eq!(sector_offset(offset), 0, "erase not sector-aligned");
        assert_eq!(len as usize % SECTOR_SIZE_BYTES, 0, "partial sector erase");
        let offset = offset as usize;
        assert!(offset + len as usize <= N, "erase out of range");
        self.data[offset..offset + len as usize].fill(0xFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestFlash = RamFlash<{ 2 * SECTOR_SIZE_BYTES }>;

    #[test]
    fn starts_erased() {
        let f = TestFlash::new();
        let mut buf = [0u8; 16];
        f.read(100, &mut buf);
        assert_eq!(buf, [0xFF; 16]);
    }

    #[test]
    fn program_clears_bits() {
        let mut f = TestFlash::new();
        let mut page = [0xFFu8; PAGE_SIZE_BYTES];
        page[0] = 0xA5;
        page[7] = 0x00;
        f.program(0, &page);

        let mut buf = [0u8; 8];
        f.read(0, &mut buf);
        assert_eq!(buf, [0xA5, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
    }

    #[test]
    fn reprogram_same_contents_is_legal() {
        let mut f = TestFlash::new();
        let mut page = [0xFFu8; PAGE_SIZE_BYTES];
        page[3] = 0x42;
        f.program(PAGE_SIZE_BYTES as u32, &page);
        // Same data again: every bit is either untouched or already equal.
        f.program(PAGE_SIZE_BYTES as u32, &page);

        let mut b = [0u8; 1];
        f.read(PAGE_SIZE_BYTES as u32 + 3, &mut b);
        assert_eq!(b[0], 0x42);
    }

    #[test]
    #[should_panic(expected = "set bits")]
    fn program_cannot_set_bits() {
        let mut f = TestFlash::new();
        let mut page = [0xFFu8; PAGE_SIZE_BYTES];
        page[0] = 0x00;
        f.program(0, &page);
        page[0] = 0x01;
        f.program(0, &page);
    }

    #[test]
    #[should_panic(expected = "page-aligned")]
    fn program_requires_alignment() {
        let mut f = TestFlash::new();
        f.program(4, &[0xFF; PAGE_SIZE_BYTES]);
    }

    #[test]
    fn erase_restores_blank_state() {
        let mut f = TestFlash::new();
        let page = [0u8; PAGE_SIZE_BYTES];
        f.program(0, &page);
        f.erase(0, SECTOR_SIZE_BYTES as u32);

        let mut buf = [0u8; PAGE_SIZE_BYTES];
        f.read(0, &mut buf);
        assert_eq!(buf, [0xFF; PAGE_SIZE_BYTES]);
    }

    #[test]
    #[should_panic(expected = "sector-aligned")]
    fn erase_requires_alignment() {
        let mut f = TestFlash::new();
        f.erase(PAGE_SIZE_BYTES as u32, SECTOR_SIZE_BYTES as u32);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(page_base(0x1234), 0x1200);
        assert_eq!(page_offset(0x1234), 0x34);
        assert_eq!(sector_base(0x1234), 0x1000);
        assert_eq!(sector_offset(0x1234), 0x234);
    }
}
