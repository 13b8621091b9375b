// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-flash header formats.
//!
//! Two header kinds share the same four-byte size, so all the alignment and
//! stepping math in the engine can treat them interchangeably:
//!
//! - A **sector header** opens every in-use sector: 24 bits of monotonic
//!   epoch plus a CRC byte. The epoch is how boot finds the oldest sector
//!   after any number of power cycles.
//! - A **record header** precedes every payload: a 16-bit length, an id
//!   byte, and a shared CRC/flags byte.
//!
//! The CRC is 5 bits wide; the top three bits of the record header's CRC
//! byte carry flags that are masked out before validation. A header of all
//! `0xFF` is *blank* (the erased state) and must never be a legal header,
//! which is why id `0xFF` and length `0xFFFF` are reserved.

use bitflags::bitflags;
use crc::{Algorithm, Crc};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::RingLogError;

/// Size of both header kinds, in bytes.
pub const HDR_BYTES: usize = 4;

/// Number of bits of sector epoch stored on flash.
pub const EPOCH_MASK: u32 = 0x00FF_FFFF;

/// The header CRC-5: poly `0x05`, init `0x1F`, input bits reflected, output
/// taken straight from the shift register, no final XOR.
pub const CRC_5_HDR: Algorithm<u8> = Algorithm {
    width: 5,
    poly: 0x05,
    init: 0x1F,
    refin: true,
    refout: false,
    xorout: 0x00,
    check: 0x0C,
    residue: 0x00,
};

const CRC5: Crc<u8> = Crc::<u8>::new(&CRC_5_HDR);

/// Mask selecting the CRC bits of the shared CRC/flags byte.
pub const CRC_MASK: u8 = 0x1F;

bitflags! {
    /// Flag bits in the top three bits of a record header's CRC byte.
    ///
    /// Flags are written together with the header. `NOT_SMUDGED` is born
    /// set and can later be cleared in place (a 1 -> 0 program) to
    /// logically delete the record without erasing its sector.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct HdrFlags: u8 {
        /// This header continues a record begun in the previous sector.
        const SPLIT = 1 << 7;
        /// Cleared to zero when the record is logically deleted.
        const NOT_SMUDGED = 1 << 6;
        /// Unassigned; erased-state 1 so it can be claimed later.
        const RESERVED = 1 << 5;
    }
}

/// Header stored in front of every record payload.
#[derive(
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
)]
#[repr(C)]
pub struct RecordHeader {
    len: U16,
    id: u8,
    crc: u8,
}

const_assert_eq!(core::mem::size_of::<RecordHeader>(), HDR_BYTES);
const_assert_eq!(core::mem::size_of::<SectorHeader>(), HDR_BYTES);

impl RecordHeader {
    pub fn new(id: u8, len: u16, flags: HdrFlags) -> Self {
        let mut h = Self {
            len: U16::new(len),
            id,
            crc: 0,
        };
        h.crc = h.compute_crc() | flags.bits();
        h
    }

    /// CRC-5 over the three non-CRC bytes, exactly as they sit on flash.
    fn compute_crc(&self) -> u8 {
        let len = self.len.get().to_le_bytes();
        CRC5.checksum(&[len[0], len[1], self.id])
    }

    pub fn payload_len(&self) -> usize {
        usize::from(self.len.get())
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn flags(&self) -> HdrFlags {
        HdrFlags::from_bits_truncate(self.crc)
    }

    pub fn is_split(&self) -> bool {
        self.flags().contains(HdrFlags::SPLIT)
    }

    pub fn is_smudged(&self) -> bool {
        !self.flags().contains(HdrFlags::NOT_SMUDGED)
    }

    pub fn is_blank(&self) -> bool {
        self.len.get() == 0xFFFF && self.id == 0xFF && self.crc == 0xFF
    }

    /// Classifies the header: blank, structurally impossible, CRC mismatch,
    /// or good. `region_len` bounds a credible payload length.
    pub fn check(&self, region_len: u32) -> Result<(), RingLogError> {
        if self.is_blank() {
            return Err(RingLogError::BlankHdr);
        }
        if self.id == 0xFF
            || self.len.get() == 0
            || u32::from(self.len.get()) > region_len
        {
            return Err(RingLogError::BadHdr);
        }
        if self.crc & CRC_MASK != self.compute_crc() {
            return Err(RingLogError::BadHdr);
        }
        Ok(())
    }
}

/// Header stored at the base of every in-use sector.
#[derive(
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
)]
#[repr(C)]
pub struct SectorHeader {
    raw: U32,
}

impl SectorHeader {
    pub fn new(epoch: u32) -> Self {
        let epoch = epoch & EPOCH_MASK;
        let crc = CRC5.checksum(&epoch.to_le_bytes());
        Self {
            raw: U32::new(epoch << 8 | u32::from(crc)),
        }
    }

    pub fn epoch(&self) -> u32 {
        self.raw.get() >> 8
    }

    pub fn is_blank(&self) -> bool {
        self.raw.get() == 0xFFFF_FFFF
    }

    pub fn check(&self) -> Result<(), RingLogError> {
        if self.is_blank() {
            return Err(RingLogError::BlankHdr);
        }
        let crc = CRC5.checksum(&self.epoch().to_le_bytes());
        if self.raw.get() & 0xFF != u32::from(crc) {
            return Err(RingLogError::BadSector);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The algorithm's own check constant, recomputed the long way.
    #[test]
    fn crc5_check_vector() {
        assert_eq!(CRC5.checksum(b"123456789"), CRC_5_HDR.check);
    }

    /// Golden vector for a record header: len 200, id 7.
    #[test]
    fn record_header_golden() {
        assert_eq!(CRC5.checksum(&[0xC8, 0x00, 0x07]), 0x01);

        let h = RecordHeader::new(0x07, 200, HdrFlags::NOT_SMUDGED);
        assert_eq!(h.as_bytes(), &[0xC8, 0x00, 0x07, 0x41]);
        assert!(h.check(4096).is_ok());
        assert!(!h.is_split());
        assert!(!h.is_smudged());
    }

    /// Golden vector for a sector header: epoch 1.
    #[test]
    fn sector_header_golden() {
        let h = SectorHeader::new(1);
        assert_eq!(h.as_bytes(), &[0x1E, 0x01, 0x00, 0x00]);
        assert_eq!(h.epoch(), 1);
        assert!(h.check().is_ok());
    }

    #[test]
    fn flags_do_not_disturb_crc() {
        let plain = RecordHeader::new(0x22, 33, HdrFlags::NOT_SMUDGED);
        let split =
            RecordHeader::new(0x22, 33, HdrFlags::NOT_SMUDGED | HdrFlags::SPLIT);
        assert!(plain.check(4096).is_ok());
        assert!(split.check(4096).is_ok());
        assert!(split.is_split());
        assert_eq!(
            plain.as_bytes()[3] & CRC_MASK,
            split.as_bytes()[3] & CRC_MASK
        );
    }

    #[test]
    fn blank_is_never_valid() {
        let h = RecordHeader::new_from_bytes([0xFF; 4]);
        assert!(h.is_blank());
        assert_eq!(h.check(4096), Err(RingLogError::BlankHdr));

        let s = SectorHeader::new_from_bytes([0xFF; 4]);
        assert!(s.is_blank());
        assert_eq!(s.check(), Err(RingLogError::BlankHdr));
    }

    #[test]
    fn corrupt_crc_is_detected() {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(RecordHeader::new(0x07, 200, HdrFlags::NOT_SMUDGED).as_bytes());
        raw[3] ^= 0x01;
        let h = RecordHeader::new_from_bytes(raw);
        assert_eq!(h.check(4096), Err(RingLogError::BadHdr));
    }

    #[test]
    fn zero_length_is_rejected() {
        // A len of 0 can never be written; a header claiming it is damage.
        let h = RecordHeader::new(0x07, 0, HdrFlags::NOT_SMUDGED);
        assert_eq!(h.check(4096), Err(RingLogError::BadHdr));
    }

    impl RecordHeader {
        fn new_from_bytes(raw: [u8; 4]) -> Self {
            zerocopy::transmute!(raw)
        }
    }

    impl SectorHeader {
        fn new_from_bytes(raw: [u8; 4]) -> Self {
            zerocopy::transmute!(raw)
        }
    }
}
