// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Variable-size ring log on raw NOR flash.
//!
//! The log owns a whole number of flash sectors and fills them with
//! self-describing records: a four-byte header carrying length, id, and a
//! CRC, followed by the payload. Every in-use sector opens with a four-byte
//! sector header whose monotonically increasing epoch lets boot find the
//! oldest sector after any number of power cycles, even once the ring has
//! wrapped.
//!
//! The only write is an append past the newest record. When a record does
//! not fit the remainder of its sector it splits: the first part fills the
//! sector, and each following sector carries a continuation header with the
//! `SPLIT` flag. Deletion never erases: it clears a single flag bit in the
//! record's header (a legal 1 -> 0 program), and readers skip such
//! *smudged* records. Space comes back only when the oldest sector is
//! erased whole to make room for new appends.
//!
//! A [`RingLog`] is cheap state over the region: one accessor per region
//! may mutate it; additional read-only accessors are possible if they
//! [`RingLog::recreate`] (or [`rewind`](RingLog::rewind)) before use and
//! keep nothing between calls. The engine stores no device handle; every
//! operation takes the flash capability, and write paths also borrow a
//! caller-owned page buffer so the engine itself never allocates.

#![cfg_attr(not(test), no_std)]

mod hdr;

pub use hdr::{
    HdrFlags, RecordHeader, SectorHeader, CRC_5_HDR, EPOCH_MASK, HDR_BYTES,
};

use flash_block::{
    page_base, page_offset, sector_base, sector_offset, Flash,
    PAGE_SIZE_BYTES, SECTOR_SIZE_BYTES,
};
use zerocopy::{FromZeros, IntoBytes};

const SECTOR_SIZE: u32 = SECTOR_SIZE_BYTES as u32;
const HDR: u32 = HDR_BYTES as u32;

/// Dead space kept at the tail of every sector. A record header never
/// starts where a header plus at least one payload byte cannot follow, so
/// headers never straddle a sector boundary.
const SECTOR_TAIL_RESERVE: usize = HDR_BYTES + 1;

/// Reserved record ids: `0xFF` reads as blank flash, `0x00` is kept out of
/// the user range for smudge bookkeeping.
pub const ID_MIN: u8 = 0x01;
pub const ID_MAX: u8 = 0xFE;

/// Errors produced by the ring log.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RingLogError {
    /// Zero sizes, reserved ids, oversized payloads, bad region geometry.
    BadCallerData,
    /// A sector header failed validation, or the sector ring is not in a
    /// legal order.
    BadSector,
    /// An erased header was reached. Benign while locating the write
    /// position; the end-of-data terminator while reading.
    BlankHdr,
    /// A record header failed validation.
    BadHdr,
    /// The append would run into a sector that still holds live data.
    WrappedSectorUsed,
    /// The cursor walked the full ring without finding a blank header.
    HdrLoop,
    /// No further record with the requested id exists.
    HdrIdNotFound,
    /// The record cannot fit even after reclaiming every sector.
    Full,
}

/// What to do with existing flash contents when creating a log.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InitChoice {
    /// Validate what is on flash; surface any error.
    Fail,
    /// Like [`Fail`](InitChoice::Fail) from [`RingLog::create`];
    /// [`RingLog::recreate`] additionally falls back to erasing the region
    /// when validation fails.
    InitIfFail,
    /// Erase the region unconditionally.
    InitAlways,
}

/// One accessor's view of a ring-log region.
///
/// `next` is the working cursor: the next byte to read for readers, and
/// the scratch position for writers, which re-derive the true write
/// position on every append and leave the read cursor where they found it.
#[derive(Clone, Debug)]
pub struct RingLog {
    base: u32,
    len: u32,
    next: u32,
    last_wrote: u32,
    sector_index: u32,
}

impl RingLog {
    /// Sets up an accessor for the region of `sectors` sectors starting at
    /// the sector-aligned device offset `base`.
    ///
    /// Unless `init` is [`InitChoice::InitAlways`], the sector ring is
    /// audited and the cursor is left at the oldest sector, ready to read
    /// the oldest record.
    pub fn create(
        flash: &mut impl Flash,
        base: u32,
        sectors: usize,
        init: InitChoice,
    ) -> Result<Self, RingLogError> {
        if sectors == 0 || sector_offset(base) != 0 {
            return Err(RingLogError::BadCallerData);
        }
        let len = u32::try_from(sectors)
            .ok()
            .and_then(|n| n.checked_mul(SECTOR_SIZE))
            .ok_or(RingLogError::BadCallerData)?;

        let mut rb = Self {
            base,
            len,
            next: 0,
            last_wrote: 0,
            sector_index: 0,
        };
        match init {
            InitChoice::InitAlways => flash.erase(base, len),
            InitChoice::Fail | InitChoice::InitIfFail => {
                rb.check_sector_ring(flash)?;
                rb.seek_oldest_sector(flash)?;
            }
        }
        Ok(rb)
    }

    /// [`create`](Self::create), but on a validation failure with
    /// `InitIfFail` (or `InitAlways`) the region is erased and set up
    /// fresh instead of surfacing the error.
    ///
    /// Calling this on a consistent region is also how a reader rewinds to
    /// the oldest record.
    pub fn recreate(
        flash: &mut impl Flash,
        base: u32,
        sectors: usize,
        init: InitChoice,
    ) -> Result<Self, RingLogError> {
        match Self::create(flash, base, sectors, init) {
            Err(e) if init != InitChoice::Fail && e != RingLogError::BadCallerData => {
                Self::create(flash, base, sectors, InitChoice::InitAlways)
            }
            other => other,
        }
    }

    /// Repositions the cursor at the oldest sector without re-auditing the
    /// region.
    pub fn rewind(&mut self, flash: &impl Flash) -> Result<(), RingLogError> {
        self.seek_oldest_sector(flash)
    }

    /// Current cursor offset within the region.
    pub fn cursor(&self) -> u32 {
        self.next
    }

    /// Region offset at which the last append began.
    pub fn last_wrote(&self) -> u32 {
        self.last_wrote
    }

    /// Highest sector epoch observed; the next fresh sector uses the
    /// successor.
    pub fn highest_epoch(&self) -> u32 {
        self.sector_index
    }

    /// Size of the region in bytes.
    pub fn region_bytes(&self) -> u32 {
        self.len
    }

    fn sector_count(&self) -> usize {
        self.len as usize / SECTOR_SIZE_BYTES
    }

    /// Largest payload the region could hold after reclaiming everything:
    /// every sector contributes its size minus a sector header and a
    /// record header.
    pub fn max_record_bytes(&self) -> usize {
        self.sector_count() * (SECTOR_SIZE_BYTES - 2 * HDR_BYTES)
    }

    /// Appends one record.
    ///
    /// The record is durable when this returns. With `erase_if_full`, the
    /// oldest sector is erased (repeatedly, if needed) to make room,
    /// destroying the oldest records; without it, `WrappedSectorUsed` or
    /// `HdrLoop` report a full ring to the caller. The read cursor is
    /// preserved.
    pub fn append(
        &mut self,
        flash: &mut impl Flash,
        id: u8,
        data: &[u8],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
        erase_if_full: bool,
    ) -> Result<(), RingLogError> {
        check_id(id)?;
        if data.is_empty() || data.len() > (self.len - HDR) as usize {
            return Err(RingLogError::BadCallerData);
        }
        if data.len() > self.max_record_bytes() {
            return Err(RingLogError::Full);
        }
        let saved = self.next;
        let result = self.append_inner(flash, id, data, page_buf, erase_if_full);
        self.next = saved;
        result
    }

    fn append_inner(
        &mut self,
        flash: &mut impl Flash,
        id: u8,
        data: &[u8],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
        erase_if_full: bool,
    ) -> Result<(), RingLogError> {
        let mut reclaims = 0;
        loop {
            self.seek_oldest_sector(flash)?;
            let outcome = match self.seek_next_writable(flash) {
                Ok(()) => self.sector_append(flash, id, data, page_buf),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(
                    e @ (RingLogError::HdrLoop
                    | RingLogError::WrappedSectorUsed
                    | RingLogError::Full),
                ) => {
                    if !erase_if_full || reclaims >= self.sector_count() {
                        return Err(e);
                    }
                    // Reclaim the oldest sector and try again.
                    self.seek_oldest_sector(flash)?;
                    flash.erase(self.base + sector_base(self.next), SECTOR_SIZE);
                    reclaims += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads the next record bearing `id`, copying up to `out.len()` bytes
    /// and returning how many were copied. The cursor advances past the
    /// whole record even when `out` is too small for all of it.
    ///
    /// Records with other ids and smudged records are skipped. Reaching
    /// erased space returns `BlankHdr`; walking the full ring without a
    /// match returns `HdrIdNotFound`.
    pub fn read(
        &mut self,
        flash: &impl Flash,
        id: u8,
        out: &mut [u8],
    ) -> Result<usize, RingLogError> {
        check_id(id)?;
        if out.is_empty() || out.len() > (self.len - HDR) as usize {
            return Err(RingLogError::BadCallerData);
        }
        let origin = sector_base(self.next);
        loop {
            let h = self.fetch_header(flash)?;
            let hstart = self.next;
            if h.id() == id && !h.is_smudged() && !h.is_split() {
                return Ok(self.read_payload(flash, hstart, h, out));
            }
            // Not ours, smudged, or the tail of a split record reached out
            // of order. Step over it.
            self.next = self.rb_incr(hstart, HDR + h.payload_len() as u32);
            if self.next == origin {
                return Err(RingLogError::HdrIdNotFound);
            }
        }
    }

    /// Searches forward for a record bearing `id` whose payload starts
    /// with `pattern`, using `scratch` to stage payload bytes.
    ///
    /// Returns the region offset of the matching record's header and
    /// leaves the cursor just past the record, so repeated calls find
    /// successive matches.
    pub fn find(
        &mut self,
        flash: &impl Flash,
        id: u8,
        pattern: &[u8],
        scratch: &mut [u8],
    ) -> Result<u32, RingLogError> {
        check_id(id)?;
        if pattern.is_empty()
            || pattern.len() > scratch.len()
            || pattern.len() > (self.len - HDR) as usize
        {
            return Err(RingLogError::BadCallerData);
        }
        let origin = sector_base(self.next);
        loop {
            let h = self.fetch_header(flash)?;
            let hstart = self.next;
            if h.id() == id && !h.is_smudged() && !h.is_split() {
                let n = self.read_payload(flash, hstart, h, scratch);
                if n >= pattern.len() && scratch[..pattern.len()] == *pattern {
                    return Ok(hstart);
                }
            } else {
                self.next = self.rb_incr(hstart, HDR + h.payload_len() as u32);
            }
            if self.next == origin {
                return Err(RingLogError::HdrIdNotFound);
            }
        }
    }

    /// Logically deletes the oldest record bearing `id` whose payload
    /// starts with `pattern`, by clearing the `NOT_SMUDGED` bit in its
    /// header. The record's space is reclaimed only when its sector is
    /// erased. The cursor is preserved.
    pub fn delete(
        &mut self,
        flash: &mut impl Flash,
        id: u8,
        pattern: &[u8],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> Result<(), RingLogError> {
        check_id(id)?;
        if pattern.is_empty() || pattern.len() > PAGE_SIZE_BYTES {
            return Err(RingLogError::BadCallerData);
        }
        let saved = self.next;
        let result = self.delete_inner(flash, id, pattern, page_buf);
        self.next = saved;
        result
    }

    fn delete_inner(
        &mut self,
        flash: &mut impl Flash,
        id: u8,
        pattern: &[u8],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> Result<(), RingLogError> {
        self.seek_oldest_sector(flash)?;
        let at = self.find(flash, id, pattern, page_buf)?;
        self.smudge(flash, at, page_buf)
    }

    /// Audits the sector ring: every sector header must be valid or blank,
    /// blank sectors must form one contiguous arc, and epochs must
    /// strictly increase along the ring. Also refreshes the highest
    /// observed epoch.
    pub fn check_sector_ring(
        &mut self,
        flash: &impl Flash,
    ) -> Result<(), RingLogError> {
        let sectors = self.sector_count();
        let mut blanks = 0;
        let mut transitions = 0;
        let mut arc_start = None;
        let mut oldest = (EPOCH_MASK, 0);
        let mut prev = self.sector_state(flash, sectors - 1)?;
        for i in 0..sectors {
            let state = self.sector_state(flash, i)?;
            match state {
                Some(epoch) => {
                    if epoch < oldest.0 {
                        oldest = (epoch, i);
                    }
                    if epoch >= self.sector_index {
                        self.sector_index = epoch;
                    }
                    if prev.is_none() {
                        transitions += 1;
                        arc_start = Some(i);
                    }
                }
                None => blanks += 1,
            }
            prev = state;
        }
        if blanks == sectors {
            return Ok(());
        }
        if blanks > 0 && transitions != 1 {
            // Blank sectors fragmented between live ones: no legal append
            // sequence produces that.
            return Err(RingLogError::BadSector);
        }
        let start = arc_start.unwrap_or(oldest.1);
        let mut prev_epoch = None;
        for k in 0..sectors {
            match self.sector_state(flash, (start + k) % sectors)? {
                Some(epoch) => {
                    if prev_epoch.is_some_and(|p| epoch <= p) {
                        return Err(RingLogError::BadSector);
                    }
                    prev_epoch = Some(epoch);
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Reads sector `i`'s header: `Some(epoch)` when live, `None` when
    /// blank, `BadSector` otherwise.
    fn sector_state(
        &self,
        flash: &impl Flash,
        i: usize,
    ) -> Result<Option<u32>, RingLogError> {
        let mut sh = SectorHeader::new_zeroed();
        flash.read(self.base + i as u32 * SECTOR_SIZE, sh.as_mut_bytes());
        match sh.check() {
            Ok(()) => Ok(Some(sh.epoch())),
            Err(RingLogError::BlankHdr) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn sector_epoch(&self, flash: &impl Flash, sector: u32) -> Option<u32> {
        let mut sh = SectorHeader::new_zeroed();
        flash.read(self.base + sector, sh.as_mut_bytes());
        match sh.check() {
            Ok(()) => Some(sh.epoch()),
            Err(_) => None,
        }
    }

    /// Positions the cursor at the base of the oldest live sector, or at 0
    /// when the whole region is blank. Ratchets `sector_index` up to the
    /// highest epoch seen.
    fn seek_oldest_sector(
        &mut self,
        flash: &impl Flash,
    ) -> Result<(), RingLogError> {
        let mut oldest_at = 0;
        let mut oldest_epoch = EPOCH_MASK;
        for i in (0..self.sector_count()).rev() {
            match self.sector_state(flash, i)? {
                Some(epoch) => {
                    if epoch < oldest_epoch {
                        oldest_epoch = epoch;
                        oldest_at = i as u32 * SECTOR_SIZE;
                    }
                    if epoch >= self.sector_index {
                        self.sector_index = epoch;
                    }
                }
                None => {}
            }
        }
        self.next = oldest_at;
        Ok(())
    }

    /// Walks records forward from the cursor until an erased header names
    /// the write position (`Ok`). A full lap without one is `HdrLoop`.
    fn seek_next_writable(
        &mut self,
        flash: &impl Flash,
    ) -> Result<(), RingLogError> {
        let origin = self.next;
        loop {
            if sector_offset(self.next)
                > SECTOR_SIZE_BYTES - SECTOR_TAIL_RESERVE
            {
                // Nothing can start in the sector's reserved tail.
                let skip = SECTOR_SIZE - sector_offset(self.next) as u32;
                self.next = self.advance_raw(self.next, skip);
            }
            let h = match self.fetch_header(flash) {
                Ok(h) => h,
                // The cursor names the first writable byte.
                Err(RingLogError::BlankHdr) => return Ok(()),
                Err(e) => return Err(e),
            };
            self.next = self.rb_incr(self.next, HDR + h.payload_len() as u32);
            if self.next == origin {
                self.next = sector_base(self.next);
                return Err(RingLogError::HdrLoop);
            }
        }
    }

    /// Reads and validates the header at the cursor. When the cursor sits
    /// on a sector boundary the sector header is validated first and the
    /// cursor moves past it, so on success the cursor names a record
    /// header.
    fn fetch_header(
        &mut self,
        flash: &impl Flash,
    ) -> Result<RecordHeader, RingLogError> {
        debug_assert!(self.next < self.len);
        if sector_offset(self.next) == 0 {
            let mut sh = SectorHeader::new_zeroed();
            flash.read(self.base + self.next, sh.as_mut_bytes());
            sh.check()?;
            self.next += HDR;
        }
        let mut h = RecordHeader::new_zeroed();
        flash.read(self.base + self.next, h.as_mut_bytes());
        h.check(self.len)?;
        Ok(h)
    }

    /// Copies the payload of the record whose header sits at `hstart`,
    /// following its split chain across sector boundaries, and leaves the
    /// cursor past the record. Returns bytes copied (bounded by `out`).
    fn read_payload(
        &mut self,
        flash: &impl Flash,
        mut hstart: u32,
        mut h: RecordHeader,
        out: &mut [u8],
    ) -> usize {
        let mut total = 0;
        loop {
            let part_len = h.payload_len();
            let n = part_len.min(out.len() - total);
            flash.read(self.base + hstart + HDR, &mut out[total..total + n]);
            total += n;
            self.next = self.rb_incr(hstart, HDR + part_len as u32);
            if sector_offset(self.next) != 0 {
                break;
            }
            // The record ran out exactly at a sector boundary; a
            // continuation may follow, but only in the sector written
            // immediately after this one. An old lap's leftover split
            // header fails the epoch test.
            let Some(prev_epoch) =
                self.sector_epoch(flash, sector_base(hstart))
            else {
                break;
            };
            let Some(cont_epoch) = self.sector_epoch(flash, self.next) else {
                break;
            };
            if cont_epoch != prev_epoch + 1 {
                break;
            }
            let mut cont = RecordHeader::new_zeroed();
            flash.read(self.base + self.next + HDR, cont.as_mut_bytes());
            if cont.check(self.len).is_err()
                || cont.id() != h.id()
                || !cont.is_split()
            {
                break;
            }
            hstart = self.next + HDR;
            h = cont;
        }
        total
    }

    /// Clears the `NOT_SMUDGED` bit of the record header at `hdr_at`. The
    /// page is re-read and re-programmed with exactly that one bit
    /// changed, which is a legal NOR program.
    fn smudge(
        &self,
        flash: &mut impl Flash,
        hdr_at: u32,
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> Result<(), RingLogError> {
        let mut h = RecordHeader::new_zeroed();
        flash.read(self.base + hdr_at, h.as_mut_bytes());
        h.check(self.len)?;

        let crc_at = hdr_at + HDR - 1;
        let page = page_base(crc_at);
        flash.read(self.base + page, page_buf);
        page_buf[page_offset(crc_at)] &= !HdrFlags::NOT_SMUDGED.bits();
        flash.program(self.base + page, page_buf);
        Ok(())
    }

    /// Writes one record starting at the cursor, splitting across sectors
    /// as needed. The caller has positioned the cursor on blank space; the
    /// blank-run check here guarantees no live byte is overwritten before
    /// anything is staged.
    fn sector_append(
        &mut self,
        flash: &mut impl Flash,
        id: u8,
        data: &[u8],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> Result<(), RingLogError> {
        debug_assert!(
            sector_offset(self.next)
                <= SECTOR_SIZE_BYTES - SECTOR_TAIL_RESERVE
        );
        let needed = self.bytes_needed(self.next, data.len());
        if self.blank_run(flash, page_buf) < needed {
            return Err(RingLogError::WrappedSectorUsed);
        }
        self.last_wrote = self.next;

        let mut remaining = data;
        let mut flags = HdrFlags::NOT_SMUDGED;
        loop {
            let at_base = sector_offset(self.next) == 0;
            let hdrs = if at_base { 2 * HDR_BYTES } else { HDR_BYTES };
            let room = SECTOR_SIZE_BYTES - sector_offset(self.next);
            let part = remaining.len().min(room - hdrs);
            debug_assert!(part >= 1);

            let rh = RecordHeader::new(id, part as u16, flags);
            if at_base {
                self.sector_index += 1;
                let sh = SectorHeader::new(self.sector_index);
                self.stage_part(
                    flash,
                    &[sh.as_bytes(), rh.as_bytes(), &remaining[..part]],
                    page_buf,
                );
            } else {
                self.stage_part(
                    flash,
                    &[rh.as_bytes(), &remaining[..part]],
                    page_buf,
                );
            }

            if part == remaining.len() {
                return Ok(());
            }
            remaining = &remaining[part..];
            flags = HdrFlags::NOT_SMUDGED | HdrFlags::SPLIT;
            debug_assert_eq!(sector_offset(self.next), 0);
        }
    }

    /// Total bytes (headers included) a `size`-byte record consumes when
    /// written starting at `start`.
    fn bytes_needed(&self, start: u32, size: usize) -> usize {
        let mut need = 0;
        let mut remaining = size;
        let mut in_sector = sector_offset(start);
        loop {
            let hdrs = if in_sector == 0 { 2 * HDR_BYTES } else { HDR_BYTES };
            let room = SECTOR_SIZE_BYTES - in_sector;
            if remaining + hdrs <= room {
                return need + hdrs + remaining;
            }
            need += room;
            remaining -= room - hdrs;
            in_sector = 0;
        }
    }

    /// Length of the erased run at the cursor: the rest of the current
    /// sector, plus following sectors while they are blank end to end.
    fn blank_run(
        &self,
        flash: &impl Flash,
        buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> usize {
        let mut total = 0;
        let mut offset = self.next;
        loop {
            let span = SECTOR_SIZE_BYTES - sector_offset(offset);
            let blanks = self.count_blanks(flash, offset, span, buf);
            total += blanks;
            if blanks < span {
                return total;
            }
            offset = sector_base(offset) + SECTOR_SIZE;
            if offset >= self.len {
                offset = 0;
            }
            if offset == sector_base(self.next) {
                return total;
            }
        }
    }

    fn count_blanks(
        &self,
        flash: &impl Flash,
        mut offset: u32,
        span: usize,
        buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> usize {
        let mut n = 0;
        let mut remaining = span;
        while remaining > 0 {
            let chunk = remaining.min(PAGE_SIZE_BYTES);
            flash.read(self.base + offset, &mut buf[..chunk]);
            for &b in &buf[..chunk] {
                if b != 0xFF {
                    return n;
                }
                n += 1;
            }
            offset += chunk as u32;
            remaining -= chunk;
        }
        n
    }

    /// Stages `pieces` contiguously at the cursor, programming each page
    /// as it fills and flushing the final partial page. A part never
    /// crosses a sector boundary; the cursor wraps only when the part ends
    /// flush with the region.
    fn stage_part(
        &mut self,
        flash: &mut impl Flash,
        pieces: &[&[u8]],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) {
        let mut page = page_base(self.next);
        if page_offset(self.next) != 0 {
            // The head of this page is already programmed; staging must
            // reproduce it bit for bit.
            flash.read(self.base + page, page_buf);
        } else {
            page_buf.fill(0xFF);
        }
        for piece in pieces {
            let mut p = *piece;
            while !p.is_empty() {
                let off = page_offset(self.next);
                let n = (PAGE_SIZE_BYTES - off).min(p.len());
                page_buf[off..off + n].copy_from_slice(&p[..n]);
                p = &p[n..];
                self.next += n as u32;
                if page_offset(self.next) == 0 {
                    flash.program(self.base + page, page_buf);
                    page_buf.fill(0xFF);
                    if self.next >= self.len {
                        self.next = 0;
                    }
                    page = page_base(self.next);
                }
            }
        }
        if page_offset(self.next) != 0 {
            flash.program(self.base + page, page_buf);
        }
    }

    /// Steps a cursor over a record that starts at `offset` and carries
    /// `step = header + payload` bytes. Steps are rounded up to header
    /// alignment; a step that would leave less than a header plus one byte
    /// of sector tail jumps to the next sector, wrapping at the region
    /// end.
    fn rb_incr(&self, offset: u32, step: u32) -> u32 {
        let step = (step + (HDR - 1)) & !(HDR - 1);
        let next = if step > SECTOR_SIZE {
            sector_base(offset) + SECTOR_SIZE
        } else if sector_offset(offset) + step as usize
            > SECTOR_SIZE_BYTES - SECTOR_TAIL_RESERVE
        {
            sector_base(offset) + SECTOR_SIZE
        } else {
            offset + step
        };
        if next >= self.len {
            0
        } else {
            next
        }
    }

    fn advance_raw(&self, offset: u32, n: u32) -> u32 {
        let next = offset + n;
        if next >= self.len {
            next - self.len
        } else {
            next
        }
    }
}

fn check_id(id: u8) -> Result<(), RingLogError> {
    if (ID_MIN..=ID_MAX).contains(&id) {
        Ok(())
    } else {
        Err(RingLogError::BadCallerData)
    }
}
