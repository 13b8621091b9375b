// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size circular record buffer on raw NOR flash.
//!
//! A [`CircLog`] keeps a bounded ring of equal-size records. There is no
//! control block on flash: the head and tail live only in RAM and are
//! reconstructed on boot by scanning a timestamp embedded in every record.
//! The caller supplies the extractor that maps a record's bytes to its
//! timestamp; timestamps must increase monotonically across appends, and
//! the values `0` and `u64::MAX` are reserved to mean "no record here"
//! (the latter is what erased flash reads as).
//!
//! Records are packed into program pages and never straddle one. The
//! physical ring is one sector larger than the logical capacity requires,
//! and the sector ahead of the head is erased the moment the head crosses
//! into it, so the append path always lands on erased bytes and a
//! read-modify-program of a single page suffices.

#![cfg_attr(not(test), no_std)]

use flash_block::{
    page_base, page_offset, sector_offset, Flash, PAGE_SIZE_BYTES,
    PAGES_PER_SECTOR, SECTOR_SIZE_BYTES,
};

/// Maps a record's bytes to its timestamp. Must be pure and stateless.
pub type TimestampFn = fn(&[u8]) -> u64;

/// Timestamp of erased flash; reserved.
const TS_BLANK: u64 = u64::MAX;
/// Also reserved, so a cleared slot can never look live.
const TS_ZERO: u64 = 0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CircLogError {
    /// Bad geometry: zero length, unaligned base, or an item size that is
    /// zero, larger than a page, or does not divide one evenly.
    BadCallerData,
}

/// Iteration direction for [`CircLog::cursor`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CursorOrder {
    /// Oldest record first.
    Ascending,
    /// Newest record first.
    Descending,
}

/// A bounded ring of equal-size records over one flash region.
#[derive(Clone, Debug)]
pub struct CircLog {
    base: u32,
    length: usize,
    item_size: usize,
    items_per_page: usize,
    total_sectors: usize,
    head: usize,
    tail: usize,
    is_full: bool,
    get_timestamp: TimestampFn,
}

impl CircLog {
    /// Sets up a ring of `length` records of `item_size` bytes each at the
    /// sector-aligned device offset `base`.
    ///
    /// With `force_init` the region is erased; otherwise the head and tail
    /// are restored by scanning timestamps. The flash reserved is
    /// [`storage_bytes`](Self::storage_bytes), always a whole number of
    /// sectors and one sector more than the records strictly need.
    pub fn create(
        flash: &mut impl Flash,
        base: u32,
        length: usize,
        item_size: usize,
        get_timestamp: TimestampFn,
        force_init: bool,
    ) -> Result<Self, CircLogError> {
        if length == 0 || sector_offset(base) != 0 {
            return Err(CircLogError::BadCallerData);
        }
        if item_size == 0
            || item_size > PAGE_SIZE_BYTES
            || PAGE_SIZE_BYTES % item_size != 0
        {
            return Err(CircLogError::BadCallerData);
        }

        let items_per_page = PAGE_SIZE_BYTES / item_size;
        let pages_needed = length.div_ceil(items_per_page);
        let total_sectors = pages_needed.div_ceil(PAGES_PER_SECTOR) + 1;

        let mut cb = Self {
            base,
            length,
            item_size,
            items_per_page,
            total_sectors,
            head: 0,
            tail: 0,
            is_full: false,
            get_timestamp,
        };
        if force_init {
            flash.erase(base, cb.storage_bytes() as u32);
        } else {
            cb.restore(flash);
        }
        Ok(cb)
    }

    /// Flash reserved for this ring, in bytes.
    pub fn storage_bytes(&self) -> usize {
        self.total_sectors * SECTOR_SIZE_BYTES
    }

    /// Logical capacity in records.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn tail(&self) -> usize {
        self.tail
    }

    pub fn is_full(&self) -> bool {
        self.is_full
    }

    /// Number of records a cursor will produce.
    pub fn live_records(&self) -> usize {
        if self.is_full {
            self.length
        } else {
            self.distance(self.tail, self.head)
        }
    }

    /// Physical slot count, one erase sector more than the capacity needs.
    fn actual_len(&self) -> usize {
        self.total_sectors * PAGES_PER_SECTOR * self.items_per_page
    }

    fn items_per_sector(&self) -> usize {
        self.items_per_page * PAGES_PER_SECTOR
    }

    /// All cyclic index math funnels through these two.
    fn advance(&self, index: usize, n: usize) -> usize {
        (index + n) % self.actual_len()
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        (to + self.actual_len() - from) % self.actual_len()
    }

    /// Device offset of a slot, honoring page packing: a slot never
    /// straddles a page, so any page-end slack is simply unused.
    fn slot_addr(&self, index: usize) -> u32 {
        let page = index / self.items_per_page;
        let pos = index % self.items_per_page;
        self.base
            + (page * PAGE_SIZE_BYTES + pos * self.item_size) as u32
    }

    /// Appends one record at the head.
    ///
    /// `data` may be shorter than the item size; the remainder of the slot
    /// stays erased. The destination slot is known to be erased (the ring
    /// pre-erases the sector ahead), so this is a read-modify-program of
    /// exactly one page.
    pub fn append(
        &mut self,
        flash: &mut impl Flash,
        data: &[u8],
    ) -> Result<(), CircLogError> {
        if data.is_empty() || data.len() > self.item_size {
            return Err(CircLogError::BadCallerData);
        }

        let addr = self.slot_addr(self.head);
        let page = page_base(addr);
        let mut buf = [0xFFu8; PAGE_SIZE_BYTES];
        flash.read(page, &mut buf);
        buf[page_offset(addr)..page_offset(addr) + data.len()]
            .copy_from_slice(data);
        flash.program(page, &buf);

        // Pre-erase the sector the head is about to enter; the oldest
        // records live there.
        let next = self.advance(self.head, 1);
        let cur_sector = self.head / self.items_per_sector();
        let next_sector = next / self.items_per_sector();
        if cur_sector != next_sector {
            flash.erase(
                self.base + (next_sector * SECTOR_SIZE_BYTES) as u32,
                SECTOR_SIZE_BYTES as u32,
            );
        }

        if self.is_full {
            self.head = next;
            self.tail = self.advance(self.tail, 1);
        } else if self.head < self.length {
            self.head = next;
        } else {
            self.head = next;
            self.tail = self.advance(self.tail, 1);
            self.is_full = true;
        }
        Ok(())
    }

    /// Rebuilds head, tail, and fullness from flash contents.
    ///
    /// Every physical slot is scanned. Slots whose timestamp is a sentinel
    /// are empty; the largest timestamp marks the newest record (head lands
    /// just past it) and the smallest marks the tail. Seeing more live
    /// slots than the logical capacity means the ring has wrapped, and the
    /// tail is forced to exactly `length` records behind the head.
    fn restore(&mut self, flash: &impl Flash) {
        let mut newest = TS_ZERO;
        let mut oldest = TS_BLANK;
        let mut live = 0usize;
        self.head = 0;
        self.tail = 0;
        self.is_full = false;

        let mut buf = [0xFFu8; PAGE_SIZE_BYTES];
        let total_pages = self.total_sectors * PAGES_PER_SECTOR;
        for page in 0..total_pages {
            flash.read(self.base + (page * PAGE_SIZE_BYTES) as u32, &mut buf);
            for pos in 0..self.items_per_page {
                let index = page * self.items_per_page + pos;
                let raw = &buf[pos * self.item_size..][..self.item_size];
                let ts = (self.get_timestamp)(raw);
                if ts == TS_BLANK || ts == TS_ZERO {
                    continue;
                }
                if ts > newest {
                    newest = ts;
                    self.head = self.advance(index, 1);
                }
                if ts < oldest {
                    oldest = ts;
                    self.tail = index;
                }
                live += 1;
            }
        }

        if live > self.length {
            self.is_full = true;
            // Exactly `length` records behind the head.
            self.tail = self.advance(self.head, self.actual_len() - self.length);
        }
    }

    /// Opens a cursor over the live records, oldest-first or newest-first.
    ///
    /// The cursor observes a consistent snapshot only if no appends happen
    /// while it is open; holding `&CircLog` enforces exactly that.
    pub fn cursor(&self, order: CursorOrder) -> Cursor<'_> {
        let index = match order {
            CursorOrder::Ascending => self.tail,
            CursorOrder::Descending => {
                self.advance(self.head, self.actual_len() - 1)
            }
        };
        Cursor {
            cb: self,
            index,
            remaining: self.live_records(),
            order,
        }
    }
}

/// Iterates the live records of a [`CircLog`].
pub struct Cursor<'a> {
    cb: &'a CircLog,
    index: usize,
    remaining: usize,
    order: CursorOrder,
}

impl Cursor<'_> {
    /// Copies the next record into `out` and steps. Returns `false` once
    /// the live range is exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than the ring's item size.
    pub fn next(&mut self, flash: &impl Flash, out: &mut [u8]) -> bool {
        if self.remaining == 0 {
            return false;
        }
        let cb = self.cb;
        flash.read(cb.slot_addr(self.index), &mut out[..cb.item_size]);
        self.index = match self.order {
            CursorOrder::Ascending => cb.advance(self.index, 1),
            CursorOrder::Descending => {
                cb.advance(self.index, cb.actual_len() - 1)
            }
        };
        self.remaining -= 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_block::RamFlash;
    use proptest::prelude::*;

    const LENGTH: usize = 10;
    const ITEM: usize = 16;

    // Geometry for these parameters: 16 items per page, 1 page needed,
    // plus the spare sector -> 2 sectors, 512 physical slots.
    const ACTUAL: usize = 512;

    type TestFlash = RamFlash<{ 2 * SECTOR_SIZE_BYTES }>;

    fn item(ts: u64, value: u16) -> [u8; ITEM] {
        let mut raw = [0u8; ITEM];
        raw[..8].copy_from_slice(&ts.to_le_bytes());
        raw[8..10].copy_from_slice(&value.to_le_bytes());
        raw
    }

    fn get_ts(raw: &[u8]) -> u64 {
        u64::from_le_bytes(raw[..8].try_into().unwrap())
    }

    fn fresh(flash: &mut TestFlash) -> CircLog {
        CircLog::create(flash, 0, LENGTH, ITEM, get_ts, true).unwrap()
    }

    fn reopen(flash: &mut TestFlash) -> CircLog {
        CircLog::create(flash, 0, LENGTH, ITEM, get_ts, false).unwrap()
    }

    /// Appends records with timestamps 1..=n.
    fn fill(cb: &mut CircLog, flash: &mut TestFlash, n: usize) {
        for i in 0..n {
            cb.append(flash, &item(1 + i as u64, 0x1234 + i as u16)).unwrap();
        }
    }

    #[test]
    fn geometry() {
        let mut flash = TestFlash::new();
        let cb = fresh(&mut flash);
        assert_eq!(cb.storage_bytes(), 2 * SECTOR_SIZE_BYTES);
        assert_eq!(cb.actual_len(), ACTUAL);
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut flash = TestFlash::new();
        let bad = Some(CircLogError::BadCallerData);
        assert_eq!(
            CircLog::create(&mut flash, 0, 0, ITEM, get_ts, true).err(),
            bad
        );
        // 24 does not divide a 256-byte page.
        assert_eq!(
            CircLog::create(&mut flash, 0, LENGTH, 24, get_ts, true).err(),
            bad
        );
        assert_eq!(
            CircLog::create(
                &mut flash,
                0,
                LENGTH,
                PAGE_SIZE_BYTES + 1,
                get_ts,
                true
            )
            .err(),
            bad
        );
        // Unaligned base.
        assert_eq!(
            CircLog::create(&mut flash, 100, LENGTH, ITEM, get_ts, true).err(),
            bad
        );
    }

    #[test]
    fn append_one() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        cb.append(&mut flash, &item(1, 0x1234)).unwrap();
        assert_eq!(cb.head(), 1);
        assert_eq!(cb.tail(), 0);
        assert!(!cb.is_full());
    }

    #[test]
    fn append_below_capacity() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, LENGTH - 1);
        assert_eq!(cb.head(), LENGTH - 1);
        assert_eq!(cb.tail(), 0);
        assert!(!cb.is_full());
    }

    /// The ring reports full on the append after the head passes the
    /// logical capacity, and the tail starts moving.
    #[test]
    fn append_past_capacity() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, LENGTH);
        assert_eq!(cb.head(), LENGTH);
        assert_eq!(cb.tail(), 0);
        assert!(!cb.is_full());
        assert_eq!(cb.live_records(), LENGTH);

        cb.append(&mut flash, &item(11, 0x1234)).unwrap();
        assert_eq!(cb.head(), LENGTH + 1);
        assert_eq!(cb.tail(), 1);
        assert!(cb.is_full());
        assert_eq!(cb.live_records(), LENGTH);
    }

    #[test]
    fn rejects_oversize_record() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        assert_eq!(
            cb.append(&mut flash, &[0u8; ITEM + 1]),
            Err(CircLogError::BadCallerData)
        );
    }

    /// Records land at their packed slot addresses.
    #[test]
    fn persisted_layout() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, LENGTH - 1);

        for i in 0..LENGTH - 1 {
            let mut raw = [0u8; ITEM];
            flash.read((i * ITEM) as u32, &mut raw);
            assert_eq!(get_ts(&raw), 1 + i as u64);
            assert_eq!(
                u16::from_le_bytes(raw[8..10].try_into().unwrap()),
                0x1234 + i as u16
            );
        }
    }

    #[test]
    fn cursor_ascending() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, LENGTH);

        let mut cursor = cb.cursor(CursorOrder::Ascending);
        let mut raw = [0u8; ITEM];
        for i in 0..LENGTH {
            assert!(cursor.next(&flash, &mut raw));
            assert_eq!(get_ts(&raw), 1 + i as u64);
        }
        assert!(!cursor.next(&flash, &mut raw));
    }

    #[test]
    fn cursor_descending() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, LENGTH);

        let mut cursor = cb.cursor(CursorOrder::Descending);
        let mut raw = [0u8; ITEM];
        for i in (1..=LENGTH).rev() {
            assert!(cursor.next(&flash, &mut raw));
            assert_eq!(get_ts(&raw), i as u64);
        }
        assert!(!cursor.next(&flash, &mut raw));
    }

    #[test]
    fn cursor_after_double_wrap_of_capacity() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, 2 * LENGTH);

        let mut cursor = cb.cursor(CursorOrder::Ascending);
        let mut raw = [0u8; ITEM];
        for i in LENGTH..2 * LENGTH {
            assert!(cursor.next(&flash, &mut raw));
            assert_eq!(get_ts(&raw), 1 + i as u64);
        }
        assert!(!cursor.next(&flash, &mut raw));
    }

    /// Enough appends to wrap the physical ring, exercising the pre-erase
    /// of the sector ahead.
    #[test]
    fn cursor_after_physical_wrap() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, ACTUAL + 5);
        assert_eq!(cb.head(), 5);
        assert!(cb.is_full());

        let mut cursor = cb.cursor(CursorOrder::Descending);
        let mut raw = [0u8; ITEM];
        for i in ((ACTUAL + 5 - LENGTH + 1)..=(ACTUAL + 5)).rev() {
            assert!(cursor.next(&flash, &mut raw));
            assert_eq!(get_ts(&raw), i as u64);
        }
        assert!(!cursor.next(&flash, &mut raw));
    }

    #[test]
    fn cursor_on_empty_ring() {
        let mut flash = TestFlash::new();
        let cb = fresh(&mut flash);
        let mut raw = [0u8; ITEM];
        assert!(!cb.cursor(CursorOrder::Ascending).next(&flash, &mut raw));
        assert!(!cb.cursor(CursorOrder::Descending).next(&flash, &mut raw));
    }

    #[test]
    fn restore_empty() {
        let mut flash = TestFlash::new();
        fresh(&mut flash);
        let cb = reopen(&mut flash);
        assert_eq!((cb.head(), cb.tail(), cb.is_full()), (0, 0, false));
    }

    #[test]
    fn restore_below_capacity() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, 9);
        let before = (cb.head(), cb.tail(), cb.is_full());

        let cb = reopen(&mut flash);
        assert_eq!((cb.head(), cb.tail(), cb.is_full()), before);
    }

    /// Fifteen appends, reboot: head just past the newest record, tail
    /// exactly `length` behind, ring full. Newest-first iteration yields
    /// timestamps 15 down to 6.
    #[test]
    fn restore_after_wrap_of_capacity() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, 15);

        let cb = reopen(&mut flash);
        assert_eq!(cb.head(), 15);
        assert_eq!(cb.tail(), 5);
        assert!(cb.is_full());

        let mut cursor = cb.cursor(CursorOrder::Descending);
        let mut raw = [0u8; ITEM];
        for ts in (6..=15u64).rev() {
            assert!(cursor.next(&flash, &mut raw));
            assert_eq!(get_ts(&raw), ts);
        }
        assert!(!cursor.next(&flash, &mut raw));
    }

    #[test]
    fn restore_after_physical_wrap() {
        let mut flash = TestFlash::new();
        let mut cb = fresh(&mut flash);
        fill(&mut cb, &mut flash, ACTUAL + 5);
        let before = (cb.head(), cb.tail(), cb.is_full());

        let cb = reopen(&mut flash);
        assert_eq!((cb.head(), cb.tail(), cb.is_full()), before);
    }

    proptest! {
        /// Restore always reproduces the in-RAM state, whatever the append
        /// count.
        #[test]
        fn restore_matches_live_state(n in 1usize..600) {
            let mut flash = TestFlash::new();
            let mut cb = fresh(&mut flash);
            fill(&mut cb, &mut flash, n);
            let before = (cb.head(), cb.tail(), cb.is_full());

            let cb = reopen(&mut flash);
            prop_assert_eq!((cb.head(), cb.tail(), cb.is_full()), before);
        }
    }
}
