// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Latest-value store over the ring log.
//!
//! A [`KvStore`] keeps "the current value" for a handful of record ids by
//! appending on every change and logically deleting the older duplicates.
//! A value's identity is its *key prefix*: the first `key_len` bytes. A
//! `put` appends the new value, then smudges every older record with the
//! same id and key prefix, so a read of the newest record always yields
//! the current value while the log retains its append-only discipline.
//!
//! The store itself is stateless: every operation reopens the log with
//! [`RingLog::recreate`], which rewinds to the oldest sector. That is the
//! supported pattern for having several accessors share one region, and
//! it means a `KvStore` can be kept in a `const` and used from anywhere
//! that can borrow the flash and a page buffer.
//!
//! Values are limited to one flash page. This layer trades throughput for
//! simplicity; anything bigger or hotter belongs on the ring log
//! directly.

#![cfg_attr(not(test), no_std)]

use flash_block::{Flash, PAGE_SIZE_BYTES};
use ringlog::{InitChoice, RingLog, RingLogError};

/// A latest-value store over one ring-log region.
#[derive(Copy, Clone, Debug)]
pub struct KvStore {
    base: u32,
    sectors: usize,
}

impl KvStore {
    /// Describes a store over `sectors` sectors at the sector-aligned
    /// device offset `base`. No flash is touched until an operation runs.
    pub const fn new(base: u32, sectors: usize) -> Self {
        Self { base, sectors }
    }

    fn open(
        &self,
        flash: &mut impl Flash,
    ) -> Result<RingLog, RingLogError> {
        RingLog::recreate(
            flash,
            self.base,
            self.sectors,
            InitChoice::InitIfFail,
        )
    }

    /// Stores `value` as the current value for `id`, keyed by its first
    /// `key_len` bytes.
    ///
    /// Returns `Ok(false)` without touching flash when the newest stored
    /// value is byte-identical, sparing the wear. Otherwise the value is
    /// appended (reclaiming the oldest sector if the log is full) and
    /// every older record with the same key prefix is deleted.
    pub fn put(
        &self,
        flash: &mut impl Flash,
        id: u8,
        value: &[u8],
        key_len: usize,
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> Result<bool, RingLogError> {
        if value.is_empty()
            || value.len() > PAGE_SIZE_BYTES
            || key_len == 0
            || key_len > value.len()
        {
            return Err(RingLogError::BadCallerData);
        }

        match self.get_latest(flash, id, page_buf) {
            Ok(n) if n == value.len() && page_buf[..n] == *value => {
                return Ok(false);
            }
            Ok(_) | Err(RingLogError::HdrIdNotFound) => {}
            Err(e) => return Err(e),
        }

        let mut rb = self.open(flash)?;
        rb.append(flash, id, value, page_buf, true)?;
        self.prune_stale(flash, id, &value[..key_len], page_buf)?;
        Ok(true)
    }

    /// Copies the newest record for `id` into `out`, returning its length.
    /// `HdrIdNotFound` when nothing is stored.
    pub fn get_latest(
        &self,
        flash: &mut impl Flash,
        id: u8,
        out: &mut [u8],
    ) -> Result<usize, RingLogError> {
        let n = self.count(flash, id, out)?;
        if n == 0 {
            return Err(RingLogError::HdrIdNotFound);
        }
        self.get_nth(flash, id, n - 1, out)
    }

    /// Copies the `n`-th oldest record for `id` into `out`.
    pub fn get_nth(
        &self,
        flash: &mut impl Flash,
        id: u8,
        n: usize,
        out: &mut [u8],
    ) -> Result<usize, RingLogError> {
        let mut rb = self.open(flash)?;
        let mut result = Err(RingLogError::HdrIdNotFound);
        for _ in 0..=n {
            result = match rb.read(flash, id, out) {
                Ok(len) => Ok(len),
                Err(RingLogError::BlankHdr | RingLogError::HdrIdNotFound) => {
                    return Err(RingLogError::HdrIdNotFound);
                }
                Err(e) => return Err(e),
            };
        }
        result
    }

    /// Counts the records stored for `id`, clobbering `scratch`.
    pub fn count(
        &self,
        flash: &mut impl Flash,
        id: u8,
        scratch: &mut [u8],
    ) -> Result<usize, RingLogError> {
        let mut rb = self.open(flash)?;
        let mut n = 0;
        loop {
            match rb.read(flash, id, scratch) {
                Ok(_) => n += 1,
                Err(RingLogError::BlankHdr | RingLogError::HdrIdNotFound) => {
                    return Ok(n);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Erases the whole region. Every id stored here is gone.
    pub fn wipe(&self, flash: &mut impl Flash) -> Result<(), RingLogError> {
        RingLog::create(
            flash,
            self.base,
            self.sectors,
            InitChoice::InitAlways,
        )
        .map(|_| ())
    }

    /// Deletes older records sharing `key` until only the newest remains.
    fn prune_stale(
        &self,
        flash: &mut impl Flash,
        id: u8,
        key: &[u8],
        page_buf: &mut [u8; PAGE_SIZE_BYTES],
    ) -> Result<(), RingLogError> {
        loop {
            let mut rb = self.open(flash)?;
            match rb.find(flash, id, key, page_buf) {
                Ok(_) => {}
                Err(RingLogError::BlankHdr | RingLogError::HdrIdNotFound) => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            // A second match means the first is stale.
            match rb.find(flash, id, key, page_buf) {
                Ok(_) => rb.delete(flash, id, key, page_buf)?,
                Err(RingLogError::BlankHdr | RingLogError::HdrIdNotFound) => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}
