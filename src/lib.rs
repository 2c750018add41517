#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod compact;
pub mod error;
mod get;
mod internal;
pub mod platform;
mod raw;
mod set;
mod walk;

extern crate alloc;

pub use get::Get;
pub use raw::PageState;
pub use set::Set;

use crate::error::Error;
use crate::platform::{CacheController, Platform};
use crate::raw::{MAX_ITEM_ID, PAGE_HEADER_SIZE, WORD_SIZE};
use crate::walk::{FlashPage, RecordWalk, WordSource};
use alloc::collections::BTreeSet;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Identifies an item the way the firmware-wide NV interface does.
///
/// Only `item_id` is persisted. Mapping several subsystems onto one id space is the job of the
/// layer above, `system_id` and `sub_id` are carried for it and ignored by the store.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ItemKey {
    pub system_id: u8,
    pub item_id: u16,
    pub sub_id: u16,
}

impl ItemKey {
    pub const fn new(system_id: u8, item_id: u16, sub_id: u16) -> Self {
        Self {
            system_id,
            item_id,
            sub_id,
        }
    }

    /// Key for a plain item id without any namespace.
    ///
    /// Tip: ids are checked on every access, use a const context to keep keys in one place:
    ///   `const SERIAL: ItemKey = ItemKey::item(0x10);`
    pub const fn item(item_id: u16) -> Self {
        Self::new(0, item_id, 0)
    }

    pub(crate) fn checked_id(&self) -> Result<u16, Error> {
        match self.item_id {
            1..=MAX_ITEM_ID => Ok(self.item_id),
            id => Err(Error::InvalidItemId(id)),
        }
    }
}

impl From<u16> for ItemKey {
    fn from(item_id: u16) -> Self {
        Self::item(item_id)
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ItemKey({}:0x{:0>4x}:{})",
            self.system_id, self.item_id, self.sub_id
        )
    }
}

/// The two fault latches of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultState {
    /// An erase, program or verify failed. Writes are refused until [`Nvs::init`] is called.
    pub fatal: bool,
    /// The latest write or compaction failed. Reset by the next one.
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NvsStatistics {
    /// `None` if the page header holds none of the known patterns
    pub page_state: Option<PageState>,
    pub used_bytes: usize,
    pub free_bytes: usize,
    /// Reclaimed by the next compaction
    pub reclaimable_bytes: usize,
    pub items: ItemStatistics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatistics {
    pub live: u32,
    pub superseded: u32,
    pub uncommitted: u32,
}

/// A key/value store backed by a single flash page.
///
/// Records are appended until the page is full, then the page is compacted in place using the
/// RAM of the cache controller as temporary storage.
pub struct Nvs<T: Platform, C: CacheController> {
    pub(crate) hal: T,
    pub(crate) cache: C,
    pub(crate) page_offset: usize,
    pub(crate) page_size: usize,

    // None once a compaction failed after erasing the page
    pub(crate) cursor: Option<usize>,
    pub(crate) faults: FaultState,
}

impl<T: Platform, C: CacheController> Nvs<T, C> {
    /// Uses the flash sector at `page_offset` as the store and initializes it:
    /// 1. An ACTIVE page is kept, the write position is recovered by scanning from the top
    /// 2. A page caught mid compaction (XFER) is compacted again
    /// 3. Anything else is erased and marked ACTIVE
    ///
    /// Only invalid configuration is reported here. Flash failures during initialization are
    /// latched and reported by the next write or compaction.
    pub fn new(page_offset: usize, hal: T, cache: C) -> Result<Nvs<T, C>, Error> {
        if !WORD_SIZE.is_multiple_of(T::WRITE_SIZE)
            || !WORD_SIZE.is_multiple_of(T::READ_SIZE)
            || !T::ERASE_SIZE.is_multiple_of(WORD_SIZE)
            || !(4 * WORD_SIZE..=u16::MAX as usize + 1).contains(&T::ERASE_SIZE)
        {
            return Err(Error::UnsupportedGeometry);
        }

        if !page_offset.is_multiple_of(T::ERASE_SIZE)
            || page_offset
                .checked_add(T::ERASE_SIZE)
                .is_none_or(|end| end > hal.capacity())
        {
            return Err(Error::InvalidPageOffset);
        }

        let mut nvs = Self {
            hal,
            cache,
            page_offset,
            page_size: T::ERASE_SIZE,
            cursor: None,
            faults: FaultState::default(),
        };

        nvs.init();

        Ok(nvs)
    }

    /// Re-initializes the store from flash and clears both fault latches. This is the only way
    /// out of a fatal fault.
    pub fn init(&mut self) {
        critical_section::with(|_| {
            #[cfg(feature = "defmt")]
            trace!("init: @{:#08x}", self.page_offset);

            self.faults = FaultState::default();
            if let Err(e) = self.load_page() {
                self.latch(e);
            }
        })
    }

    /// Reads `buf.len()` bytes of the most recent value of `key`, starting `offset` bytes into it.
    ///
    /// Stored values are padded to the flash word size, reading the padding yields `0xFF`.
    pub fn read(
        &mut self,
        key: impl Into<ItemKey>,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        let key = key.into();
        critical_section::with(|_| {
            let result = self.read_item(key, offset, buf);
            self.latch_read_fault(result)
        })
    }

    /// Length of the most recent value of `key`, padded to the flash word size.
    pub fn stored_len(&mut self, key: impl Into<ItemKey>) -> Result<usize, Error> {
        let key = key.into();
        critical_section::with(|_| {
            let result = self.item_len(key);
            self.latch_read_fault(result)
        })
    }

    /// Stores `data` as the new value of `key`.
    ///
    /// Writing the value that is already stored doesn't touch the flash. If the page has no room
    /// left, it is compacted first.
    pub fn write(&mut self, key: impl Into<ItemKey>, data: &[u8]) -> Result<(), Error> {
        let key = key.into();
        critical_section::with(|_| {
            self.faults.recoverable = false;
            if self.faults.fatal {
                return Err(Error::FlashError);
            }

            self.set_item(key, data).inspect_err(|e| self.latch(*e))
        })
    }

    /// Compacts the page if fewer than `min_free` bytes are left. Zero always compacts.
    pub fn compact(&mut self, min_free: usize) -> Result<(), Error> {
        critical_section::with(|_| {
            self.faults.recoverable = false;
            if self.faults.fatal {
                return Err(Error::FlashError);
            }

            self.compact_if_below(min_free)
                .inspect_err(|e| self.latch(*e))
        })
    }

    /// Compacts the page once more than `percent` of it is used. `100` always compacts.
    pub fn compact_at_threshold(&mut self, percent: u8) -> Result<(), Error> {
        if percent > 100 {
            return Err(Error::InvalidThreshold(percent));
        }
        self.compact(self.page_size - self.page_size * percent as usize / 100)
    }

    /// Get a value from the flash.
    ///
    /// Supported types are bool, signed and unsigned integers up to 64-bit width and byte arrays.
    pub fn get<R>(&mut self, key: impl Into<ItemKey>) -> Result<R, Error>
    where
        Nvs<T, C>: Get<R>,
    {
        Get::get(self, key.into())
    }

    /// Set a value and write it to the flash. Integers are stored little endian.
    pub fn set<R>(&mut self, key: impl Into<ItemKey>, value: R) -> Result<(), Error>
    where
        Nvs<T, C>: Set<R>,
    {
        Set::set(self, key.into(), value)
    }

    pub fn fault_state(&self) -> FaultState {
        self.faults
    }

    /// Bytes left before the next write triggers a compaction.
    pub fn free_bytes(&self) -> usize {
        self.cursor.map_or(0, |cursor| self.page_size - cursor)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns detailed statistics about the page usage
    pub fn statistics(&mut self) -> Result<NvsStatistics, Error> {
        critical_section::with(|_| {
            let cursor = self.cursor.ok_or(Error::NotReady)?;
            let mut flash = FlashPage::new(&mut self.hal, self.page_offset);
            let page_state = PageState::from_word(flash.read_word(0)?);

            let mut seen = BTreeSet::new();
            let mut live_bytes = 0;
            let mut items = ItemStatistics {
                live: 0,
                superseded: 0,
                uncommitted: 0,
            };

            let mut walk = RecordWalk::new(cursor, PAGE_HEADER_SIZE);
            while let Some(record) = walk.next_record(&mut flash)? {
                let header = record.header;
                if header.is_erased() {
                    continue;
                }
                if !header.is_committed() || header.is_null() {
                    items.uncommitted += 1;
                } else if seen.insert(header.id) {
                    items.live += 1;
                    live_bytes += record.span();
                } else {
                    items.superseded += 1;
                }
            }

            let used_bytes = cursor - PAGE_HEADER_SIZE;
            Ok(NvsStatistics {
                page_state,
                used_bytes,
                free_bytes: self.page_size - cursor,
                reclaimable_bytes: used_bytes - live_bytes,
                items,
            })
        })
    }

    // reads never touch the recoverable latch
    fn latch_read_fault<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if result.as_ref().is_err_and(Error::is_fatal) {
            self.faults.fatal = true;
        }
        result
    }

    fn latch(&mut self, error: Error) {
        #[cfg(feature = "defmt")]
        defmt::warn!("operation failed: {}", error);

        self.faults.recoverable = true;
        if error.is_fatal() {
            self.faults.fatal = true;
        }
    }
}
