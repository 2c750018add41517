//! In place compaction of the page.
//!
//! The page is first marked XFER. Every live record is then copied into the scratch region, the
//! page is erased and the survivors are programmed back before the page is marked ACTIVE again.
//! Until the erase starts, a power loss leaves the page in XFER with all records intact and the
//! next initialization simply compacts again.

use crate::error::Error;
use crate::platform::{CacheController, Platform};
use crate::raw::{PAGE_HEADER_SIZE, PageState};
use crate::walk::{FlashPage, RecordWalk, contains_item};
use crate::Nvs;
use core::cmp;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

// Survivors are moved from the scratch region back to flash in chunks of this size
const RESTORE_CHUNK_SIZE: usize = 64;

impl<T: Platform, C: CacheController> Nvs<T, C> {
    pub(crate) fn compact_if_below(&mut self, min_free: usize) -> Result<(), Error> {
        let cursor = self.cursor.ok_or(Error::NotReady)?;
        let free = self.page_size - cursor;
        if min_free != 0 && free >= min_free {
            #[cfg(feature = "defmt")]
            trace!("compact_if_below: {} bytes free, nothing to do", free);

            return Ok(());
        }

        self.compact_now().map(|_| ())
    }

    /// Marks the page XFER and compacts it. Returns the free bytes afterwards.
    pub(crate) fn compact_now(&mut self) -> Result<usize, Error> {
        self.cursor.ok_or(Error::NotReady)?;
        self.set_page_state(PageState::Xfer)?;
        self.compact_page()
    }

    /// Compacts a page that is already marked XFER.
    ///
    /// Failing before the erase leaves the page and the cursor untouched. Any failure after that
    /// leaves the store without a usable cursor until it is re-initialized.
    pub(crate) fn compact_page(&mut self) -> Result<usize, Error> {
        let cursor = self.cursor.ok_or(Error::NotReady)?;

        #[cfg(feature = "defmt")]
        trace!("compact_page: cursor {:#06x}", cursor);

        #[cfg(feature = "debug-logs")]
        println!("internal: compact_page: cursor 0x{cursor:0>4x}");

        let cache_state = self.cache.disable();

        let copied = match self.collect_survivors(cursor) {
            Ok(copied) => copied,
            Err(e) => {
                self.restore_cache(cache_state);
                return Err(e);
            }
        };

        if let Err(e) = self.erase_page() {
            self.restore_cache(cache_state);
            if e.is_fatal() {
                self.cursor = None;
            }
            return Err(e);
        }

        let result = self.restore_survivors(copied);
        self.restore_cache(cache_state);

        match result {
            Ok(()) => {
                let cursor = PAGE_HEADER_SIZE + copied;
                self.cursor = Some(cursor);

                #[cfg(feature = "debug-logs")]
                println!("internal: compact_page: kept {copied} bytes");

                Ok(self.page_size - cursor)
            }
            Err(_e) => {
                #[cfg(feature = "defmt")]
                warn!("compact_page: restoring survivors failed: {}", _e);

                // the survivors only exist in volatile memory now
                self.cursor = None;
                Err(Error::FlashError)
            }
        }
    }

    /// Copies the most recent committed record of every id into the scratch region, most recent
    /// first. Returns the number of bytes copied.
    fn collect_survivors(&mut self, cursor: usize) -> Result<usize, Error> {
        let mut flash = FlashPage::new(&mut self.hal, self.page_offset);
        let scratch = self.cache.scratch();

        let mut walk = RecordWalk::new(cursor, PAGE_HEADER_SIZE);
        let mut copied = 0;
        let mut last_id = None;

        while let Some(record) = walk.next_record(&mut flash)? {
            let header = record.header;
            if !header.is_committed() || header.is_null() {
                continue;
            }

            // runs of the same id are common, skip them without scanning the scratch region
            if last_id == Some(header.id) {
                continue;
            }
            last_id = Some(header.id);

            if contains_item(&mut scratch[..copied], header.id)? {
                continue;
            }

            let span = record.span();
            let target = scratch
                .get_mut(copied..copied + span)
                .ok_or(Error::ScratchTooSmall)?;
            flash.read_into(record.data_offset(), target)?;
            copied += span;

            #[cfg(feature = "debug-logs")]
            println!("  internal: collect_survivors: {:?}", header);
        }

        Ok(copied)
    }

    /// Programs the collected records right after the page header and marks the page ACTIVE.
    fn restore_survivors(&mut self, copied: usize) -> Result<(), Error> {
        let mut chunk = [0u8; RESTORE_CHUNK_SIZE];
        let mut done = 0;
        while done < copied {
            let count = cmp::min(RESTORE_CHUNK_SIZE, copied - done);
            chunk[..count].copy_from_slice(&self.cache.scratch()[done..done + count]);
            self.program(PAGE_HEADER_SIZE + done, &chunk[..count])?;
            done += count;
        }

        self.set_page_state(PageState::Active)
    }
}
