use crate::error::Error;
use crate::platform::{CacheController, CacheState, Platform, align_ceil};
use crate::raw::{
    ERASED_WORD, ITEM_HEADER_SIZE, ItemHeader, PAGE_HEADER_SIZE, PageState, WORD_SIZE,
    write_aligned,
};
use crate::walk::{FlashPage, Record, RecordWalk, WordSource};
use crate::{ItemKey, Nvs};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

impl<T: Platform, C: CacheController> Nvs<T, C> {
    pub(crate) fn flash(&mut self) -> FlashPage<'_, T> {
        FlashPage::new(&mut self.hal, self.page_offset)
    }

    pub(crate) fn load_page(&mut self) -> Result<(), Error> {
        self.cursor = None;
        let state = PageState::from_word(self.flash().read_word(0)?);

        #[cfg(feature = "defmt")]
        trace!("load_page: {}", state);

        #[cfg(feature = "debug-logs")]
        println!("internal: load_page: {state:?}");

        match state {
            Some(PageState::Active) => {
                self.cursor = Some(self.find_offset()?);
                Ok(())
            }
            Some(PageState::Xfer) => {
                // all records are still in place, compacting again yields the same result
                self.cursor = Some(self.find_offset()?);
                self.compact_page().map(|_| ())
            }
            _ => {
                self.erase_page()?;
                self.set_page_state(PageState::Active)?;
                self.cursor = Some(PAGE_HEADER_SIZE);
                Ok(())
            }
        }
    }

    /// Recovers the write position: one word past the highest programmed word.
    pub(crate) fn find_offset(&mut self) -> Result<usize, Error> {
        let mut offset = self.page_size - WORD_SIZE;
        let mut flash = self.flash();
        while offset >= PAGE_HEADER_SIZE {
            if flash.read_word(offset)? != ERASED_WORD {
                return Ok(offset + WORD_SIZE);
            }
            offset -= WORD_SIZE;
        }
        Ok(PAGE_HEADER_SIZE)
    }

    /// Most recent committed record of `id` below `cursor`.
    pub(crate) fn find_item(&mut self, cursor: usize, id: u16) -> Result<Option<Record>, Error> {
        let mut flash = self.flash();
        let mut walk = RecordWalk::new(cursor, PAGE_HEADER_SIZE);
        while let Some(record) = walk.next_record(&mut flash)? {
            if record.header.is_committed() && record.header.id == id {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub(crate) fn item_len(&mut self, key: ItemKey) -> Result<usize, Error> {
        let id = key.checked_id()?;
        let cursor = self.cursor.ok_or(Error::NotReady)?;
        let record = self.find_item(cursor, id)?.ok_or(Error::NotFound)?;
        Ok(record.header.data_len())
    }

    pub(crate) fn read_item(
        &mut self,
        key: ItemKey,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("read_item: {} +{} [{}]", key, offset, buf.len());

        let id = key.checked_id()?;
        let cursor = self.cursor.ok_or(Error::NotReady)?;
        let record = self.find_item(cursor, id)?.ok_or(Error::NotFound)?;

        if offset
            .checked_add(buf.len())
            .is_none_or(|end| end > record.header.data_len())
        {
            return Err(Error::InvalidLength);
        }

        self.flash().read_bytes(record.data_offset() + offset, buf)
    }

    pub(crate) fn set_item(&mut self, key: ItemKey, data: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("set_item: {} [{}]", key, data.len());

        #[cfg(feature = "debug-logs")]
        println!("internal: set_item: {key:?} [{}]", data.len());

        let id = key.checked_id()?;
        if data.len() > self.page_size / 4 {
            return Err(Error::ValueTooLong);
        }
        let mut cursor = self.cursor.ok_or(Error::NotReady)?;
        let aligned = align_ceil(data.len(), WORD_SIZE);

        if let Some(record) = self.find_item(cursor, id)? {
            if record.header.data_len() == aligned
                && self.flash().matches_padded(record.data_offset(), data)?
            {
                #[cfg(feature = "debug-logs")]
                println!("internal: set_item: value unchanged");

                return Ok(());
            }
        }

        let span = aligned + ITEM_HEADER_SIZE;
        if cursor + span > self.page_size {
            self.compact_now()?;
            cursor = self.cursor.ok_or(Error::NotReady)?;
            if cursor + span > self.page_size {
                return Err(Error::FlashFull);
            }
        }

        match self.write_item(cursor, id, data, aligned) {
            Ok(()) => {
                self.cursor = Some(cursor + span);
                Ok(())
            }
            Err(e) => {
                // a partially programmed record must not be programmed over by the next write
                if let Ok(resynced) = self.find_offset() {
                    self.cursor = Some(resynced);
                }
                Err(e)
            }
        }
    }

    /// Writes a record in five steps. Each step leaves a record that walks skip:
    /// 1. reserve the header, length still marked invalid
    /// 2. commit the length
    /// 3. program the data
    /// 4. program the id, still marked invalid
    /// 5. commit the id
    fn write_item(
        &mut self,
        offset: usize,
        id: u16,
        data: &[u8],
        aligned: usize,
    ) -> Result<(), Error> {
        let header_offset = offset + aligned;

        #[cfg(feature = "defmt")]
        trace!("write_item: {} @{:#06x}", id, header_offset);

        #[cfg(feature = "debug-logs")]
        println!("  internal: write_item: id {id} header at 0x{header_offset:0>4x}");

        let header = ItemHeader::reserve(aligned as u16);
        self.program(header_offset, &header.to_word())?;

        let header = header.commit_length();
        self.program(header_offset, &header.to_word())?;

        if !data.is_empty() {
            self.program(offset, data)?;
        }

        let header = header.stage_id(id);
        self.program(header_offset, &header.to_word())?;

        let header = header.commit_id();
        self.program(header_offset, &header.to_word())
    }

    /// Programs `bytes` at the word aligned `offset` and reads them back.
    pub(crate) fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        if !self.hal.voltage_ok() {
            #[cfg(feature = "defmt")]
            warn!("program: low voltage, skipping @{:#06x}", offset);

            return Err(Error::LowVoltage);
        }

        let state = self.cache.disable();
        let result = write_aligned(&mut self.hal, (self.page_offset + offset) as _, bytes)
            .map_err(|_| Error::FlashError);
        self.restore_cache(state);
        result?;

        if !self.flash().matches_padded(offset, bytes)? {
            #[cfg(feature = "defmt")]
            warn!("program: verify failed @{:#06x}", offset);

            #[cfg(feature = "debug-logs")]
            println!("  internal: program: verify failed at 0x{offset:0>4x}");

            return Err(Error::FlashError);
        }

        Ok(())
    }

    pub(crate) fn erase_page(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_page: @{:#08x}", self.page_offset);

        #[cfg(feature = "debug-logs")]
        println!("  internal: erase_page: 0x{:0>8x}", self.page_offset);

        if !self.hal.voltage_ok() {
            #[cfg(feature = "defmt")]
            warn!("erase_page: low voltage");

            return Err(Error::LowVoltage);
        }

        let from = self.page_offset as u32;
        let to = from + self.page_size as u32;

        let state = self.cache.disable();
        let result = self.hal.erase(from, to).map_err(|_| Error::FlashError);
        self.restore_cache(state);
        result
    }

    pub(crate) fn set_page_state(&mut self, state: PageState) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("set_page_state: {}", state);

        #[cfg(feature = "debug-logs")]
        println!("  internal: set_page_state: {state}");

        self.program(0, &state.to_word())
    }

    pub(crate) fn restore_cache(&mut self, state: CacheState) {
        if state == CacheState::Enabled {
            self.cache.enable();
        }
    }
}
