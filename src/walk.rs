//! Backward walk over a chain of `{data, header}` records.
//!
//! Records grow towards higher addresses, so the most recent one sits directly below the write
//! cursor. The walk starts there and steps down record by record. The same walk is used for
//! lookups and compaction on the flash page, and for the already-copied check on the scratch
//! region during compaction.

use crate::error::Error;
use crate::platform::Platform;
use crate::raw::{ERASED_WORD, ITEM_HEADER_SIZE, ItemHeader, WORD_SIZE};
use core::cmp;

/// Random access to word aligned flash words.
pub(crate) trait WordSource {
    fn read_word(&mut self, offset: usize) -> Result<[u8; WORD_SIZE], Error>;
}

/// Page relative view on the flash.
pub(crate) struct FlashPage<'a, T> {
    hal: &'a mut T,
    base: usize,
}

impl<'a, T: Platform> FlashPage<'a, T> {
    pub(crate) fn new(hal: &'a mut T, base: usize) -> Self {
        Self { hal, base }
    }

    /// `offset` has to be word aligned and `buf` a multiple of the word size.
    pub(crate) fn read_into(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        self.hal
            .read((self.base + offset) as _, buf)
            .map_err(|_| Error::FlashError)
    }

    /// Reads an arbitrary, unaligned range one word at a time.
    pub(crate) fn read_bytes(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        let mut done = 0;
        while done < buf.len() {
            let position = offset + done;
            let skip = position % WORD_SIZE;
            let word = self.read_word(position - skip)?;
            let count = cmp::min(WORD_SIZE - skip, buf.len() - done);
            buf[done..done + count].copy_from_slice(&word[skip..skip + count]);
            done += count;
        }
        Ok(())
    }

    /// Compares the word aligned range at `offset` with `expected`. The remainder of the last
    /// word has to be erased.
    pub(crate) fn matches_padded(&mut self, offset: usize, expected: &[u8]) -> Result<bool, Error> {
        for (index, chunk) in expected.chunks(WORD_SIZE).enumerate() {
            let mut padded = ERASED_WORD;
            padded[..chunk.len()].copy_from_slice(chunk);
            if self.read_word(offset + index * WORD_SIZE)? != padded {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl<T: Platform> WordSource for FlashPage<'_, T> {
    fn read_word(&mut self, offset: usize) -> Result<[u8; WORD_SIZE], Error> {
        let mut word = [0u8; WORD_SIZE];
        self.read_into(offset, &mut word)?;
        Ok(word)
    }
}

impl WordSource for [u8] {
    fn read_word(&mut self, offset: usize) -> Result<[u8; WORD_SIZE], Error> {
        self.get(offset..offset + WORD_SIZE)
            .and_then(|word| word.try_into().ok())
            .ok_or(Error::Corrupted)
    }
}

/// One step of the walk. Uncommitted headers are reported as well, the caller decides what to
/// skip.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Record {
    pub(crate) header: ItemHeader,
    pub(crate) header_offset: usize,
}

impl Record {
    pub(crate) fn data_offset(&self) -> usize {
        self.header_offset - self.header.data_len()
    }

    /// Bytes occupied by data and header.
    pub(crate) fn span(&self) -> usize {
        self.header.data_len() + ITEM_HEADER_SIZE
    }
}

pub(crate) struct RecordWalk {
    end: usize,
    floor: usize,
}

impl RecordWalk {
    /// Walks the records in `floor..end`, starting with the one whose header ends at `end`.
    pub(crate) fn new(end: usize, floor: usize) -> Self {
        Self { end, floor }
    }

    /// Returns the next record below the current position.
    ///
    /// A header with an invalid length was torn before its length was committed, which means
    /// nothing below it was written for this record and it is stepped over one word at a time.
    /// A valid length that is not word aligned or points below the floor is corruption and ends
    /// the walk with an error.
    pub(crate) fn next_record<S: WordSource + ?Sized>(
        &mut self,
        src: &mut S,
    ) -> Result<Option<Record>, Error> {
        if self.end < self.floor + ITEM_HEADER_SIZE {
            return Ok(None);
        }

        let header_offset = self.end - ITEM_HEADER_SIZE;
        let header = ItemHeader::from_word(src.read_word(header_offset)?);

        if !header.length_valid() {
            self.end = header_offset;
        } else if header.data_len().is_multiple_of(WORD_SIZE)
            && header.data_len() + self.floor <= header_offset
        {
            self.end = header_offset - header.data_len();
        } else {
            #[cfg(feature = "defmt")]
            defmt::error!("record chain corrupt at {:#06x}: {}", header_offset, header);

            #[cfg(feature = "debug-logs")]
            println!("  walk: corrupt record chain at 0x{header_offset:0>4x}: {header:?}");

            return Err(Error::Corrupted);
        }

        Ok(Some(Record {
            header,
            header_offset,
        }))
    }
}

/// Whether a committed record for `id` exists in `records`, which holds complete records
/// starting at offset 0.
pub(crate) fn contains_item(records: &mut [u8], id: u16) -> Result<bool, Error> {
    let mut walk = RecordWalk::new(records.len(), 0);
    while let Some(record) = walk.next_record(records)? {
        if record.header.is_committed() && record.header.id == id {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_record(buf: &mut [u8], at: usize, id: u16, data: &[u8]) -> usize {
        buf[at..at + data.len()].copy_from_slice(data);
        let header = ItemHeader::reserve(data.len() as u16)
            .commit_length()
            .stage_id(id)
            .commit_id();
        let header_offset = at + data.len();
        buf[header_offset..header_offset + ITEM_HEADER_SIZE].copy_from_slice(&header.to_word());
        header_offset + ITEM_HEADER_SIZE
    }

    #[test]
    fn walks_most_recent_first() {
        let mut buf = [0xFFu8; 64];
        let mut end = push_record(&mut buf, 0, 1, b"AAAA");
        end = push_record(&mut buf, end, 2, b"BBBBBBBB");
        end = push_record(&mut buf, end, 3, b"");

        let mut walk = RecordWalk::new(end, 0);
        let ids: [u16; 3] = core::array::from_fn(|_| {
            walk.next_record(&mut buf[..]).unwrap().unwrap().header.id
        });
        assert_eq!(ids, [3, 2, 1]);
        assert!(walk.next_record(&mut buf[..]).unwrap().is_none());

        assert!(contains_item(&mut buf[..end], 2).unwrap());
        assert!(!contains_item(&mut buf[..end], 4).unwrap());
    }

    #[test]
    fn torn_length_steps_one_word() {
        let mut buf = [0xFFu8; 32];
        let end = push_record(&mut buf, 0, 1, b"AAAA");
        // header of a record that was interrupted right after reserving its slot
        buf[end + 8..end + 12].copy_from_slice(&ItemHeader::reserve(8).to_word());

        let mut walk = RecordWalk::new(end + 12, 0);
        let torn = walk.next_record(&mut buf[..]).unwrap().unwrap();
        assert!(!torn.header.length_valid());
        // the two erased data words of the torn record
        assert!(walk.next_record(&mut buf[..]).unwrap().unwrap().header.is_erased());
        assert!(walk.next_record(&mut buf[..]).unwrap().unwrap().header.is_erased());
        let record = walk.next_record(&mut buf[..]).unwrap().unwrap();
        assert_eq!(record.header.id, 1);
        assert_eq!(record.data_offset(), 0);
    }

    #[test]
    fn length_below_floor_is_corruption() {
        let mut buf = [0xFFu8; 16];
        let header = ItemHeader { id: 7, len: 12 };
        buf[4..8].copy_from_slice(&header.to_word());

        let mut walk = RecordWalk::new(8, 0);
        assert_eq!(walk.next_record(&mut buf[..]).unwrap_err(), Error::Corrupted);

        let header = ItemHeader { id: 7, len: 3 };
        buf[12..16].copy_from_slice(&header.to_word());
        let mut walk = RecordWalk::new(16, 0);
        assert_eq!(walk.next_record(&mut buf[..]).unwrap_err(), Error::Corrupted);
    }
}
