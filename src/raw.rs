use crate::platform::{AlignedOps, Platform};
use core::fmt::{Debug, Formatter};
#[cfg(feature = "defmt")]
use defmt::trace;

/// The flash word is the unit of every header and the alignment of every record.
pub(crate) const WORD_SIZE: usize = 4;
pub(crate) const PAGE_HEADER_SIZE: usize = WORD_SIZE;
pub(crate) const ITEM_HEADER_SIZE: usize = WORD_SIZE;
pub(crate) const ERASED_WORD: [u8; WORD_SIZE] = [0xFF; WORD_SIZE];

/// Set in the length field of an item header until the length is trustworthy.
pub(crate) const INVALID_LEN_MARK: u16 = 0x8000;
/// Set in the id field of an item header until the record is committed.
pub(crate) const INVALID_ID_MARK: u16 = 0x8000;
/// Item id 0 is never handed out.
pub(crate) const ITEM_NULL: u16 = 0;
pub(crate) const MAX_ITEM_ID: u16 = INVALID_ID_MARK - 1;

// Compile-time assertion that both headers fit a single flash word
const _: () = assert!(
    size_of::<u32>() == PAGE_HEADER_SIZE && 2 * size_of::<u16>() == ITEM_HEADER_SIZE,
    "Headers must be exactly one flash word"
);

/// The single bit that is cleared to go from ACTIVE to XFER.
const ACTIVE_XFER_DIFF: u32 = 0x0010_0000;

#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PageState {
    // All bits set, default state after flash erase. Page has not been initialized yet.
    Erased = u32::MAX,

    // Page holds records and accepts writes.
    Active = ACTIVE_XFER_DIFF,

    // Live records are being compacted. A page found in this state on startup still holds all
    // of its records and the compaction is replayed.
    Xfer = ACTIVE_XFER_DIFF ^ ACTIVE_XFER_DIFF,
}

impl PageState {
    pub(crate) fn from_word(word: [u8; WORD_SIZE]) -> Option<Self> {
        PageState::from_repr(u32::from_le_bytes(word))
    }

    pub(crate) fn to_word(self) -> [u8; WORD_SIZE] {
        (self as u32).to_le_bytes()
    }
}

/// Item header, stored directly above the data of a record.
///
/// A record is only valid once both marks are cleared. The header is programmed four times in
/// place, each time clearing more bits, which NOR flash allows without an erase.
#[derive(Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct ItemHeader {
    pub(crate) id: u16,
    pub(crate) len: u16,
}

impl ItemHeader {
    pub(crate) fn from_word(word: [u8; WORD_SIZE]) -> Self {
        let [a, b, c, d] = word;
        Self {
            id: u16::from_le_bytes([a, b]),
            len: u16::from_le_bytes([c, d]),
        }
    }

    pub(crate) fn to_word(self) -> [u8; WORD_SIZE] {
        let [a, b] = self.id.to_le_bytes();
        let [c, d] = self.len.to_le_bytes();
        [a, b, c, d]
    }

    /// Phase 1: claims the slot, neither length nor id are valid yet.
    pub(crate) fn reserve(aligned_len: u16) -> Self {
        Self {
            id: u16::MAX,
            len: aligned_len | INVALID_LEN_MARK,
        }
    }

    /// Phase 2: the length can be used to skip the record.
    pub(crate) fn commit_length(self) -> Self {
        Self {
            len: self.len & !INVALID_LEN_MARK,
            ..self
        }
    }

    /// Phase 3: the data is in place, the id is written but still marked invalid.
    pub(crate) fn stage_id(self, id: u16) -> Self {
        Self {
            id: id | INVALID_ID_MARK,
            ..self
        }
    }

    /// Phase 4: the record is valid.
    pub(crate) fn commit_id(self) -> Self {
        Self {
            id: self.id & !INVALID_ID_MARK,
            ..self
        }
    }

    pub(crate) fn is_erased(&self) -> bool {
        self.to_word() == ERASED_WORD
    }

    pub(crate) fn length_valid(&self) -> bool {
        self.len & INVALID_LEN_MARK == 0
    }

    pub(crate) fn data_len(&self) -> usize {
        (self.len & !INVALID_LEN_MARK) as usize
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.length_valid() && self.id & INVALID_ID_MARK == 0
    }

    /// Null headers carry no item, either because the id was never written or because it is the
    /// reserved null id.
    pub(crate) fn is_null(&self) -> bool {
        self.id == u16::MAX || self.id == ITEM_NULL
    }
}

impl Debug for ItemHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let id = self.id;
        let len = self.len;
        if self.is_committed() {
            f.write_fmt(format_args!("ItemHeader {{ id: {id:>5}, len: {len:>4} }}"))
        } else {
            f.write_fmt(format_args!(
                "ItemHeader {{ id: 0x{id:0>4x}, len: 0x{len:0>4x}, uncommitted }}"
            ))
        }
    }
}

/// Writes `bytes` at `offset`. A trailing partial write unit is padded with `0xFF`, which leaves
/// the padding erased.
#[inline(always)]
pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        hal.write(offset, bytes)
    } else {
        let pivot = T::align_write_floor(bytes.len());
        let header = &bytes[..pivot];
        let trailer = &bytes[pivot..];
        if !header.is_empty() {
            hal.write(offset, header)?;
        }

        // no need to write the trailer if remaining data is all ones - this the default state of the flash
        if trailer.iter().any(|&e| e != 0xFF) {
            // WRITE_SIZE never exceeds a flash word, see Nvs::new()
            let mut buf = ERASED_WORD;
            buf[..trailer.len()].copy_from_slice(trailer);
            hal.write(offset + (pivot as u32), &buf[..T::WRITE_SIZE])?
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_states_only_clear_bits() {
        let erased = PageState::Erased as u32;
        let active = PageState::Active as u32;
        let xfer = PageState::Xfer as u32;

        assert_eq!(erased & active, active);
        assert_eq!(active & xfer, xfer);
        assert_eq!((active ^ xfer).count_ones(), 1);
        assert_eq!(PageState::from_word([0x00, 0x00, 0x10, 0x00]), Some(PageState::Active));
        assert_eq!(PageState::from_word([0x12, 0x34, 0x56, 0x78]), None);
    }

    #[test]
    fn commit_phases_only_clear_bits() {
        let phases = [
            ItemHeader::reserve(12),
            ItemHeader::reserve(12).commit_length(),
            ItemHeader::reserve(12).commit_length().stage_id(42),
            ItemHeader::reserve(12).commit_length().stage_id(42).commit_id(),
        ];

        let mut previous = u32::from_le_bytes(ERASED_WORD);
        for phase in phases {
            let word = u32::from_le_bytes(phase.to_word());
            assert_eq!(previous & word, word, "{phase:?} sets a bit");
            previous = word;
        }

        let committed = phases[3];
        assert!(committed.is_committed());
        assert_eq!(committed.id, 42);
        assert_eq!(committed.data_len(), 12);
        assert!(phases[..3].iter().all(|phase| !phase.is_committed()));
        assert!(!phases[0].length_valid());
        assert!(phases[1].length_valid());
    }

    #[test]
    fn header_layout_is_little_endian() {
        let header = ItemHeader { id: 0x0102, len: 0x0304 };
        assert_eq!(header.to_word(), [0x02, 0x01, 0x04, 0x03]);
        assert_eq!(ItemHeader::from_word([0x02, 0x01, 0x04, 0x03]), header);
        assert!(ItemHeader::from_word(ERASED_WORD).is_erased());
        assert!(ItemHeader::from_word(ERASED_WORD).is_null());
    }
}
