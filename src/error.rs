use thiserror::Error;

/// Errors that can occur during store operations. Marked as non-exhaustive to allow for future
/// additions without breaking the API. A caller would usually only need to handle `NotFound`
/// and check [`Error::is_fatal`] for everything else.
#[derive(Error, Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The page offset has to be aligned to the erase size of the flash and lie within its capacity
    #[error("invalid page offset")]
    InvalidPageOffset,

    /// The flash word (4 bytes) has to be a multiple of the read and write size and the
    /// erase size has to be between 16 bytes and 64 KiB
    #[error("unsupported flash geometry")]
    UnsupportedGeometry,

    /// Erasing, programming or verifying the flash failed. Further writes are refused until
    /// the store is re-initialized.
    #[error("internal flash error")]
    FlashError,

    /// The voltage monitor reported a brown-out risk, nothing was erased or programmed.
    #[error("supply voltage too low")]
    LowVoltage,

    /// A previous compaction failed and left no usable write position. Call `Nvs::init()`.
    #[error("store not ready")]
    NotReady,

    /// Item ids have to be within `1..=0x7FFF`. Zero is the null id and the top bit is used
    /// as the commit flag on flash.
    #[error("invalid item id {0:#06x}")]
    InvalidItemId(u16),

    /// Items are limited to a quarter of the page size
    #[error("value too long")]
    ValueTooLong,

    /// The requested range does not lie within the stored item
    #[error("invalid length")]
    InvalidLength,

    /// Compaction thresholds are percentages and have to be in `0..=100`
    #[error("invalid threshold {0}")]
    InvalidThreshold(u8),

    /// No committed record for the item exists. Either nothing was written yet or the last
    /// write was interrupted before it was committed.
    #[error("item not found")]
    NotFound,

    /// The record chain contains a length that points outside of the page. The store refuses
    /// to guess and leaves the page untouched.
    #[error("corrupted record chain")]
    Corrupted,

    /// The page is full and compaction doesn't help.
    #[error("flash full")]
    FlashFull,

    /// The cache RAM is too small to hold all live records during compaction.
    #[error("scratch region too small")]
    ScratchTooSmall,
}

impl Error {
    /// Fatal errors are hardware failures during erase, program or verify. They are sticky
    /// until the store is re-initialized.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FlashError)
    }
}
