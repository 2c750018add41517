use embedded_storage::nor_flash::NorFlash;

/// Everything the store needs from the flash side. See README.md for an example implementation.
pub trait Platform: VoltageMonitor + NorFlash {}

impl<T: VoltageMonitor + NorFlash> Platform for T {}

/// Gates erase and program operations under brown-out risk.
///
/// The default implementation reports a healthy supply, which is what targets without a
/// power monitor want: `impl VoltageMonitor for MyFlash {}`.
pub trait VoltageMonitor {
    fn voltage_ok(&mut self) -> bool {
        true
    }
}

impl<T: VoltageMonitor> VoltageMonitor for &mut T {
    fn voltage_ok(&mut self) -> bool {
        T::voltage_ok(self)
    }
}

/// State of the cache before it was disabled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CacheState {
    Enabled,
    Disabled,
}

/// Controls a cache whose backing RAM doubles as scratch space during compaction.
///
/// Flash is erased and programmed with the cache disabled, and the scratch region is only
/// handed out while it is disabled, otherwise stale cache lines could be served as current data.
pub trait CacheController {
    /// Invalidates and disables the cache. Returns the state it was in.
    fn disable(&mut self) -> CacheState;

    /// Re-enables the cache. Only called if [`CacheController::disable`] returned
    /// [`CacheState::Enabled`].
    fn enable(&mut self);

    /// The RAM backing the cache. Only accessed between `disable()` and `enable()`.
    fn scratch(&mut self) -> &mut [u8];
}

impl<T: CacheController> CacheController for &mut T {
    fn disable(&mut self) -> CacheState {
        T::disable(self)
    }

    fn enable(&mut self) {
        T::enable(self)
    }

    fn scratch(&mut self) -> &mut [u8] {
        T::scratch(self)
    }
}

/// Plain RAM scratch region for targets without a cache that could lend its memory.
pub struct RamScratch<const N: usize> {
    buf: [u8; N],
}

impl<const N: usize> RamScratch<N> {
    pub const fn new() -> Self {
        Self { buf: [0xFF; N] }
    }
}

impl<const N: usize> Default for RamScratch<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CacheController for RamScratch<N> {
    fn disable(&mut self) -> CacheState {
        // there is no cache, so there is nothing to turn back on either
        CacheState::Disabled
    }

    fn enable(&mut self) {}

    fn scratch(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

pub trait AlignedOps: Platform {
    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
pub(crate) const fn align_ceil(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
pub(crate) const fn align_floor(size: usize, alignment: usize) -> usize {
    if alignment.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::VoltageMonitor;

    // The ESP chips have no brown-out gate for the flash driver, writes are always allowed.
    impl VoltageMonitor for FlashStorage<'_> {}
}
