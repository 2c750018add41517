#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use page_nvs::platform::{CacheController, CacheState, VoltageMonitor};
use std::cell::Cell;
use std::rc::Rc;

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;
pub const PAGE_HEADER_SIZE: usize = 4;
pub const ITEM_HEADER_SIZE: usize = 4;

pub const ACTIVE: [u8; 4] = 0x0010_0000u32.to_le_bytes();
pub const XFER: [u8; 4] = [0; 4];

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    /// Number of erases and writes that succeed, every one after that fails
    pub fail_after_mutation: usize,
    pub mutations: usize,
    /// Reported to the store through the voltage monitor
    pub low_voltage: bool,
    /// Writes report success but leave the flash untouched
    pub drop_writes: bool,
    /// Shared with the test, every read fails while set
    pub fail_reads: Rc<Cell<bool>>,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * pages],
            fail_after_mutation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(pages: usize, fail_after_mutation: usize) -> Self {
        Self {
            fail_after_mutation,
            ..Self::new(pages)
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Simulates a power cycle after an injected fault.
    pub fn disable_faults(&mut self) {
        self.fail_after_mutation = usize::MAX;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    /// All operations except reads.
    pub fn mutating_operations(&self) -> Vec<Operation> {
        self.operations
            .iter()
            .filter(|op| !matches!(op, Operation::Read { .. }))
            .cloned()
            .collect()
    }

    pub fn word(&self, offset: usize) -> [u8; WORD_SIZE] {
        self.buf[offset..offset + WORD_SIZE].try_into().unwrap()
    }

    pub fn dump_operations(&self) {
        println!("Operations:");
        for op in &self.operations {
            println!("  {:?}", op);
        }
    }

    fn inject_fault(&mut self) -> Result<(), FlashError> {
        if self.mutations >= self.fail_after_mutation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.mutations += 1;
        Ok(())
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        println!(
            "    flash: read:  0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        if self.fail_reads.get() {
            println!("    flash: READ FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(!self.low_voltage, "erase under low voltage");

        println!(
            "    flash: erase: {from:04X} - {to:04X} #{:>2}",
            self.operations.len()
        );
        self.inject_fault()?;

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());
        assert!(!self.low_voltage, "write under low voltage");

        println!(
            "    flash: write: 0x{offset:04X}[0x{:04X}] #{:>2}",
            bytes.len(),
            self.operations.len()
        );
        self.inject_fault()?;

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        if self.drop_writes {
            return Ok(());
        }

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            let current = self.buf[offset + i];
            // NOR flash can only flip bits from 1 to 0
            assert_eq!(
                current & val,
                val,
                "write at 0x{:04X} would set bits",
                offset + i
            );
            self.buf[offset + i] = current & val;
        }
        Ok(())
    }
}

impl VoltageMonitor for Flash {
    fn voltage_ok(&mut self) -> bool {
        !self.low_voltage
    }
}

/// Cache whose RAM is lent to the store during compaction.
pub struct Cache {
    pub scratch: Vec<u8>,
    pub enabled: bool,
    pub disables: usize,
}

impl Cache {
    pub fn new(size: usize) -> Self {
        Self {
            scratch: vec![0u8; size],
            enabled: true,
            disables: 0,
        }
    }
}

impl CacheController for Cache {
    fn disable(&mut self) -> CacheState {
        self.disables += 1;
        let previous = if self.enabled {
            CacheState::Enabled
        } else {
            CacheState::Disabled
        };
        self.enabled = false;
        previous
    }

    fn enable(&mut self) {
        assert!(!self.enabled, "cache enabled twice");
        self.enabled = true;
    }

    fn scratch(&mut self) -> &mut [u8] {
        assert!(!self.enabled, "scratch accessed while the cache is enabled");
        &mut self.scratch
    }
}
