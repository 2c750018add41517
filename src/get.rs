//! The `Get<T>` trait and its implementation in this module allows providing a single generic,
//! overloaded function `get<T>()` for all supported types of the driver.

use crate::error::Error;
use crate::platform::{CacheController, Platform};
use crate::{ItemKey, Nvs};
use alloc::vec;
use alloc::vec::Vec;

pub trait Get<T> {
    fn get(&mut self, key: ItemKey) -> Result<T, Error>;
}

impl<T, G: Get<T>> Get<T> for &mut G {
    fn get(&mut self, key: ItemKey) -> Result<T, Error> {
        (*self).get(key)
    }
}

impl<T: Platform, C: CacheController> Nvs<T, C> {
    fn get_array<const N: usize>(&mut self, key: ItemKey) -> Result<[u8; N], Error> {
        let mut buf = [0u8; N];
        self.read(key, 0, &mut buf)?;
        Ok(buf)
    }
}

impl<T: Platform, C: CacheController> Get<bool> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<bool, Error> {
        let [value] = self.get_array(key)?;
        Ok(value != 0)
    }
}

impl<T: Platform, C: CacheController> Get<u8> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<u8, Error> {
        Ok(u8::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<u16> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<u32> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<u64> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<u64, Error> {
        Ok(u64::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<i8> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<i8, Error> {
        Ok(i8::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<i16> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<i16, Error> {
        Ok(i16::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<i32> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<i32, Error> {
        Ok(i32::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController> Get<i64> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<i64, Error> {
        Ok(i64::from_le_bytes(self.get_array(key)?))
    }
}

impl<T: Platform, C: CacheController, const N: usize> Get<[u8; N]> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<[u8; N], Error> {
        self.get_array(key)
    }
}

/// The whole stored value, including the padding up to the next flash word.
impl<T: Platform, C: CacheController> Get<Vec<u8>> for Nvs<T, C> {
    fn get(&mut self, key: ItemKey) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; self.stored_len(key)?];
        self.read(key, 0, &mut buf)?;
        Ok(buf)
    }
}
