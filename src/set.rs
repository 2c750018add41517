use crate::error::Error;
use crate::platform::{CacheController, Platform};
use crate::{ItemKey, Nvs};

pub trait Set<T> {
    fn set(&mut self, key: ItemKey, value: T) -> Result<(), Error>;
}

impl<T, S: Set<T>> Set<T> for &mut S {
    fn set(&mut self, key: ItemKey, value: T) -> Result<(), Error> {
        (*self).set(key, value)
    }
}

impl<T: Platform, C: CacheController> Set<bool> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: bool) -> Result<(), Error> {
        self.write(key, &[value as u8])
    }
}

impl<T: Platform, C: CacheController> Set<u8> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: u8) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<u16> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: u16) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<u32> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: u32) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<u64> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: u64) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<i8> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: i8) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<i16> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: i16) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<i32> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: i32) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController> Set<i64> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: i64) -> Result<(), Error> {
        self.write(key, &value.to_le_bytes())
    }
}

impl<T: Platform, C: CacheController, const N: usize> Set<[u8; N]> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: [u8; N]) -> Result<(), Error> {
        self.write(key, &value)
    }
}

impl<T: Platform, C: CacheController> Set<&[u8]> for Nvs<T, C> {
    fn set(&mut self, key: ItemKey, value: &[u8]) -> Result<(), Error> {
        self.write(key, value)
    }
}
