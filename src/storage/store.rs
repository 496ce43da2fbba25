use tracing::debug;

use crate::error::{Result, StoreError};
use crate::storage::backing::{Backing, OutOfRange};
use crate::storage::page::PAGE_SIZE;

/// Owns a backing region and hands out page views by offset, growing the
/// region when a page past its end is requested.
pub struct PageStore<B: Backing> {
    backing: B,
    growth_allowed: bool,
    grow_count: u64,
}

impl<B: Backing> PageStore<B> {
    pub fn new(backing: B) -> Self {
        Self {
            backing,
            growth_allowed: true,
            grow_count: 0,
        }
    }

    /// Mutable view of the page at `offset`.
    ///
    /// If the offset lies past the end of the region, the region is grown
    /// to at least twice its size and the access is retried once.
    pub fn page_mut(&mut self, offset: u64) -> Result<&mut [u8; PAGE_SIZE]> {
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::Misaligned { offset });
        }

        let range = match self.backing.locate(offset) {
            Ok(range) => range,
            Err(out_of_range) => {
                self.grow(out_of_range)?;
                self.backing
                    .locate(offset)
                    .map_err(|OutOfRange { offset, capacity }| StoreError::OutOfRange { offset, capacity })?
            }
        };

        let bytes = &mut self.backing.bytes_mut()[range];
        <&mut [u8; PAGE_SIZE]>::try_from(bytes).map_err(|_| {
            StoreError::Corrupted(format!("page at {:#x} is not {} bytes long", offset, PAGE_SIZE))
        })
    }

    fn grow(&mut self, out_of_range: OutOfRange) -> Result<()> {
        let OutOfRange { offset, capacity } = out_of_range;
        if !self.growth_allowed {
            return Err(StoreError::UnexpectedGrowth { offset });
        }

        let needed = offset.saturating_add(PAGE_SIZE as u64);
        let mut target = capacity.max(PAGE_SIZE as u64).saturating_mul(2);
        while target < needed {
            target = target.saturating_mul(2);
        }

        debug!(offset, from = capacity, to = target, "growing backing region");
        self.backing.grow(target)?;
        self.grow_count += 1;
        Ok(())
    }

    /// Runs `f` with growth forbidden; any attempt to grow fails with
    /// `UnexpectedGrowth`.
    pub fn without_growth<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let previous = std::mem::replace(&mut self.growth_allowed, false);
        let result = f(self);
        self.growth_allowed = previous;
        result
    }

    pub fn capacity(&self) -> u64 {
        self.backing.capacity()
    }

    /// number of times the region has been grown since this store was opened
    pub fn grow_count(&self) -> u64 {
        self.grow_count
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn flush(&self) -> Result<()> {
        self.backing.flush()?;
        Ok(())
    }
}
