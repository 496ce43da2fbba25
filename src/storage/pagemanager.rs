use std::path::Path;

use tracing::{info, trace, warn};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::index::{BitmapTree, TailAllocator, Validator, validator_for};
use crate::storage::backing::{Backing, MemoryBacking, MmapBacking};
use crate::storage::meta::{self, Header};
use crate::storage::page::{IndexPage, PAGE_SIZE, PageId, PageKind, Role};
use crate::storage::store::PageStore;

/// Hands out page numbers of a single address space and takes them back.
///
/// Page 0 holds the header, the rest of the pages are shared between the
/// caller and the allocation tree. Views returned by [`PageManager::page_mut`]
/// are only valid until the next call that may grow the backing region.
pub struct PageManager<B: Backing> {
    store: PageStore<B>,
    header: Header,
    validator: &'static dyn Validator,
    sync_on_close: bool,
}

impl PageManager<MmapBacking> {
    /// Creates a fresh store in the file at `path`, replacing whatever is there.
    pub fn create(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        config.check()?;
        let path = path.as_ref();
        let backing = MmapBacking::create(path, config.initial_capacity())?;
        info!(path = %path.display(), capacity = backing.capacity(), "creating page store");
        Self::init(backing, config)
    }

    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        config.check()?;
        let path = path.as_ref();
        let backing = MmapBacking::open(path)?;
        let manager = Self::resume(backing, config)?;
        info!(
            path = %path.display(),
            depth = manager.header.index_root.depth,
            next_page = manager.header.next_page(),
            "opened page store"
        );
        Ok(manager)
    }
}

impl PageManager<MemoryBacking> {
    /// fresh store kept on the heap
    pub fn in_memory(config: &StoreConfig) -> Result<Self> {
        config.check()?;
        Self::init(MemoryBacking::new(config.initial_capacity()), config)
    }
}

impl<B: Backing> PageManager<B> {
    /// Lays out an empty store: header on page 0, root leaf on page 1 with
    /// both pages marked in use.
    pub fn init(backing: B, config: &StoreConfig) -> Result<Self> {
        let mut manager = Self {
            store: PageStore::new(backing),
            header: Header::initial(),
            validator: validator_for(config.validation),
            sync_on_close: config.sync_on_close,
        };

        meta::init_page(manager.store.page_mut(0)?);

        let root = manager.header.index_root;
        {
            let mut leaf = IndexPage::new(manager.store.page_mut(root.offset)?);
            leaf.clear();
            leaf.init(PageKind::Index, 0);
            leaf.use_slot(0);
            leaf.set_word(0, 0b11);
            manager.validator.check(root.offset, &leaf);
        }

        manager.write_header()?;
        Ok(manager)
    }

    /// Picks up a store from an existing region.
    pub fn resume(backing: B, config: &StoreConfig) -> Result<Self> {
        let mut store = PageStore::new(backing);
        let header = meta::read_header(store.page_mut(0)?)?;

        let root = header.index_root;
        {
            let page = IndexPage::new(store.page_mut(root.offset)?);
            let expected = match root.depth {
                0 => Role::Leaf,
                depth => Role::Branch { depth },
            };
            if page.kind() != PageKind::Index || page.role() != expected {
                return Err(StoreError::Corrupted(format!(
                    "page at {:#x} is not an index root of depth {}",
                    root.offset, root.depth
                )));
            }
        }

        Ok(Self {
            store,
            header,
            validator: validator_for(config.validation),
            sync_on_close: config.sync_on_close,
        })
    }

    /// Allocates the lowest free page and returns its number.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let Self {
            store,
            header,
            validator,
            ..
        } = self;

        let mut source = TailAllocator {
            store,
            next_page_offset: &mut header.next_page_offset,
        };
        let page = BitmapTree::new(*validator).allocate(&mut source, &mut header.index_root)?;

        // caller pages count toward the used address space too
        let end = (page + 1) * PAGE_SIZE as u64;
        if end > self.header.next_page_offset {
            self.header.next_page_offset = end;
        }

        self.write_header()?;
        trace!(page, next_page = self.header.next_page(), "page handed out");
        Ok(page)
    }

    /// byte offset of a freshly allocated page
    pub fn allocate_page_offset(&mut self) -> Result<u64> {
        Ok(self.allocate_page()? * PAGE_SIZE as u64)
    }

    pub fn deallocate_page(&mut self, page: PageId) -> Result<()> {
        let offset = page
            .checked_mul(PAGE_SIZE as u64)
            .ok_or(StoreError::NotAllocated { page })?;
        self.deallocate_page_offset(offset)
    }

    /// Returns the page at `offset` to the free pool.
    pub fn deallocate_page_offset(&mut self, offset: u64) -> Result<()> {
        let result = self.release(offset);
        if let Err(err) = &result {
            warn!(offset, error = %err, "deallocation rejected");
        }
        result
    }

    fn release(&mut self, offset: u64) -> Result<()> {
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(StoreError::Misaligned { offset });
        }
        let page = offset / PAGE_SIZE as u64;
        if page == 0 {
            return Err(StoreError::Reserved { page });
        }
        if offset >= self.header.next_page_offset {
            return Err(StoreError::NotAllocated { page });
        }

        let root = self.header.index_root;
        let validator = self.validator;
        // deallocation never takes pages at the end
        let mut end = self.header.next_page_offset;

        self.store.without_growth(|store| {
            let mut source = TailAllocator {
                store,
                next_page_offset: &mut end,
            };
            BitmapTree::new(validator).deallocate(&mut source, root, page)
        })
    }

    /// Mutable view of a page the caller owns. Valid until the next call that
    /// may grow the store.
    pub fn page_mut(&mut self, offset: u64) -> Result<&mut [u8; PAGE_SIZE]> {
        if offset == 0 {
            return Err(StoreError::Reserved { page: 0 });
        }
        self.store.page_mut(offset)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = self.header;
        meta::write_header(&header, self.store.page_mut(0)?);
        Ok(())
    }

    pub fn header(&self) -> Header {
        self.header
    }

    /// bytes currently held by the backing region
    pub fn capacity(&self) -> u64 {
        self.store.capacity()
    }

    pub fn store(&self) -> &PageStore<B> {
        &self.store
    }

    pub fn sync(&self) -> Result<()> {
        self.store.flush()
    }

    /// Flushes and releases the store.
    pub fn close(mut self) -> Result<()> {
        self.sync_on_close = false;
        self.sync()
    }
}

impl<B: Backing> Drop for PageManager<B> {
    fn drop(&mut self) {
        if self.sync_on_close {
            if let Err(err) = self.sync() {
                warn!(error = %err, "failed to sync page store on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::meta::TreeRoot;

    const PAGE: u64 = PAGE_SIZE as u64;

    fn memory_manager() -> PageManager<MemoryBacking> {
        PageManager::in_memory(&StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_init_layout() {
        let mut manager = memory_manager();
        assert_eq!(manager.header(), Header::initial());

        let leaf = IndexPage::new(manager.store.page_mut(PAGE).unwrap());
        assert_eq!(leaf.kind(), PageKind::Index);
        assert_eq!(leaf.depth(), 0);
        assert!(leaf.used(0));
        assert_eq!(leaf.word(0), 0b11);
    }

    #[test]
    fn test_first_allocations() {
        let mut manager = memory_manager();
        assert_eq!(manager.allocate_page().unwrap(), 2);
        assert_eq!(manager.allocate_page_offset().unwrap(), 3 * PAGE);
        assert_eq!(manager.header().next_page_offset, 4 * PAGE);
    }

    #[test]
    fn test_header_written_through() {
        let mut manager = memory_manager();
        for _ in 0..5 {
            manager.allocate_page().unwrap();
        }
        let stored = meta::read_header(manager.store.page_mut(0).unwrap()).unwrap();
        assert_eq!(stored, manager.header());
        assert_eq!(stored.next_page(), 7);
    }

    #[test]
    fn test_deallocate_rejections() {
        let mut manager = memory_manager();
        let page = manager.allocate_page().unwrap();

        assert!(matches!(
            manager.deallocate_page_offset(page * PAGE + 1),
            Err(StoreError::Misaligned { .. })
        ));
        assert!(matches!(
            manager.deallocate_page_offset(0),
            Err(StoreError::Reserved { page: 0 })
        ));
        assert!(matches!(
            manager.deallocate_page(1),
            Err(StoreError::Reserved { page: 1 })
        ));
        assert!(matches!(
            manager.deallocate_page(page + 10),
            Err(StoreError::NotAllocated { .. })
        ));

        manager.deallocate_page(page).unwrap();
        assert!(matches!(
            manager.deallocate_page(page),
            Err(StoreError::NotAllocated { page: 2 })
        ));
    }

    #[test]
    fn test_deallocate_does_not_grow() {
        let config = StoreConfig {
            initial_pages: 2,
            ..StoreConfig::default()
        };
        let mut manager = PageManager::in_memory(&config).unwrap();
        let page = manager.allocate_page().unwrap();
        let capacity = manager.capacity();

        manager.deallocate_page(page).unwrap();
        assert_eq!(manager.capacity(), capacity);
    }

    #[test]
    fn test_caller_page_access() {
        let mut manager = memory_manager();
        let offset = manager.allocate_page_offset().unwrap();
        manager.page_mut(offset).unwrap()[..4].copy_from_slice(b"data");
        assert_eq!(&manager.page_mut(offset).unwrap()[..4], b"data");
        assert!(matches!(manager.page_mut(0), Err(StoreError::Reserved { .. })));
    }

    #[test]
    fn test_resume_rejects_foreign_root() {
        let mut manager = memory_manager();
        let header = Header {
            index_root: TreeRoot {
                offset: PAGE,
                depth: 2,
            },
            next_page_offset: 2 * PAGE,
        };
        meta::write_header(&header, manager.store.page_mut(0).unwrap());

        let mut copy = MemoryBacking::new(manager.capacity());
        copy.bytes_mut().copy_from_slice(manager.store.backing().bytes());

        assert!(matches!(
            PageManager::resume(copy, &StoreConfig::default()),
            Err(StoreError::Corrupted(_))
        ));
    }

    #[test]
    fn test_mmap_create_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.db");

        {
            let mut manager = PageManager::create(&path, &StoreConfig::default()).unwrap();
            for expected in 2..10 {
                assert_eq!(manager.allocate_page().unwrap(), expected);
            }
            manager.close().unwrap();
        }

        let mut manager = PageManager::open(&path, &StoreConfig::default()).unwrap();
        assert_eq!(manager.header().next_page(), 10);
        assert_eq!(manager.allocate_page().unwrap(), 10);
    }
}
