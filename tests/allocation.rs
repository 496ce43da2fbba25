use std::collections::BTreeSet;
use std::path::Path;

use pagetree::storage::page::{IndexPage, PageKind, space_size_for_depth};
use pagetree::storage::{MmapBacking, PageManager};
use pagetree::{PAGE_SIZE, StoreConfig, StoreError, Validation};

const PAGE: u64 = PAGE_SIZE as u64;

fn checked_config() -> StoreConfig {
    StoreConfig {
        validation: Validation::Assert,
        ..StoreConfig::default()
    }
}

fn create(path: &Path) -> PageManager<MmapBacking> {
    PageManager::create(path, &checked_config()).unwrap()
}

#[test]
fn test_dense_numbering() {
    let mut pages = PageManager::in_memory(&checked_config()).unwrap();

    for expected in 2..2000 {
        assert_eq!(pages.allocate_page().unwrap(), expected);
    }
    assert_eq!(pages.header().next_page(), 2000);
    assert_eq!(pages.header().index_root.depth, 0);
}

#[test]
fn test_growth_to_second_level() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grow.db");
    let mut pages = create(&path);

    let leaf_space = space_size_for_depth(0);
    assert_eq!(leaf_space, 31744);

    let mut seen = BTreeSet::new();
    for expected in 2..leaf_space {
        let page = pages.allocate_page().unwrap();
        assert_eq!(page, expected);
        seen.insert(page);
    }
    assert_eq!(pages.header().index_root.depth, 0);
    assert_eq!(pages.header().next_page_offset, leaf_space * PAGE);

    // root and first leaf of the new level take 31744 and 31745
    let page = pages.allocate_page().unwrap();
    assert_eq!(page, 31746);
    seen.insert(page);

    let header = pages.header();
    assert_eq!(header.index_root.depth, 1);
    assert_eq!(header.index_root.offset, 31744 * PAGE);
    assert_eq!(header.next_page(), 31747);

    {
        let root = IndexPage::new(pages.page_mut(header.index_root.offset).unwrap());
        assert_eq!(root.kind(), PageKind::Index);
        assert_eq!(root.depth(), 1);
        assert!(root.full(0));
        assert_eq!(root.word(0), PAGE);
        assert_eq!(root.word(1), 31745 * PAGE);
    }

    // every page number so far is accounted for exactly once
    seen.extend([0, 1, 31744, 31745]);
    assert_eq!(seen.len() as u64, 31747);
    assert_eq!(seen.iter().next_back(), Some(&31746));

    assert_eq!(pages.allocate_page().unwrap(), 31747);

    pages.close().unwrap();

    let mut pages = PageManager::open(&path, &checked_config()).unwrap();
    assert_eq!(pages.header().index_root.depth, 1);
    assert_eq!(pages.allocate_page().unwrap(), 31748);

    // the first leaf is full and its branch slot stays full after a free,
    // so the freed page is not handed out again
    pages.deallocate_page(100).unwrap();
    assert!(matches!(
        pages.deallocate_page(100),
        Err(StoreError::NotAllocated { page: 100 })
    ));
    assert_eq!(pages.allocate_page().unwrap(), 31749);

    // index pages stay out of the caller's reach, old root included
    for page in [1, 31744, 31745] {
        let err = pages.deallocate_page(page).unwrap_err();
        assert!(matches!(err, StoreError::Reserved { page: p } if p == page));
        assert!(err.is_protocol_violation());
    }
    assert_eq!(pages.allocate_page().unwrap(), 31750);
}

#[test]
fn test_reopen_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reopen.db");

    {
        let mut pages = create(&path);
        for _ in 0..20 {
            pages.allocate_page().unwrap();
        }
        pages.deallocate_page(7).unwrap();
        pages.close().unwrap();
    }

    let mut pages = PageManager::open(&path, &checked_config()).unwrap();
    assert_eq!(pages.header().next_page(), 22);
    assert_eq!(pages.allocate_page().unwrap(), 7);
    assert_eq!(pages.allocate_page().unwrap(), 22);
}

#[test]
fn test_open_rejects_foreign_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.db");
    std::fs::write(&path, vec![0xabu8; 4 * PAGE_SIZE]).unwrap();

    assert!(matches!(
        PageManager::open(&path, &checked_config()),
        Err(StoreError::Corrupted(_))
    ));
}

#[test]
fn test_deallocation_errors() {
    let mut pages = PageManager::in_memory(&checked_config()).unwrap();
    let offset = pages.allocate_page_offset().unwrap();

    let err = pages.deallocate_page_offset(offset + 8).unwrap_err();
    assert!(matches!(err, StoreError::Misaligned { .. }));
    assert!(err.is_protocol_violation());

    assert!(matches!(
        pages.deallocate_page_offset(0),
        Err(StoreError::Reserved { page: 0 })
    ));
    assert!(matches!(
        pages.deallocate_page(500),
        Err(StoreError::NotAllocated { page: 500 })
    ));
    assert!(matches!(
        pages.deallocate_page(u64::MAX),
        Err(StoreError::NotAllocated { .. })
    ));

    pages.deallocate_page_offset(offset).unwrap();
    let err = pages.deallocate_page_offset(offset).unwrap_err();
    assert!(matches!(err, StoreError::NotAllocated { page: 2 }));
    assert!(!err.is_internal());
}

#[test]
fn test_freed_pages_reused_lowest_first() {
    let mut pages = PageManager::in_memory(&checked_config()).unwrap();
    for _ in 2..300 {
        pages.allocate_page().unwrap();
    }

    for page in [250, 64, 130, 3] {
        pages.deallocate_page(page).unwrap();
    }

    assert_eq!(pages.allocate_page().unwrap(), 3);
    assert_eq!(pages.allocate_page().unwrap(), 64);
    assert_eq!(pages.allocate_page().unwrap(), 130);
    assert_eq!(pages.allocate_page().unwrap(), 250);
    assert_eq!(pages.allocate_page().unwrap(), 300);
}

#[test]
fn test_store_grows_on_page_access() {
    let config = StoreConfig {
        initial_pages: 2,
        ..checked_config()
    };
    let mut pages = PageManager::in_memory(&config).unwrap();
    assert_eq!(pages.capacity(), 2 * PAGE);

    let offsets: Vec<u64> = (0..10)
        .map(|_| pages.allocate_page_offset().unwrap())
        .collect();
    let last = offsets[9];
    assert_eq!(last, 11 * PAGE);
    pages.page_mut(last).unwrap()[0] = 1;

    assert_eq!(pages.capacity(), 16 * PAGE);
    assert_eq!(pages.store().grow_count(), 1);
    assert_eq!(pages.page_mut(last).unwrap()[0], 1);
}
