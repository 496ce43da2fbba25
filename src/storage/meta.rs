use crate::error::{Result, StoreError};
use crate::storage::page::{PAGE_SIZE, address_space_size_for_depth};

/// location of the allocation tree root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRoot {
    pub offset: u64,
    pub depth: u32,
}

/// Record persisted at the start of page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub index_root: TreeRoot,
    /// end of the used address space; metadata pages are taken from here
    pub next_page_offset: u64,
}

// disk layout
mod disk {
    pub const OFFSET_ROOT: usize = 0;
    pub const OFFSET_DEPTH: usize = 8;
    pub const OFFSET_NEXT_PAGE: usize = 16;
    pub const OFFSET_MAGIC: usize = 24;
    pub const OFFSET_VERSION: usize = 28;

    pub const MAGIC: &[u8; 4] = b"PTRE";
    pub const VERSION: u32 = 1;
}

impl Header {
    /// header of a fresh store: root leaf on page 1, pages 0 and 1 in use
    pub fn initial() -> Self {
        Self {
            index_root: TreeRoot {
                offset: PAGE_SIZE as u64,
                depth: 0,
            },
            next_page_offset: 2 * PAGE_SIZE as u64,
        }
    }

    pub fn next_page(&self) -> u64 {
        self.next_page_offset / PAGE_SIZE as u64
    }
}

fn read_u64(buf: &[u8; PAGE_SIZE], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u32(buf: &[u8; PAGE_SIZE], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

pub fn init_page(buf: &mut [u8; PAGE_SIZE]) {
    buf.fill(0); // old garbage could exist before here
    buf[disk::OFFSET_MAGIC..disk::OFFSET_MAGIC + 4].copy_from_slice(disk::MAGIC);
    buf[disk::OFFSET_VERSION..disk::OFFSET_VERSION + 4].copy_from_slice(&disk::VERSION.to_le_bytes());
}

pub fn read_header(buf: &[u8; PAGE_SIZE]) -> Result<Header> {
    if &buf[disk::OFFSET_MAGIC..disk::OFFSET_MAGIC + 4] != disk::MAGIC {
        return Err(StoreError::Corrupted(
            "invalid magic number in header page".to_string(),
        ));
    }
    let version = read_u32(buf, disk::OFFSET_VERSION);
    if version != disk::VERSION {
        return Err(StoreError::Corrupted(format!(
            "unsupported header page version {}",
            version
        )));
    }

    let header = Header {
        index_root: TreeRoot {
            offset: read_u64(buf, disk::OFFSET_ROOT),
            depth: read_u32(buf, disk::OFFSET_DEPTH),
        },
        next_page_offset: read_u64(buf, disk::OFFSET_NEXT_PAGE),
    };

    let page_size = PAGE_SIZE as u64;
    let root = header.index_root;
    if root.offset == 0 || root.offset % page_size != 0 || header.next_page_offset % page_size != 0 {
        return Err(StoreError::Corrupted(
            "header offsets are not page-aligned".to_string(),
        ));
    }
    if root.offset >= header.next_page_offset {
        return Err(StoreError::Corrupted(
            "index root lies beyond the used address space".to_string(),
        ));
    }
    if header.next_page_offset > address_space_size_for_depth(root.depth) {
        return Err(StoreError::Corrupted(format!(
            "used address space exceeds what an index of depth {} describes",
            root.depth
        )));
    }

    Ok(header)
}

pub fn write_header(header: &Header, buf: &mut [u8; PAGE_SIZE]) {
    buf[disk::OFFSET_ROOT..disk::OFFSET_ROOT + 8].copy_from_slice(&header.index_root.offset.to_le_bytes());
    buf[disk::OFFSET_DEPTH..disk::OFFSET_DEPTH + 4].copy_from_slice(&header.index_root.depth.to_le_bytes());
    buf[disk::OFFSET_DEPTH + 4..disk::OFFSET_NEXT_PAGE].fill(0);
    buf[disk::OFFSET_NEXT_PAGE..disk::OFFSET_NEXT_PAGE + 8].copy_from_slice(&header.next_page_offset.to_le_bytes());
}
