use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::storage::page::PAGE_SIZE;

/// A page was requested beyond the end of a backing region. This is a
/// signal for the owner to grow the region, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfRange {
    pub offset: u64,
    pub capacity: u64,
}

/// A bounded, contiguous byte region holding whole pages.
pub trait Backing {
    /// size of the region in bytes
    fn capacity(&self) -> u64;

    fn bytes(&self) -> &[u8];

    fn bytes_mut(&mut self) -> &mut [u8];

    /// Replaces the region with one of at least `min_capacity` bytes,
    /// preserving existing content. Invalidates every slice handed out before.
    fn grow(&mut self, min_capacity: u64) -> io::Result<()>;

    fn flush(&self) -> io::Result<()>;

    /// byte range of the page at `offset`
    fn locate(&self, offset: u64) -> Result<Range<usize>, OutOfRange> {
        let capacity = self.capacity();
        match offset.checked_add(PAGE_SIZE as u64) {
            Some(end) if end <= capacity => {
                let start = offset as usize;
                Ok(start..start + PAGE_SIZE)
            }
            _ => Err(OutOfRange { offset, capacity }),
        }
    }
}

/// pages kept in a memory-mapped file
pub struct MmapBacking {
    file: File,
    path: PathBuf,
    mmap: MmapMut,
}

impl MmapBacking {
    /// Creates (or truncates) the file at `path` and maps `capacity` bytes.
    pub fn create(path: impl AsRef<Path>, capacity: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.set_len(capacity)?;
        let mmap = Self::map(&file)?;

        Ok(Self { file, path, mmap })
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let file_len = file.metadata()?.len();

        if file_len % PAGE_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "page file is not page-aligned",
            ));
        }
        if file_len < 2 * PAGE_SIZE as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "page file is too short to hold a header and an index page",
            ));
        }

        let mmap = Self::map(&file)?;

        Ok(Self { file, path, mmap })
    }

    fn map(file: &File) -> io::Result<MmapMut> {
        // SAFETY: the file is owned by this backing and only resized through
        // `grow`, which replaces the mapping right after.
        unsafe { MmapOptions::new().map_mut(file) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backing for MmapBacking {
    fn capacity(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    fn grow(&mut self, min_capacity: u64) -> io::Result<()> {
        if min_capacity <= self.capacity() {
            return Ok(());
        }
        self.mmap.flush()?;
        self.file.set_len(min_capacity)?;
        self.mmap = Self::map(&self.file)?;
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.mmap.flush()?;
        self.file.sync_all()
    }
}

/// pages kept in a heap buffer, for tests and scratch stores
#[derive(Debug, Default)]
pub struct MemoryBacking {
    data: Vec<u8>,
}

impl MemoryBacking {
    pub fn new(capacity: u64) -> Self {
        Self {
            data: vec![0u8; capacity as usize],
        }
    }
}

impl Backing for MemoryBacking {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn grow(&mut self, min_capacity: u64) -> io::Result<()> {
        let new_len = usize::try_from(min_capacity).map_err(|_| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                "capacity exceeds platform address space",
            )
        })?;
        if new_len > self.data.len() {
            self.data.resize(new_len, 0);
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}
