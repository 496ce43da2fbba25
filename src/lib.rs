//! # pagetree - a self-hosting page allocator
//!
//! Hands out fixed-size pages of one flat address space (a memory-mapped
//! file or a heap buffer) and takes them back. Which pages are in use is
//! recorded in a tree of bitmap pages that lives in the same address space.
//!
//! ```text
//!   page 0        page 1        page 2 ..
//!   ┌────────┬──────────────┬──────────────────────────────┐
//!   │ header │  root index  │  caller pages, and further   │
//!   │        │  page (leaf) │  index pages as the tree     │
//!   │        │              │  grows                       │
//!   └────────┴──────────────┴──────────────────────────────┘
//! ```
//!
//! Every index page holds 496 slots plus a `used` and a `full` bit per
//! slot. At a leaf each slot is a 64-bit word with one bit per page. At a
//! branch each slot points at a child index page. The lowest free page is
//! found by following the first non-full slot from the root down.
//!
//! When the root is full a new root is put above it, taken from the end of
//! the used address space. Index pages created this way are marked in the
//! leaf the same allocation ends up in, so page numbers are consumed densely.
//!
//! ## Crate Structure
//!
//! - [`storage`]: pages, the header, backing regions and the [`PageManager`]
//! - [`index`]: the allocation tree itself
//! - [`config`]: [`StoreConfig`]
//! - [`error`]: [`StoreError`]
//!
//! ## Example
//!
//! ```
//! use pagetree::{PageManager, StoreConfig};
//!
//! let mut pages = PageManager::in_memory(&StoreConfig::default()).unwrap();
//! let first = pages.allocate_page().unwrap();
//! assert_eq!(first, 2);
//!
//! pages.deallocate_page(first).unwrap();
//! assert_eq!(pages.allocate_page().unwrap(), first);
//! ```

pub mod config;
pub mod error;
pub mod index;
pub mod storage;

pub use config::{StoreConfig, Validation};
pub use error::{Result, StoreError};
pub use storage::page::PAGE_SIZE;
pub use storage::pagemanager::PageManager;
