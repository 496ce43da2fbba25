pub mod backing;
pub mod bits;
pub mod meta;
pub mod page;
pub mod pagemanager;
pub mod store;

pub use backing::{Backing, MemoryBacking, MmapBacking};
pub use meta::{Header, TreeRoot};
pub use page::{IndexPage, PAGE_SIZE, PageId, PageKind};
pub use pagemanager::PageManager;
pub use store::PageStore;
