//! The hierarchical bitmap that records which pages of the address space
//! are in use. Its pages are drawn from the same address space it tracks.

pub mod tree;
pub mod validate;

pub use tree::{BitmapTree, PageSource, TailAllocator};
pub use validate::{Assertions, Unchecked, Validator, validator_for};
