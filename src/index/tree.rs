use tracing::{info, trace};

use crate::error::{Result, StoreError};
use crate::index::validate::Validator;
use crate::storage::backing::Backing;
use crate::storage::bits::{self, WORD_BITS};
use crate::storage::meta::TreeRoot;
use crate::storage::page::{
    IndexPage, PAGE_SIZE, PageId, PageKind, address_space_size_for_depth, space_size_for_depth,
};
use crate::storage::store::PageStore;

/// Where the tree reads its pages from and takes new index pages from.
pub trait PageSource {
    fn page_mut(&mut self, offset: u64) -> Result<&mut [u8; PAGE_SIZE]>;

    /// Hands out the page right after the end of the used address space.
    /// Never searches the tree.
    fn allocate_at_end(&mut self) -> Result<u64>;
}

/// Page source over a store whose used address space ends at
/// `next_page_offset`.
pub struct TailAllocator<'a, B: Backing> {
    pub store: &'a mut PageStore<B>,
    pub next_page_offset: &'a mut u64,
}

impl<B: Backing> PageSource for TailAllocator<'_, B> {
    fn page_mut(&mut self, offset: u64) -> Result<&mut [u8; PAGE_SIZE]> {
        self.store.page_mut(offset)
    }

    fn allocate_at_end(&mut self) -> Result<u64> {
        let offset = *self.next_page_offset;
        *self.next_page_offset += PAGE_SIZE as u64;
        Ok(offset)
    }
}

/// Outcome of allocating within one subtree.
struct Step {
    /// Page number relative to the start of the subtree.
    index: u64,
    /// Whether the subtree became full with this allocation.
    filled: bool,
}

/// Allocation and deallocation over the bitmap tree.
///
/// Every index page the tree creates while growing is itself a page of the
/// address space. Such pages are counted in `reserve` as they are created
/// and their bits are set in the fresh leaf the same call ends up in, oldest
/// first, before the bit for the caller.
pub struct BitmapTree<'v> {
    validator: &'v dyn Validator,
    reserve: u32,
}

impl<'v> BitmapTree<'v> {
    pub fn new(validator: &'v dyn Validator) -> Self {
        Self {
            validator,
            reserve: 0,
        }
    }

    /// Marks the lowest free page number as allocated and returns it. Grows
    /// the tree by one level first if the root is full.
    pub fn allocate<S: PageSource>(&mut self, source: &mut S, root: &mut TreeRoot) -> Result<PageId> {
        self.reserve = 0;

        let root_full = IndexPage::new(source.page_mut(root.offset)?).is_full();
        if root_full {
            self.grow(source, root)?;
        }

        let step = self.allocate_core(source, root.offset, root.depth, 0)?;

        debug_assert_eq!(self.reserve, 0, "reserved index pages left unmarked");
        trace!(page = step.index, depth = root.depth, "allocated page");
        Ok(step.index)
    }

    /// Puts a new root above a full one. The old subtree is entirely
    /// allocated, so slot 0 of the new root is marked full without walking it.
    fn grow<S: PageSource>(&mut self, source: &mut S, root: &mut TreeRoot) -> Result<()> {
        let old = *root;
        let offset = source.allocate_at_end()?;

        debug_assert_eq!(
            offset,
            address_space_size_for_depth(old.depth),
            "new root must follow the space described by the old one"
        );

        let depth = old.depth + 1;
        {
            let mut page = IndexPage::new(source.page_mut(offset)?);
            page.clear();
            page.init(PageKind::Index, depth);
            let slot = page.allocate_fully().ok_or(StoreError::PageFull { offset })?;
            page.set_word(slot, old.offset);
            self.validator.check(offset, &page);
        }

        *root = TreeRoot { offset, depth };
        self.reserve += 1;

        info!(depth, offset, "index tree grew a level");
        Ok(())
    }

    /// `base` is the page number of the first unit under this page; it only
    /// feeds the placement check for freshly created index pages.
    fn allocate_core<S: PageSource>(&mut self, source: &mut S, offset: u64, depth: u32, base: u64) -> Result<Step> {
        {
            let page = IndexPage::new(source.page_mut(offset)?);
            debug_assert!(!page.is_full());
            self.validator.check(offset, &page);
        }

        let step = if depth > 0 {
            self.allocate_at_branch(source, offset, depth, base)?
        } else {
            self.allocate_at_leaf(source, offset)?
        };

        let page = IndexPage::new(source.page_mut(offset)?);
        self.validator.check(offset, &page);

        Ok(step)
    }

    fn allocate_at_branch<S: PageSource>(&mut self, source: &mut S, offset: u64, depth: u32, base: u64) -> Result<Step> {
        let child_space = space_size_for_depth(depth - 1);

        let (slot, existing) = {
            let branch = IndexPage::new(source.page_mut(offset)?);
            let slot = branch.first_unfull().ok_or(StoreError::PageFull { offset })?;
            (slot, branch.used(slot).then(|| branch.word(slot)))
        };

        let child_base = base + slot as u64 * child_space;

        let child_offset = match existing {
            Some(child_offset) => child_offset,
            None => {
                // an unused slot lies past everything allocated so far, so
                // its child page is the next page at the end
                let child_offset = source.allocate_at_end()?;

                debug_assert_eq!(
                    child_offset / PAGE_SIZE as u64,
                    child_base + self.reserve as u64,
                    "fresh index page must be the next unit of its own subtree"
                );
                self.reserve += 1;

                IndexPage::new(source.page_mut(child_offset)?).init(PageKind::Index, depth - 1);

                let mut branch = IndexPage::new(source.page_mut(offset)?);
                let (_, unused) = branch.use_slot(slot);
                debug_assert!(unused);
                branch.set_word(slot, child_offset);
                child_offset
            }
        };

        let child = self.allocate_core(source, child_offset, depth - 1, child_base)?;

        let mut filled = false;
        if child.filled {
            let mut branch = IndexPage::new(source.page_mut(offset)?);
            branch.set_full(slot, true);
            filled = branch.is_full();
        }

        Ok(Step {
            index: slot as u64 * child_space + child.index,
            filled,
        })
    }

    fn allocate_at_leaf<S: PageSource>(&mut self, source: &mut S, offset: u64) -> Result<Step> {
        let mut leaf = IndexPage::new(source.page_mut(offset)?);

        if self.reserve > 0 {
            // only a call that created index pages reaches a leaf with a
            // pending reserve, and that leaf is one of them
            debug_assert!(leaf.is_empty());

            while self.reserve > 0 {
                take_bit(&mut leaf, offset)?;
                self.reserve -= 1;
            }
        }

        take_bit(&mut leaf, offset)
    }

    /// Clears the bit of `page`. The path is computed from the page number
    /// alone; no page is created. Ancestor full bits stay as they are, so a
    /// freed page is only handed out again while its leaf is still reachable
    /// through non-full branch slots.
    ///
    /// Index pages can't be freed. Each one lies inside the subtree it
    /// describes, so the walk for its own page number passes through it.
    pub fn deallocate<S: PageSource>(&mut self, source: &mut S, root: TreeRoot, page: PageId) -> Result<()> {
        if page >= space_size_for_depth(root.depth) {
            return Err(StoreError::NotAllocated { page });
        }
        let target = page.checked_mul(PAGE_SIZE as u64);

        let mut offset = root.offset;
        let mut depth = root.depth;
        let mut rem = page;

        loop {
            if target == Some(offset) {
                return Err(StoreError::Reserved { page });
            }
            if depth == 0 {
                break;
            }

            let child_space = space_size_for_depth(depth - 1);
            let slot = (rem / child_space) as usize;
            rem %= child_space;

            let branch = IndexPage::new(source.page_mut(offset)?);
            if !branch.used(slot) {
                return Err(StoreError::UnexpectedAllocation { page });
            }
            offset = branch.word(slot);
            depth -= 1;
        }

        let slot = (rem / WORD_BITS as u64) as usize;
        let bit = (rem % WORD_BITS as u64) as usize;

        let mut leaf = IndexPage::new(source.page_mut(offset)?);
        self.validator.check(offset, &leaf);

        let mut word = if leaf.used(slot) { leaf.word(slot) } else { 0 };
        if !bits::get_bit(word, bit) {
            return Err(StoreError::NotAllocated { page });
        }

        bits::set_bit(&mut word, bit, false);
        leaf.set_word(slot, word);
        leaf.set_full(slot, false);
        if word == 0 {
            leaf.set_used(slot, false);
        }

        self.validator.check(offset, &leaf);
        trace!(page, "deallocated page");
        Ok(())
    }
}

/// Sets the lowest free bit of a leaf.
fn take_bit(leaf: &mut IndexPage<'_>, offset: u64) -> Result<Step> {
    let slot = leaf.first_unfull().ok_or(StoreError::PageFull { offset })?;
    let (mut word, _) = leaf.use_slot(slot);
    let bit = bits::first_zero(word).ok_or(StoreError::PageFull { offset })?;

    bits::set_bit(&mut word, bit, true);
    leaf.set_word(slot, word);

    let mut filled = false;
    if word == u64::MAX {
        leaf.set_full(slot, true);
        filled = leaf.is_full();
    }

    Ok(Step {
        index: (slot * WORD_BITS + bit) as u64,
        filled,
    })
}
