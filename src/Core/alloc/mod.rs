use crate::Core::SharedMemory::{create_heap_memory, SharedMemoryBackend};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use thiserror::Error;

mod debug;
mod getters;
pub mod layout;
mod page;

pub use layout::{
    PageDesc, PoolHeader, PoolLayout, SizeClass, EXACT_SIZE, MAX_SLOT_SIZE, MIN_SIZE, PAGE_SIZE,
};
pub use page::SlotGeometry;

use layout::*;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("allocation size must be non-zero")]
    ZeroSize,
    #[error("out of memory: no room for {size} bytes")]
    OutOfMemory { size: usize },
    #[error("offset {offset} does not address a live block")]
    InvalidBlock { offset: u64 },
    #[error("region of {size} bytes cannot hold a slab pool (need at least {needed})")]
    RegionTooSmall { size: usize, needed: usize },
    #[error("pool of {size} bytes exceeds the 4 GiB offset range")]
    RegionTooLarge { size: usize },
    #[error("region at offset {offset} is not a formatted slab pool")]
    NotInitialized { offset: usize },
}

/// Owned handle to one allocation inside a [`SlabPool`].
///
/// Deliberately not `Clone`: whoever holds the handle owns the bytes, and
/// giving it back to [`SlabPool::dealloc`] ends that ownership.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    offset: u32,
    len: u32,
}

impl Block {
    /// Offset of the block from the pool base
    pub fn offset(&self) -> usize {
        self.offset as usize
    }

    /// Usable capacity of the block (the slot or run size, not the request)
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Turn the handle into a plain offset for storage in a queue node
    pub fn into_raw(self) -> u64 {
        self.offset as u64
    }
}

/// Bitmap/page slab allocator over a fixed memory region.
///
/// The pool's header, slot lists and page descriptors live inside the region
/// itself, so a pool placed in a named shared-memory segment can be opened by
/// other processes. All mutation happens under the region lock in the header.
#[derive(Clone)]
pub struct SlabPool {
    region: Arc<dyn SharedMemoryBackend>,
    base: NonNull<u8>,
    header: NonNull<PoolHeader>,
    layout: PoolLayout,
}

// The region lock serialises every access to the bookkeeping
unsafe impl Send for SlabPool {}
unsafe impl Sync for SlabPool {}

impl SlabPool {
    /// Format `size` bytes of `region` starting at `offset` as an empty pool.
    ///
    /// # Arguments
    /// * `region` - Backing memory; kept alive by the pool
    /// * `offset` - Start of the pool inside the region (128-byte aligned)
    /// * `size` - Bytes given to the pool
    ///
    /// # Returns
    /// The pool, or `RegionTooSmall` if not even one page fits.
    pub fn init(
        region: Arc<dyn SharedMemoryBackend>,
        offset: usize,
        size: usize,
    ) -> Result<Self, AllocError> {
        let needed = PoolLayout::min_size();
        if offset % 128 != 0 || offset.saturating_add(size) > region.size() {
            return Err(AllocError::RegionTooSmall {
                size: region.size().saturating_sub(offset),
                needed: size,
            });
        }
        if size > u32::MAX as usize {
            return Err(AllocError::RegionTooLarge { size });
        }
        let layout = PoolLayout::compute(size).ok_or(AllocError::RegionTooSmall { size, needed })?;

        let base = unsafe { region.as_ptr().add(offset) };
        let base = NonNull::new(base).ok_or(AllocError::NotInitialized { offset })?;
        let header = base.cast::<PoolHeader>();

        unsafe {
            ptr::write_bytes(base.as_ptr(), 0, layout.data_offset);
            ptr::write(
                header.as_ptr(),
                PoolHeader {
                    magic: 0,
                    lock: crate::Core::lock::RegionLock::new(),
                    pool_size: size as u64,
                    page_size: PAGE_SIZE as u32,
                    page_count: layout.page_count as u32,
                    min_shift: MIN_SHIFT,
                    max_shift: MAX_SHIFT,
                    slots_offset: layout.slots_offset as u64,
                    pages_offset: layout.pages_offset as u64,
                    data_offset: layout.data_offset as u64,
                    end_offset: layout.end_offset as u64,
                    state: PoolState {
                        free_head: NULL_PAGE,
                        free_pages: 0,
                        used_blocks: 0,
                    },
                },
            );
        }

        let pool = Self {
            region,
            base,
            header,
            layout,
        };

        unsafe {
            for shift in MIN_SHIFT..=MAX_SHIFT {
                ptr::write(
                    pool.slot_list(shift),
                    SlotList {
                        shift,
                        head: NULL_PAGE,
                    },
                );
            }
            for idx in 0..layout.page_count as i32 {
                ptr::write(pool.desc(idx), PageDesc::free());
            }
            let st = &mut *ptr::addr_of_mut!((*header.as_ptr()).state);
            pool.give_pages(st, 0, layout.page_count as u32);
            // Publish last so a concurrent open never sees a half-built pool
            ptr::write_volatile(ptr::addr_of_mut!((*header.as_ptr()).magic), POOL_MAGIC);
        }

        Ok(pool)
    }

    /// Open a pool previously formatted by [`SlabPool::init`] in `region`
    pub fn open(region: Arc<dyn SharedMemoryBackend>, offset: usize) -> Result<Self, AllocError> {
        if offset % 128 != 0 || offset + std::mem::size_of::<PoolHeader>() > region.size() {
            return Err(AllocError::NotInitialized { offset });
        }
        let base = unsafe { region.as_ptr().add(offset) };
        let base = NonNull::new(base).ok_or(AllocError::NotInitialized { offset })?;
        let header = base.cast::<PoolHeader>();

        let (magic, size) = unsafe {
            (
                ptr::read_volatile(ptr::addr_of!((*header.as_ptr()).magic)),
                (*header.as_ptr()).pool_size as usize,
            )
        };
        if magic != POOL_MAGIC || offset + size > region.size() {
            return Err(AllocError::NotInitialized { offset });
        }
        let layout = PoolLayout::compute(size).ok_or(AllocError::NotInitialized { offset })?;

        Ok(Self {
            region,
            base,
            header,
            layout,
        })
    }

    /// Pool over a private anonymous mapping of `size` bytes
    pub fn heap(size: usize) -> Result<Self, AllocError> {
        let size = size.max(PoolLayout::min_size());
        let region = create_heap_memory(size).map_err(|_| AllocError::OutOfMemory { size })?;
        Self::init(region, 0, size)
    }

    /// Bytes a pool needs to hold `count` simultaneous allocations of `size`
    pub fn required_size(count: usize, size: usize) -> usize {
        let pages = if size >= MAX_SLOT_SIZE {
            count * size.div_ceil(PAGE_SIZE)
        } else {
            let geo = SlotGeometry::for_shift(slot_shift(size.max(1)));
            count.div_ceil(geo.usable_slots() as usize)
        };
        PoolLayout::for_pages(pages.max(1))
    }

    #[inline]
    fn lock_word(&self) -> &crate::Core::lock::RegionLock {
        unsafe { &(*self.header.as_ptr()).lock }
    }

    // Only call with the lock held, and never keep two results alive
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn state(&self) -> &mut PoolState {
        &mut *ptr::addr_of_mut!((*self.header.as_ptr()).state)
    }

    /// Allocate a zeroed block of at least `size` bytes.
    ///
    /// Sizes below `MAX_SLOT_SIZE` are rounded up to a power-of-two slot;
    /// larger requests take a run of whole pages.
    pub fn alloc(&self, size: usize) -> Result<Block, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        if size > self.layout.page_count * PAGE_SIZE {
            return Err(AllocError::OutOfMemory { size });
        }

        let _guard = self.lock_word().lock();
        let st = unsafe { self.state() };

        let (offset, len) = if SizeClass::for_size(size) == SizeClass::Pages {
            let n = size.div_ceil(PAGE_SIZE) as u32;
            let idx = unsafe { self.take_pages(st, n) }.ok_or(AllocError::OutOfMemory { size })?;
            unsafe {
                let d = self.desc(idx);
                (*d).class = SizeClass::Pages as u32;
                (*d).pages = n;
                for i in 1..n as i32 {
                    (*self.desc(idx + i)).class = SizeClass::Pages as u32;
                }
            }
            (self.page_offset(idx), n as usize * PAGE_SIZE)
        } else {
            let shift = slot_shift(size);
            let (idx, slot) = unsafe { self.claim_slot(st, shift) }.ok_or(AllocError::OutOfMemory { size })?;
            (self.page_offset(idx) + ((slot as usize) << shift), 1usize << shift)
        };

        unsafe { self.zero(offset, len) };
        st.used_blocks += 1;
        Ok(Block {
            offset: offset as u32,
            len: len as u32,
        })
    }

    unsafe fn claim_slot(&self, st: &mut PoolState, shift: u32) -> Option<(i32, u32)> {
        let list = self.slot_list(shift);
        let mut idx = (*list).head;
        // Pages with room are kept in front of full pages
        if idx == NULL_PAGE || self.page_full(idx) {
            idx = self.carve_slot_page(st, shift)?;
        }
        let slot = self.take_slot(idx)?;
        if self.page_full(idx) {
            self.requeue_slot_page(idx, false);
        }
        Some((idx, slot))
    }

    /// Return a block to the pool. Its bytes are zeroed before reuse.
    pub fn dealloc(&self, block: Block) -> Result<(), AllocError> {
        let offset = block.offset as usize;
        let _guard = self.lock_word().lock();
        let st = unsafe { self.state() };

        let (idx, class) = self.locate(offset)?;
        unsafe {
            match class {
                SizeClass::Pages => {
                    let n = (*self.desc(idx)).pages;
                    if n == 0 || offset != self.page_offset(idx) {
                        return Err(AllocError::InvalidBlock { offset: offset as u64 });
                    }
                    self.give_pages(st, idx, n);
                }
                SizeClass::Small | SizeClass::Exact | SizeClass::Large => {
                    let shift = (*self.desc(idx)).shift;
                    let within = offset - self.page_offset(idx);
                    if within & ((1 << shift) - 1) != 0 {
                        return Err(AllocError::InvalidBlock { offset: offset as u64 });
                    }
                    let was_full = self.page_full(idx);
                    let slot = (within >> shift) as u32;
                    if !self.clear_slot(idx, slot) {
                        return Err(AllocError::InvalidBlock { offset: offset as u64 });
                    }
                    self.zero(offset, 1 << shift);
                    if self.page_empty(idx) {
                        self.unlink_slot_page(idx);
                        self.give_pages(st, idx, 1);
                    } else if was_full {
                        self.requeue_slot_page(idx, true);
                    }
                }
                SizeClass::Free => {
                    return Err(AllocError::InvalidBlock { offset: offset as u64 });
                }
            }
        }
        st.used_blocks -= 1;
        Ok(())
    }

    // Page index and class of the page holding `offset`
    fn locate(&self, offset: usize) -> Result<(i32, SizeClass), AllocError> {
        if offset < self.layout.data_offset || offset >= self.layout.end_offset {
            return Err(AllocError::InvalidBlock { offset: offset as u64 });
        }
        let idx = ((offset - self.layout.data_offset) / PAGE_SIZE) as i32;
        let class = SizeClass::from_raw(unsafe { (*self.desc(idx)).class })
            .ok_or(AllocError::InvalidBlock { offset: offset as u64 })?;
        Ok((idx, class))
    }

    /// Rebuild a handle from [`Block::into_raw`].
    ///
    /// The offset is checked against the page table: it must address the
    /// start of a live slot or page run.
    ///
    /// # Safety
    /// `raw` must come from `into_raw` on a block of this pool and be
    /// converted back at most once; two handles to one block would alias.
    pub unsafe fn from_raw(&self, raw: u64) -> Result<Block, AllocError> {
        let offset = usize::try_from(raw).map_err(|_| AllocError::InvalidBlock { offset: raw })?;
        let _guard = self.lock_word().lock();
        let (idx, class) = self.locate(offset)?;
        let d = self.desc(idx);
        let len = match class {
            SizeClass::Pages if (*d).pages > 0 && offset == self.page_offset(idx) => {
                (*d).pages as usize * PAGE_SIZE
            }
            SizeClass::Small | SizeClass::Exact | SizeClass::Large => {
                let shift = (*d).shift;
                let within = offset - self.page_offset(idx);
                if within & ((1 << shift) - 1) != 0 || !self.slot_live(idx, (within >> shift) as u32) {
                    return Err(AllocError::InvalidBlock { offset: raw });
                }
                1usize << shift
            }
            _ => return Err(AllocError::InvalidBlock { offset: raw }),
        };
        Ok(Block {
            offset: offset as u32,
            len: len as u32,
        })
    }

    /// Bytes of a block owned by the caller
    pub fn bytes<'a>(&'a self, block: &'a Block) -> &'a [u8] {
        let (offset, len) = self.span(block);
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }

    /// Mutable bytes of a block owned by the caller
    pub fn bytes_mut<'a>(&'a self, block: &'a mut Block) -> &'a mut [u8] {
        let (offset, len) = self.span(block);
        unsafe { std::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), len) }
    }

    // Bounds-checked span of a block
    fn span(&self, block: &Block) -> (usize, usize) {
        let offset = block.offset as usize;
        let len = block.len as usize;
        assert!(
            offset >= self.layout.data_offset && offset + len <= self.layout.end_offset,
            "block {}+{} outside pool data [{}, {})",
            offset,
            len,
            self.layout.data_offset,
            self.layout.end_offset
        );
        (offset, len)
    }
}
