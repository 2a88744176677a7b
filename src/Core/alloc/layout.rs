use crate::Core::lock::RegionLock;
use std::mem::size_of;

/// Page granularity of every slab pool.
pub const PAGE_SIZE: usize = 4096;
pub const PAGE_SHIFT: u32 = 12;

/// Smallest slot handed out (8 bytes).
pub const MIN_SHIFT: u32 = 3;
pub const MIN_SIZE: usize = 1 << MIN_SHIFT;

/// Slot size whose page bitmap fills exactly one u32 word.
pub const EXACT_SIZE: usize = PAGE_SIZE / (8 * size_of::<u32>());
pub const EXACT_SHIFT: u32 = EXACT_SIZE.trailing_zeros();

/// Requests of this size and above are served in whole pages.
pub const MAX_SLOT_SIZE: usize = PAGE_SIZE / 2;
pub const MAX_SHIFT: u32 = MAX_SLOT_SIZE.trailing_zeros();

/// One slot list per power of two between MIN_SIZE and MAX_SLOT_SIZE.
pub const SLOT_LISTS: usize = (MAX_SHIFT - MIN_SHIFT + 1) as usize;

pub const NULL_PAGE: i32 = -1;

/// "DMXP_SLB"
pub const POOL_MAGIC: u64 = 0x444D_5850_5F53_4C42;

/// Allocation class of a page.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Page sits on the free list
    Free = 0,
    /// Slots below EXACT_SIZE; bitmap continues in extension words
    Small = 1,
    /// Slots of exactly EXACT_SIZE; one bitmap word covers the page
    Exact = 2,
    /// Slots above EXACT_SIZE and below MAX_SLOT_SIZE
    Large = 3,
    /// Whole-page runs
    Pages = 4,
}

impl SizeClass {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(SizeClass::Free),
            1 => Some(SizeClass::Small),
            2 => Some(SizeClass::Exact),
            3 => Some(SizeClass::Large),
            4 => Some(SizeClass::Pages),
            _ => None,
        }
    }

    /// Class used for a slot of `1 << shift` bytes
    pub fn for_shift(shift: u32) -> Self {
        if shift < EXACT_SHIFT {
            SizeClass::Small
        } else if shift == EXACT_SHIFT {
            SizeClass::Exact
        } else {
            SizeClass::Large
        }
    }

    /// Class a request of `size` bytes falls into
    pub fn for_size(size: usize) -> Self {
        if size >= MAX_SLOT_SIZE {
            SizeClass::Pages
        } else {
            SizeClass::for_shift(slot_shift(size))
        }
    }
}

/// Bit shift of the slot that fits `size` (size below MAX_SLOT_SIZE)
pub fn slot_shift(size: usize) -> u32 {
    let rounded = size.max(MIN_SIZE).next_power_of_two();
    rounded.trailing_zeros()
}

/// Descriptor of one page of the data area.
///
/// Free runs and page allocations keep their length in `pages` on the first
/// page of the run; the remaining pages of a run carry `pages == 0`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PageDesc {
    pub pages: u32,
    pub shift: u32,
    pub class: u32,
    /// Set bits are handed out or structurally unusable
    pub bitmap: u32,
    /// Inverse of the bitmap at page creation: the usable bits
    pub rbitmap: u32,
    /// Extension bitmap words stored at the start of the page data
    pub ext_words: u32,
    pub next: i32,
    pub prev: i32,
}

impl PageDesc {
    pub const fn free() -> Self {
        Self {
            pages: 0,
            shift: 0,
            class: SizeClass::Free as u32,
            bitmap: 0,
            rbitmap: 0,
            ext_words: 0,
            next: NULL_PAGE,
            prev: NULL_PAGE,
        }
    }
}

/// Head of the page list for one slot size.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SlotList {
    pub shift: u32,
    pub head: i32,
}

/// Mutable bookkeeping, only touched under the pool lock.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PoolState {
    pub free_head: i32,
    pub free_pages: u32,
    pub used_blocks: u64,
}

/// Header at the start of every pool. Offsets are relative to the header.
#[repr(C, align(128))]
pub struct PoolHeader {
    pub magic: u64,
    pub lock: RegionLock,
    pub pool_size: u64,
    pub page_size: u32,
    pub page_count: u32,
    pub min_shift: u32,
    pub max_shift: u32,
    pub slots_offset: u64,
    pub pages_offset: u64,
    pub data_offset: u64,
    pub end_offset: u64,
    pub state: PoolState,
}

/// Offsets of a pool formatted over `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    pub slots_offset: usize,
    pub pages_offset: usize,
    pub data_offset: usize,
    pub end_offset: usize,
    pub page_count: usize,
}

#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

impl PoolLayout {
    /// Fixed bytes in front of the page descriptors
    pub const fn fixed_overhead() -> usize {
        align_up(size_of::<PoolHeader>(), 8) + SLOT_LISTS * size_of::<SlotList>()
    }

    /// Smallest pool that still holds one page
    pub const fn min_size() -> usize {
        Self::for_pages(1)
    }

    /// Bytes a pool with `page_count` pages occupies
    pub const fn for_pages(page_count: usize) -> usize {
        align_up(Self::fixed_overhead() + page_count * size_of::<PageDesc>(), 128)
            + page_count * PAGE_SIZE
    }

    /// Split `size` bytes into header, slot lists, descriptors and pages
    pub fn compute(size: usize) -> Option<Self> {
        let slots_offset = align_up(size_of::<PoolHeader>(), 8);
        let pages_offset = slots_offset + SLOT_LISTS * size_of::<SlotList>();
        let avail = size.checked_sub(pages_offset)?;
        let mut page_count = avail / (PAGE_SIZE + size_of::<PageDesc>());
        // Alignment of the data area may cost one page
        while page_count > 0 && Self::for_pages(page_count) > size {
            page_count -= 1;
        }
        if page_count == 0 || page_count > i32::MAX as usize {
            return None;
        }
        let data_offset = align_up(pages_offset + page_count * size_of::<PageDesc>(), 128);
        Some(Self {
            slots_offset,
            pages_offset,
            data_offset,
            end_offset: data_offset + page_count * PAGE_SIZE,
            page_count,
        })
    }
}
