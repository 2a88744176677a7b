// Page-level bookkeeping: free-run list and slot bitmaps.
// Every function here must be called with the pool lock held.

use super::layout::*;
use super::SlabPool;
use std::ptr;

/// Bitmap geometry of a slotted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGeometry {
    /// Slots that fit into one page
    pub bits: u32,
    /// Extension bitmap words kept at the start of the page data
    pub ext_words: u32,
    /// Leading slots occupied by the extension words
    pub reserved: u32,
}

impl SlotGeometry {
    pub fn for_shift(shift: u32) -> Self {
        let bits = (PAGE_SIZE >> shift) as u32;
        if bits <= 32 {
            return Self {
                bits,
                ext_words: 0,
                reserved: 0,
            };
        }
        let ext_words = bits / 32 - 1;
        let slot = 1u32 << shift;
        let reserved = (ext_words * 4 + slot - 1) / slot;
        Self {
            bits,
            ext_words,
            reserved,
        }
    }

    /// Primary bitmap of a freshly carved page
    pub fn initial_bitmap(&self) -> u32 {
        if self.bits < 32 {
            !0u32 << self.bits
        } else if self.reserved == 0 {
            0
        } else {
            (1u32 << self.reserved) - 1
        }
    }

    pub fn usable_slots(&self) -> u32 {
        self.bits - self.reserved
    }
}

impl SlabPool {
    // --- raw accessors ---

    #[inline]
    pub(super) unsafe fn desc(&self, idx: i32) -> *mut PageDesc {
        debug_assert!(idx >= 0 && (idx as u32) < self.page_count() as u32);
        self.base
            .as_ptr()
            .add(self.layout.pages_offset + idx as usize * std::mem::size_of::<PageDesc>())
            as *mut PageDesc
    }

    #[inline]
    pub(super) unsafe fn slot_list(&self, shift: u32) -> *mut SlotList {
        let i = (shift - MIN_SHIFT) as usize;
        self.base
            .as_ptr()
            .add(self.layout.slots_offset + i * std::mem::size_of::<SlotList>())
            as *mut SlotList
    }

    /// Offset (from the pool base) of the first byte of page `idx`
    #[inline]
    pub(super) fn page_offset(&self, idx: i32) -> usize {
        self.layout.data_offset + idx as usize * PAGE_SIZE
    }

    #[inline]
    pub(super) unsafe fn ext_word(&self, idx: i32, k: u32) -> *mut u32 {
        (self.base.as_ptr().add(self.page_offset(idx)) as *mut u32).add(k as usize)
    }

    #[inline]
    pub(super) unsafe fn zero(&self, offset: usize, len: usize) {
        ptr::write_bytes(self.base.as_ptr().add(offset), 0, len);
    }

    // --- free runs ---

    /// First-fit search for `n` contiguous free pages
    pub(super) unsafe fn take_pages(&self, st: &mut PoolState, n: u32) -> Option<i32> {
        let mut cur = st.free_head;
        while cur != NULL_PAGE {
            let d = self.desc(cur);
            if (*d).pages >= n {
                let rest = (*d).pages - n;
                let (prev, next) = ((*d).prev, (*d).next);
                if rest == 0 {
                    self.link(st, prev, next);
                } else {
                    // Remainder keeps the run's place in the sorted list
                    let tail = cur + n as i32;
                    let t = self.desc(tail);
                    *t = PageDesc::free();
                    (*t).pages = rest;
                    (*t).prev = prev;
                    (*t).next = next;
                    self.link(st, prev, tail);
                    self.link(st, tail, next);
                }
                for i in 0..n as i32 {
                    *self.desc(cur + i) = PageDesc::free();
                }
                st.free_pages -= n;
                return Some(cur);
            }
            cur = (*d).next;
        }
        None
    }

    /// Return `n` pages starting at `idx` to the free list, merging with
    /// adjacent runs.
    pub(super) unsafe fn give_pages(&self, st: &mut PoolState, idx: i32, n: u32) {
        self.zero(self.page_offset(idx), n as usize * PAGE_SIZE);
        for i in 0..n as i32 {
            *self.desc(idx + i) = PageDesc::free();
        }

        // Find neighbours in the index-sorted list
        let mut prev = NULL_PAGE;
        let mut next = st.free_head;
        while next != NULL_PAGE && next < idx {
            prev = next;
            next = (*self.desc(next)).next;
        }

        let mut head = idx;
        let mut pages = n;
        if prev != NULL_PAGE && prev + (*self.desc(prev)).pages as i32 == idx {
            head = prev;
            pages += (*self.desc(prev)).pages;
            prev = (*self.desc(prev)).prev;
        }
        if next != NULL_PAGE && head + pages as i32 == next {
            let absorbed = self.desc(next);
            pages += (*absorbed).pages;
            let after = (*absorbed).next;
            (*absorbed).pages = 0;
            (*absorbed).next = NULL_PAGE;
            (*absorbed).prev = NULL_PAGE;
            next = after;
        }

        let h = self.desc(head);
        (*h).pages = pages;
        (*h).class = SizeClass::Free as u32;
        (*h).prev = prev;
        (*h).next = next;
        self.link(st, prev, head);
        self.link(st, head, next);
        st.free_pages += n;
    }

    /// Make `b` follow `a` in the free list (either may be NULL_PAGE)
    unsafe fn link(&self, st: &mut PoolState, a: i32, b: i32) {
        if a == NULL_PAGE {
            st.free_head = b;
        } else {
            (*self.desc(a)).next = b;
        }
        if b != NULL_PAGE {
            (*self.desc(b)).prev = a;
        }
    }

    // --- slot pages ---

    /// Carve a fresh page for slots of `1 << shift` bytes and put it at the
    /// head of that size's list.
    pub(super) unsafe fn carve_slot_page(&self, st: &mut PoolState, shift: u32) -> Option<i32> {
        let idx = self.take_pages(st, 1)?;
        let geo = SlotGeometry::for_shift(shift);
        let d = self.desc(idx);
        let initial = geo.initial_bitmap();
        (*d).pages = 1;
        (*d).shift = shift;
        (*d).class = SizeClass::for_shift(shift) as u32;
        (*d).bitmap = initial;
        (*d).rbitmap = !initial;
        (*d).ext_words = geo.ext_words;
        for k in 0..geo.ext_words {
            *self.ext_word(idx, k) = 0;
        }

        let list = self.slot_list(shift);
        (*d).prev = NULL_PAGE;
        (*d).next = (*list).head;
        if (*list).head != NULL_PAGE {
            (*self.desc((*list).head)).prev = idx;
        }
        (*list).head = idx;
        Some(idx)
    }

    pub(super) unsafe fn page_full(&self, idx: i32) -> bool {
        let d = self.desc(idx);
        if (*d).bitmap != u32::MAX {
            return false;
        }
        (0..(*d).ext_words).all(|k| *self.ext_word(idx, k) == u32::MAX)
    }

    pub(super) unsafe fn page_empty(&self, idx: i32) -> bool {
        let d = self.desc(idx);
        if (*d).bitmap & (*d).rbitmap != 0 {
            return false;
        }
        (0..(*d).ext_words).all(|k| *self.ext_word(idx, k) == 0)
    }

    /// Claim the lowest free slot of page `idx`
    pub(super) unsafe fn take_slot(&self, idx: i32) -> Option<u32> {
        let d = self.desc(idx);
        if (*d).bitmap != u32::MAX {
            let bit = (!(*d).bitmap).trailing_zeros();
            (*d).bitmap |= 1 << bit;
            return Some(bit);
        }
        for k in 0..(*d).ext_words {
            let w = self.ext_word(idx, k);
            if *w != u32::MAX {
                let bit = (!*w).trailing_zeros();
                *w |= 1 << bit;
                return Some(32 * (k + 1) + bit);
            }
        }
        None
    }

    /// Clear slot `slot` of page `idx`; false if it was not handed out
    pub(super) unsafe fn clear_slot(&self, idx: i32, slot: u32) -> bool {
        let d = self.desc(idx);
        if slot < 32 {
            let mask = 1u32 << slot;
            if (*d).rbitmap & mask == 0 || (*d).bitmap & mask == 0 {
                return false;
            }
            (*d).bitmap &= !mask;
            return true;
        }
        let k = slot / 32 - 1;
        if k >= (*d).ext_words {
            return false;
        }
        let w = self.ext_word(idx, k);
        let mask = 1u32 << (slot % 32);
        if *w & mask == 0 {
            return false;
        }
        *w &= !mask;
        true
    }

    /// Is slot `slot` of page `idx` currently handed out
    pub(super) unsafe fn slot_live(&self, idx: i32, slot: u32) -> bool {
        let d = self.desc(idx);
        if slot < 32 {
            let mask = 1u32 << slot;
            return (*d).rbitmap & mask != 0 && (*d).bitmap & mask != 0;
        }
        let k = slot / 32 - 1;
        k < (*d).ext_words && *self.ext_word(idx, k) & (1 << (slot % 32)) != 0
    }

    /// Unlink page `idx` from its slot list
    pub(super) unsafe fn unlink_slot_page(&self, idx: i32) {
        let d = self.desc(idx);
        let list = self.slot_list((*d).shift);
        let (prev, next) = ((*d).prev, (*d).next);
        if prev == NULL_PAGE {
            (*list).head = next;
        } else {
            (*self.desc(prev)).next = next;
        }
        if next != NULL_PAGE {
            (*self.desc(next)).prev = prev;
        }
        (*d).prev = NULL_PAGE;
        (*d).next = NULL_PAGE;
    }

    /// Move page `idx` to the head (`front`) or tail of its slot list.
    /// Pages with free slots are kept ahead of full ones.
    pub(super) unsafe fn requeue_slot_page(&self, idx: i32, front: bool) {
        let shift = (*self.desc(idx)).shift;
        let list = self.slot_list(shift);
        self.unlink_slot_page(idx);
        let d = self.desc(idx);
        if front || (*list).head == NULL_PAGE {
            (*d).next = (*list).head;
            if (*list).head != NULL_PAGE {
                (*self.desc((*list).head)).prev = idx;
            }
            (*list).head = idx;
            return;
        }
        let mut tail = (*list).head;
        while (*self.desc(tail)).next != NULL_PAGE {
            tail = (*self.desc(tail)).next;
        }
        (*self.desc(tail)).next = idx;
        (*d).prev = tail;
    }
}
