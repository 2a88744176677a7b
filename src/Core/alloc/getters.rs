use super::*;

/// Read-only accessors on SlabPool for monitoring and tests.
impl SlabPool {
    /// Get the backing region
    pub fn region(&self) -> &Arc<dyn SharedMemoryBackend> {
        &self.region
    }

    /// Get the raw pointer to the PoolHeader
    pub fn header_ptr(&self) -> *const PoolHeader {
        self.header.as_ptr()
    }

    /// Pages in the data area
    pub fn page_count(&self) -> usize {
        self.layout.page_count
    }

    /// Offset of the first data page from the pool base
    pub fn data_offset(&self) -> usize {
        self.layout.data_offset
    }

    /// Offset one past the last data byte
    pub fn end_offset(&self) -> usize {
        self.layout.end_offset
    }

    /// Pages currently on the free list
    pub fn free_pages(&self) -> usize {
        let _guard = self.lock_word().lock();
        unsafe { self.state().free_pages as usize }
    }

    /// Length of the longest run of free pages
    pub fn largest_free_run(&self) -> usize {
        let _guard = self.lock_word().lock();
        let mut best = 0;
        unsafe {
            let mut cur = self.state().free_head;
            while cur != NULL_PAGE {
                let d = self.desc(cur);
                best = best.max((*d).pages as usize);
                cur = (*d).next;
            }
        }
        best
    }

    /// Live blocks handed out and not yet returned
    pub fn used_blocks(&self) -> u64 {
        let _guard = self.lock_word().lock();
        unsafe { self.state().used_blocks }
    }

    /// Pages currently carved for slots of `1 << shift` bytes
    pub fn slot_pages(&self, shift: u32) -> usize {
        if !(MIN_SHIFT..=MAX_SHIFT).contains(&shift) {
            return 0;
        }
        let _guard = self.lock_word().lock();
        let mut count = 0;
        unsafe {
            let mut cur = (*self.slot_list(shift)).head;
            while cur != NULL_PAGE {
                count += 1;
                cur = (*self.desc(cur)).next;
            }
        }
        count
    }

    /// Check if the pool header carries the expected magic number
    pub fn is_initialized(&self) -> bool {
        unsafe { ptr::read_volatile(ptr::addr_of!((*self.header.as_ptr()).magic)) == POOL_MAGIC }
    }
}
