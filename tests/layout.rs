// Layout conformance tests for the region-resident structures.
// A queue created by one build must be readable by another that attaches
// to the same segment, so sizes, alignments and field offsets are pinned.
use dmxp_transport::Core::alloc::layout::{PageDesc, PoolHeader, PoolState};
use dmxp_transport::Core::lock::RegionLock;
use dmxp_transport::Queue::Ring::layout::{RingHeader, RingNode};
use dmxp_transport::Queue::SlabQueue;
use memoffset::offset_of;
use std::mem::{align_of, size_of};

#[test]
fn test_region_lock_layout() {
    // One cache line of its own
    assert_eq!(size_of::<RegionLock>(), 64);
    assert_eq!(align_of::<RegionLock>(), 64);
}

#[test]
fn test_pool_header_layout() {
    let size = size_of::<PoolHeader>();
    let align = align_of::<PoolHeader>();
    let off_magic = offset_of!(PoolHeader, magic);
    let off_lock = offset_of!(PoolHeader, lock);
    let off_pool_size = offset_of!(PoolHeader, pool_size);
    let off_page_size = offset_of!(PoolHeader, page_size);
    let off_slots = offset_of!(PoolHeader, slots_offset);
    let off_state = offset_of!(PoolHeader, state);

    println!(
        "PoolHeader => size: {size}, align: {align}, offsets: [magic:{off_magic}, lock:{off_lock}, pool_size:{off_pool_size}, page_size:{off_page_size}, slots_offset:{off_slots}, state:{off_state}]"
    );

    assert_eq!(align, 128);
    assert_eq!(size, 256);
    assert_eq!(off_magic, 0);
    assert_eq!(off_lock, 64);
    assert_eq!(off_pool_size, 128);
    assert_eq!(off_page_size, 136);
    assert_eq!(off_slots, 152);
    assert_eq!(off_state, 184);
    assert_eq!(size_of::<PoolState>(), 16);
}

#[test]
fn test_page_desc_layout() {
    assert_eq!(size_of::<PageDesc>(), 32);
    assert_eq!(offset_of!(PageDesc, pages), 0);
    assert_eq!(offset_of!(PageDesc, bitmap), 12);
    assert_eq!(offset_of!(PageDesc, next), 24);
    assert_eq!(offset_of!(PageDesc, prev), 28);
}

#[test]
fn test_ring_layout() {
    let size = size_of::<RingHeader>();
    println!(
        "RingHeader => size: {size}, align: {}, offsets: [magic:{}, lock:{}, max:{}, num:{}, head:{}, tail:{}, item_size:{}]",
        align_of::<RingHeader>(),
        offset_of!(RingHeader, magic),
        offset_of!(RingHeader, lock),
        offset_of!(RingHeader, max),
        offset_of!(RingHeader, num),
        offset_of!(RingHeader, head),
        offset_of!(RingHeader, tail),
        offset_of!(RingHeader, item_size),
    );

    assert_eq!(size, 256);
    assert_eq!(align_of::<RingHeader>(), 128);
    assert_eq!(offset_of!(RingHeader, magic), 0);
    assert_eq!(offset_of!(RingHeader, lock), 64);
    assert_eq!(offset_of!(RingHeader, max), 128);
    assert_eq!(offset_of!(RingHeader, num), 132);
    assert_eq!(offset_of!(RingHeader, head), 136);
    assert_eq!(offset_of!(RingHeader, tail), 140);
    assert_eq!(offset_of!(RingHeader, item_size), 144);
    assert_eq!(SlabQueue::ring_header_size(), size);

    assert_eq!(size_of::<RingNode>(), 16);
    assert_eq!(offset_of!(RingNode, state), 0);
    assert_eq!(offset_of!(RingNode, next), 4);
    assert_eq!(offset_of!(RingNode, data), 8);
}
