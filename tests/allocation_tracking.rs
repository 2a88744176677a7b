// Allocation tracking for the queue hot path.
//
// The slab queue keeps every item inside its pre-mapped region, so a
// push/pop cycle must not touch the process heap. dhat counts heap blocks
// through the global allocator below; memory-stats gives a coarse RSS view.
//
// cargo test --test allocation_tracking -- --nocapture

use dmxp_transport::Queue::SlabQueue;
use dmxp_transport::Transport::{FrameHeader, HEADER_LEN};
use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::thread;

#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

fn cycle(queue: &SlabQueue, i: u32) {
    let mut block = queue.alloc().expect("alloc");
    let header = FrameHeader::application(i % 200, 32);
    header.encode_local(queue.bytes_mut(&mut block)).unwrap();
    queue.push(block).expect("push");

    let block = queue.pop().expect("pop");
    let back = FrameHeader::decode_local(queue.bytes(&block)).unwrap();
    assert_eq!(back, header);
    queue.dealloc(block);
}

#[test]
#[serial_test::serial]
fn test_queue_cycle_does_not_allocate() {
    let _profiler = dhat::Profiler::builder().testing().build();

    let queue = SlabQueue::in_process(256, HEADER_LEN + 32).unwrap();
    // Warm up: first use carves the slot page
    cycle(&queue, 0);

    let before = dhat::HeapStats::get();
    for i in 0..10_000 {
        cycle(&queue, i);
    }
    let after = dhat::HeapStats::get();

    println!("Heap blocks before: {} after: {}", before.total_blocks, after.total_blocks);
    dhat::assert_eq!(after.total_blocks, before.total_blocks);
    dhat::assert_eq!(after.curr_bytes, before.curr_bytes);
}

#[test]
#[serial_test::serial]
fn test_concurrent_queue_with_memory_stats() {
    use memory_stats::memory_stats;

    let before = memory_stats();
    println!("Memory before: {:?}", before);

    let queue = Arc::new(SlabQueue::in_process(1024, 64).unwrap());
    let producers = 4;
    let per_producer = 10_000;
    let total = producers * per_producer;
    let consumed = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for _ in 0..producers {
        let queue = queue.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..per_producer {
                loop {
                    let Ok(block) = queue.alloc() else {
                        std::hint::spin_loop();
                        continue;
                    };
                    match queue.push(block) {
                        Ok(()) => break,
                        Err(full) => {
                            queue.dealloc(full.0);
                            std::hint::spin_loop();
                        }
                    }
                }
            }
        }));
    }
    for _ in 0..producers {
        let queue = queue.clone();
        let consumed = consumed.clone();
        handles.push(thread::spawn(move || {
            while consumed.load(Relaxed) < total {
                match queue.pop() {
                    Some(block) => {
                        queue.dealloc(block);
                        consumed.fetch_add(1, Relaxed);
                    }
                    None => std::hint::spin_loop(),
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let after = memory_stats();
    println!("Memory after: {:?}", after);
    if let (Some(b), Some(a)) = (before, after) {
        let delta = a.physical_mem as i64 - b.physical_mem as i64;
        // Thread stacks dominate the delta; the queue itself was mapped up front
        println!("Memory delta: {} bytes ({:.2} KB)", delta, delta as f64 / 1024.0);
    }

    assert_eq!(consumed.load(Relaxed), total);
    assert_eq!(queue.pool().used_blocks(), 0);
}
