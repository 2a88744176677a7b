use dmxp_transport::Core::create_heap_memory;
use dmxp_transport::Queue::Ring::{RingFull, RingQueue};
use dmxp_transport::Queue::{QueueBuilder, QueueError, QueueFull, SlabQueue};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn make_ring(max: usize) -> RingQueue {
    let region = create_heap_memory(RingQueue::footprint(max)).unwrap();
    RingQueue::init(region, 0, max, 64).unwrap()
}

#[test]
fn simple_push_pop() {
    let ring = make_ring(4);
    assert!(ring.is_empty());
    assert_eq!(ring.pop(), None);

    ring.push(42).unwrap();
    assert_eq!(ring.len(), 1);
    assert_eq!(ring.pop(), Some(42));
    assert!(ring.is_empty());
}

#[test]
fn fifo_across_wraparound() {
    let ring = make_ring(3);
    let mut expected = 0u64;
    let mut next = 0u64;

    // Interleave so head and tail wrap several times
    for _ in 0..10 {
        while !ring.is_full() {
            ring.push(next).unwrap();
            next += 1;
        }
        for _ in 0..2 {
            assert_eq!(ring.pop(), Some(expected));
            expected += 1;
        }
    }
    while let Some(v) = ring.pop() {
        assert_eq!(v, expected);
        expected += 1;
    }
    assert_eq!(expected, next);
}

#[test]
fn full_ring_is_unchanged() {
    let ring = make_ring(2);
    ring.push(1).unwrap();
    ring.push(2).unwrap();
    let before = ring.cursors();

    assert_eq!(ring.push(3), Err(RingFull { max: 2 }));
    assert_eq!(ring.cursors(), before);
    assert_eq!(ring.len(), 2);

    assert_eq!(ring.pop(), Some(1));
    assert_eq!(ring.pop(), Some(2));
    assert_eq!(ring.pop(), None);
}

#[test]
fn open_sees_formatted_ring() {
    let region = create_heap_memory(RingQueue::footprint(8)).unwrap();
    let ring = RingQueue::init(region.clone(), 0, 8, 512).unwrap();
    ring.push(7).unwrap();

    let view = RingQueue::open(region, 0).unwrap();
    assert_eq!(view.capacity(), 8);
    assert_eq!(view.item_size(), 512);
    assert_eq!(view.pop(), Some(7));
    assert!(ring.is_empty());
}

#[test]
fn open_rejects_unformatted_region() {
    let region = create_heap_memory(RingQueue::footprint(8)).unwrap();
    assert!(RingQueue::open(region, 0).is_err());
}

#[test]
fn zero_capacity_rejected() {
    let region = create_heap_memory(4096).unwrap();
    assert!(RingQueue::init(region, 0, 0, 64).is_err());
    assert!(matches!(
        SlabQueue::in_process(0, 64),
        Err(QueueError::BadDimensions { .. })
    ));
}

#[test]
fn slab_queue_moves_blocks() {
    let queue = QueueBuilder::new()
        .with_capacity(4)
        .with_item_size(128)
        .build_in_process()
        .unwrap();
    println!("Queue Struct: {:#?}", queue);

    for i in 0..4u8 {
        let mut block = queue.alloc().unwrap();
        queue.bytes_mut(&mut block)[..4].copy_from_slice(&[i; 4]);
        queue.push(block).unwrap();
    }
    assert_eq!(queue.len(), 4);
    assert_eq!(queue.pool().used_blocks(), 4);

    for i in 0..4u8 {
        let block = queue.pop().unwrap();
        assert_eq!(&queue.bytes(&block)[..4], &[i; 4]);
        queue.dealloc(block);
    }
    assert!(queue.pop().is_none());
    assert_eq!(queue.pool().used_blocks(), 0);
}

#[test]
fn slab_queue_full_returns_block() {
    let queue = SlabQueue::in_process(2, 64).unwrap();
    queue.push(queue.alloc().unwrap()).unwrap();
    queue.push(queue.alloc().unwrap()).unwrap();

    let extra = queue.alloc().unwrap();
    let offset = extra.offset();
    let QueueFull(back) = queue.push(extra).unwrap_err();
    assert_eq!(back.offset(), offset);
    assert_eq!(queue.len(), 2);
    queue.dealloc(back);

    while let Some(b) = queue.pop() {
        queue.dealloc(b);
    }
    assert_eq!(queue.pool().used_blocks(), 0);
}

#[test]
fn slab_queue_pool_sized_for_capacity() {
    let queue = SlabQueue::in_process(3, 4096).unwrap();
    let blocks: Vec<_> = (0..3).map(|_| queue.alloc().unwrap()).collect();
    // Every item of the pool is out
    assert!(queue.alloc().is_err());
    for b in blocks {
        queue.dealloc(b);
    }
    assert!(queue.alloc().is_ok());
}

#[test]
fn concurrent_producers_consumers() {
    let queue = Arc::new(SlabQueue::in_process(64, 32).unwrap());
    let producers = 4;
    let per_producer = 2_000;
    let consumed = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();

    for id in 0..producers {
        let queue = queue.clone();
        handles.push(thread::spawn(move || {
            for i in 0..per_producer {
                let value = ((id * per_producer + i) as u64).to_le_bytes();
                let mut block = loop {
                    match queue.alloc() {
                        Ok(b) => break b,
                        Err(_) => thread::yield_now(),
                    }
                };
                queue.bytes_mut(&mut block)[..8].copy_from_slice(&value);
                let mut pending = block;
                loop {
                    match queue.push(pending) {
                        Ok(()) => break,
                        Err(QueueFull(b)) => {
                            pending = b;
                            thread::yield_now();
                        }
                    }
                }
            }
            Vec::new()
        }));
    }

    let total = producers * per_producer;
    for _ in 0..2 {
        let queue = queue.clone();
        let consumed = consumed.clone();
        handles.push(thread::spawn(move || {
            let mut seen = Vec::new();
            while consumed.load(Ordering::SeqCst) < total {
                match queue.pop() {
                    Some(block) => {
                        let mut word = [0u8; 8];
                        word.copy_from_slice(&queue.bytes(&block)[..8]);
                        seen.push(u64::from_le_bytes(word));
                        queue.dealloc(block);
                        consumed.fetch_add(1, Ordering::SeqCst);
                    }
                    None => thread::yield_now(),
                }
            }
            seen
        }));
    }

    let mut all = HashSet::new();
    for h in handles {
        for v in h.join().unwrap() {
            assert!(all.insert(v), "value {} delivered twice", v);
        }
    }
    assert_eq!(all.len(), total);
    assert!(queue.is_empty());
    assert_eq!(queue.pool().used_blocks(), 0);
}
