use dmxp_transport::Transport::{
    BlockSharding, ModuloSharding, QueueSharding, Registry, RegisterError, TYPE_MAX,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_register_and_dispatch() {
    let registry = Registry::new();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    registry
        .register(5, move |ty: u32, body: &[u8]| {
            assert_eq!(ty, 5);
            assert_eq!(body, b"hello");
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(registry.is_registered(5));
    assert!(!registry.is_registered(6));
    assert!(registry.dispatch(5, b"hello"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Unregistered types fall through to the no-op default
    assert!(!registry.dispatch(6, b"ignored"));
    assert!(!registry.dispatch(TYPE_MAX + 10, b"ignored"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_register_errors() {
    let registry = Registry::new();
    registry.register(0, |_: u32, _: &[u8]| {}).unwrap();
    assert_eq!(
        registry.register(0, |_: u32, _: &[u8]| {}),
        Err(RegisterError::AlreadyRegistered(0))
    );
    assert_eq!(
        registry.register(TYPE_MAX, |_: u32, _: &[u8]| {}),
        Err(RegisterError::OutOfRange {
            msg_type: TYPE_MAX,
            max: TYPE_MAX
        })
    );
    assert!(registry.register(TYPE_MAX - 1, |_: u32, _: &[u8]| {}).is_ok());
}

#[test]
fn test_dispatch_from_many_threads() {
    let registry = Arc::new(Registry::new());
    let total = Arc::new(AtomicUsize::new(0));
    let sum = total.clone();
    registry
        .register(1, move |_: u32, body: &[u8]| {
            sum.fetch_add(body.len(), Ordering::Relaxed);
        })
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    registry.dispatch(1, &[0u8; 3]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), 4 * 1000 * 3);
}

#[test]
fn test_block_sharding() {
    let sharding = BlockSharding { per_worker: 2 };
    assert_eq!(sharding.worker_for(0), 0);
    assert_eq!(sharding.worker_for(1), 0);
    assert_eq!(sharding.worker_for(3), 1);
    assert_eq!(sharding.queues_of(1, 6), vec![2, 3]);
    assert_eq!(sharding.queues_of(3, 6), Vec::<usize>::new());
}

#[test]
fn test_modulo_sharding() {
    let sharding = ModuloSharding { workers: 3 };
    assert_eq!(sharding.worker_for(4), 1);
    assert_eq!(sharding.queues_of(0, 7), vec![0, 3, 6]);

    // Every queue has exactly one owner
    let mut owners = vec![0; 7];
    for w in 0..3 {
        for q in sharding.queues_of(w, 7) {
            owners[q] += 1;
        }
    }
    assert!(owners.iter().all(|&n| n == 1));
}
