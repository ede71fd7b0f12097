//! Concurrent Stress Test - Banyak mutator, satu refinement thread
//!
//! N producer thread masing-masing meng-enqueue M nilai unik ke queue
//! miliknya, semua berbagi satu PtrQueueSet. Consumer men-drain completed
//! buffer dan mengembalikan node. Total entry harus tepat N x M, tanpa
//! hilang dan tanpa duplikat.
//!
//! Usage:
//!   cargo test --release --test concurrent_stress -- --nocapture

#![cfg(not(loom))]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use ptrqueue::{
    Allocator, AllocatorConfig, CompletedBufferList, CompletedBufferSink, NodeHandle, PtrQueue,
    PtrQueueSet,
};

const THREAD_SHIFT: u32 = 32;

fn value_for(thread: usize, i: usize) -> *mut () {
    (((thread as u64) << THREAD_SHIFT) | (i as u64 + 1)) as usize as *mut ()
}

/// Statistik drain di sisi consumer
struct DrainStats {
    buffers: AtomicU64,
    entries: AtomicU64,
}

impl DrainStats {
    fn new() -> Self {
        Self {
            buffers: AtomicU64::new(0),
            entries: AtomicU64::new(0),
        }
    }
}

/// Drain sampai `done` terlihat dan list kosong; kembalikan semua nilai.
fn drain_until_done(
    set: &PtrQueueSet<Arc<CompletedBufferList>>,
    done: &AtomicBool,
    stats: &DrainStats,
) -> Vec<usize> {
    let mut seen = Vec::new();
    loop {
        let finished = done.load(Ordering::Acquire);
        let nodes = set.sink().take_all();
        if nodes.is_empty() {
            if finished {
                return seen;
            }
            thread::yield_now();
            continue;
        }
        for node in nodes {
            stats.buffers.fetch_add(1, Ordering::Relaxed);
            stats.entries.fetch_add(node.size() as u64, Ordering::Relaxed);
            seen.extend(node.entries().iter().map(|p| *p as usize));
            set.deallocate_buffer(node);
        }
    }
}

fn run_conservation(threads: usize, per_thread: usize, capacity: usize) {
    let allocator = Allocator::with_config(
        AllocatorConfig::new(capacity)
            .with_name("stress")
            .with_initial_nodes(4),
    )
    .unwrap();
    let completed = Arc::new(CompletedBufferList::new(&allocator));
    let set = PtrQueueSet::new(allocator, completed);
    let done = AtomicBool::new(false);
    let stats = DrainStats::new();

    let start = Instant::now();
    let seen = thread::scope(|s| {
        let consumer = s.spawn(|| drain_until_done(&set, &done, &stats));
        let producers: Vec<_> = (0..threads)
            .map(|t| {
                let set = &set;
                s.spawn(move || {
                    let mut queue = PtrQueue::new(set);
                    for i in 0..per_thread {
                        set.enqueue(&mut queue, value_for(t, i));
                    }
                    set.flush_queue(&mut queue);
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        consumer.join().unwrap()
    });
    let duration = start.elapsed();

    println!(
        "📊 {} threads x {} values (cap {}): {} buffers in {:.2}ms",
        threads,
        per_thread,
        capacity,
        stats.buffers.load(Ordering::Relaxed),
        duration.as_secs_f64() * 1000.0
    );

    assert_eq!(seen.len(), threads * per_thread, "entries lost or duplicated");
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len(), "duplicate entries observed");
    for t in 0..threads {
        for i in [0, per_thread / 2, per_thread - 1] {
            assert!(unique.contains(&(value_for(t, i) as usize)));
        }
    }

    // Semua node kembali ke free list setelah drain.
    assert!(set.sink().is_empty());
    assert_eq!(set.sink().entry_count(), 0);
    assert_eq!(set.allocator().free_count(), set.allocator().allocated_count());
}

#[test]
fn test_conservation_small_buffers() {
    run_conservation(4, 10_000, 4);
}

#[test]
fn test_conservation_default_buffers() {
    run_conservation(8, 20_000, 256);
}

#[test]
fn test_conservation_uneven_capacity() {
    run_conservation(3, 9_999, 7);
}

/// Sink yang memproses node langsung di thread pemanggil.
struct CountingSink {
    entries: AtomicU64,
    calls: AtomicU64,
    released: Mutex<Vec<NodeHandle>>,
}

impl CompletedBufferSink for CountingSink {
    fn enqueue_completed_buffer(&self, node: NodeHandle) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.entries.fetch_add(node.size() as u64, Ordering::Relaxed);
        self.released.lock().unwrap().push(node);
    }
}

#[test]
fn test_partial_buffers_counted_once() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 1_001;
    const CAPACITY: usize = 10;

    let sink = CountingSink {
        entries: AtomicU64::new(0),
        calls: AtomicU64::new(0),
        released: Mutex::new(Vec::new()),
    };
    let set = PtrQueueSet::new(Allocator::new("partial", CAPACITY), sink);

    thread::scope(|s| {
        for t in 0..THREADS {
            let set = &set;
            s.spawn(move || {
                let mut queue = PtrQueue::new(set);
                for i in 0..PER_THREAD {
                    set.enqueue(&mut queue, value_for(t, i));
                }
                set.flush_queue(&mut queue);
            });
        }
    });

    let sink = set.sink();
    assert_eq!(
        sink.entries.load(Ordering::Relaxed),
        (THREADS * PER_THREAD) as u64
    );
    // 1001 = 100 buffer penuh + 1 buffer parsial per thread
    assert_eq!(sink.calls.load(Ordering::Relaxed), (THREADS * 101) as u64);

    let nodes: Vec<_> = sink.released.lock().unwrap().drain(..).collect();
    assert_eq!(nodes.iter().filter(|n| n.size() == 1).count(), THREADS);
    for node in nodes {
        set.deallocate_buffer(node);
    }
}

#[test]
fn test_free_list_reuse_under_churn() {
    let allocator = Allocator::new("churn", 16);
    let list = CompletedBufferList::new(&allocator);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..5_000 {
                    let node = allocator.allocate();
                    assert!(node.is_empty());
                    list.enqueue_completed_buffer(node);
                    if let Some(node) = list.pop() {
                        allocator.release(node);
                    }
                }
            });
        }
    });

    for node in list.take_all() {
        allocator.release(node);
    }
    // Node selalu di-recycle, jadi jumlahnya dibatasi jumlah thread.
    assert!(allocator.allocated_count() <= 8);
    assert_eq!(allocator.free_count(), allocator.allocated_count());
}

#[test]
fn test_completed_buffers_outlive_queue_set() {
    let allocator = Allocator::new("outlive", 8);
    let completed = Arc::new(CompletedBufferList::new(&allocator));
    {
        let set = PtrQueueSet::new(allocator, Arc::clone(&completed));
        let mut queue = PtrQueue::new(&set);
        for i in 0..20 {
            set.enqueue(&mut queue, value_for(0, i));
        }
        set.flush_queue(&mut queue);
    }

    // Set (dan allocator-nya) sudah di-drop; isi buffer masih terbaca.
    let nodes = completed.take_all();
    assert_eq!(nodes.iter().map(|n| n.size()).sum::<usize>(), 20);
    let seen: HashSet<_> = nodes
        .iter()
        .flat_map(|n| n.entries().iter().map(|p| *p as usize))
        .collect();
    assert_eq!(seen.len(), 20);
    assert!(seen.contains(&(value_for(0, 19) as usize)));
}
