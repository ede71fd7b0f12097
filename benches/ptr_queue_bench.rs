//! Criterion benchmark untuk PtrQueue
//!
//! Run dengan: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use ptrqueue::{Allocator, CompletedBufferList, PtrQueue, PtrQueueSet};

fn new_set(capacity: usize) -> PtrQueueSet<Arc<CompletedBufferList>> {
    let allocator = Allocator::new("bench", capacity);
    let completed = Arc::new(CompletedBufferList::new(&allocator));
    PtrQueueSet::new(allocator, completed)
}

/// Kembalikan semua completed buffer ke free list.
fn recycle(set: &PtrQueueSet<Arc<CompletedBufferList>>) {
    while let Some(node) = set.sink().pop() {
        set.deallocate_buffer(node);
    }
}

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("ptr_queue");
    group.throughput(Throughput::Elements(1));

    // Fast path saja: reset saat buffer penuh, tanpa exchange
    group.bench_function("try_enqueue", |b| {
        let set = new_set(1024);
        let mut queue = PtrQueue::new(&set);
        set.install_new_buffer(&mut queue);
        let mut i = 0usize;
        b.iter(|| {
            if !set.try_enqueue(&mut queue, black_box(i as *mut ())) {
                set.reset_queue(&mut queue);
            }
            i = i.wrapping_add(1);
        });
        set.reset_queue(&mut queue);
        set.flush_queue(&mut queue);
    });

    // Enqueue penuh termasuk exchange buffer
    for capacity in [64usize, 256, 1024] {
        group.bench_function(format!("enqueue_cap_{}", capacity), |b| {
            let set = new_set(capacity);
            let mut queue = PtrQueue::new(&set);
            let mut i = 0usize;
            b.iter(|| {
                set.enqueue(&mut queue, black_box(i as *mut ()));
                i = i.wrapping_add(1);
                if i % capacity == 0 {
                    recycle(&set);
                }
            });
            set.flush_queue(&mut queue);
            recycle(&set);
        });
    }

    group.finish();
}

fn bench_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator");
    group.throughput(Throughput::Elements(1));

    group.bench_function("allocate_release", |b| {
        let allocator = Allocator::new("bench", 256);
        b.iter(|| {
            let node = allocator.allocate();
            allocator.release(black_box(node));
        });
    });

    group.bench_function("exchange_buffer", |b| {
        let set = new_set(256);
        let mut queue = PtrQueue::new(&set);
        set.install_new_buffer(&mut queue);
        b.iter(|| {
            if let Some(old) = set.exchange_buffer_with_new(&mut queue) {
                set.deallocate_buffer(black_box(old));
            }
        });
        set.flush_queue(&mut queue);
    });

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_allocator);
criterion_main!(benches);
