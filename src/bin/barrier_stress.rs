//! Barrier Stress Driver
//!
//! Simulasi write barrier: N mutator thread meng-enqueue pointer ke queue
//! masing-masing, satu refinement thread men-drain completed buffer dan
//! mengembalikan node ke allocator. Di akhir, total entry diverifikasi:
//! tidak ada yang hilang, tidak ada yang dobel.
//!
//! Usage:
//!   cargo run --release --bin barrier_stress -- [OPTIONS]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ptrqueue::cpu_time::{self, CpuTimeCounters, CpuTimeType, ThreadTotalCpuTime};
use ptrqueue::{Allocator, AllocatorConfig, CompletedBufferList, PtrQueue, PtrQueueSet};
use tracing_subscriber::EnvFilter;

type BarrierSet = PtrQueueSet<Arc<CompletedBufferList>>;

/// Konfigurasi stress run
struct StressConfig {
    threads: usize,
    values: u64,
    capacity: usize,
    initial_nodes: usize,
    cpu_time: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            values: 1_000_000,
            capacity: 256,
            initial_nodes: 64,
            cpu_time: true,
        }
    }
}

/// Hasil drain refinement thread
#[derive(Default)]
struct DrainStats {
    buffers: u64,
    entries: u64,
    checksum: u128,
    cpu_time: Option<Duration>,
}

fn value_for(thread: usize, i: u64) -> u64 {
    ((thread as u64) << 40) | (i + 1)
}

fn expected_checksum(config: &StressConfig) -> u128 {
    (0..config.threads)
        .flat_map(|t| (0..config.values).map(move |i| value_for(t, i) as u128))
        .sum()
}

fn run_mutator(set: &BarrierSet, thread: usize, values: u64) -> Option<Duration> {
    let mut queue = PtrQueue::new(set);
    for i in 0..values {
        set.enqueue(&mut queue, value_for(thread, i) as usize as *mut ());
    }
    set.flush_queue(&mut queue);
    cpu_time::thread_cpu_time()
}

fn run_refinement(set: &BarrierSet, done: &AtomicBool) -> DrainStats {
    let mut stats = DrainStats::default();
    loop {
        // Baca flag sebelum drain: setelah flag true, drain terakhir pasti
        // melihat semua flush dari mutator.
        let finished = done.load(Ordering::Acquire);
        let nodes = set.sink().take_all();
        if nodes.is_empty() {
            if finished {
                break;
            }
            thread::yield_now();
            continue;
        }
        for node in nodes {
            stats.buffers += 1;
            stats.entries += node.size() as u64;
            stats.checksum += node.entries().iter().map(|p| *p as usize as u128).sum::<u128>();
            set.deallocate_buffer(node);
        }
    }
    stats.cpu_time = cpu_time::thread_cpu_time();
    stats
}

fn run_stress(config: StressConfig) -> Result<bool, ptrqueue::BufferError> {
    let allocator = Allocator::with_config(
        AllocatorConfig::new(config.capacity)
            .with_name("barrier-stress")
            .with_initial_nodes(config.initial_nodes),
    )?;
    let completed = Arc::new(CompletedBufferList::new(&allocator));
    let set: BarrierSet = PtrQueueSet::new(allocator, completed);

    let mut counters = CpuTimeCounters::new(config.cpu_time);
    counters.create_counter(CpuTimeType::GcConcRefine);
    counters.create_counter(CpuTimeType::Vm);

    println!("🚀 Barrier Stress - PtrQueue");
    println!("============================");
    println!("   Mutators:  {}", config.threads);
    println!("   Values:    {} per thread", config.values);
    println!("   Capacity:  {} slots/buffer\n", config.capacity);

    let done = AtomicBool::new(false);
    let start = Instant::now();

    let (mutator_cpu, drain) = thread::scope(|s| {
        let refinement = s.spawn(|| run_refinement(&set, &done));
        let mutators: Vec<_> = (0..config.threads)
            .map(|t| {
                let set = &set;
                let values = config.values;
                s.spawn(move || run_mutator(set, t, values))
            })
            .collect();

        let cpu: Vec<_> = mutators
            .into_iter()
            .map(|h| h.join().unwrap_or_default())
            .collect();
        done.store(true, Ordering::Release);
        (cpu, refinement.join().unwrap_or_default())
    });
    let elapsed = start.elapsed();

    {
        let mut vm = ThreadTotalCpuTime::new(&counters, CpuTimeType::Vm);
        mutator_cpu.into_iter().flatten().for_each(|t| vm.add(t));
    }
    {
        let mut refine = ThreadTotalCpuTime::new(&counters, CpuTimeType::GcConcRefine);
        if let Some(t) = drain.cpu_time {
            refine.add(t);
        }
    }
    counters.publish_gc_total_cpu_time();

    let expected_entries = config.threads as u64 * config.values;
    let ok = drain.entries == expected_entries && drain.checksum == expected_checksum(&config);

    let rate = expected_entries as f64 / elapsed.as_secs_f64() / 1_000_000.0;
    println!("📊 Results ({:.3}s)", elapsed.as_secs_f64());
    println!("   Enqueued:    {}", expected_entries);
    println!("   Drained:     {} entries in {} buffers", drain.entries, drain.buffers);
    println!("   Throughput:  {:.2} M enqueues/sec", rate);
    println!(
        "   Allocator:   {} nodes carved, {} free, {} KB mapped",
        set.allocator().allocated_count(),
        set.allocator().free_count(),
        set.allocator().reserved_bytes() / 1024
    );
    for name in [CpuTimeType::Vm, CpuTimeType::GcConcRefine, CpuTimeType::GcTotal] {
        if let Some(counter) = counters.get_counter(name) {
            println!(
                "   CPU {:<18} {:.3} ms",
                name.as_str(),
                counter.get() as f64 / 1_000_000.0
            );
        }
    }

    if ok {
        println!("\n✅ No lost or duplicated entries");
    } else {
        println!(
            "\n❌ Verification failed: expected {} entries, drained {}",
            expected_entries, drain.entries
        );
    }
    Ok(ok)
}

fn parse_args() -> StressConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = StressConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--threads" | "-t" => {
                if i + 1 < args.len() {
                    config.threads = args[i + 1].parse().unwrap_or(config.threads);
                    i += 1;
                }
            }
            "--values" | "-n" => {
                if i + 1 < args.len() {
                    config.values = args[i + 1].parse().unwrap_or(config.values);
                    i += 1;
                }
            }
            "--capacity" | "-c" => {
                if i + 1 < args.len() {
                    config.capacity = args[i + 1].parse().unwrap_or(config.capacity);
                    i += 1;
                }
            }
            "--initial-nodes" => {
                if i + 1 < args.len() {
                    config.initial_nodes = args[i + 1].parse().unwrap_or(config.initial_nodes);
                    i += 1;
                }
            }
            "--no-cpu-time" => {
                config.cpu_time = false;
            }
            "--help" | "-h" => {
                println!("Barrier Stress - lock-free pointer queue stress driver\n");
                println!("Usage: barrier_stress [OPTIONS]\n");
                println!("Options:");
                println!("  -t, --threads <N>        Mutator threads (default: 4)");
                println!("  -n, --values <N>         Values per thread (default: 1000000)");
                println!("  -c, --capacity <N>       Slots per buffer (default: 256)");
                println!("      --initial-nodes <N>  Nodes in first arena segment (default: 64)");
                println!("      --no-cpu-time        Disable CPU time counters");
                println!("  -h, --help               Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = parse_args();

    match run_stress(config) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("❌ Stress error: {}", e);
            std::process::exit(1);
        }
    }
}
