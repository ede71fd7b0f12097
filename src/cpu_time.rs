//! CPU Time Counters untuk thread GC
//!
//! Context object yang dibuat sekali saat startup lalu di-pass eksplisit,
//! bukan singleton global. Semua update atomic, aman dipanggil dari banyak
//! worker thread sekaligus.

use std::fmt;
use std::time::Duration;

use crate::sync::atomic::{AtomicI64, Ordering};

/// Grup waktu CPU yang dilacak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuTimeType {
    GcTotal,
    GcParallelWorkers,
    GcConcMark,
    GcConcRefine,
    GcService,
    Vm,
    ConcDedup,
}

impl CpuTimeType {
    pub const ALL: [CpuTimeType; 7] = [
        CpuTimeType::GcTotal,
        CpuTimeType::GcParallelWorkers,
        CpuTimeType::GcConcMark,
        CpuTimeType::GcConcRefine,
        CpuTimeType::GcService,
        CpuTimeType::Vm,
        CpuTimeType::ConcDedup,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            CpuTimeType::GcTotal => "total_gc_cpu_time",
            CpuTimeType::GcParallelWorkers => "gc_parallel_workers",
            CpuTimeType::GcConcMark => "gc_conc_mark",
            CpuTimeType::GcConcRefine => "gc_conc_refine",
            CpuTimeType::GcService => "gc_service",
            CpuTimeType::Vm => "vm",
            CpuTimeType::ConcDedup => "conc_dedup",
        }
    }

    /// Grup yang ikut dijumlahkan ke `GcTotal`.
    pub const fn is_gc_counter(self) -> bool {
        matches!(
            self,
            CpuTimeType::GcParallelWorkers
                | CpuTimeType::GcConcMark
                | CpuTimeType::GcConcRefine
                | CpuTimeType::GcService
        )
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CpuTimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter monotonic dalam nanodetik.
pub struct CpuTimeCounter {
    name: CpuTimeType,
    ticks: AtomicI64,
}

impl CpuTimeCounter {
    fn new(name: CpuTimeType) -> Self {
        Self {
            name,
            ticks: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> CpuTimeType {
        self.name
    }

    #[inline]
    pub fn inc(&self, ticks: i64) {
        self.ticks.fetch_add(ticks, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CpuTimeCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuTimeCounter")
            .field("name", &self.name.as_str())
            .field("ticks", &self.get())
            .finish()
    }
}

/// Kumpulan counter CPU time per grup.
#[derive(Debug)]
pub struct CpuTimeCounters {
    counters: [Option<CpuTimeCounter>; CpuTimeType::ALL.len()],
    gc_total_cpu_time_diff: AtomicI64,
}

impl CpuTimeCounters {
    /// Counter hanya dibuat jika `enabled` dan platform mendukung CPU time
    /// per thread. Counter `GcTotal` selalu dibuat dalam kondisi itu.
    pub fn new(enabled: bool) -> Self {
        let mut counters = Self {
            counters: Default::default(),
            gc_total_cpu_time_diff: AtomicI64::new(0),
        };
        counters.counters[CpuTimeType::GcTotal.slot()] = (enabled
            && is_thread_cpu_time_supported())
        .then(|| CpuTimeCounter::new(CpuTimeType::GcTotal));
        tracing::debug!(
            enabled = counters.is_enabled(),
            "cpu time counters initialized"
        );
        counters
    }

    pub fn is_enabled(&self) -> bool {
        self.counters[CpuTimeType::GcTotal.slot()].is_some()
    }

    /// Daftarkan counter untuk sebuah grup. No-op jika counters disabled.
    pub fn create_counter(&mut self, name: CpuTimeType) {
        if self.is_enabled() && self.counters[name.slot()].is_none() {
            self.counters[name.slot()] = Some(CpuTimeCounter::new(name));
        }
    }

    pub fn get_counter(&self, name: CpuTimeType) -> Option<&CpuTimeCounter> {
        self.counters[name.slot()].as_ref()
    }

    /// Tambah selisih yang belum dipublish ke `GcTotal`.
    pub fn inc_gc_total_cpu_time(&self, diff: i64) {
        self.gc_total_cpu_time_diff.fetch_add(diff, Ordering::Relaxed);
    }

    /// Ambil selisih yang tertunda (reset ke 0) lalu tambahkan ke `GcTotal`.
    pub fn publish_gc_total_cpu_time(&self) {
        let mut fetched = self.gc_total_cpu_time_diff.load(Ordering::Relaxed);
        // Retry sampai nilai yang kita nol-kan sama dengan yang kita baca.
        while let Err(actual) = self.gc_total_cpu_time_diff.compare_exchange_weak(
            fetched,
            0,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            fetched = actual;
        }
        if let Some(total) = self.get_counter(CpuTimeType::GcTotal) {
            total.inc(fetched);
        }
    }

    /// Nilai yang belum dipublish (diagnostic).
    pub fn pending_gc_total_cpu_time(&self) -> i64 {
        self.gc_total_cpu_time_diff.load(Ordering::Relaxed)
    }
}

/// Akumulator CPU time untuk satu grup thread.
///
/// Saat di-drop, counter grup di-set ke total terkumpul. Untuk grup GC,
/// selisih bersihnya juga ditambahkan ke pending `GcTotal`.
pub struct ThreadTotalCpuTime<'a> {
    counters: &'a CpuTimeCounters,
    name: CpuTimeType,
    total: i64,
}

impl<'a> ThreadTotalCpuTime<'a> {
    pub fn new(counters: &'a CpuTimeCounters, name: CpuTimeType) -> Self {
        Self {
            counters,
            name,
            total: 0,
        }
    }

    /// Tambahkan CPU time satu thread (diukur oleh caller).
    pub fn add(&mut self, cpu_time: Duration) {
        self.total += i64::try_from(cpu_time.as_nanos()).unwrap_or(i64::MAX);
    }

    /// Tambahkan CPU time thread pemanggil.
    ///
    /// # Panics
    /// Panic jika platform tidak mendukung CPU time per thread.
    pub fn add_current_thread(&mut self) {
        let cpu_time = thread_cpu_time();
        assert!(cpu_time.is_some(), "os must support thread cpu time");
        self.add(cpu_time.unwrap_or_default());
    }

    pub fn total(&self) -> i64 {
        self.total
    }
}

impl Drop for ThreadTotalCpuTime<'_> {
    fn drop(&mut self) {
        let Some(counter) = self.counters.get_counter(self.name) else {
            return;
        };
        let net_cpu_time = self.total - counter.get();
        counter.inc(net_cpu_time);
        if self.name.is_gc_counter() {
            self.counters.inc_gc_total_cpu_time(net_cpu_time);
        }
    }
}

/// Apakah platform menyediakan CPU time per thread.
pub fn is_thread_cpu_time_supported() -> bool {
    cfg!(unix)
}

/// CPU time yang sudah dipakai thread pemanggil.
#[cfg(unix)]
pub fn thread_cpu_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` valid dan writable selama pemanggilan.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

#[cfg(not(unix))]
pub fn thread_cpu_time() -> Option<Duration> {
    None
}
