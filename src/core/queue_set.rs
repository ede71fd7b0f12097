//! Pointer Queue Set: koordinator buffer untuk semua per-thread queue
//!
//! Alur data:
//! 1. Producer memanggil `try_enqueue` pada queue miliknya (tanpa lock)
//! 2. Buffer penuh -> `exchange_buffer_with_new` memasang node baru
//! 3. Node lama diteruskan ke `CompletedBufferSink` milik collector
//! 4. Collector memproses isi node lalu mengembalikannya lewat `deallocate_buffer`

use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::core::allocator::Allocator;
use crate::core::buffer_node::{NodeHandle, ELEMENT_SIZE};
use crate::core::ptr_queue::PtrQueue;
use crate::core::stack::NodeStack;
use crate::sync::atomic::{AtomicUsize, Ordering};

/// Tujuan node yang sudah selesai dipakai mutator (completed buffer).
///
/// Node yang diterima belum tentu penuh. Implementasi wajib, cepat atau
/// lambat, mengembalikan node ke allocator setelah isinya diproses.
pub trait CompletedBufferSink {
    fn enqueue_completed_buffer(&self, node: NodeHandle);
}

impl<T: CompletedBufferSink + ?Sized> CompletedBufferSink for Arc<T> {
    fn enqueue_completed_buffer(&self, node: NodeHandle) {
        (**self).enqueue_completed_buffer(node)
    }
}

/// Resource bersama untuk sekumpulan [`PtrQueue`]: allocator node dan sink
/// completed buffer.
pub struct PtrQueueSet<S> {
    allocator: Allocator,
    sink: S,
}

impl<S: CompletedBufferSink> PtrQueueSet<S> {
    pub fn new(allocator: Allocator, sink: S) -> Self {
        Self { allocator, sink }
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[inline(always)]
    pub fn buffer_capacity(&self) -> usize {
        self.allocator.buffer_capacity()
    }

    /// Queue hanya boleh dilayani set tempat ia dibuat.
    #[inline(always)]
    fn check_bound(&self, queue: &PtrQueue) {
        assert!(
            queue.is_bound_to(&self.allocator),
            "ptr queue is bound to a different queue set (allocator `{}`)",
            self.allocator.name()
        );
    }

    /// Buang isi buffer queue tanpa meneruskannya ke mana pun.
    pub fn reset_queue(&self, queue: &mut PtrQueue) {
        self.check_bound(queue);
        if !queue.buffer().is_null() {
            queue.set_index(self.buffer_capacity());
        }
    }

    /// Jika queue punya isi, teruskan buffer-nya sebagai completed buffer.
    /// Jika kosong, kembalikan node-nya langsung ke free list.
    pub fn flush_queue(&self, queue: &mut PtrQueue) {
        self.check_bound(queue);
        let Some(buffer) = NonNull::new(queue.buffer()) else {
            return;
        };
        let index = queue.index();
        queue.set_buffer(ptr::null_mut());
        queue.set_index(0);

        let arena = Arc::clone(self.allocator.arena());
        // SAFETY: queue memegang node ini sampai baris di atas; sekarang kita.
        let mut node = unsafe { NodeHandle::from_buffer(buffer, arena) };
        node.set_index(index);
        if node.is_empty() {
            self.deallocate_buffer(node);
        } else {
            self.enqueue_completed_buffer(node);
        }
    }

    /// Tambahkan `value` ke buffer queue. `false` (tanpa efek apa pun) jika
    /// buffer penuh atau queue belum punya buffer.
    #[inline(always)]
    pub fn try_enqueue(&self, queue: &mut PtrQueue, value: *mut ()) -> bool {
        self.check_bound(queue);
        let index = queue.byte_index();
        // Queue tanpa buffer selalu punya index 0.
        if index == 0 {
            return false;
        }
        let buffer = queue.buffer();
        debug_assert!(!buffer.is_null(), "non-zero index without a buffer");
        let index = index - ELEMENT_SIZE;
        queue.set_byte_index(index);
        // SAFETY: index < capacity dalam byte, slot milik queue ini.
        unsafe { buffer.cast::<u8>().add(index).cast::<*mut ()>().write(value) };
        true
    }

    /// Tambahkan `value` setelah kondisi buffer penuh sudah diselesaikan.
    ///
    /// # Panics
    /// Panic jika buffer masih penuh atau belum ada.
    #[inline]
    pub fn retry_enqueue(&self, queue: &mut PtrQueue, value: *mut ()) {
        assert!(
            queue.byte_index() != 0,
            "retry_enqueue requires a non-full buffer"
        );
        let ok = self.try_enqueue(queue, value);
        debug_assert!(ok);
    }

    /// Pasang buffer baru ke queue, lalu kembalikan node lama (sekarang
    /// milik caller), atau `None` jika queue belum punya buffer.
    #[must_use = "the previous node must be routed to a sink or deallocated"]
    pub fn exchange_buffer_with_new(&self, queue: &mut PtrQueue) -> Option<NodeHandle> {
        self.check_bound(queue);
        let old = NonNull::new(queue.buffer()).map(|buffer| {
            let arena = Arc::clone(self.allocator.arena());
            // SAFETY: buffer terpasang di queue dan segera diganti di bawah.
            let mut node = unsafe { NodeHandle::from_buffer(buffer, arena) };
            node.set_index(queue.index());
            node
        });
        self.install_new_buffer(queue);
        old
    }

    /// Pasang node kosong baru ke queue. Buffer lama (jika ada) harus sudah
    /// diserahkan atau dibuang oleh caller.
    pub fn install_new_buffer(&self, queue: &mut PtrQueue) {
        self.check_bound(queue);
        let node = self.allocator.allocate();
        queue.set_buffer(node.into_buffer().as_ptr());
        queue.set_index(self.buffer_capacity());
    }

    /// Enqueue lengkap: coba fast path; jika gagal, ganti buffer (buffer
    /// lama yang penuh diteruskan ke sink) lalu retry.
    #[inline]
    pub fn enqueue(&self, queue: &mut PtrQueue, value: *mut ()) {
        if self.try_enqueue(queue, value) {
            return;
        }
        self.handle_full_buffer(queue);
        self.retry_enqueue(queue, value);
    }

    #[cold]
    fn handle_full_buffer(&self, queue: &mut PtrQueue) {
        if let Some(old) = self.exchange_buffer_with_new(queue) {
            self.enqueue_completed_buffer(old);
        }
    }

    /// Node kosong yang tidak terikat ke queue mana pun.
    pub fn allocate_buffer(&self) -> NodeHandle {
        self.allocator.allocate()
    }

    /// Kembalikan node ke free list. Node harus berasal dari allocator ini.
    pub fn deallocate_buffer(&self, node: NodeHandle) {
        self.allocator.release(node);
    }

    #[inline]
    pub fn enqueue_completed_buffer(&self, node: NodeHandle) {
        self.sink.enqueue_completed_buffer(node);
    }
}

impl<S> fmt::Debug for PtrQueueSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtrQueueSet")
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}

/// Sink siap pakai: lock-free stack dari completed buffer.
pub struct CompletedBufferList {
    stack: NodeStack,
    entry_count: AtomicUsize,
}

impl CompletedBufferList {
    pub fn new(allocator: &Allocator) -> Self {
        Self {
            stack: allocator.new_stack(),
            entry_count: AtomicUsize::new(0),
        }
    }

    /// Ambil satu completed buffer (LIFO).
    pub fn pop(&self) -> Option<NodeHandle> {
        let node = self.stack.pop()?;
        self.entry_count.fetch_sub(node.size(), Ordering::Relaxed);
        Some(node)
    }

    /// Ambil semua completed buffer sekaligus.
    pub fn take_all(&self) -> Vec<NodeHandle> {
        let nodes = self.stack.take_all();
        let entries: usize = nodes.iter().map(|n| n.size()).sum();
        self.entry_count.fetch_sub(entries, Ordering::Relaxed);
        nodes
    }

    pub fn buffer_count(&self) -> usize {
        self.stack.len()
    }

    /// Total entry di semua completed buffer. Perkiraan saat ada kontensi.
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl CompletedBufferSink for CompletedBufferList {
    fn enqueue_completed_buffer(&self, node: NodeHandle) {
        // Hitung dulu; pop di thread lain bisa mengurangi sebelum kita tambah.
        self.entry_count.fetch_add(node.size(), Ordering::Relaxed);
        self.stack.push(node);
    }
}

impl fmt::Debug for CompletedBufferList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletedBufferList")
            .field("buffers", &self.buffer_count())
            .field("entries", &self.entry_count())
            .finish()
    }
}
