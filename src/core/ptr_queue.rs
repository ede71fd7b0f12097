//! Per-Thread Pointer Queue
//!
//! Cursor tipis atas satu buffer node, dimiliki satu producer thread.
//! Layout `#[repr(C)]` dengan offset field yang stabil supaya fast path
//! barrier yang di-generate bisa membaca/menulis `index` dan `buf` langsung.

use std::mem;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use crate::core::allocator::Allocator;
use crate::core::arena::NodeArena;
use crate::core::buffer_node::{BufferNode, ELEMENT_SIZE};
use crate::core::queue_set::{CompletedBufferSink, PtrQueueSet};

/// Queue milik satu thread, terikat ke satu [`PtrQueueSet`] sejak dibuat.
/// Semua operasi lewat set tersebut; set lain akan menolaknya.
///
/// Queue harus sudah di-flush (tidak memegang buffer) sebelum di-drop.
#[repr(C)]
pub struct PtrQueue {
    // Byte index slot terakhir yang diisi. Mulai dari capacity (dalam byte,
    // buffer kosong) dan turun ke 0. Selalu kelipatan ELEMENT_SIZE.
    index: usize,
    buf: *mut *mut (),
    // Arena milik set: identitas binding, sekaligus menjaga node di `buf`
    // tetap ter-map.
    arena: Arc<NodeArena>,
}

// SAFETY: Queue hanya diakses oleh pemiliknya; memindahkan queue ke thread
// lain memindahkan kepemilikan buffer-nya juga.
unsafe impl Send for PtrQueue {}

#[inline(always)]
fn byte_index_to_index(ind: usize) -> usize {
    debug_assert!(ind % ELEMENT_SIZE == 0, "unaligned byte index {}", ind);
    ind / ELEMENT_SIZE
}

#[inline(always)]
fn index_to_byte_index(ind: usize) -> usize {
    ind * ELEMENT_SIZE
}

impl PtrQueue {
    /// Queue tanpa buffer (`current_capacity() == 0`), terikat ke `set`.
    pub fn new<S: CompletedBufferSink>(set: &PtrQueueSet<S>) -> Self {
        Self::for_allocator(set.allocator())
    }

    pub(crate) fn for_allocator(allocator: &Allocator) -> Self {
        Self {
            index: 0,
            buf: ptr::null_mut(),
            arena: Arc::clone(allocator.arena()),
        }
    }

    #[inline(always)]
    pub(crate) fn is_bound_to(&self, allocator: &Allocator) -> bool {
        Arc::ptr_eq(&self.arena, allocator.arena())
    }

    #[inline(always)]
    pub fn buffer(&self) -> *mut *mut () {
        self.buf
    }

    #[inline(always)]
    pub(crate) fn set_buffer(&mut self, buffer: *mut *mut ()) {
        self.buf = buffer;
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        byte_index_to_index(self.index)
    }

    /// # Panics
    /// Panic jika `new_index > current_capacity()`.
    #[inline(always)]
    pub fn set_index(&mut self, new_index: usize) {
        assert!(
            new_index <= self.current_capacity(),
            "queue index {} exceeds capacity {}",
            new_index,
            self.current_capacity()
        );
        self.index = index_to_byte_index(new_index);
    }

    #[inline(always)]
    pub(crate) fn byte_index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub(crate) fn set_byte_index(&mut self, byte_index: usize) {
        self.index = byte_index;
    }

    /// Kapasitas buffer, atau 0 jika queue belum punya buffer.
    pub fn current_capacity(&self) -> usize {
        match NonNull::new(self.buf) {
            // SAFETY: buffer yang terpasang selalu slot array dari node di
            // `self.arena`, yang tetap hidup selama queue ini hidup.
            Some(buf) => unsafe { BufferNode::make_node_from_buffer(buf).as_ref().capacity() },
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.index() == self.current_capacity()
    }

    pub fn size(&self) -> usize {
        self.current_capacity() - self.index()
    }

    // ------------------------------------------------------------------
    // Offset untuk compiled barrier fast path
    // ------------------------------------------------------------------

    pub const fn byte_offset_of_index() -> usize {
        mem::offset_of!(PtrQueue, index)
    }

    pub const fn byte_width_of_index() -> usize {
        mem::size_of::<usize>()
    }

    pub const fn byte_offset_of_buf() -> usize {
        mem::offset_of!(PtrQueue, buf)
    }

    pub const fn byte_width_of_buf() -> usize {
        ELEMENT_SIZE
    }
}

impl Drop for PtrQueue {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(self.buf.is_null(), "ptr queue dropped without being flushed");
        }
    }
}

impl std::fmt::Debug for PtrQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtrQueue")
            .field("arena", &self.arena.name())
            .field("index", &self.index())
            .field("capacity", &self.current_capacity())
            .field("buf", &self.buf)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::core::NodeHandle;

    #[test]
    fn test_new_queue_has_no_buffer() {
        let allocator = Allocator::new("queue-test", 4);
        let queue = PtrQueue::for_allocator(&allocator);
        assert!(queue.buffer().is_null());
        assert_eq!(queue.current_capacity(), 0);
        assert_eq!(queue.index(), 0);
        assert!(queue.is_empty());
        assert_eq!(queue.size(), 0);
        assert!(queue.is_bound_to(&allocator));
        assert!(!queue.is_bound_to(&Allocator::new("other", 4)));
    }

    #[test]
    fn test_field_offsets_match_layout() {
        assert_eq!(PtrQueue::byte_offset_of_index(), 0);
        assert_eq!(PtrQueue::byte_offset_of_buf(), mem::size_of::<usize>());
        assert_eq!(PtrQueue::byte_width_of_buf(), mem::size_of::<*mut ()>());

        let allocator = Allocator::new("queue-test", 4);
        let mut queue = PtrQueue::for_allocator(&allocator);
        queue.set_byte_index(3 * ELEMENT_SIZE);
        let base = &queue as *const PtrQueue as *const u8;
        let raw = unsafe { *(base.add(PtrQueue::byte_offset_of_index()) as *const usize) };
        assert_eq!(raw, 3 * ELEMENT_SIZE);
        queue.set_byte_index(0);
    }

    #[test]
    fn test_index_tracks_installed_buffer() {
        let allocator = Allocator::new("queue-test", 6);
        let mut queue = PtrQueue::for_allocator(&allocator);
        let node = allocator.allocate();
        queue.set_buffer(node.into_buffer().as_ptr());
        queue.set_index(6);

        assert_eq!(queue.current_capacity(), 6);
        assert!(queue.is_empty());
        queue.set_index(2);
        assert_eq!(queue.size(), 4);
        assert_eq!(queue.size() + queue.index(), queue.current_capacity());

        let buf = NonNull::new(queue.buffer()).unwrap();
        queue.set_buffer(ptr::null_mut());
        queue.set_index(0);
        let node = unsafe { NodeHandle::from_buffer(buf, Arc::clone(allocator.arena())) };
        allocator.release(node);
    }

    #[test]
    fn test_installed_buffer_survives_allocator_drop() {
        let mut queue = {
            let allocator = Allocator::new("queue-test", 4);
            let mut queue = PtrQueue::for_allocator(&allocator);
            queue.set_buffer(allocator.allocate().into_buffer().as_ptr());
            queue.set_index(1);
            queue
        };

        assert_eq!(queue.current_capacity(), 4);
        assert_eq!(queue.size(), 3);
        queue.set_buffer(ptr::null_mut());
        queue.set_index(0);
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn test_set_index_without_buffer() {
        let allocator = Allocator::new("queue-test", 4);
        let mut queue = PtrQueue::for_allocator(&allocator);
        queue.set_index(1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without being flushed")]
    fn test_drop_unflushed_queue() {
        let allocator = Allocator::new("queue-test", 2);
        let mut queue = PtrQueue::for_allocator(&allocator);
        queue.set_buffer(allocator.allocate().into_buffer().as_ptr());
        drop(queue);
    }
}
