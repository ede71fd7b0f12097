//! Buffer Node: header + array slot pointer dalam satu blok memori
//!
//! Layout (64-bit):
//! ```text
//! +-------+----------+------+----+---------------------------+
//! | index | capacity | next | id | slot[0] ... slot[cap - 1] |
//! +-------+----------+------+----+---------------------------+
//!  u32     u32        u32    u32   *mut () x capacity
//! ```
//!
//! Slot array selalu berada di offset tetap dari header, jadi pointer ke
//! slot array bisa dipetakan balik ke node-nya tanpa lookup table.

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use crate::core::arena::NodeArena;
use crate::sync::atomic::{AtomicU32, Ordering};

/// Tipe index internal yang ringkas. 64-bit: u32, 32-bit: u16.
#[cfg(target_pointer_width = "64")]
type InternalSize = u32;
#[cfg(not(target_pointer_width = "64"))]
type InternalSize = u16;

/// Sentinel untuk link `next` kosong / stack kosong.
pub(crate) const NIL: u32 = u32::MAX;

/// Lebar satu slot (pointer-size).
pub const ELEMENT_SIZE: usize = mem::size_of::<*mut ()>();

/// Header buffer node. Slot array mengikuti langsung setelah header.
///
/// Index dihitung *turun* dari `capacity` ke 0: `index == capacity` berarti
/// kosong, `index == 0` berarti penuh.
#[repr(C)]
pub struct BufferNode {
    index: InternalSize,
    capacity: InternalSize,
    // Link intrusive; hanya bermakna selama node ada di NodeStack.
    next: AtomicU32,
    id: u32,
    buffer: [*mut (); 0],
}

impl BufferNode {
    pub(crate) fn new(capacity: usize, id: u32) -> Self {
        debug_assert!(capacity <= Self::max_size());
        Self {
            index: capacity as InternalSize,
            capacity: capacity as InternalSize,
            next: AtomicU32::new(NIL),
            id,
            buffer: [],
        }
    }

    /// Kapasitas terbesar yang bisa direpresentasikan oleh index internal.
    pub const fn max_size() -> usize {
        InternalSize::MAX as usize
    }

    /// Offset byte dari awal node ke slot pertama.
    #[inline(always)]
    pub const fn buffer_offset() -> usize {
        mem::offset_of!(BufferNode, buffer)
    }

    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// # Panics
    /// Panic jika `i > capacity()`.
    #[inline(always)]
    pub fn set_index(&mut self, i: usize) {
        assert!(
            i <= self.capacity(),
            "buffer index {} exceeds capacity {}",
            i,
            self.capacity()
        );
        self.index = i as InternalSize;
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.index() == self.capacity()
    }

    #[inline(always)]
    pub fn size(&self) -> usize {
        self.capacity() - self.index()
    }

    /// Id stabil node di dalam arena allocator-nya.
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline(always)]
    pub(crate) fn next(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub(crate) fn set_next(&self, next: u32) {
        self.next.store(next, Ordering::Relaxed);
    }

    /// Node pemilik slot array `buffer`, TANPA mengubah index-nya.
    ///
    /// # Safety
    /// `buffer` harus berasal dari [`BufferNode::make_buffer_from_node`].
    #[inline(always)]
    pub unsafe fn make_node_from_buffer(buffer: NonNull<*mut ()>) -> NonNull<BufferNode> {
        let base = buffer.as_ptr().cast::<u8>().sub(Self::buffer_offset());
        NonNull::new_unchecked(base.cast())
    }

    /// Slot array milik `node`.
    ///
    /// # Safety
    /// `node` harus menunjuk ke node yang dialokasikan oleh arena, karena
    /// slot array hanya ada di belakang header pada alokasi tersebut.
    #[inline(always)]
    pub unsafe fn make_buffer_from_node(node: NonNull<BufferNode>) -> NonNull<*mut ()> {
        // Pakai byte offset, bukan &buffer[0], supaya provenance tetap
        // mencakup seluruh slot array.
        let base = node.as_ptr().cast::<u8>().add(Self::buffer_offset());
        NonNull::new_unchecked(base.cast())
    }
}

impl fmt::Debug for BufferNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferNode")
            .field("id", &self.id)
            .field("index", &self.index())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Pemilik tunggal sebuah [`BufferNode`].
///
/// Tidak `Clone`: memindahkan handle = memindahkan kepemilikan node antara
/// queue, free list, dan completed list. Handle ikut menahan arena asalnya,
/// jadi memori node tetap ter-map walaupun `Allocator`-nya sudah di-drop.
pub struct NodeHandle {
    ptr: NonNull<BufferNode>,
    arena: Arc<NodeArena>,
}

// SAFETY: Handle adalah satu-satunya pemilik node; memindahkannya ke thread
// lain memindahkan seluruh akses ke node tersebut.
unsafe impl Send for NodeHandle {}

impl NodeHandle {
    /// # Safety
    /// `ptr` harus node milik `arena` yang sudah diinisialisasi dan tidak
    /// dimiliki pihak lain (queue, stack, atau handle lain).
    #[inline(always)]
    pub(crate) unsafe fn from_raw(ptr: NonNull<BufferNode>, arena: Arc<NodeArena>) -> Self {
        Self { ptr, arena }
    }

    /// Lepas kepemilikan. Pemilik berikutnya (stack atau queue) wajib
    /// menahan arena yang sama.
    #[inline(always)]
    pub(crate) fn into_raw(self) -> NonNull<BufferNode> {
        self.ptr
    }

    /// Ambil kembali kepemilikan node dari slot array yang dipegang queue.
    ///
    /// # Safety
    /// `buffer` harus slot array dari node milik `arena` yang kepemilikannya
    /// sedang dipegang oleh caller (misalnya lewat `PtrQueue`).
    #[inline(always)]
    pub(crate) unsafe fn from_buffer(buffer: NonNull<*mut ()>, arena: Arc<NodeArena>) -> Self {
        Self::from_raw(BufferNode::make_node_from_buffer(buffer), arena)
    }

    /// Serahkan node sebagai slot array mentah (untuk dipasang ke queue).
    #[inline(always)]
    pub(crate) fn into_buffer(self) -> NonNull<*mut ()> {
        // SAFETY: handle selalu menunjuk node arena.
        unsafe { BufferNode::make_buffer_from_node(self.into_raw()) }
    }

    #[inline(always)]
    pub(crate) fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    /// Pointer mentah ke node (diagnostic / test).
    pub fn as_ptr(&self) -> NonNull<BufferNode> {
        self.ptr
    }

    #[inline(always)]
    pub fn buffer(&self) -> NonNull<*mut ()> {
        // SAFETY: handle selalu menunjuk node arena.
        unsafe { BufferNode::make_buffer_from_node(self.ptr) }
    }

    #[inline(always)]
    pub fn set_index(&mut self, i: usize) {
        // SAFETY: handle adalah pemilik eksklusif node.
        unsafe { (*self.ptr.as_ptr()).set_index(i) }
    }

    /// Slot yang sudah terisi, `[index, capacity)`.
    ///
    /// Urutan slot: entry terbaru lebih dulu (index turun saat enqueue).
    pub fn entries(&self) -> &[*mut ()] {
        let start = self.index();
        // SAFETY: slot [index, capacity) sudah ditulis oleh producer sebelum
        // node berpindah ke pemilik sekarang.
        unsafe { slice::from_raw_parts(self.buffer().as_ptr().add(start), self.size()) }
    }
}

impl Deref for NodeHandle {
    type Target = BufferNode;

    #[inline(always)]
    fn deref(&self) -> &BufferNode {
        // SAFETY: handle menahan arena, dan handle pemilik node.
        unsafe { self.ptr.as_ref() }
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.ptr.as_ptr(), other.ptr.as_ptr())
    }
}

impl Eq for NodeHandle {}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeHandle").field(&**self).finish()
    }
}
