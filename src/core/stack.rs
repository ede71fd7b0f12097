//! Lock-Free Intrusive Stack untuk buffer node (Treiber stack)
//!
//! Head = satu `AtomicU64` berisi `(tag << 32) | id`. Setiap push/pop yang
//! berhasil menaikkan tag, jadi CAS dengan head basi (ABA) selalu gagal.
//! Link `next` ada di header node dan dipakai ulang oleh list mana pun yang
//! sedang memegang node.

use std::fmt;
use std::sync::Arc;

use crate::core::arena::NodeArena;
use crate::core::buffer_node::{NodeHandle, NIL};
use crate::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Padding untuk cache line isolation (64 bytes pada x86-64)
#[repr(C, align(64))]
struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    fn new(value: T) -> Self {
        Self { value }
    }
}

#[inline(always)]
fn pack(id: u32, tag: u32) -> u64 {
    ((tag as u64) << 32) | id as u64
}

#[inline(always)]
fn unpack(head: u64) -> (u32, u32) {
    (head as u32, (head >> 32) as u32)
}

/// Stack lock-free multi-producer/multi-consumer atas node dari satu arena.
///
/// Tag 32-bit: ABA hanya mungkin jika tepat 2^32 operasi terjadi di antara
/// load dan CAS sebuah thread.
pub struct NodeStack {
    head: CacheLinePadded<AtomicU64>,
    len: AtomicUsize,
    arena: Arc<NodeArena>,
}

impl NodeStack {
    pub(crate) fn new(arena: Arc<NodeArena>) -> Self {
        Self {
            head: CacheLinePadded::new(AtomicU64::new(pack(NIL, 0))),
            len: AtomicUsize::new(0),
            arena,
        }
    }

    /// Push node ke puncak stack. Lock-free.
    ///
    /// # Panics
    /// Panic jika node berasal dari arena lain: id-nya akan di-resolve ke
    /// node milik arena ini yang mungkin sedang dipakai.
    pub fn push(&self, node: NodeHandle) {
        assert!(
            Arc::ptr_eq(node.arena(), &self.arena),
            "node {} does not belong to arena `{}`",
            node.id(),
            self.arena.name()
        );
        let id = node.id();
        // Hitung sebelum node terlihat: pop yang mengambilnya selalu
        // mengurangi setelah penambahan ini, jadi `len` tidak pernah wrap.
        self.len.fetch_add(1, Ordering::Relaxed);
        let raw = node.into_raw();
        // SAFETY: kita pemilik node sampai CAS di bawah berhasil.
        let header = unsafe { raw.as_ref() };

        let mut current = self.head.value.load(Ordering::Relaxed);
        loop {
            let (top, tag) = unpack(current);
            header.set_next(top);
            // Release: isi slot + link `next` terlihat oleh thread yang pop.
            match self.head.value.compare_exchange_weak(
                current,
                pack(id, tag.wrapping_add(1)),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Pop node dari puncak stack. `None` jika kosong. Lock-free.
    pub fn pop(&self) -> Option<NodeHandle> {
        let mut current = self.head.value.load(Ordering::Acquire);
        loop {
            let (top, tag) = unpack(current);
            if top == NIL {
                return None;
            }
            let node = self.arena.resolve(top);
            // Node mungkin sudah di-pop thread lain; memori tetap valid (arena
            // tidak pernah unmap) dan tag membuat CAS gagal jika head berubah.
            let next = unsafe { node.as_ref() }.next();
            match self.head.value.compare_exchange_weak(
                current,
                pack(next, tag.wrapping_add(1)),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                    // SAFETY: CAS berhasil, node sekarang milik kita seorang.
                    let node = unsafe { NodeHandle::from_raw(node, Arc::clone(&self.arena)) };
                    node.set_next(NIL);
                    return Some(node);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Lepas seluruh isi stack dalam satu CAS. Urutan LIFO (puncak lebih dulu).
    pub fn take_all(&self) -> Vec<NodeHandle> {
        let mut current = self.head.value.load(Ordering::Acquire);
        let top = loop {
            let (top, tag) = unpack(current);
            if top == NIL {
                return Vec::new();
            }
            match self.head.value.compare_exchange_weak(
                current,
                pack(NIL, tag.wrapping_add(1)),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => break top,
                Err(actual) => current = actual,
            }
        };

        let mut nodes = Vec::new();
        let mut id = top;
        while id != NIL {
            // SAFETY: seluruh chain terlepas dari stack oleh CAS di atas.
            let node =
                unsafe { NodeHandle::from_raw(self.arena.resolve(id), Arc::clone(&self.arena)) };
            id = node.next();
            node.set_next(NIL);
            nodes.push(node);
        }
        self.len.fetch_sub(nodes.len(), Ordering::Relaxed);
        nodes
    }

    /// Jumlah node. Exact saat quiescent, perkiraan saat ada kontensi.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        unpack(self.head.value.load(Ordering::Acquire)).0 == NIL
    }
}

impl fmt::Debug for NodeStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeStack")
            .field("arena", &self.arena.name())
            .field("len", &self.len())
            .finish()
    }
}
