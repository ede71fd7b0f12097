//! Node Arena: segment memori anonymous (mmap) untuk buffer node
//!
//! Prinsip desain:
//! - Satu node = satu blok kontigu (header + slots), stride tetap
//! - Segment ke-k berisi `initial_nodes << k` node, tidak pernah di-unmap
//!   sebelum arena di-drop
//! - Node punya id 32-bit yang stabil; id -> alamat cukup aritmatika O(1)

use std::alloc::Layout;
use std::mem;
use std::ptr::{self, NonNull};

use memmap2::MmapMut;

use crate::core::buffer_node::{BufferNode, ELEMENT_SIZE, NIL};
use crate::error::{BufferError, Result};
use crate::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

/// Cukup untuk seluruh ruang id 32-bit bahkan dengan `initial_nodes == 1`.
const MAX_SEGMENTS: usize = 32;

/// Id terbesar yang boleh dipakai; `NIL` dicadangkan untuk link kosong.
const MAX_NODE_ID: u32 = NIL - 1;

struct Segment {
    // Menjaga mapping tetap hidup; akses lewat `base`.
    _map: MmapMut,
    base: *mut u8,
}

pub(crate) struct NodeArena {
    name: String,
    capacity: usize,
    stride: usize,
    initial_nodes: usize,
    next_id: AtomicU32,
    reserved_bytes: AtomicUsize,
    segments: [AtomicPtr<Segment>; MAX_SEGMENTS],
}

impl NodeArena {
    pub(crate) fn new(name: &str, capacity: usize, initial_nodes: usize) -> Result<Self> {
        debug_assert!(initial_nodes.is_power_of_two());
        let bytes = capacity
            .checked_mul(ELEMENT_SIZE)
            .and_then(|slots| slots.checked_add(BufferNode::buffer_offset()))
            .ok_or(BufferError::CapacityTooLarge(capacity))?;
        let stride = Layout::from_size_align(bytes, mem::align_of::<BufferNode>())
            .map_err(|_| BufferError::CapacityTooLarge(capacity))?
            .pad_to_align()
            .size();

        Ok(Self {
            name: name.to_owned(),
            capacity,
            stride,
            initial_nodes,
            next_id: AtomicU32::new(0),
            reserved_bytes: AtomicUsize::new(0),
            segments: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    /// Jumlah node yang pernah dibuat dari arena ini.
    pub(crate) fn node_count(&self) -> usize {
        self.next_id.load(Ordering::Relaxed) as usize
    }

    pub(crate) fn reserved_bytes(&self) -> usize {
        self.reserved_bytes.load(Ordering::Relaxed)
    }

    /// (segment, offset di dalam segment) untuk sebuah id.
    #[inline(always)]
    fn locate(&self, id: u32) -> (usize, usize) {
        let first = self.initial_nodes as u64;
        let q = id as u64 / first + 1;
        let segment = (63 - q.leading_zeros()) as usize;
        let offset = id as u64 - first * ((1u64 << segment) - 1);
        (segment, offset as usize)
    }

    fn segment_nodes(&self, segment: usize) -> usize {
        self.initial_nodes << segment
    }

    /// Carve node baru dari arena, mapping segment baru bila perlu.
    pub(crate) fn carve(&self) -> Result<NonNull<BufferNode>> {
        let id = self
            .next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n <= MAX_NODE_ID).then(|| n + 1)
            })
            .map_err(|_| BufferError::NodeIdsExhausted {
                name: self.name.clone(),
            })?;

        let (segment, offset) = self.locate(id);
        let base = self.segment_base(segment)?;

        // SAFETY: offset < segment_nodes(segment), jadi node berada di dalam
        // mapping. Id ini hanya dimiliki thread ini sampai header ditulis.
        unsafe {
            let node = base.add(offset * self.stride).cast::<BufferNode>();
            ptr::write(node, BufferNode::new(self.capacity, id));
            Ok(NonNull::new_unchecked(node))
        }
    }

    fn segment_base(&self, segment: usize) -> Result<*mut u8> {
        let slot = &self.segments[segment];
        let current = slot.load(Ordering::Acquire);
        if !current.is_null() {
            // SAFETY: segment yang sudah dipublish tidak pernah dilepas
            // sebelum arena di-drop.
            return Ok(unsafe { (*current).base });
        }

        let nodes = self.segment_nodes(segment);
        let bytes = nodes
            .checked_mul(self.stride)
            .ok_or(BufferError::CapacityTooLarge(self.capacity))?;
        let mut map = MmapMut::map_anon(bytes).map_err(|source| BufferError::OutOfMemory {
            name: self.name.clone(),
            bytes,
            source,
        })?;
        let base = map.as_mut_ptr();
        let fresh = Box::into_raw(Box::new(Segment { _map: map, base }));

        match slot.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                self.reserved_bytes.fetch_add(bytes, Ordering::Relaxed);
                tracing::debug!(
                    arena = %self.name,
                    segment,
                    nodes,
                    bytes,
                    "mapped buffer node segment"
                );
                Ok(base)
            }
            Err(winner) => {
                // Thread lain lebih dulu; buang mapping kita.
                // SAFETY: `fresh` belum pernah dipublish.
                drop(unsafe { Box::from_raw(fresh) });
                Ok(unsafe { (*winner).base })
            }
        }
    }

    /// Alamat node untuk id yang sudah pernah di-carve.
    #[inline(always)]
    pub(crate) fn resolve(&self, id: u32) -> NonNull<BufferNode> {
        let (segment, offset) = self.locate(id);
        let seg = self.segments[segment].load(Ordering::Acquire);
        debug_assert!(!seg.is_null(), "node id {} has no segment", id);
        // SAFETY: id sudah di-carve, jadi segment-nya sudah dipublish.
        unsafe {
            let node = (*seg).base.add(offset * self.stride);
            NonNull::new_unchecked(node.cast())
        }
    }
}

impl Drop for NodeArena {
    fn drop(&mut self) {
        for slot in &self.segments {
            let seg = slot.swap(ptr::null_mut(), Ordering::Acquire);
            if !seg.is_null() {
                // SAFETY: segment hanya dibuat lewat Box::into_raw di segment_base.
                drop(unsafe { Box::from_raw(seg) });
            }
        }
        tracing::debug!(
            arena = %self.name,
            nodes = self.node_count(),
            bytes = self.reserved_bytes(),
            "released buffer node arena"
        );
    }
}
