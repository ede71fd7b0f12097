//! Free-List Allocator untuk buffer node berkapasitas tetap
//!
//! Node baru di-carve dari arena hanya jika free list kosong. Node yang
//! di-release selalu kembali ke free list, tidak pernah langsung ke sistem;
//! memori baru dilepas saat allocator di-drop.

use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::mem;
use std::sync::Arc;

use crate::core::arena::NodeArena;
use crate::core::buffer_node::{BufferNode, NodeHandle};
use crate::core::stack::NodeStack;
use crate::error::{BufferError, Result};

/// Konfigurasi allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    name: String,
    buffer_capacity: usize,
    initial_nodes: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            name: "ptr-queue".to_string(),
            buffer_capacity: 256,
            initial_nodes: 64,
        }
    }
}

impl AllocatorConfig {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            ..Self::default()
        }
    }

    /// Nama diagnostic (muncul di log dan pesan error).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Jumlah node di segment pertama arena. Harus power of 2.
    pub fn with_initial_nodes(mut self, initial_nodes: usize) -> Self {
        self.initial_nodes = initial_nodes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn initial_nodes(&self) -> usize {
        self.initial_nodes
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 || self.buffer_capacity > BufferNode::max_size() {
            return Err(BufferError::InvalidCapacity {
                capacity: self.buffer_capacity,
                max: BufferNode::max_size(),
            });
        }
        if !self.initial_nodes.is_power_of_two() {
            return Err(BufferError::InvalidInitialNodes(self.initial_nodes));
        }
        Ok(())
    }
}

/// Allocator buffer node berbasis free list lock-free.
pub struct Allocator {
    config: AllocatorConfig,
    arena: Arc<NodeArena>,
    free_list: NodeStack,
}

impl Allocator {
    /// # Panics
    /// Panic jika `buffer_capacity` di luar `1..=BufferNode::max_size()`.
    pub fn new(name: &str, buffer_capacity: usize) -> Self {
        let config = AllocatorConfig::new(buffer_capacity).with_name(name);
        match Self::with_config(config) {
            Ok(allocator) => allocator,
            Err(err) => panic!("invalid buffer allocator `{}`: {}", name, err),
        }
    }

    pub fn with_config(config: AllocatorConfig) -> Result<Self> {
        config.validate()?;
        let arena = Arc::new(NodeArena::new(
            config.name(),
            config.buffer_capacity(),
            config.initial_nodes(),
        )?);
        tracing::debug!(
            allocator = %config.name(),
            capacity = config.buffer_capacity(),
            node_bytes = arena.stride(),
            "buffer allocator created"
        );
        Ok(Self {
            free_list: NodeStack::new(Arc::clone(&arena)),
            arena,
            config,
        })
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[inline(always)]
    pub fn buffer_capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Jumlah node di free list.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Jumlah node yang pernah di-carve dari arena.
    pub fn allocated_count(&self) -> usize {
        self.arena.node_count()
    }

    /// Total byte yang sudah di-mmap untuk node.
    pub fn reserved_bytes(&self) -> usize {
        self.arena.reserved_bytes()
    }

    /// Identitas allocator: queue dan stack terikat ke arena ini.
    #[inline(always)]
    pub(crate) fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    /// Stack baru atas arena yang sama (misalnya untuk completed list).
    pub fn new_stack(&self) -> NodeStack {
        NodeStack::new(Arc::clone(&self.arena))
    }

    /// Ambil node kosong: dari free list jika ada, jika tidak carve baru.
    pub fn try_allocate(&self) -> Result<NodeHandle> {
        if let Some(mut node) = self.free_list.pop() {
            let capacity = node.capacity();
            node.set_index(capacity);
            return Ok(node);
        }
        let raw = self.arena.carve()?;
        // SAFETY: node baru di-carve, belum dimiliki siapa pun.
        Ok(unsafe { NodeHandle::from_raw(raw, Arc::clone(&self.arena)) })
    }

    /// Seperti [`Allocator::try_allocate`], tapi kegagalan bersifat fatal:
    /// write barrier tidak bisa jalan tanpa buffer.
    pub fn allocate(&self) -> NodeHandle {
        match self.try_allocate() {
            Ok(node) => node,
            Err(err) => {
                tracing::error!(allocator = %self.name(), error = %err, "buffer allocation failed");
                if let BufferError::OutOfMemory { bytes, .. } = err {
                    let layout = Layout::from_size_align(bytes, mem::align_of::<BufferNode>())
                        .unwrap_or_else(|_| Layout::new::<BufferNode>());
                    handle_alloc_error(layout);
                }
                panic!("buffer allocation failed: {}", err);
            }
        }
    }

    /// Kembalikan node ke free list untuk dipakai ulang.
    ///
    /// # Panics
    /// Panic jika node bukan hasil allocator ini.
    pub fn release(&self, node: NodeHandle) {
        self.free_list.push(node);
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("name", &self.name())
            .field("buffer_capacity", &self.buffer_capacity())
            .field("free_count", &self.free_count())
            .field("allocated_count", &self.allocated_count())
            .finish()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        tracing::debug!(
            allocator = %self.name(),
            allocated = self.allocated_count(),
            free = self.free_count(),
            "buffer allocator dropped"
        );
    }
}
