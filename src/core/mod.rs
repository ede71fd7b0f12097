//! Core module: Buffer log pointer untuk GC write barrier
//!
//! Prinsip desain:
//! - Lock-Free: Enqueue hanya menyentuh queue milik thread sendiri
//! - Zero-Lookup: Slot array -> node lewat offset tetap
//! - Recycling: Node bekas selalu kembali ke free list, bukan ke sistem

mod allocator;
mod arena;
mod buffer_node;
mod ptr_queue;
mod queue_set;
mod stack;

pub use allocator::{Allocator, AllocatorConfig};
pub use buffer_node::{BufferNode, NodeHandle, ELEMENT_SIZE};
pub use ptr_queue::PtrQueue;
pub use queue_set::{CompletedBufferList, CompletedBufferSink, PtrQueueSet};
pub use stack::NodeStack;
