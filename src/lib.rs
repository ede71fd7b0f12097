//! PtrQueue - Lock-Free Pointer Log Buffers
//!
//! Arsitektur:
//! - Per-thread queue: cursor atas satu buffer node, tanpa lock
//! - Free-list allocator: node di-recycle, memori di-mmap per segment
//! - Queue set: exchange buffer penuh, routing ke completed-buffer sink
//! - CPU time counters: akumulasi waktu CPU thread GC secara atomic

pub mod core;
pub mod cpu_time;
pub mod error;
mod sync;

pub use crate::core::{
    Allocator, AllocatorConfig, BufferNode, CompletedBufferList, CompletedBufferSink, NodeHandle,
    NodeStack, PtrQueue, PtrQueueSet,
};
pub use crate::error::BufferError;
