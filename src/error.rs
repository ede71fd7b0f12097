//! Error types untuk buffer allocator
//!
//! Hanya kondisi yang bisa dilaporkan ke caller yang ada di sini.
//! Misuse (index di luar kapasitas, retry pada buffer penuh) tetap fatal.

use std::io;

use thiserror::Error;

/// Error saat membangun allocator atau mengambil node baru dari arena.
#[derive(Debug, Error)]
pub enum BufferError {
    /// Kapasitas buffer harus di antara 1 dan `BufferNode::max_size()`.
    #[error("buffer capacity {capacity} out of range 1..={max}")]
    InvalidCapacity { capacity: usize, max: usize },

    /// Ukuran segment awal harus power of 2.
    #[error("initial node count {0} must be a non-zero power of two")]
    InvalidInitialNodes(usize),

    /// Ukuran node (header + slots) overflow saat dihitung.
    #[error("buffer capacity {0} produces a node layout that overflows")]
    CapacityTooLarge(usize),

    /// Semua node id 32-bit sudah terpakai.
    #[error("allocator `{name}` exhausted its node id space")]
    NodeIdsExhausted { name: String },

    /// Mapping anonymous memory untuk segment baru gagal.
    #[error("allocator `{name}` failed to map {bytes} bytes for a node segment")]
    OutOfMemory {
        name: String,
        bytes: usize,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BufferError>;
