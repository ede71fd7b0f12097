//! Atomics shim: `std` pada build normal, `loom` saat `--cfg loom`
//!
//! Semua atomic di core diambil dari sini supaya lock-free stack
//! bisa di-model-check tanpa mengubah kode produksi.

#[cfg(loom)]
pub(crate) use loom::sync::atomic;

#[cfg(not(loom))]
pub(crate) use std::sync::atomic;
