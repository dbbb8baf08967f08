// Allow pre-existing clippy lints across the codebase
#![allow(
    clippy::collapsible_if,
    clippy::len_without_is_empty,
    clippy::manual_div_ceil,
    clippy::needless_range_loop
)]

/// Use mimalloc as the global allocator for all binaries.
/// 2-3x faster than glibc malloc for small allocations,
/// better thread-local caching, and reduced fragmentation.
/// Critical for a sort engine that churns through per-cycle buffers.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod common;
pub mod heap;
pub mod pool;
pub mod sort;
