//! Raw memory and atomic primitives for privileged callers.
//!
//! This crate is an optimistic, spinning, caller-trusted primitive layer: it
//! reads and writes values at arbitrary byte offsets into managed or
//! unmanaged memory, allocates and frees unmanaged blocks, and performs
//! atomic read-modify-write operations across integer widths from 1 to 8
//! bytes under five memory-ordering strengths. It is not a safety boundary;
//! malformed addresses, double frees and use-after-free are the caller's
//! responsibility and are not detected.
//!
//! # Entry point
//!
//! All operations hang off [`RawMem`], a capability object constructed once
//! at process start from a [`Platform`] description and passed by reference
//! into whatever needs raw access. There is no process-wide singleton; a
//! restricted context simply never receives the capability.
//!
//! ```no_run
//! use rawmem::{Address, Ordering, Platform, RawMem};
//!
//! let raw = RawMem::new(Platform::detect());
//! let block = raw.allocate_memory(64).unwrap();
//! let addr = Address::absolute(block);
//! unsafe {
//!     raw.put_u32(addr, 0xDEADBEEF, Ordering::Volatile);
//!     assert_eq!(raw.get_u32(addr, Ordering::Volatile), 0xDEADBEEF);
//!     raw.free_memory(block).unwrap();
//! }
//! ```
//!
//! # Modules
//!
//! - [`addr`]: the (base, offset) addressing model and layout queries
//! - [`access`]: per-width ordered get/put primitives
//! - [`atomic`]: CAS, exchange, fetch-add, fetch-bitwise; sub-word widths are
//!   emulated through a word-aligned CAS loop
//! - [`codec`]: unaligned, endianness-explicit multi-byte access
//! - [`alloc`]: unmanaged allocate/reallocate/free, block copy/set/swap-copy,
//!   cache-line writeback
//! - [`fence`]: standalone memory fences
//!
//! # Loom Testing
//!
//! Enable the `loom` feature for concurrency verification of the sub-word
//! emulation. The CAS loop is written against the [`PlatformAtomics`] trait,
//! so the model tests drive it through a loom-backed implementation.
//!
//! ```text
//! cargo test -p rawmem --features loom
//! ```

use static_assertions::const_assert;

pub mod access;
pub mod addr;
pub mod alloc;
pub mod atomic;
pub mod codec;
pub mod error;
pub mod fence;
pub mod order;
pub mod sync;


pub use addr::{Address, Primitive, array_base_offset, array_index_scale};
pub use alloc::{LibcAllocator, NativeAllocator};
pub use atomic::{
    NativeAtomics, PlatformAtomics, bits_of_f32, bits_of_f64, f32_of_bits, f64_of_bits,
};
pub use error::Error;
pub use fence::{full_fence, load_fence, load_load_fence, store_fence, store_store_fence};
pub use order::{Endian, Ordering};
pub use rawmem_platform::{Platform, PlatformError};

// The whole addressing model assumes a 32- or 64-bit flat address space.
const_assert!(core::mem::size_of::<usize>() == 4 || core::mem::size_of::<usize>() == 8);

/// Capability object granting raw memory access.
///
/// Holds the immutable [`Platform`] constants plus the two platform seams:
/// the native atomics implementation and the native allocator. Both default
/// to the real thing ([`NativeAtomics`], [`LibcAllocator`]); tests and
/// restricted hosts can substitute their own.
pub struct RawMem<At = NativeAtomics, Al = LibcAllocator> {
    platform: Platform,
    atomics: At,
    alloc: Al,
}

impl RawMem {
    /// Build the capability from platform constants, with the native atomics
    /// and allocator backends.
    pub fn new(platform: Platform) -> Self {
        Self::with_parts(platform, NativeAtomics, LibcAllocator)
    }
}

impl<At, Al> RawMem<At, Al> {
    /// Build the capability with explicit backend implementations.
    pub fn with_parts(platform: Platform, atomics: At, alloc: Al) -> Self {
        Self {
            platform,
            atomics,
            alloc,
        }
    }

    /// The platform constants this capability was built with.
    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }
}
