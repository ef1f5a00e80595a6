//! Atomic read-modify-write engine.
//!
//! Native widths (4 and 8 bytes, and the reference width) map directly onto
//! hardware compare-and-swap through the [`PlatformAtomics`] seam. Sub-word
//! widths (1 and 2 bytes) are emulated with a CAS loop on the containing
//! 4-byte word:
//!
//! 1. Align the resolved address down to its word; derive the lane shift,
//!    flipped on big-endian targets so it lands on the physical byte the
//!    address names. The lane geometry always follows the compile-time byte
//!    order, never a declared [`Platform`](crate::Platform) byte order: the
//!    1- and 2-byte accessors dereference physical bytes, and the two views
//!    must agree. A declared byte order only affects the codec.
//! 2. Build a lane mask and position the expected/new values in the lane.
//! 3. Read the word volatile. If the lane does not match the expected value,
//!    return the observed lane without writing. Otherwise weak-CAS the whole
//!    word with only the lane replaced; any concurrent change to the word
//!    (neighboring lanes included) fails the CAS and the loop rereads.
//!
//! Neighboring lanes are never corrupted. The loops are lock-free but not
//! wait-free: under contention an individual caller may retry indefinitely
//! while other callers make progress. There is no timeout; an RMW runs until
//! it succeeds or, for CAS, observes a mismatch.
//!
//! Floating-point operations load and CAS the raw bit pattern. Going through
//! the float value would let the hardware quieten signaling NaNs, and a
//! CAS expecting the original pattern would then never match.

use core::sync::atomic::{
    AtomicU8, AtomicU16, AtomicU32, AtomicU64, AtomicUsize, Ordering as AtomicOrdering,
};

use crate::RawMem;
use crate::access::{bool_to_byte, byte_to_bool};
use crate::addr::Address;
use crate::order::Ordering;
use crate::sync::spin_loop;

// =============================================================================
// Platform seam
// =============================================================================

/// Native-width atomic primitives plus cache-line writeback.
///
/// The default implementation is [`NativeAtomics`]. The sub-word emulation
/// and all retry loops are written against this trait, which keeps the
/// emulation algorithm the documented, testable reference behavior: tests
/// (including loom models) inject their own implementation.
///
/// All pointer-taking methods require the pointer to be valid for the access
/// width, naturally aligned, and to stay valid for the duration of the call.
pub trait PlatformAtomics {
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn load_u8(&self, ptr: *const u8, order: AtomicOrdering) -> u8;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn store_u8(&self, ptr: *mut u8, value: u8, order: AtomicOrdering);
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn load_u16(&self, ptr: *const u16, order: AtomicOrdering) -> u16;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn store_u16(&self, ptr: *mut u16, value: u16, order: AtomicOrdering);
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn load_u32(&self, ptr: *const u32, order: AtomicOrdering) -> u32;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn store_u32(&self, ptr: *mut u32, value: u32, order: AtomicOrdering);
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn load_u64(&self, ptr: *const u64, order: AtomicOrdering) -> u64;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn store_u64(&self, ptr: *mut u64, value: u64, order: AtomicOrdering);
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn load_usize(&self, ptr: *const usize, order: AtomicOrdering) -> usize;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn store_usize(&self, ptr: *mut usize, value: usize, order: AtomicOrdering);

    /// Strong CAS; `Ok(observed)` on success, `Err(observed)` on mismatch.
    ///
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn cas_u32(
        &self,
        ptr: *mut u32,
        expected: u32,
        new: u32,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<u32, u32>;
    /// Weak CAS; may fail spuriously even when the value matches.
    ///
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn cas_weak_u32(
        &self,
        ptr: *mut u32,
        expected: u32,
        new: u32,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<u32, u32>;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn cas_u64(
        &self,
        ptr: *mut u64,
        expected: u64,
        new: u64,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<u64, u64>;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn cas_weak_u64(
        &self,
        ptr: *mut u64,
        expected: u64,
        new: u64,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<u64, u64>;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn cas_usize(
        &self,
        ptr: *mut usize,
        expected: usize,
        new: usize,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<usize, usize>;
    /// # Safety
    /// `ptr` must be valid and aligned for the width.
    unsafe fn cas_weak_usize(
        &self,
        ptr: *mut usize,
        expected: usize,
        new: usize,
        success: AtomicOrdering,
        failure: AtomicOrdering,
    ) -> Result<usize, usize>;

    /// Flush the cache line containing `line` to memory.
    ///
    /// Only reachable through `writeback_memory`, which first checks that the
    /// platform reported a nonzero flush size.
    ///
    /// # Safety
    /// `line` must lie within a mapped region.
    unsafe fn writeback_line(&self, line: *const u8);
    /// Barrier ordering prior stores before the line flushes.
    fn writeback_pre_sync(&self);
    /// Barrier ordering the line flushes before subsequent operations.
    fn writeback_post_sync(&self);
}

/// [`PlatformAtomics`] backed by `core::sync::atomic` over raw pointers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeAtomics;

macro_rules! native_load_store {
    ($load:ident, $store:ident, $t:ty, $atomic:ty) => {
        #[inline]
        unsafe fn $load(&self, ptr: *const $t, order: AtomicOrdering) -> $t {
            // SAFETY: caller guarantees validity and alignment.
            unsafe { <$atomic>::from_ptr(ptr.cast_mut()) }.load(order)
        }

        #[inline]
        unsafe fn $store(&self, ptr: *mut $t, value: $t, order: AtomicOrdering) {
            // SAFETY: caller guarantees validity and alignment.
            unsafe { <$atomic>::from_ptr(ptr) }.store(value, order);
        }
    };
}

macro_rules! native_cas {
    ($cas:ident, $cas_weak:ident, $t:ty, $atomic:ty) => {
        #[inline]
        unsafe fn $cas(
            &self,
            ptr: *mut $t,
            expected: $t,
            new: $t,
            success: AtomicOrdering,
            failure: AtomicOrdering,
        ) -> Result<$t, $t> {
            // SAFETY: caller guarantees validity and alignment.
            unsafe { <$atomic>::from_ptr(ptr) }.compare_exchange(expected, new, success, failure)
        }

        #[inline]
        unsafe fn $cas_weak(
            &self,
            ptr: *mut $t,
            expected: $t,
            new: $t,
            success: AtomicOrdering,
            failure: AtomicOrdering,
        ) -> Result<$t, $t> {
            // SAFETY: caller guarantees validity and alignment.
            unsafe { <$atomic>::from_ptr(ptr) }
                .compare_exchange_weak(expected, new, success, failure)
        }
    };
}

impl PlatformAtomics for NativeAtomics {
    native_load_store!(load_u8, store_u8, u8, AtomicU8);
    native_load_store!(load_u16, store_u16, u16, AtomicU16);
    native_load_store!(load_u32, store_u32, u32, AtomicU32);
    native_load_store!(load_u64, store_u64, u64, AtomicU64);
    native_load_store!(load_usize, store_usize, usize, AtomicUsize);

    native_cas!(cas_u32, cas_weak_u32, u32, AtomicU32);
    native_cas!(cas_u64, cas_weak_u64, u64, AtomicU64);
    native_cas!(cas_usize, cas_weak_usize, usize, AtomicUsize);

    #[inline]
    unsafe fn writeback_line(&self, line: *const u8) {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: caller guarantees the line is mapped; sse2 is baseline.
        unsafe {
            core::arch::x86_64::_mm_clflush(line)
        };
        #[cfg(not(target_arch = "x86_64"))]
        {
            let _ = line;
            panic!("cache-line writeback is not supported on this platform");
        }
    }

    #[inline]
    fn writeback_pre_sync(&self) {
        core::sync::atomic::fence(AtomicOrdering::SeqCst);
    }

    #[inline]
    fn writeback_post_sync(&self) {
        core::sync::atomic::fence(AtomicOrdering::SeqCst);
    }
}

// =============================================================================
// Bit casts
// =============================================================================
//
// Named functions instead of method calls at the RMW call sites, so the raw
// bit-pattern handling (and the NaN retry hazard it avoids) is visible where
// it matters.

/// Raw bit pattern of an `f32`, no normalization.
#[inline]
pub fn bits_of_f32(value: f32) -> u32 {
    value.to_bits()
}

/// `f32` reinterpretation of a bit pattern.
#[inline]
pub fn f32_of_bits(bits: u32) -> f32 {
    f32::from_bits(bits)
}

/// Raw bit pattern of an `f64`, no normalization.
#[inline]
pub fn bits_of_f64(value: f64) -> u64 {
    value.to_bits()
}

/// `f64` reinterpretation of a bit pattern.
#[inline]
pub fn f64_of_bits(bits: u64) -> f64 {
    f64::from_bits(bits)
}

// =============================================================================
// Native-width operations
// =============================================================================

macro_rules! native_rmw_ops {
    ($t:ty, $w:literal,
     $load:ident, $cas:ident, $cas_weak:ident, $update:ident,
     $cas_set:ident, $cax:ident, $weak_set:ident,
     $get_set:ident, $get_add:ident, $or:ident, $and:ident, $xor:ident) => {
        impl<At: PlatformAtomics, Al> RawMem<At, Al> {
            /// Spin-retry fetch-update loop; returns the pre-update value.
            #[inline]
            unsafe fn $update(
                &self,
                addr: Address,
                order: Ordering,
                f: impl Fn($t) -> $t,
            ) -> $t {
                let (success, failure) = order.for_rmw();
                let ptr = addr.resolve() as *mut $t;
                loop {
                    // SAFETY: caller guarantees a valid, aligned address.
                    let current =
                        unsafe { self.atomics.$load(ptr as *const $t, AtomicOrdering::SeqCst) };
                    // SAFETY: as above.
                    if unsafe {
                        self.atomics
                            .$cas_weak(ptr, current, f(current), success, failure)
                    }
                    .is_ok()
                    {
                        return current;
                    }
                    spin_loop();
                }
            }

            #[doc = concat!("Atomically replace the ", $w, " at `addr` with `new` if it equals `expected`.")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $cas_set(
                &self,
                addr: Address,
                expected: $t,
                new: $t,
                order: Ordering,
            ) -> bool {
                let (success, failure) = order.for_rmw();
                // SAFETY: caller guarantees a valid, aligned address.
                unsafe {
                    self.atomics
                        .$cas(addr.resolve() as *mut $t, expected, new, success, failure)
                }
                .is_ok()
            }

            #[doc = concat!("As [`Self::", stringify!($cas_set), "`], but returns the observed value instead of a flag.")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $cax(
                &self,
                addr: Address,
                expected: $t,
                new: $t,
                order: Ordering,
            ) -> $t {
                let (success, failure) = order.for_rmw();
                // SAFETY: caller guarantees a valid, aligned address.
                match unsafe {
                    self.atomics
                        .$cas(addr.resolve() as *mut $t, expected, new, success, failure)
                } {
                    Ok(v) | Err(v) => v,
                }
            }

            #[doc = concat!("As [`Self::", stringify!($cas_set), "`], but may fail spuriously. Only useful inside retry loops.")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $weak_set(
                &self,
                addr: Address,
                expected: $t,
                new: $t,
                order: Ordering,
            ) -> bool {
                let (success, failure) = order.for_rmw();
                // SAFETY: caller guarantees a valid, aligned address.
                unsafe {
                    self.atomics.$cas_weak(
                        addr.resolve() as *mut $t,
                        expected,
                        new,
                        success,
                        failure,
                    )
                }
                .is_ok()
            }

            #[doc = concat!("Atomically swap in `new`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $get_set(&self, addr: Address, new: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |_| new) }
            }

            #[doc = concat!("Atomically add `delta` (wrapping); returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $get_add(&self, addr: Address, delta: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v.wrapping_add(delta)) }
            }

            #[doc = concat!("Atomically OR in `mask`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $or(&self, addr: Address, mask: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v | mask) }
            }

            #[doc = concat!("Atomically AND in `mask`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $and(&self, addr: Address, mask: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v & mask) }
            }

            #[doc = concat!("Atomically XOR in `mask`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location.
            #[inline]
            pub unsafe fn $xor(&self, addr: Address, mask: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v ^ mask) }
            }
        }
    };
}

native_rmw_ops!(
    u32, "4-byte value",
    load_u32, cas_u32, cas_weak_u32, update_u32,
    compare_and_set_u32, compare_and_exchange_u32, weak_compare_and_set_u32,
    get_and_set_u32, get_and_add_u32,
    get_and_bitwise_or_u32, get_and_bitwise_and_u32, get_and_bitwise_xor_u32
);

native_rmw_ops!(
    u64, "8-byte value",
    load_u64, cas_u64, cas_weak_u64, update_u64,
    compare_and_set_u64, compare_and_exchange_u64, weak_compare_and_set_u64,
    get_and_set_u64, get_and_add_u64,
    get_and_bitwise_or_u64, get_and_bitwise_and_u64, get_and_bitwise_xor_u64
);

native_rmw_ops!(
    usize, "reference-width value",
    load_usize, cas_usize, cas_weak_usize, update_usize,
    compare_and_set_usize, compare_and_exchange_usize, weak_compare_and_set_usize,
    get_and_set_usize, get_and_add_usize,
    get_and_bitwise_or_usize, get_and_bitwise_and_usize, get_and_bitwise_xor_usize
);

// =============================================================================
// Sub-word emulation
// =============================================================================

/// Lane geometry for a sub-word access inside its containing 4-byte word.
///
/// `shift` follows the compile-time target byte order, not the declared
/// [`Platform`](crate::Platform) order: the lane must be the same physical
/// byte a 1-byte pointer dereference at the address would touch, and on
/// big-endian targets lane positions within a loaded word run in the
/// opposite direction.
#[inline]
fn sub_word_lane(ptr: *mut u8, size: usize) -> (*mut u32, u32) {
    let addr = ptr as usize;
    let word = (addr & !3) as *mut u32;
    let mut shift = ((addr & 3) * 8) as u32;
    if cfg!(target_endian = "big") {
        shift = ((4 - size) * 8) as u32 - shift;
    }
    (word, shift)
}

impl<At: PlatformAtomics, Al> RawMem<At, Al> {
    /// Word-level CAS loop shared by the 1- and 2-byte exchanges.
    ///
    /// Returns the observed lane value; equals `expected` iff the swap took
    /// effect. On lane mismatch there is no retry and no write. On word
    /// mismatch (neighboring lane changed under us) the loop rereads.
    #[inline]
    unsafe fn sub_word_exchange(
        &self,
        word: *mut u32,
        shift: u32,
        lane_mask: u32,
        expected: u32,
        new: u32,
        order: Ordering,
    ) -> u32 {
        let (success, failure) = order.for_rmw();
        let mask = lane_mask << shift;
        let masked_expected = (expected & lane_mask) << shift;
        let masked_new = (new & lane_mask) << shift;
        loop {
            // SAFETY: the containing word of a valid sub-word address is
            // itself valid and aligned.
            let full = unsafe { self.atomics.load_u32(word as *const u32, AtomicOrdering::SeqCst) };
            if (full & mask) != masked_expected {
                return (full & mask) >> shift;
            }
            // SAFETY: as above.
            if unsafe {
                self.atomics.cas_weak_u32(
                    word,
                    full,
                    (full & !mask) | masked_new,
                    success,
                    failure,
                )
            }
            .is_ok()
            {
                return expected & lane_mask;
            }
            spin_loop();
        }
    }

    /// Atomically replace the byte at `addr` with `new` if it equals
    /// `expected`; returns the observed byte.
    ///
    /// Emulated through a CAS loop on the containing 4-byte word; bytes
    /// outside the lane are never modified.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid byte whose containing 4-byte word is
    /// also valid.
    pub unsafe fn compare_and_exchange_u8(
        &self,
        addr: Address,
        expected: u8,
        new: u8,
        order: Ordering,
    ) -> u8 {
        let (word, shift) = sub_word_lane(addr.resolve(), 1);
        // SAFETY: forwarded caller contract.
        unsafe {
            self.sub_word_exchange(word, shift, 0xFF, expected as u32, new as u32, order) as u8
        }
    }

    /// Byte compare-and-set; see [`Self::compare_and_exchange_u8`].
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u8`].
    #[inline]
    pub unsafe fn compare_and_set_u8(
        &self,
        addr: Address,
        expected: u8,
        new: u8,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_exchange_u8(addr, expected, new, order) == expected }
    }

    /// Weak byte compare-and-set. Spurious failure is permitted (the current
    /// emulation never fails spuriously, but callers must not rely on that).
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u8`].
    #[inline]
    pub unsafe fn weak_compare_and_set_u8(
        &self,
        addr: Address,
        expected: u8,
        new: u8,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_set_u8(addr, expected, new, order) }
    }

    /// Atomically replace the 2-byte value at `addr` with `new` if it equals
    /// `expected`; returns the observed value.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 2-aligned location whose containing
    /// 4-byte word is also valid.
    ///
    /// # Panics
    ///
    /// Panics when the update would span two words (offset 3 within the
    /// word), which no single hardware CAS can express.
    pub unsafe fn compare_and_exchange_u16(
        &self,
        addr: Address,
        expected: u16,
        new: u16,
        order: Ordering,
    ) -> u16 {
        let ptr = addr.resolve();
        assert!(
            (ptr as usize) & 3 != 3,
            "2-byte update spans the containing word"
        );
        let (word, shift) = sub_word_lane(ptr, 2);
        // SAFETY: forwarded caller contract.
        unsafe {
            self.sub_word_exchange(word, shift, 0xFFFF, expected as u32, new as u32, order) as u16
        }
    }

    /// 2-byte compare-and-set; see [`Self::compare_and_exchange_u16`].
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u16`].
    #[inline]
    pub unsafe fn compare_and_set_u16(
        &self,
        addr: Address,
        expected: u16,
        new: u16,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_exchange_u16(addr, expected, new, order) == expected }
    }

    /// Weak 2-byte compare-and-set. Spurious failure is permitted.
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u16`].
    #[inline]
    pub unsafe fn weak_compare_and_set_u16(
        &self,
        addr: Address,
        expected: u16,
        new: u16,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_set_u16(addr, expected, new, order) }
    }
}

macro_rules! sub_word_rmw_ops {
    ($t:ty, $w:literal, $get:ident, $weak_set:ident, $update:ident,
     $get_set:ident, $get_add:ident, $or:ident, $and:ident, $xor:ident) => {
        impl<At: PlatformAtomics, Al> RawMem<At, Al> {
            /// Spin-retry fetch-update on the sub-word CAS; returns the
            /// pre-update value.
            #[inline]
            unsafe fn $update(
                &self,
                addr: Address,
                order: Ordering,
                f: impl Fn($t) -> $t,
            ) -> $t {
                loop {
                    // SAFETY: forwarded caller contract.
                    let current = unsafe { self.$get(addr, Ordering::Volatile) };
                    // SAFETY: as above.
                    if unsafe { self.$weak_set(addr, current, f(current), order) } {
                        return current;
                    }
                    spin_loop();
                }
            }

            #[doc = concat!("Atomically swap in `new`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            #[doc = concat!("As [`Self::compare_and_exchange_", stringify!($t), "`].")]
            #[inline]
            pub unsafe fn $get_set(&self, addr: Address, new: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |_| new) }
            }

            #[doc = concat!("Atomically add `delta` (wrapping); returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            #[doc = concat!("As [`Self::compare_and_exchange_", stringify!($t), "`].")]
            #[inline]
            pub unsafe fn $get_add(&self, addr: Address, delta: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v.wrapping_add(delta)) }
            }

            #[doc = concat!("Atomically OR in `mask`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            #[doc = concat!("As [`Self::compare_and_exchange_", stringify!($t), "`].")]
            #[inline]
            pub unsafe fn $or(&self, addr: Address, mask: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v | mask) }
            }

            #[doc = concat!("Atomically AND in `mask`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            #[doc = concat!("As [`Self::compare_and_exchange_", stringify!($t), "`].")]
            #[inline]
            pub unsafe fn $and(&self, addr: Address, mask: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v & mask) }
            }

            #[doc = concat!("Atomically XOR in `mask`; returns the previous ", $w, ".")]
            ///
            /// # Safety
            ///
            #[doc = concat!("As [`Self::compare_and_exchange_", stringify!($t), "`].")]
            #[inline]
            pub unsafe fn $xor(&self, addr: Address, mask: $t, order: Ordering) -> $t {
                // SAFETY: forwarded caller contract.
                unsafe { self.$update(addr, order, |v| v ^ mask) }
            }
        }
    };
}

sub_word_rmw_ops!(
    u8, "byte", get_u8, weak_compare_and_set_u8, update_u8,
    get_and_set_u8, get_and_add_u8,
    get_and_bitwise_or_u8, get_and_bitwise_and_u8, get_and_bitwise_xor_u8
);

sub_word_rmw_ops!(
    u16, "2-byte value", get_u16, weak_compare_and_set_u16, update_u16,
    get_and_set_u16, get_and_add_u16,
    get_and_bitwise_or_u16, get_and_bitwise_and_u16, get_and_bitwise_xor_u16
);

// =============================================================================
// Floating-point and boolean projections
// =============================================================================

impl<At: PlatformAtomics, Al> RawMem<At, Al> {
    /// Atomically replace the `f32` at `addr` if its *bit pattern* equals
    /// `expected`'s. Two NaNs with different payloads do not match.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 4-aligned location.
    #[inline]
    pub unsafe fn compare_and_set_f32(
        &self,
        addr: Address,
        expected: f32,
        new: f32,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_set_u32(addr, bits_of_f32(expected), bits_of_f32(new), order) }
    }

    /// As [`Self::compare_and_set_f32`], returning the observed value.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 4-aligned location.
    #[inline]
    pub unsafe fn compare_and_exchange_f32(
        &self,
        addr: Address,
        expected: f32,
        new: f32,
        order: Ordering,
    ) -> f32 {
        // SAFETY: forwarded caller contract.
        f32_of_bits(unsafe {
            self.compare_and_exchange_u32(addr, bits_of_f32(expected), bits_of_f32(new), order)
        })
    }

    /// Atomically swap in `new`; returns the previous `f32`.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 4-aligned location.
    #[inline]
    pub unsafe fn get_and_set_f32(&self, addr: Address, new: f32, order: Ordering) -> f32 {
        // SAFETY: forwarded caller contract.
        f32_of_bits(unsafe { self.get_and_set_u32(addr, bits_of_f32(new), order) })
    }

    /// Atomically add `delta`; returns the previous `f32`.
    ///
    /// The loop loads and CASes the raw bits; see the module docs for why.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 4-aligned location.
    pub unsafe fn get_and_add_f32(&self, addr: Address, delta: f32, order: Ordering) -> f32 {
        let (success, failure) = order.for_rmw();
        let ptr = addr.resolve() as *mut u32;
        loop {
            // SAFETY: caller guarantees a valid, aligned address.
            let expected_bits =
                unsafe { self.atomics.load_u32(ptr as *const u32, AtomicOrdering::SeqCst) };
            let value = f32_of_bits(expected_bits);
            // SAFETY: as above.
            if unsafe {
                self.atomics.cas_weak_u32(
                    ptr,
                    expected_bits,
                    bits_of_f32(value + delta),
                    success,
                    failure,
                )
            }
            .is_ok()
            {
                return value;
            }
            spin_loop();
        }
    }

    /// Atomically replace the `f64` at `addr` if its *bit pattern* equals
    /// `expected`'s. Two NaNs with different payloads do not match.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 8-aligned location.
    #[inline]
    pub unsafe fn compare_and_set_f64(
        &self,
        addr: Address,
        expected: f64,
        new: f64,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_set_u64(addr, bits_of_f64(expected), bits_of_f64(new), order) }
    }

    /// As [`Self::compare_and_set_f64`], returning the observed value.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 8-aligned location.
    #[inline]
    pub unsafe fn compare_and_exchange_f64(
        &self,
        addr: Address,
        expected: f64,
        new: f64,
        order: Ordering,
    ) -> f64 {
        // SAFETY: forwarded caller contract.
        f64_of_bits(unsafe {
            self.compare_and_exchange_u64(addr, bits_of_f64(expected), bits_of_f64(new), order)
        })
    }

    /// Atomically swap in `new`; returns the previous `f64`.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 8-aligned location.
    #[inline]
    pub unsafe fn get_and_set_f64(&self, addr: Address, new: f64, order: Ordering) -> f64 {
        // SAFETY: forwarded caller contract.
        f64_of_bits(unsafe { self.get_and_set_u64(addr, bits_of_f64(new), order) })
    }

    /// Atomically add `delta`; returns the previous `f64`.
    ///
    /// # Safety
    ///
    /// `addr` must resolve to a valid, 8-aligned location.
    pub unsafe fn get_and_add_f64(&self, addr: Address, delta: f64, order: Ordering) -> f64 {
        let (success, failure) = order.for_rmw();
        let ptr = addr.resolve() as *mut u64;
        loop {
            // SAFETY: caller guarantees a valid, aligned address.
            let expected_bits =
                unsafe { self.atomics.load_u64(ptr as *const u64, AtomicOrdering::SeqCst) };
            let value = f64_of_bits(expected_bits);
            // SAFETY: as above.
            if unsafe {
                self.atomics.cas_weak_u64(
                    ptr,
                    expected_bits,
                    bits_of_f64(value + delta),
                    success,
                    failure,
                )
            }
            .is_ok()
            {
                return value;
            }
            spin_loop();
        }
    }

    /// Boolean compare-and-set over the byte engine.
    ///
    /// Both `expected` and `new` are normalized to `0x00`/`0x01` before the
    /// byte CAS. A byte previously stored through the raw path with any
    /// other nonzero pattern reads back `true` through [`crate::RawMem::get_bool`]
    /// but will *not* match `expected = true` here; the two truthiness
    /// conventions are independent by contract.
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u8`].
    #[inline]
    pub unsafe fn compare_and_set_bool(
        &self,
        addr: Address,
        expected: bool,
        new: bool,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_set_u8(addr, bool_to_byte(expected), bool_to_byte(new), order) }
    }

    /// As [`Self::compare_and_set_bool`], returning the observed value under
    /// the nonzero-test convention.
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u8`].
    #[inline]
    pub unsafe fn compare_and_exchange_bool(
        &self,
        addr: Address,
        expected: bool,
        new: bool,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        byte_to_bool(unsafe {
            self.compare_and_exchange_u8(addr, bool_to_byte(expected), bool_to_byte(new), order)
        })
    }

    /// Weak boolean compare-and-set; spurious failure permitted.
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u8`].
    #[inline]
    pub unsafe fn weak_compare_and_set_bool(
        &self,
        addr: Address,
        expected: bool,
        new: bool,
        order: Ordering,
    ) -> bool {
        // SAFETY: forwarded caller contract.
        unsafe { self.compare_and_set_bool(addr, expected, new, order) }
    }

    /// Atomically swap in `new` (stored normalized); returns the previous
    /// value under the nonzero-test convention.
    ///
    /// # Safety
    ///
    /// As [`Self::compare_and_exchange_u8`].
    #[inline]
    pub unsafe fn get_and_set_bool(&self, addr: Address, new: bool, order: Ordering) -> bool {
        // SAFETY: forwarded caller contract.
        byte_to_bool(unsafe { self.get_and_set_u8(addr, bool_to_byte(new), order) })
    }
}

// The engine's retry loops spin through the loom shim, which must not run
// outside a loom model; under the loom feature these units are replaced by
// the models in loom_tests.rs.
#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::{LibcAllocator, Platform};

    #[repr(C, align(8))]
    struct Aligned([u8; 16]);

    fn raw() -> RawMem {
        RawMem::new(Platform::detect())
    }

    fn raw_with_endian(big_endian: bool) -> RawMem {
        let platform = Platform::new(8, 4096, 0, big_endian, true).unwrap();
        RawMem::with_parts(platform, NativeAtomics, LibcAllocator)
    }

    #[test]
    fn cas_u32_hit_and_miss() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            raw.put_u32(addr, 7, Ordering::Volatile);
            assert!(raw.compare_and_set_u32(addr, 7, 8, Ordering::Volatile));
            assert!(!raw.compare_and_set_u32(addr, 7, 9, Ordering::Volatile));
            assert_eq!(raw.get_u32(addr, Ordering::Volatile), 8);
        }
    }

    #[test]
    fn compare_and_exchange_returns_observed() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            raw.put_u64(addr, 100, Ordering::Volatile);
            assert_eq!(
                raw.compare_and_exchange_u64(addr, 100, 200, Ordering::Volatile),
                100
            );
            assert_eq!(
                raw.compare_and_exchange_u64(addr, 100, 300, Ordering::Volatile),
                200
            );
            assert_eq!(raw.get_u64(addr, Ordering::Volatile), 200);
        }
    }

    #[test]
    fn sub_word_byte_lane_isolation() {
        // Distinct lane values: a CAS that picked any lane other than the
        // physical byte at the address could not match `expected`.
        for big_endian in [false, true] {
            let raw = raw_with_endian(big_endian);
            let mut buf = Aligned([0; 16]);
            buf.0[..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
            let addr = Address::in_slice(&mut buf.0, 1);
            unsafe {
                let observed = raw.compare_and_exchange_u8(addr, 0x22, 0xAA, Ordering::Volatile);
                assert_eq!(observed, 0x22);
            }
            assert_eq!(&buf.0[..4], &[0x11, 0xAA, 0x33, 0x44]);
        }
    }

    // The emulated RMW family and the byte accessors must target the same
    // physical byte even when the capability carries a byte-order declaration
    // that differs from the host's.
    #[test]
    fn declared_byte_order_does_not_move_rmw_lanes() {
        for big_endian in [false, true] {
            let raw = raw_with_endian(big_endian);
            let mut buf = Aligned([0; 16]);
            buf.0[..4].copy_from_slice(&[0, 5, 5, 0]);
            let addr = Address::in_slice(&mut buf.0, 1);
            unsafe {
                assert_eq!(raw.get_and_add_u8(addr, 1, Ordering::Volatile), 5);
                // The read-back at the same address sees the added value.
                assert_eq!(raw.get_u8(addr, Ordering::Volatile), 6);
            }
            assert_eq!(&buf.0[..4], &[0, 6, 5, 0]);
        }
    }

    #[test]
    fn sub_word_miss_leaves_memory_untouched() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        buf.0[..4].copy_from_slice(&[0x11, 0x22, 0x33, 0x44]);
        let addr = Address::in_slice(&mut buf.0, 1);
        unsafe {
            // 0x99 matches no lane, so this must fail and write nothing,
            // reporting the byte actually at the address.
            let observed = raw.compare_and_exchange_u8(addr, 0x99, 0xAA, Ordering::Volatile);
            assert_eq!(observed, 0x22);
        }
        assert_eq!(&buf.0[..4], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn sub_word_u16_lanes() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let lo = Address::slice_base(&mut buf.0);
        let hi = lo.offset_by(2);
        unsafe {
            raw.put_u16(lo, 0x1111, Ordering::Volatile);
            raw.put_u16(hi, 0x2222, Ordering::Volatile);
            assert!(raw.compare_and_set_u16(hi, 0x2222, 0xBEEF, Ordering::Volatile));
            assert_eq!(raw.get_u16(lo, Ordering::Volatile), 0x1111);
            assert_eq!(raw.get_u16(hi, Ordering::Volatile), 0xBEEF);
        }
    }

    #[test]
    #[should_panic(expected = "spans the containing word")]
    fn u16_spanning_word_panics() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::in_slice(&mut buf.0, 3);
        unsafe {
            raw.compare_and_exchange_u16(addr, 0, 1, Ordering::Volatile);
        }
    }

    #[test]
    fn get_and_add_u8_wraps_and_isolates() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        buf.0[0] = 0x55;
        buf.0[1] = 0xFF;
        buf.0[2] = 0x66;
        let addr = Address::in_slice(&mut buf.0, 1);
        unsafe {
            assert_eq!(raw.get_and_add_u8(addr, 2, Ordering::Volatile), 0xFF);
            assert_eq!(raw.get_u8(addr, Ordering::Volatile), 0x01);
        }
        assert_eq!(buf.0[0], 0x55);
        assert_eq!(buf.0[2], 0x66);
    }

    #[test]
    fn bitwise_family_u32() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            raw.put_u32(addr, 0b1100, Ordering::Volatile);
            assert_eq!(
                raw.get_and_bitwise_or_u32(addr, 0b0011, Ordering::Volatile),
                0b1100
            );
            assert_eq!(
                raw.get_and_bitwise_and_u32(addr, 0b1010, Ordering::Volatile),
                0b1111
            );
            assert_eq!(
                raw.get_and_bitwise_xor_u32(addr, 0b1111, Ordering::Volatile),
                0b1010
            );
            assert_eq!(raw.get_u32(addr, Ordering::Volatile), 0b0101);
        }
    }

    #[test]
    fn get_and_set_u64_returns_previous() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            raw.put_u64(addr, 10, Ordering::Volatile);
            assert_eq!(raw.get_and_set_u64(addr, 20, Ordering::Volatile), 10);
            assert_eq!(raw.get_u64(addr, Ordering::Volatile), 20);
        }
    }

    #[test]
    fn float_add_terminates_on_nan() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        // A NaN with a nonstandard payload: value-space comparison would
        // never match it, bit-space comparison does.
        let nan_bits = 0x7FC0_0001u32;
        unsafe {
            raw.put_u32(addr, nan_bits, Ordering::Volatile);
            let old = raw.get_and_add_f32(addr, 1.0, Ordering::Volatile);
            assert!(old.is_nan());
            assert!(f32_of_bits(raw.get_u32(addr, Ordering::Volatile)).is_nan());
        }
    }

    #[test]
    fn float_cas_compares_bits_not_values() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            raw.put_f64(addr, 1.5, Ordering::Volatile);
            assert!(raw.compare_and_set_f64(addr, 1.5, 2.5, Ordering::Volatile));
            assert_eq!(raw.get_f64(addr, Ordering::Volatile), 2.5);
            // NaN expected never matches even a stored NaN of different payload.
            raw.put_u64(addr, 0x7FF8_0000_0000_0001, Ordering::Volatile);
            assert!(!raw.compare_and_set_f64(addr, f64::NAN, 0.0, Ordering::Volatile));
        }
    }

    #[test]
    fn bool_cas_normalizes_storage() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            assert!(raw.compare_and_set_bool(addr, false, true, Ordering::Volatile));
            // Stored normalized, not just nonzero.
            assert_eq!(raw.get_u8(addr, Ordering::Volatile), 0x01);
        }
    }

    #[test]
    fn bool_truthiness_asymmetry() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            // Raw write of a nonzero, non-normalized byte.
            raw.put_u8(addr, 0x02, Ordering::Volatile);
            // The narrow read path uses the nonzero test...
            assert!(raw.get_bool(addr, Ordering::Volatile));
            // ...but the CAS path compares against the normalized 0x01, so
            // "expected true" does not match.
            assert!(!raw.compare_and_set_bool(addr, true, false, Ordering::Volatile));
            assert_eq!(raw.get_u8(addr, Ordering::Volatile), 0x02);
        }
    }

    #[test]
    fn reference_width_cas() {
        let raw = raw();
        let mut buf = Aligned([0; 16]);
        let addr = Address::slice_base(&mut buf.0);
        unsafe {
            raw.put_usize(addr, 0xABCD, Ordering::Volatile);
            assert!(raw.compare_and_set_usize(addr, 0xABCD, 0x1234, Ordering::Volatile));
            assert_eq!(
                raw.get_and_set_usize(addr, 0, Ordering::Volatile),
                0x1234
            );
        }
    }
}
