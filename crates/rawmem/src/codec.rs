//! Unaligned, endianness-explicit multi-byte access.
//!
//! The codec reads and writes 2-, 4- and 8-byte values at arbitrary byte
//! addresses, without the natural-alignment requirement of the ordered
//! accessors, and with the byte order named explicitly per call instead of
//! inherited from the platform.
//!
//! A misaligned access decomposes recursively into two half-width accesses,
//! down to single bytes; a naturally aligned access (or a byte) is performed
//! directly. Which half lands at the lower address follows the platform byte
//! order, so the decomposed layout is identical to what a direct native
//! access would have produced. A requested byte order differing from the
//! platform's is a single whole-value byte reversal after decode or before
//! encode.
//!
//! On a hand-built [`Platform`](crate::Platform) whose declared byte order
//! differs from the host's, the codec remains self-consistent (get inverts
//! put) but its memory layout follows the declaration, not the host.
//!
//! Unlike everything in [`crate::access`], these operations are *not* atomic
//! at any width: a torn read under concurrent modification is expected, not
//! exceptional. Callers needing atomicity must align their data.

use crate::RawMem;
use crate::addr::Address;
use crate::order::Endian;

// =============================================================================
// Half-splitting machinery
// =============================================================================

/// A power-of-two-sized integer the codec can split into two halves.
///
/// `u8` is its own half; the recursion bottoms out on `BYTES == 1` before
/// ever splitting it.
trait Word: Copy {
    type Half: Word;
    const BYTES: usize;

    /// Compose from the half at the lower address and the half after it.
    fn join(big_endian: bool, first: Self::Half, second: Self::Half) -> Self;
    /// Inverse of [`Word::join`]: (lower-address half, following half).
    fn split(self, big_endian: bool) -> (Self::Half, Self::Half);
    fn swap_bytes(self) -> Self;

    /// # Safety
    /// `ptr` must be valid for `BYTES` bytes and aligned to `BYTES`.
    unsafe fn read_aligned(ptr: *const u8) -> Self;
    /// # Safety
    /// `ptr` must be valid for `BYTES` bytes and aligned to `BYTES`.
    unsafe fn write_aligned(ptr: *mut u8, value: Self);
}

macro_rules! word {
    ($t:ty, $half:ty) => {
        impl Word for $t {
            type Half = $half;
            const BYTES: usize = core::mem::size_of::<$t>();

            #[inline]
            fn join(big_endian: bool, first: $half, second: $half) -> $t {
                let (hi, lo) = if big_endian {
                    (first, second)
                } else {
                    (second, first)
                };
                ((hi as $t) << (<$half>::BITS)) | lo as $t
            }

            #[inline]
            fn split(self, big_endian: bool) -> ($half, $half) {
                let hi = (self >> <$half>::BITS) as $half;
                let lo = self as $half;
                if big_endian { (hi, lo) } else { (lo, hi) }
            }

            #[inline]
            fn swap_bytes(self) -> $t {
                <$t>::swap_bytes(self)
            }

            #[inline]
            unsafe fn read_aligned(ptr: *const u8) -> $t {
                // SAFETY: caller guarantees validity and alignment.
                unsafe { (ptr as *const $t).read() }
            }

            #[inline]
            unsafe fn write_aligned(ptr: *mut u8, value: $t) {
                // SAFETY: caller guarantees validity and alignment.
                unsafe { (ptr as *mut $t).write(value) }
            }
        }
    };
}

word!(u16, u8);
word!(u32, u16);
word!(u64, u32);

impl Word for u8 {
    type Half = u8;
    const BYTES: usize = 1;

    #[inline]
    fn join(_big_endian: bool, first: u8, _second: u8) -> u8 {
        first
    }

    #[inline]
    fn split(self, _big_endian: bool) -> (u8, u8) {
        (self, self)
    }

    #[inline]
    fn swap_bytes(self) -> u8 {
        self
    }

    #[inline]
    unsafe fn read_aligned(ptr: *const u8) -> u8 {
        // SAFETY: caller guarantees validity.
        unsafe { ptr.read() }
    }

    #[inline]
    unsafe fn write_aligned(ptr: *mut u8, value: u8) {
        // SAFETY: caller guarantees validity.
        unsafe { ptr.write(value) }
    }
}

/// # Safety
/// `ptr` must be valid for `W::BYTES` bytes.
unsafe fn get_word<W: Word>(ptr: *const u8, big_endian: bool) -> W {
    if W::BYTES == 1 || (ptr as usize) % W::BYTES == 0 {
        // SAFETY: alignment just checked, validity forwarded.
        unsafe { W::read_aligned(ptr) }
    } else {
        let half = W::BYTES / 2;
        // SAFETY: both halves lie within the caller's valid range.
        let first = unsafe { get_word::<W::Half>(ptr, big_endian) };
        // SAFETY: as above.
        let second = unsafe { get_word::<W::Half>(ptr.add(half), big_endian) };
        W::join(big_endian, first, second)
    }
}

/// # Safety
/// `ptr` must be valid for `W::BYTES` bytes.
unsafe fn put_word<W: Word>(ptr: *mut u8, value: W, big_endian: bool) {
    if W::BYTES == 1 || (ptr as usize) % W::BYTES == 0 {
        // SAFETY: alignment just checked, validity forwarded.
        unsafe { W::write_aligned(ptr, value) }
    } else {
        let half = W::BYTES / 2;
        let (first, second) = value.split(big_endian);
        // SAFETY: both halves lie within the caller's valid range.
        unsafe { put_word::<W::Half>(ptr, first, big_endian) };
        // SAFETY: as above.
        unsafe { put_word::<W::Half>(ptr.add(half), second, big_endian) };
    }
}

/// Byte-reverse when the requested order differs from the platform order.
#[inline]
fn conv<W: Word>(value: W, endian: Endian, big_endian: bool) -> W {
    if endian.is_big() != big_endian {
        value.swap_bytes()
    } else {
        value
    }
}

// =============================================================================
// Public surface
// =============================================================================

macro_rules! unaligned_ops {
    ($t:ty, $w:literal, $get:ident, $put:ident) => {
        impl<At, Al> RawMem<At, Al> {
            #[doc = concat!("Read the ", $w, " at `addr` in the given byte order; any alignment.")]
            ///
            /// Not atomic; may tear under concurrent modification.
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a location valid for the full width of
            /// the value that stays live for the call.
            #[inline]
            pub unsafe fn $get(&self, addr: Address, endian: Endian) -> $t {
                let big_endian = self.platform().big_endian();
                // SAFETY: forwarded caller contract.
                let native = unsafe { get_word::<$t>(addr.resolve(), big_endian) };
                conv(native, endian, big_endian)
            }

            #[doc = concat!("Write the ", $w, " at `addr` in the given byte order; any alignment.")]
            ///
            /// Not atomic; may tear under concurrent readers.
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a writable location valid for the full
            /// width of the value that stays live for the call.
            #[inline]
            pub unsafe fn $put(&self, addr: Address, value: $t, endian: Endian) {
                let big_endian = self.platform().big_endian();
                // SAFETY: forwarded caller contract.
                unsafe { put_word::<$t>(addr.resolve(), conv(value, endian, big_endian), big_endian) }
            }
        }
    };
}

unaligned_ops!(u16, "2-byte value", get_unaligned_u16, put_unaligned_u16);
unaligned_ops!(u32, "4-byte value", get_unaligned_u32, put_unaligned_u32);
unaligned_ops!(u64, "8-byte value", get_unaligned_u64, put_unaligned_u64);
