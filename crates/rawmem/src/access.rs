//! Per-width ordered get/put primitives.
//!
//! `Plain` accesses compile to ordinary aligned loads and stores; every other
//! strength routes through the [`PlatformAtomics`] seam so it is performed
//! indivisibly with the mapped `core::sync::atomic` ordering. None of these
//! detect malformed addresses: a bad base, a stale offset or a misaligned
//! location is undefined behavior, which is why every accessor is `unsafe`.
//!
//! Two projections sit on top of the integer lanes:
//!
//! - booleans occupy a byte lane, read with a nonzero test and written
//!   normalized to `0x00`/`0x01` (the two conventions are intentionally
//!   asymmetric; see [`crate::RawMem::get_bool`]),
//! - floats occupy a 4/8-byte lane as their raw bit pattern, converted with
//!   the explicit [`bits_of_f32`]-style casts and never normalized, so NaN
//!   payloads survive a round trip.

use crate::RawMem;
use crate::addr::Address;
use crate::atomic::{PlatformAtomics, bits_of_f32, bits_of_f64, f32_of_bits, f64_of_bits};
use crate::order::Ordering;

/// Nonzero-test read convention for boolean lanes.
#[inline]
pub(crate) fn byte_to_bool(byte: u8) -> bool {
    byte != 0
}

/// Normalized write convention for boolean lanes.
#[inline]
pub(crate) fn bool_to_byte(value: bool) -> u8 {
    value as u8
}

macro_rules! access_ops {
    ($t:ty, $w:literal, $get:ident, $put:ident, $load:ident, $store:ident) => {
        impl<At: PlatformAtomics, Al> RawMem<At, Al> {
            #[doc = concat!("Read the ", $w, " at `addr` with the given ordering.")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned, initialized
            /// location that stays live for the duration of the call.
            #[inline]
            pub unsafe fn $get(&self, addr: Address, order: Ordering) -> $t {
                let ptr = addr.resolve() as *const $t;
                match order {
                    // SAFETY: caller guarantees a valid, aligned location.
                    Ordering::Plain => unsafe { ptr.read() },
                    // SAFETY: as above.
                    _ => unsafe { self.atomics.$load(ptr, order.for_load()) },
                }
            }

            #[doc = concat!("Write the ", $w, " at `addr` with the given ordering.")]
            ///
            /// # Safety
            ///
            /// `addr` must resolve to a valid, naturally aligned location that
            /// stays live for the duration of the call and is writable.
            #[inline]
            pub unsafe fn $put(&self, addr: Address, value: $t, order: Ordering) {
                let ptr = addr.resolve() as *mut $t;
                match order {
                    // SAFETY: caller guarantees a valid, aligned location.
                    Ordering::Plain => unsafe { ptr.write(value) },
                    // SAFETY: as above.
                    _ => unsafe { self.atomics.$store(ptr, value, order.for_store()) },
                }
            }
        }
    };
}

access_ops!(u8, "byte", get_u8, put_u8, load_u8, store_u8);
access_ops!(u16, "2-byte value", get_u16, put_u16, load_u16, store_u16);
access_ops!(u32, "4-byte value", get_u32, put_u32, load_u32, store_u32);
access_ops!(u64, "8-byte value", get_u64, put_u64, load_u64, store_u64);
access_ops!(
    usize,
    "reference-width value",
    get_usize,
    put_usize,
    load_usize,
    store_usize
);

impl<At: PlatformAtomics, Al> RawMem<At, Al> {
    /// Read the boolean at `addr`: any nonzero byte is `true`.
    ///
    /// Note the asymmetry with [`Self::put_bool`], which always stores a
    /// normalized `0x00`/`0x01`. A byte written through the raw path as, say,
    /// `0x02` reads back `true` here but does not match `expected = true` in
    /// the boolean CAS family.
    ///
    /// # Safety
    ///
    /// As [`Self::get_u8`].
    #[inline]
    pub unsafe fn get_bool(&self, addr: Address, order: Ordering) -> bool {
        // SAFETY: forwarded caller contract.
        byte_to_bool(unsafe { self.get_u8(addr, order) })
    }

    /// Write the boolean at `addr` as a normalized `0x00`/`0x01` byte.
    ///
    /// # Safety
    ///
    /// As [`Self::put_u8`].
    #[inline]
    pub unsafe fn put_bool(&self, addr: Address, value: bool, order: Ordering) {
        // SAFETY: forwarded caller contract.
        unsafe { self.put_u8(addr, bool_to_byte(value), order) }
    }

    /// Read the `f32` at `addr` as its raw bit pattern; NaN payloads are
    /// preserved.
    ///
    /// # Safety
    ///
    /// As [`Self::get_u32`].
    #[inline]
    pub unsafe fn get_f32(&self, addr: Address, order: Ordering) -> f32 {
        // SAFETY: forwarded caller contract.
        f32_of_bits(unsafe { self.get_u32(addr, order) })
    }

    /// Write the `f32` at `addr` as its raw bit pattern.
    ///
    /// # Safety
    ///
    /// As [`Self::put_u32`].
    #[inline]
    pub unsafe fn put_f32(&self, addr: Address, value: f32, order: Ordering) {
        // SAFETY: forwarded caller contract.
        unsafe { self.put_u32(addr, bits_of_f32(value), order) }
    }

    /// Read the `f64` at `addr` as its raw bit pattern; NaN payloads are
    /// preserved.
    ///
    /// # Safety
    ///
    /// As [`Self::get_u64`].
    #[inline]
    pub unsafe fn get_f64(&self, addr: Address, order: Ordering) -> f64 {
        // SAFETY: forwarded caller contract.
        f64_of_bits(unsafe { self.get_u64(addr, order) })
    }

    /// Write the `f64` at `addr` as its raw bit pattern.
    ///
    /// # Safety
    ///
    /// As [`Self::put_u64`].
    #[inline]
    pub unsafe fn put_f64(&self, addr: Address, value: f64, order: Ordering) {
        // SAFETY: forwarded caller contract.
        unsafe { self.put_u64(addr, bits_of_f64(value), order) }
    }
}
