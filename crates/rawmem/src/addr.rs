//! The (base, offset) addressing model.
//!
//! An [`Address`] denotes either a slot inside a managed value (base pointer
//! plus a layout-derived byte offset) or an absolute native address (no base,
//! offset is the address itself). Addresses are ephemeral: they are computed
//! per call and never serve as the canonical reference to anything.
//!
//! The model records how each address was formed, because raw block
//! operations (`copy_memory` and friends) only accept absolute addresses and
//! primitive-array slots. Copying raw bytes through an arbitrary managed
//! value would trample reference fields, so that shape is rejected up front.
//!
//! Validity checking is deliberately best-effort: the checks in this module
//! catch 32-bit-unclean offsets and negative sizes, nothing more. They are a
//! debugging aid, not a safety net callers may rely on.

use core::ptr::NonNull;

use rawmem_platform::Platform;

use crate::error::Error;

/// How an address was formed; decides which block operations accept it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddrKind {
    /// Absolute native address into an unmanaged block.
    Absolute,
    /// Field slot inside an arbitrary managed value.
    Field,
    /// Element slot inside a primitive-array-typed value.
    PrimitiveArray,
}

/// A raw memory location: optional base pointer plus a signed byte offset.
#[derive(Debug, Clone, Copy)]
pub struct Address {
    base: *mut u8,
    offset: i64,
    kind: AddrKind,
}

impl Address {
    /// An absolute native address, previously obtained from
    /// `allocate_memory`/`reallocate_memory` and not yet freed.
    #[inline]
    pub fn absolute(address: u64) -> Self {
        Self {
            base: core::ptr::null_mut(),
            offset: address as i64,
            kind: AddrKind::Absolute,
        }
    }

    /// A field slot inside a managed value.
    ///
    /// `offset` must come from a matching layout query (`offset_of!` for the
    /// value's exact type); anything else is undefined behavior when the
    /// address is later dereferenced.
    #[inline]
    pub fn field(base: NonNull<u8>, offset: i64) -> Self {
        Self {
            base: base.as_ptr(),
            offset,
            kind: AddrKind::Field,
        }
    }

    /// The base slot of a primitive slice.
    #[inline]
    pub fn slice_base<T: Primitive>(slice: &mut [T]) -> Self {
        Self {
            base: slice.as_mut_ptr().cast(),
            offset: array_base_offset::<T>(),
            kind: AddrKind::PrimitiveArray,
        }
    }

    /// The element slot `index` of a primitive slice.
    #[inline]
    pub fn in_slice<T: Primitive>(slice: &mut [T], index: usize) -> Self {
        debug_assert!(index < slice.len());
        Self {
            base: slice.as_mut_ptr().cast(),
            offset: array_base_offset::<T>() + index as i64 * array_index_scale::<T>(),
            kind: AddrKind::PrimitiveArray,
        }
    }

    /// The same location shifted by `delta` bytes.
    #[inline]
    pub fn offset_by(self, delta: i64) -> Self {
        Self {
            offset: self.offset + delta,
            ..self
        }
    }

    /// True when there is no managed base.
    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.base.is_null()
    }

    /// The raw offset component.
    #[inline]
    pub fn raw_offset(&self) -> i64 {
        self.offset
    }

    #[inline]
    pub(crate) fn kind(&self) -> AddrKind {
        self.kind
    }

    /// Compute the final pointer. Wrapping arithmetic: producing the pointer
    /// is always fine, dereferencing it is where the caller's obligations
    /// start.
    #[inline]
    pub fn resolve(self) -> *mut u8 {
        if self.base.is_null() {
            self.offset as usize as *mut u8
        } else {
            self.base.wrapping_offset(self.offset as isize)
        }
    }
}

// =============================================================================
// Layout queries
// =============================================================================

mod sealed {
    pub trait Sealed {}
}

/// Types whose slices may serve as raw block-operation endpoints.
pub trait Primitive: sealed::Sealed + Copy {}

macro_rules! primitive {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Primitive for $t {}
        )*
    };
}

primitive!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64, usize, isize);

/// Byte offset of element 0 of a `[T]` relative to the slice base pointer.
///
/// Always 0 in this model; exists so callers address elements through the
/// same base-offset/index-scale contract a host runtime would supply.
#[inline]
pub const fn array_base_offset<T: Primitive>() -> i64 {
    0
}

/// Byte distance between consecutive elements of a `[T]`.
#[inline]
pub const fn array_index_scale<T: Primitive>() -> i64 {
    core::mem::size_of::<T>() as i64
}

// =============================================================================
// Best-effort validity checks
// =============================================================================

/// True when the top 32 bits are all zero.
#[inline]
fn is_32bit_clean(value: i64) -> bool {
    (value as u64) >> 32 == 0
}

/// Validate a size (the equivalent of a `size_t`).
pub(crate) fn check_size(platform: &Platform, size: i64) -> Result<(), Error> {
    if platform.address_size() == 4 {
        // Also catches negative sizes.
        if !is_32bit_clean(size) {
            return Err(Error::InvalidArgument("size overflows 32-bit size_t"));
        }
    } else if size < 0 {
        return Err(Error::InvalidArgument("negative size"));
    }
    Ok(())
}

/// Validate an absolute native address (the equivalent of a `void*`).
pub(crate) fn check_native_address(platform: &Platform, address: i64) -> Result<(), Error> {
    if platform.address_size() == 4 {
        // Accept both zero- and sign-extended pointers: after the +1 below a
        // valid pointer's top half is 0x0 or 0x1, and masking off the low
        // bit lets us test against 0.
        if (((address >> 32) + 1) & !1) != 0 {
            return Err(Error::InvalidArgument(
                "address has high bits set on a 32-bit platform",
            ));
        }
    }
    Ok(())
}

/// Validate an offset relative to a managed base.
pub(crate) fn check_offset(platform: &Platform, offset: i64) -> Result<(), Error> {
    if platform.address_size() == 4 {
        // Also catches negative offsets.
        if !is_32bit_clean(offset) {
            return Err(Error::InvalidArgument(
                "offset has high bits set on a 32-bit platform",
            ));
        }
    } else if offset < 0 {
        return Err(Error::InvalidArgument("negative offset"));
    }
    Ok(())
}

/// Validate either side of an address.
pub(crate) fn check_pointer(platform: &Platform, addr: Address) -> Result<(), Error> {
    if addr.is_absolute() {
        check_native_address(platform, addr.raw_offset())
    } else {
        check_offset(platform, addr.raw_offset())
    }
}

/// Validate a raw block-operation endpoint: absolute, or a primitive-array
/// slot. Arbitrary managed fields are rejected.
pub(crate) fn check_primitive_pointer(platform: &Platform, addr: Address) -> Result<(), Error> {
    check_pointer(platform, addr)?;
    if !addr.is_absolute() && addr.kind() != AddrKind::PrimitiveArray {
        return Err(Error::InvalidArgument(
            "block operation endpoint is not a primitive array",
        ));
    }
    Ok(())
}
