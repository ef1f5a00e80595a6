//! Unmanaged memory: allocate/reallocate/free, block set/copy/swap-copy and
//! cache-line writeback.
//!
//! Blocks live outside any managed heap and are identified by the address the
//! allocator returned; 0 is the "no block" sentinel, never a valid block.
//! Freeing exactly once is entirely the caller's job. Double frees, frees of
//! addresses never returned by the allocator, and use after free are not
//! detected.
//!
//! The argument checks here are best-effort debugging aids: negative sizes
//! and offsets or addresses that cannot fit the platform's pointer width are
//! rejected with [`Error::InvalidArgument`], everything else is trusted.
//!
//! The allocator itself sits behind the [`NativeAllocator`] seam; the default
//! [`LibcAllocator`] delegates to `malloc`/`realloc`/`free`.

use tracing::trace;

use crate::RawMem;
use crate::addr::{Address, check_native_address, check_primitive_pointer, check_size};
use crate::atomic::PlatformAtomics;
use crate::error::Error;

// =============================================================================
// Allocator seam
// =============================================================================

/// Backend for the unmanaged block lifecycle.
///
/// The degenerate cases (size 0, address 0) are handled before the seam: a
/// backend never sees a zero-size allocation or a free of address 0.
pub trait NativeAllocator {
    /// Allocate `size` bytes; null on exhaustion. `size` is nonzero.
    fn allocate(&self, size: usize) -> *mut u8;

    /// Resize the block at `ptr` to `size` bytes, moving it if necessary;
    /// null on exhaustion (the original block is then still live). `size` is
    /// nonzero.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator.
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8;

    /// Release the block at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator; it is dead afterwards.
    unsafe fn free(&self, ptr: *mut u8);
}

/// [`NativeAllocator`] on the C heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcAllocator;

impl NativeAllocator for LibcAllocator {
    #[inline]
    fn allocate(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(size) as *mut u8 }
    }

    #[inline]
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: caller guarantees `ptr` is a live malloc block.
        unsafe { libc::realloc(ptr as *mut libc::c_void, size) as *mut u8 }
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees `ptr` is a live malloc block.
        unsafe { libc::free(ptr as *mut libc::c_void) }
    }
}

impl<C: NativeAllocator> NativeAllocator for &C {
    #[inline]
    fn allocate(&self, size: usize) -> *mut u8 {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).reallocate(ptr, size) }
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr) }
    }
}

// =============================================================================
// Block lifecycle
// =============================================================================

impl<At, Al: NativeAllocator> RawMem<At, Al> {
    /// Round a validated size up to heap-word (pointer-width) granularity.
    fn align_to_heap_word(&self, bytes: i64) -> Result<i64, Error> {
        let align = self.platform().address_size() as i64;
        let rounded = bytes
            .checked_add(align - 1)
            .ok_or(Error::InvalidArgument("size overflows when rounded"))?;
        Ok(rounded & !(align - 1))
    }

    /// Allocate an unmanaged block of at least `bytes` bytes; returns its
    /// native address. The content is uninitialized.
    ///
    /// `bytes` is rounded up to heap-word granularity. A request of 0 returns
    /// the sentinel 0 without touching the allocator; passing 0 to
    /// [`Self::free_memory`] later is a no-op, so the pair composes.
    pub fn allocate_memory(&self, bytes: i64) -> Result<u64, Error> {
        check_size(self.platform(), bytes)?;
        let bytes = self.align_to_heap_word(bytes)?;
        if bytes == 0 {
            return Ok(0);
        }
        let ptr = self.alloc.allocate(bytes as usize);
        if ptr.is_null() {
            return Err(Error::OutOfMemory {
                bytes: bytes as u64,
            });
        }
        trace!(address = ptr as u64, bytes, "allocated unmanaged block");
        Ok(ptr as u64)
    }

    /// Resize the block at `address` to at least `bytes` bytes, moving it if
    /// necessary; returns the (possibly new) address. Content up to the
    /// smaller of the two sizes is preserved; any extension is uninitialized.
    ///
    /// `address` 0 degenerates to [`Self::allocate_memory`]; `bytes` 0
    /// degenerates to [`Self::free_memory`] and returns 0.
    ///
    /// # Safety
    ///
    /// `address` must be 0 or a live block from this capability's allocator.
    /// On success with a nonzero result the old address is dead.
    pub unsafe fn reallocate_memory(&self, address: u64, bytes: i64) -> Result<u64, Error> {
        check_native_address(self.platform(), address as i64)?;
        check_size(self.platform(), bytes)?;
        let bytes = self.align_to_heap_word(bytes)?;
        if bytes == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.free_memory(address)? };
            return Ok(0);
        }
        if address == 0 {
            return self.allocate_memory(bytes);
        }
        // SAFETY: caller guarantees a live block.
        let ptr = unsafe { self.alloc.reallocate(address as usize as *mut u8, bytes as usize) };
        if ptr.is_null() {
            return Err(Error::OutOfMemory {
                bytes: bytes as u64,
            });
        }
        trace!(
            old_address = address,
            address = ptr as u64,
            bytes,
            "reallocated unmanaged block"
        );
        Ok(ptr as u64)
    }

    /// Release the block at `address`. Address 0 is a no-op.
    ///
    /// # Safety
    ///
    /// `address` must be 0 or a live block from this capability's allocator,
    /// freed exactly once; it is dead afterwards.
    pub unsafe fn free_memory(&self, address: u64) -> Result<(), Error> {
        check_native_address(self.platform(), address as i64)?;
        if address == 0 {
            return Ok(());
        }
        // SAFETY: caller guarantees a live block, freed once.
        unsafe { self.alloc.free(address as usize as *mut u8) };
        trace!(address, "freed unmanaged block");
        Ok(())
    }
}

// =============================================================================
// Block operations
// =============================================================================

/// Element type for the swapping copy.
trait SwapElem: Copy {
    fn swapped(self) -> Self;
}

macro_rules! swap_elem {
    ($($t:ty),*) => {
        $(impl SwapElem for $t {
            #[inline]
            fn swapped(self) -> $t {
                <$t>::swap_bytes(self)
            }
        })*
    };
}

swap_elem!(u16, u32, u64);

/// Overlap-aware element-wise reversing copy. Elements are accessed
/// unaligned, so any byte address is fine.
///
/// # Safety
/// Both ranges must be valid for `count` elements of `T`.
unsafe fn copy_swap<T: SwapElem>(src: *const u8, dst: *mut u8, count: usize) {
    let src = src as *const T;
    let dst = dst as *mut T;
    if (dst as usize) <= (src as usize) {
        for i in 0..count {
            // SAFETY: element i is inside the caller's valid range; forward
            // iteration cannot clobber unread source elements when the
            // destination starts at or before the source.
            unsafe { dst.add(i).write_unaligned(src.add(i).read_unaligned().swapped()) };
        }
    } else {
        for i in (0..count).rev() {
            // SAFETY: as above, with reverse iteration for the case where the
            // destination overlaps the tail of the source.
            unsafe { dst.add(i).write_unaligned(src.add(i).read_unaligned().swapped()) };
        }
    }
}

impl<At, Al> RawMem<At, Al> {
    /// Fill `bytes` bytes starting at `addr` with `value`.
    ///
    /// `addr` must be absolute or a primitive-array slot; arbitrary managed
    /// fields are rejected. Size 0 is a no-op.
    ///
    /// # Safety
    ///
    /// The range must be valid, writable and live for the call.
    pub unsafe fn set_memory(&self, addr: Address, bytes: i64, value: u8) -> Result<(), Error> {
        check_size(self.platform(), bytes)?;
        check_primitive_pointer(self.platform(), addr)?;
        if bytes == 0 {
            return Ok(());
        }
        // SAFETY: forwarded caller contract.
        unsafe { core::ptr::write_bytes(addr.resolve(), value, bytes as usize) };
        Ok(())
    }

    /// Copy `bytes` bytes from `src` to `dst`; the ranges may overlap.
    ///
    /// Both endpoints must be absolute or primitive-array slots. Size 0 is a
    /// no-op.
    ///
    /// # Safety
    ///
    /// Both ranges must be valid and live for the call; `dst` writable.
    pub unsafe fn copy_memory(&self, src: Address, dst: Address, bytes: i64) -> Result<(), Error> {
        check_size(self.platform(), bytes)?;
        check_primitive_pointer(self.platform(), src)?;
        check_primitive_pointer(self.platform(), dst)?;
        if bytes == 0 {
            return Ok(());
        }
        // SAFETY: forwarded caller contract; ptr::copy handles overlap.
        unsafe { core::ptr::copy(src.resolve(), dst.resolve(), bytes as usize) };
        Ok(())
    }

    /// Copy `bytes` bytes from `src` to `dst`, byte-reversing each
    /// `elem_size`-sized element. The ranges may overlap.
    ///
    /// `elem_size` must be 2, 4 or 8 and must divide `bytes`. Both endpoints
    /// must be absolute or primitive-array slots. Size 0 is a no-op.
    ///
    /// # Safety
    ///
    /// Both ranges must be valid and live for the call; `dst` writable.
    pub unsafe fn copy_swap_memory(
        &self,
        src: Address,
        dst: Address,
        bytes: i64,
        elem_size: i64,
    ) -> Result<(), Error> {
        check_size(self.platform(), bytes)?;
        check_primitive_pointer(self.platform(), src)?;
        check_primitive_pointer(self.platform(), dst)?;
        if !matches!(elem_size, 2 | 4 | 8) {
            return Err(Error::InvalidArgument("element size must be 2, 4 or 8"));
        }
        if bytes % elem_size != 0 {
            return Err(Error::InvalidArgument(
                "byte count is not a whole number of elements",
            ));
        }
        let count = (bytes / elem_size) as usize;
        let (src, dst) = (src.resolve() as *const u8, dst.resolve());
        // SAFETY: forwarded caller contract.
        unsafe {
            match elem_size {
                2 => copy_swap::<u16>(src, dst, count),
                4 => copy_swap::<u32>(src, dst, count),
                _ => copy_swap::<u64>(src, dst, count),
            }
        }
        Ok(())
    }
}

// =============================================================================
// Cache-line writeback
// =============================================================================

impl<At: PlatformAtomics, Al> RawMem<At, Al> {
    /// Force the cache lines covering `bytes` bytes at `address` back to
    /// memory: one ordering barrier, a flush per line, another barrier.
    ///
    /// Returns [`Error::UnsupportedOperation`] when the platform reported no
    /// cache-line flush size.
    ///
    /// # Safety
    ///
    /// The range must lie within mapped memory for the duration of the call.
    pub unsafe fn writeback_memory(&self, address: u64, bytes: i64) -> Result<(), Error> {
        if !self.platform().is_writeback_enabled() {
            return Err(Error::UnsupportedOperation(
                "cache-line writeback is not available on this platform",
            ));
        }
        check_native_address(self.platform(), address as i64)?;
        check_size(self.platform(), bytes)?;
        let line_size = self.platform().data_cache_line_flush_size() as u64;
        let end = address + bytes as u64;

        self.atomics.writeback_pre_sync();
        let mut line = self.platform().data_cache_line_align_down(address);
        while line < end {
            // SAFETY: the line lies within the caller's mapped range (modulo
            // the leading alignment, which stays within the same mapped line).
            unsafe { self.atomics.writeback_line(line as usize as *const u8) };
            line += line_size;
        }
        self.atomics.writeback_post_sync();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::NativeAtomics;
    use crate::{Platform, RawMem};
    use std::cell::Cell;

    /// Delegates to libc but records every seam crossing.
    #[derive(Default)]
    struct CountingAllocator {
        allocs: Cell<usize>,
        reallocs: Cell<usize>,
        frees: Cell<usize>,
        last_size: Cell<usize>,
    }

    impl NativeAllocator for CountingAllocator {
        fn allocate(&self, size: usize) -> *mut u8 {
            self.allocs.set(self.allocs.get() + 1);
            self.last_size.set(size);
            LibcAllocator.allocate(size)
        }

        unsafe fn reallocate(&self, ptr: *mut u8, size: usize) -> *mut u8 {
            self.reallocs.set(self.reallocs.get() + 1);
            self.last_size.set(size);
            // SAFETY: forwarded caller contract.
            unsafe { LibcAllocator.reallocate(ptr, size) }
        }

        unsafe fn free(&self, ptr: *mut u8) {
            self.frees.set(self.frees.get() + 1);
            // SAFETY: forwarded caller contract.
            unsafe { LibcAllocator.free(ptr) }
        }
    }

    fn counting(platform: Platform, counter: &CountingAllocator) -> RawMem<NativeAtomics, &CountingAllocator> {
        RawMem::with_parts(platform, NativeAtomics, counter)
    }

    fn raw() -> RawMem {
        RawMem::new(Platform::detect())
    }

    #[test]
    fn zero_size_and_zero_address_never_reach_the_allocator() {
        let counter = CountingAllocator::default();
        let raw = counting(Platform::detect(), &counter);

        assert_eq!(raw.allocate_memory(0).unwrap(), 0);
        unsafe {
            raw.free_memory(0).unwrap();
        }
        assert_eq!(counter.allocs.get(), 0);
        assert_eq!(counter.frees.get(), 0);
    }

    #[test]
    fn allocation_rounds_to_heap_words() {
        let counter = CountingAllocator::default();
        let raw = counting(Platform::detect(), &counter);
        let word = core::mem::size_of::<usize>();

        let addr = raw.allocate_memory(1).unwrap();
        assert_ne!(addr, 0);
        assert_eq!(counter.last_size.get(), word);
        unsafe {
            raw.free_memory(addr).unwrap();
        }
        assert_eq!(counter.frees.get(), 1);
    }

    #[test]
    fn reallocate_degenerate_cases() {
        let counter = CountingAllocator::default();
        let raw = counting(Platform::detect(), &counter);

        // Address 0 degenerates to allocation, not a realloc.
        let addr = unsafe { raw.reallocate_memory(0, 32).unwrap() };
        assert_ne!(addr, 0);
        assert_eq!(counter.allocs.get(), 1);
        assert_eq!(counter.reallocs.get(), 0);

        // Size 0 degenerates to free and yields the sentinel.
        assert_eq!(unsafe { raw.reallocate_memory(addr, 0).unwrap() }, 0);
        assert_eq!(counter.frees.get(), 1);

        // Both degenerate: a no-op.
        assert_eq!(unsafe { raw.reallocate_memory(0, 0).unwrap() }, 0);
        assert_eq!(counter.allocs.get(), 1);
        assert_eq!(counter.frees.get(), 1);
    }

    #[test]
    fn reallocate_preserves_content() {
        let raw = raw();
        let addr = raw.allocate_memory(8).unwrap();
        unsafe {
            raw.put_u64(Address::absolute(addr), 0xFEED_FACE, crate::Ordering::Volatile);
            let bigger = raw.reallocate_memory(addr, 1024).unwrap();
            assert_eq!(
                raw.get_u64(Address::absolute(bigger), crate::Ordering::Volatile),
                0xFEED_FACE
            );
            raw.free_memory(bigger).unwrap();
        }
    }

    #[test]
    fn negative_and_overflowing_sizes_are_rejected() {
        let raw = raw();
        assert!(matches!(
            raw.allocate_memory(-1),
            Err(Error::InvalidArgument(_))
        ));

        let p32 = Platform::new(4, 4096, 0, false, true).unwrap();
        let raw32 = RawMem::with_parts(p32, NativeAtomics, LibcAllocator);
        assert!(matches!(
            raw32.allocate_memory(1 << 33),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn set_memory_fills_and_rejects_field_endpoints() {
        let raw = raw();
        let mut buf = [0u8; 16];
        unsafe {
            raw.set_memory(Address::slice_base(&mut buf), 16, 0x5A).unwrap();
        }
        assert_eq!(buf, [0x5A; 16]);

        let mut value = 0u64;
        let field = Address::field(core::ptr::NonNull::from(&mut value).cast(), 0);
        assert!(matches!(
            unsafe { raw.set_memory(field, 8, 0) },
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn copy_memory_handles_overlap() {
        let raw = raw();
        let mut buf: Vec<u8> = (0..16).collect();
        let src = Address::slice_base(&mut buf);
        let dst = src.offset_by(4);
        unsafe {
            raw.copy_memory(src, dst, 8).unwrap();
        }
        assert_eq!(&buf[4..12], &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn copy_swap_reverses_each_element() {
        let raw = raw();
        let mut src = [0x01u8, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut dst = [0u8; 8];
        unsafe {
            raw.copy_swap_memory(
                Address::slice_base(&mut src),
                Address::slice_base(&mut dst),
                8,
                4,
            )
            .unwrap();
        }
        assert_eq!(dst, [0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05]);
    }

    #[test]
    fn copy_swap_validates_element_size() {
        let raw = raw();
        let mut a = [0u8; 8];
        let mut b = [0u8; 8];
        let src = Address::slice_base(&mut a);
        let dst = Address::slice_base(&mut b);
        unsafe {
            assert!(matches!(
                raw.copy_swap_memory(src, dst, 8, 3),
                Err(Error::InvalidArgument(_))
            ));
            assert!(matches!(
                raw.copy_swap_memory(src, dst, 7, 2),
                Err(Error::InvalidArgument(_))
            ));
            // Size 0 with a valid element size is a no-op.
            raw.copy_swap_memory(src, dst, 0, 8).unwrap();
        }
    }

    #[test]
    fn writeback_requires_platform_support() {
        let no_flush = Platform::new(8, 4096, 0, false, true).unwrap();
        let raw = RawMem::with_parts(no_flush, NativeAtomics, LibcAllocator);
        assert!(matches!(
            unsafe { raw.writeback_memory(0x1000, 64) },
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn writeback_covers_the_requested_range() {
        let raw = raw();
        let addr = raw.allocate_memory(256).unwrap();
        unsafe {
            raw.set_memory(Address::absolute(addr), 256, 0xAA).unwrap();
            // Spans multiple lines, deliberately not line-aligned.
            raw.writeback_memory(addr + 7, 200).unwrap();
            raw.free_memory(addr).unwrap();
        }
    }
}
