//! Process-wide platform constants for raw memory access.
//!
//! Everything a raw-memory layer needs to know about the host is read exactly
//! once, either by probing ([`Platform::detect`]) or by explicit injection
//! ([`Platform::new`]) from a host that does its own bootstrap probing. The
//! resulting [`Platform`] value is immutable and is handed by value to the
//! capability object in `rawmem`; there is no global state.
//!
//! # Constants
//!
//! - `address_size`: native pointer width in bytes (4 or 8)
//! - `page_size`: native memory page size
//! - `data_cache_line_flush_size`: unit of cache-line writeback, 0 when the
//!   platform cannot write back cache lines
//! - `big_endian`: native byte order
//! - `unaligned_access`: whether misaligned plain loads/stores are tolerated

use static_assertions::const_assert;

// Pointer width is fixed at compile time; `Platform::detect` reports it from
// here, `Platform::new` lets a host claim a narrower model (e.g. 4 on a
// 32-bit guest) for the best-effort validity checks.
const NATIVE_ADDRESS_SIZE: u32 = core::mem::size_of::<usize>() as u32;
const_assert!(NATIVE_ADDRESS_SIZE == 4 || NATIVE_ADDRESS_SIZE == 8);

/// Immutable platform description, read once at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    address_size: u32,
    page_size: usize,
    data_cache_line_flush_size: usize,
    big_endian: bool,
    unaligned_access: bool,
}

impl Platform {
    /// Probe the host environment.
    ///
    /// Uses `sysconf(_SC_PAGESIZE)` for the page size and compile-time target
    /// knowledge for everything else. Cache-line writeback is only reported
    /// on x86-64, where `clflush` is baseline.
    pub fn detect() -> Self {
        let page_size = query_page_size();

        let platform = Self {
            address_size: NATIVE_ADDRESS_SIZE,
            page_size,
            data_cache_line_flush_size: native_flush_size(),
            big_endian: cfg!(target_endian = "big"),
            unaligned_access: native_unaligned_access(),
        };

        tracing::debug!(
            address_size = platform.address_size,
            page_size = platform.page_size,
            flush_size = platform.data_cache_line_flush_size,
            big_endian = platform.big_endian,
            unaligned_access = platform.unaligned_access,
            "probed platform"
        );

        platform
    }

    /// Build a platform description from values probed elsewhere.
    ///
    /// Hosts that bootstrap their own constants inject them here once; the
    /// values are trusted afterwards, so malformed combinations are rejected
    /// up front.
    pub fn new(
        address_size: u32,
        page_size: usize,
        data_cache_line_flush_size: usize,
        big_endian: bool,
        unaligned_access: bool,
    ) -> Result<Self, PlatformError> {
        if address_size != 4 && address_size != 8 {
            return Err(PlatformError::BadAddressSize(address_size));
        }
        if !page_size.is_power_of_two() {
            return Err(PlatformError::BadPageSize(page_size));
        }
        if data_cache_line_flush_size != 0 && !data_cache_line_flush_size.is_power_of_two() {
            return Err(PlatformError::BadFlushSize(data_cache_line_flush_size));
        }
        Ok(Self {
            address_size,
            page_size,
            data_cache_line_flush_size,
            big_endian,
            unaligned_access,
        })
    }

    /// Native pointer width in bytes.
    #[inline]
    pub fn address_size(&self) -> u32 {
        self.address_size
    }

    /// Native memory page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Cache-line writeback unit in bytes; 0 when writeback is unsupported.
    #[inline]
    pub fn data_cache_line_flush_size(&self) -> usize {
        self.data_cache_line_flush_size
    }

    /// True when the native byte order is big-endian.
    #[inline]
    pub fn big_endian(&self) -> bool {
        self.big_endian
    }

    /// True when misaligned plain accesses are tolerated by the hardware.
    #[inline]
    pub fn unaligned_access(&self) -> bool {
        self.unaligned_access
    }

    /// True when [`Self::data_cache_line_flush_size`] is nonzero.
    #[inline]
    pub fn is_writeback_enabled(&self) -> bool {
        self.data_cache_line_flush_size != 0
    }

    /// Round an address down to the start of its cache line.
    ///
    /// # Panics
    ///
    /// Panics when the platform reported no cache-line flush size.
    #[inline]
    pub fn data_cache_line_align_down(&self, address: u64) -> u64 {
        assert!(
            self.data_cache_line_flush_size != 0,
            "cache-line writeback is not enabled on this platform"
        );
        address & !(self.data_cache_line_flush_size as u64 - 1)
    }
}

fn query_page_size() -> usize {
    // SAFETY: sysconf with a valid name has no preconditions.
    let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if raw <= 0 {
        // Every supported target has 4 KiB pages as a safe floor.
        tracing::warn!("sysconf(_SC_PAGESIZE) failed, assuming 4096");
        return 4096;
    }
    raw as usize
}

const fn native_flush_size() -> usize {
    if cfg!(target_arch = "x86_64") { 64 } else { 0 }
}

const fn native_unaligned_access() -> bool {
    cfg!(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "aarch64"
    ))
}

/// Errors from explicit platform injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// Pointer width other than 4 or 8 bytes.
    BadAddressSize(u32),
    /// Page size is not a power of two.
    BadPageSize(usize),
    /// Flush size is neither zero nor a power of two.
    BadFlushSize(usize),
}

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadAddressSize(size) => {
                write!(f, "address size must be 4 or 8, got {}", size)
            }
            Self::BadPageSize(size) => {
                write!(f, "page size must be a power of two, got {}", size)
            }
            Self::BadFlushSize(size) => {
                write!(
                    f,
                    "cache-line flush size must be 0 or a power of two, got {}",
                    size
                )
            }
        }
    }
}

impl std::error::Error for PlatformError {}
