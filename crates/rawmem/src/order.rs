//! Memory-ordering strengths and byte-order selection.

use core::sync::atomic::Ordering as AtomicOrdering;

/// The five ordering strengths an access can be tagged with.
///
/// `Volatile` implies acquire on loads and release on stores plus a total
/// order among all volatile operations. `Opaque` only guarantees the access
/// itself is performed indivisibly and not elided; it carries no
/// cross-operation visibility. `Plain` has no guarantee beyond single-thread
/// program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Plain,
    Opaque,
    Acquire,
    Release,
    Volatile,
}

impl Ordering {
    /// Mapping for loads.
    ///
    /// # Panics
    ///
    /// Panics for `Release`, which has no meaning on a load (mirrors
    /// `core::sync::atomic`).
    #[inline]
    pub(crate) fn for_load(self) -> AtomicOrdering {
        match self {
            Self::Plain | Self::Opaque => AtomicOrdering::Relaxed,
            Self::Acquire => AtomicOrdering::Acquire,
            Self::Release => panic!("release ordering on a load"),
            Self::Volatile => AtomicOrdering::SeqCst,
        }
    }

    /// Mapping for stores.
    ///
    /// # Panics
    ///
    /// Panics for `Acquire`, which has no meaning on a store.
    #[inline]
    pub(crate) fn for_store(self) -> AtomicOrdering {
        match self {
            Self::Plain | Self::Opaque => AtomicOrdering::Relaxed,
            Self::Acquire => panic!("acquire ordering on a store"),
            Self::Release => AtomicOrdering::Release,
            Self::Volatile => AtomicOrdering::SeqCst,
        }
    }

    /// (success, failure) mapping for read-modify-write operations.
    #[inline]
    pub(crate) fn for_rmw(self) -> (AtomicOrdering, AtomicOrdering) {
        match self {
            Self::Plain | Self::Opaque => (AtomicOrdering::Relaxed, AtomicOrdering::Relaxed),
            Self::Acquire => (AtomicOrdering::Acquire, AtomicOrdering::Acquire),
            Self::Release => (AtomicOrdering::Release, AtomicOrdering::Relaxed),
            Self::Volatile => (AtomicOrdering::SeqCst, AtomicOrdering::SeqCst),
        }
    }
}

/// Target byte order for the unaligned codec, independent of the platform
/// byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// The byte order this build actually runs on.
    pub const NATIVE: Endian = if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    };

    #[inline]
    pub fn is_big(self) -> bool {
        matches!(self, Endian::Big)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rmw_failure_never_stronger_than_success() {
        for order in [
            Ordering::Plain,
            Ordering::Opaque,
            Ordering::Acquire,
            Ordering::Release,
            Ordering::Volatile,
        ] {
            // Mostly a guard against future edits: compare_exchange requires
            // the failure ordering to be Relaxed, Acquire or SeqCst.
            let (_, failure) = order.for_rmw();
            assert!(matches!(
                failure,
                AtomicOrdering::Relaxed | AtomicOrdering::Acquire | AtomicOrdering::SeqCst
            ));
        }
    }

    #[test]
    #[should_panic(expected = "release ordering on a load")]
    fn release_load_panics() {
        Ordering::Release.for_load();
    }

    #[test]
    fn native_endian_matches_target() {
        assert_eq!(Endian::NATIVE.is_big(), cfg!(target_endian = "big"));
    }
}
