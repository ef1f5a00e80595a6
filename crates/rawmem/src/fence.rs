//! Standalone memory fences.
//!
//! The general fences map directly onto `core::sync::atomic::fence`. The
//! direction-restricted names (`load_load_fence`, `store_store_fence`) exist
//! because some callers spell out the minimal barrier they need; they are
//! implemented as, and guaranteed equivalent to, the general acquire and
//! release fences. That equivalence is a contract, not an implementation
//! accident: substituting one for the other is always valid.

use core::sync::atomic::{Ordering, fence};

/// Forbids reordering of loads before the fence with loads and stores after
/// it (an acquire fence).
#[inline]
pub fn load_fence() {
    fence(Ordering::Acquire);
}

/// Forbids reordering of loads and stores before the fence with stores after
/// it (a release fence).
#[inline]
pub fn store_fence() {
    fence(Ordering::Release);
}

/// Forbids reordering of any memory operation across the fence, including
/// store-load.
#[inline]
pub fn full_fence() {
    fence(Ordering::SeqCst);
}

/// Load-load barrier; equivalent to [`load_fence`].
#[inline]
pub fn load_load_fence() {
    load_fence();
}

/// Store-store barrier; equivalent to [`store_fence`].
#[inline]
pub fn store_store_fence() {
    store_fence();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;

    // Publish data with a relaxed flag plus explicit fences, consuming with
    // either the general acquire fence or the load-load alias. Both must
    // observe the published value; the alias is defined to be substitutable.
    fn publish_and_consume(consume_with: fn()) {
        let data = Arc::new(AtomicU32::new(0));
        let ready = Arc::new(AtomicBool::new(false));

        let producer = {
            let data = data.clone();
            let ready = ready.clone();
            thread::spawn(move || {
                data.store(42, Ordering::Relaxed);
                store_fence();
                ready.store(true, Ordering::Relaxed);
            })
        };

        while !ready.load(Ordering::Relaxed) {
            std::hint::spin_loop();
        }
        consume_with();
        assert_eq!(data.load(Ordering::Relaxed), 42);

        producer.join().unwrap();
    }

    #[test]
    fn acquire_fence_publishes() {
        publish_and_consume(load_fence);
    }

    #[test]
    fn load_load_fence_is_substitutable() {
        publish_and_consume(load_load_fence);
    }

    #[test]
    fn fences_are_callable() {
        full_fence();
        store_store_fence();
    }
}
