//! Caller-side backoff for busy-wait loops
//!
//! The queues never spin internally: an empty `try_pop` returns at once.
//! Consumers that want to wait call [`adaptive_spin`] with the number of
//! consecutive empty pops so far, and reset the counter after a success.

use std::time::Duration;

/// Sleep used once spinning and yielding have both run out.
pub const PARK_INTERVAL: Duration = Duration::from_micros(50);

/// Back off after `retry` consecutive failed attempts.
///
/// - `retry < BUSY`: CPU pause hint
/// - `retry < 2 * BUSY`: yield the time slice
/// - otherwise: sleep for [`PARK_INTERVAL`]
#[inline]
pub fn adaptive_spin<const BUSY: usize>(retry: usize) {
    if retry < BUSY {
        for _ in 0..=retry.min(6) {
            std::hint::spin_loop();
        }
    } else if retry < BUSY.saturating_mul(2) {
        std::thread::yield_now();
    } else {
        std::thread::sleep(PARK_INTERVAL);
    }
}
