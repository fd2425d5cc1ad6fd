//! Readiness notification facility
//!
//! Each [`IoContext`](crate::IoContext) owns one facility and blocks in it
//! while waiting for pending operations to become ready. The context only
//! sees the [`Facility`] trait; the implementation is chosen per platform.

use std::os::fd::RawFd;
use std::time::Duration;
use std::io;

mod waker;
pub(crate) use waker::Waker;

/// Directions a context wants to hear about for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub fd: RawFd,
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub(crate) fn poll_events(&self) -> libc::c_short {
        let mut events = 0;
        if self.read {
            events |= libc::POLLIN;
        }
        if self.write {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Directions found ready. Errors and hangups mark both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    pub read: bool,
    pub write: bool,
}

impl Readiness {
    pub(crate) fn from_revents(fd: RawFd, revents: libc::c_short) -> Option<Self> {
        let broken = revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
        let read = broken || revents & libc::POLLIN != 0;
        let write = broken || revents & libc::POLLOUT != 0;
        (read || write).then_some(Self { fd, read, write })
    }
}

/// Platform wait primitive behind a context.
///
/// `wait` is only ever called by the thread polling the owning context.
/// `wake` and `forget` may be called from any thread.
pub trait Facility: Send + Sync {
    /// Block until a descriptor in `interest` is ready, [`wake`](Self::wake)
    /// is called, or `timeout` expires (`None` waits forever).
    ///
    /// Ready descriptors are appended to `ready`. Spurious returns with
    /// nothing appended are allowed.
    fn wait(&self, interest: &[Interest], timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()>;

    /// Interrupt a blocked `wait`. Wakes coalesce.
    fn wake(&self);

    /// Drop any kernel-side state kept for `fd` before it is closed.
    fn forget(&self, _fd: RawFd) {}

    fn name(&self) -> &'static str;
}

mod poll;
pub use poll::PollFacility;

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", feature = "io-uring"))] {
        mod uring;
        pub use uring::UringFacility;

        /// Create the facility for a new context.
        pub fn new_facility() -> io::Result<Box<dyn Facility>> {
            match UringFacility::new() {
                Ok(facility) => Ok(Box::new(facility)),
                Err(e) => {
                    tracing::warn!(error = %e, "io_uring unavailable, falling back to poll");
                    Ok(Box::new(PollFacility::new()?))
                }
            }
        }
    } else {
        /// Create the facility for a new context.
        pub fn new_facility() -> io::Result<Box<dyn Facility>> {
            Ok(Box::new(PollFacility::new()?))
        }
    }
}
