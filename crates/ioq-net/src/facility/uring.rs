//! io_uring facility.
//!
//! Readiness is requested with one-shot `PollAdd` entries keyed by
//! `(fd << 32) | poll mask`, so each (fd, direction set) is armed at most
//! once. The waker's eventfd is armed the same way under [`WAKE`].

use std::collections::HashSet;
use std::io;
use std::os::fd::RawFd;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use io_uring::{opcode, squeue, types, IoUring};

use super::{Facility, Interest, Readiness, Waker};

const RING_ENTRIES: u32 = 256;

const WAKE: u64 = u64::MAX;
const CANCEL: u64 = u64::MAX - 1;

fn key(fd: RawFd, mask: u32) -> u64 {
    ((fd as u32 as u64) << 32) | mask as u64
}

fn split(key: u64) -> (RawFd, u32) {
    ((key >> 32) as u32 as RawFd, key as u32)
}

pub struct UringFacility {
    ring: IoUring,
    waker: Waker,
    /// Serializes every user of the submission queue.
    sq: Mutex<()>,
    /// Poll requests in flight, by key.
    armed: Mutex<HashSet<u64>>,
}

impl UringFacility {
    pub fn new() -> io::Result<Self> {
        let ring = IoUring::builder().build(RING_ENTRIES)?;
        Ok(Self {
            ring,
            waker: Waker::new()?,
            sq: Mutex::new(()),
            armed: Mutex::new(HashSet::new()),
        })
    }

    fn push(&self, entry: &squeue::Entry) -> io::Result<()> {
        let _guard = self.sq.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            // SAFETY: `sq` is held, so no other SubmissionQueue is alive.
            // Entries only carry descriptors and tags, no buffers.
            let pushed = unsafe { self.ring.submission_shared().push(entry).is_ok() };
            if pushed {
                return Ok(());
            }
            self.ring.submit()?;
        }
    }

    fn arm(&self, armed: &mut HashSet<u64>, fd: RawFd, mask: u32, tag: u64) -> io::Result<()> {
        if armed.insert(tag) {
            let entry = opcode::PollAdd::new(types::Fd(fd), mask).build().user_data(tag);
            if let Err(e) = self.push(&entry) {
                armed.remove(&tag);
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Facility for UringFacility {
    fn wait(&self, interest: &[Interest], timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()> {
        {
            let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
            self.arm(&mut armed, self.waker.fd(), libc::POLLIN as u32, WAKE)?;
            for i in interest {
                let mask = i.poll_events() as u32;
                self.arm(&mut armed, i.fd, mask, key(i.fd, mask))?;
            }
        }

        let submitted = match timeout {
            Some(d) if d.is_zero() => self.ring.submit(),
            Some(d) => {
                let ts = types::Timespec::new().sec(d.as_secs()).nsec(d.subsec_nanos());
                let args = types::SubmitArgs::new().timespec(&ts);
                self.ring.submitter().submit_with_args(1, &args)
            }
            None => self.ring.submit_and_wait(1),
        };
        if let Err(e) = submitted {
            match e.raw_os_error() {
                Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY) => {}
                _ => return Err(e),
            }
        }

        let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
        // SAFETY: only the polling thread reaches this point.
        let cq = unsafe { self.ring.completion_shared() };
        for cqe in cq {
            let tag = cqe.user_data();
            match tag {
                CANCEL => {}
                WAKE => {
                    armed.remove(&WAKE);
                    self.waker.drain();
                }
                _ => {
                    armed.remove(&tag);
                    let (fd, mask) = split(tag);
                    let res = cqe.result();
                    let revents = if res == -libc::ECANCELED {
                        continue;
                    } else if res < 0 {
                        // Treat a failed poll as an error condition on the fd.
                        libc::POLLERR
                    } else {
                        (res as u32 & (mask | (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) as u32)) as libc::c_short
                    };
                    ready.extend(Readiness::from_revents(fd, revents));
                }
            }
        }
        Ok(())
    }

    fn wake(&self) {
        self.waker.wake();
    }

    fn forget(&self, fd: RawFd) {
        let stale: Vec<u64> = {
            let mut armed = self.armed.lock().unwrap_or_else(PoisonError::into_inner);
            let stale: Vec<u64> = armed.iter().copied().filter(|&k| k != WAKE && split(k).0 == fd).collect();
            for k in &stale {
                armed.remove(k);
            }
            stale
        };
        if stale.is_empty() {
            return;
        }
        for k in stale {
            let entry = opcode::AsyncCancel::new(k).build().user_data(CANCEL);
            if let Err(e) = self.push(&entry) {
                tracing::warn!(fd, error = %e, "io_uring cancel failed");
            }
        }
        if let Err(e) = self.ring.submit() {
            tracing::warn!(fd, error = %e, "io_uring submit failed");
        }
    }

    fn name(&self) -> &'static str {
        "io_uring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_split() {
        assert_eq!(split(key(7, libc::POLLIN as u32)), (7, libc::POLLIN as u32));
        assert_ne!(key(7, libc::POLLIN as u32), key(7, libc::POLLOUT as u32));
        assert_ne!(key(7, 1), WAKE);
    }
}
