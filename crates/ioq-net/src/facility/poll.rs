//! `poll(2)` facility, available on every Unix.

use std::io;
use std::time::Duration;

use super::{Facility, Interest, Readiness, Waker};
use crate::sys::poll_timeout;

pub struct PollFacility {
    waker: Waker,
}

impl PollFacility {
    pub fn new() -> io::Result<Self> {
        Ok(Self { waker: Waker::new()? })
    }
}

impl Facility for PollFacility {
    fn wait(&self, interest: &[Interest], timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()> {
        let mut fds = Vec::with_capacity(interest.len() + 1);
        fds.push(libc::pollfd {
            fd: self.waker.fd(),
            events: libc::POLLIN,
            revents: 0,
        });
        fds.extend(interest.iter().map(|i| libc::pollfd {
            fd: i.fd,
            events: i.poll_events(),
            revents: 0,
        }));

        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, poll_timeout(timeout)) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(());
        }

        if fds[0].revents != 0 {
            self.waker.drain();
        }
        ready.extend(
            fds[1..]
                .iter()
                .filter_map(|pfd| Readiness::from_revents(pfd.fd, pfd.revents)),
        );
        Ok(())
    }

    fn wake(&self) {
        self.waker.wake();
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
