//! Cross-thread wakeup handle.
//!
//! Linux uses an eventfd; other Unixes a non-blocking self-pipe. Either way
//! repeated wakes before the waiter drains collapse into one.

use std::io;
use std::os::fd::RawFd;

pub(crate) struct Waker {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Waker {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { read_fd: fd, write_fd: fd })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    pub(crate) fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFL, libc::fcntl(fd, libc::F_GETFL) | libc::O_NONBLOCK);
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
        Ok(Self { read_fd: fds[0], write_fd: fds[1] })
    }

    /// Descriptor that turns readable after [`wake`](Self::wake).
    pub(crate) fn fd(&self) -> RawFd {
        self.read_fd
    }

    pub(crate) fn wake(&self) {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.write_fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN: counter or pipe full, a wakeup is already pending.
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!(error = %err, "waker write failed");
            }
        }
    }

    /// Consume pending wakeups so the next wait can block again.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe { libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            // eventfd yields its whole counter in one read.
            if n <= 0 || self.read_fd == self.write_fd {
                break;
            }
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe { libc::close(self.read_fd) };
        if self.write_fd != self.read_fd {
            unsafe { libc::close(self.write_fd) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn readable(fd: RawFd) -> bool {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        unsafe { libc::poll(&mut pfd, 1, 0) == 1 }
    }

    #[test]
    fn test_wake_then_drain() {
        let waker = Waker::new().unwrap();
        assert!(!readable(waker.fd()));
        waker.wake();
        waker.wake();
        assert!(readable(waker.fd()));
        waker.drain();
        assert!(!readable(waker.fd()));
    }
}
