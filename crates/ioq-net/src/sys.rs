//! Native socket calls
//!
//! One function per syscall, no hidden state. Every call returns the raw
//! [`Errno`] on failure; callers attach the operation name. `EINTR` is
//! restarted here and nowhere else.

use std::mem;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::endpoint::SockAddr;
use crate::error::Errno;
use crate::protocol::Protocol;

pub(crate) const INVALID: RawFd = -1;

/// Flags added to every send so a reset peer does not raise SIGPIPE.
#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

#[inline]
fn restart<T, F>(mut f: F) -> Result<T, Errno>
where
    F: FnMut() -> Result<T, Errno>,
{
    loop {
        match f() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn open(protocol: Protocol) -> Result<RawFd, Errno> {
    let ty = protocol.ty() | libc::SOCK_CLOEXEC;
    Errno::result(unsafe { libc::socket(protocol.family(), ty, protocol.protocol()) })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn open(protocol: Protocol) -> Result<RawFd, Errno> {
    let fd = Errno::result(unsafe { libc::socket(protocol.family(), protocol.ty(), protocol.protocol()) })?;
    unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if let Err(e) = set_opt(fd, libc::SOL_SOCKET, libc::SO_NOSIGPIPE, 1) {
        let _ = close(fd);
        return Err(e);
    }
    Ok(fd)
}

pub(crate) fn close(fd: RawFd) -> Result<(), Errno> {
    // Not restarted: the descriptor is gone even when close reports EINTR.
    Errno::result(unsafe { libc::close(fd) }).map(drop)
}

pub(crate) fn bind(fd: RawFd, addr: &SockAddr) -> Result<(), Errno> {
    Errno::result(unsafe { libc::bind(fd, addr.as_ptr(), addr.len()) }).map(drop)
}

pub(crate) fn listen(fd: RawFd, backlog: libc::c_int) -> Result<(), Errno> {
    Errno::result(unsafe { libc::listen(fd, backlog) }).map(drop)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) fn accept(fd: RawFd, peer: &mut SockAddr) -> Result<RawFd, Errno> {
    restart(|| {
        peer.clear();
        Errno::result(unsafe { libc::accept4(fd, peer.as_mut_ptr(), peer.len_mut(), libc::SOCK_CLOEXEC) })
    })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) fn accept(fd: RawFd, peer: &mut SockAddr) -> Result<RawFd, Errno> {
    let new_fd = restart(|| {
        peer.clear();
        Errno::result(unsafe { libc::accept(fd, peer.as_mut_ptr(), peer.len_mut()) })
    })?;
    unsafe { libc::fcntl(new_fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    // BSD accept inherits O_NONBLOCK from the listener.
    if let Err(e) = set_non_blocking(new_fd, false) {
        let _ = close(new_fd);
        return Err(e);
    }
    Ok(new_fd)
}

/// Connect; an interrupted blocking connect is finished by waiting for
/// writability and collecting `SO_ERROR`.
pub(crate) fn connect(fd: RawFd, addr: &SockAddr) -> Result<(), Errno> {
    match Errno::result(unsafe { libc::connect(fd, addr.as_ptr(), addr.len()) }) {
        Ok(_) => Ok(()),
        Err(Errno::EINTR) => {
            wait(fd, Wait::Write, None)?;
            match get_opt(fd, libc::SOL_SOCKET, libc::SO_ERROR)? {
                0 => Ok(()),
                err => Err(Errno::from_raw(err)),
            }
        }
        Err(e) => Err(e),
    }
}

pub(crate) fn shutdown(fd: RawFd, how: libc::c_int) -> Result<(), Errno> {
    Errno::result(unsafe { libc::shutdown(fd, how) }).map(drop)
}

pub(crate) fn recv(fd: RawFd, buf: &mut [u8], flags: libc::c_int) -> Result<usize, Errno> {
    restart(|| {
        Errno::result(unsafe {
            libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags)
        })
        .map(|n| n as usize)
    })
}

/// `recvmsg` returning the byte count and the kernel's `msg_flags`, so the
/// caller can see `MSG_TRUNC`. `from`, if given, receives the source.
pub(crate) fn recv_msg(
    fd: RawFd,
    buf: &mut [u8],
    flags: libc::c_int,
    mut from: Option<&mut SockAddr>,
) -> Result<(usize, libc::c_int), Errno> {
    restart(|| {
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        // SAFETY: msghdr is plain old data; zero is "no name, no control".
        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        if let Some(addr) = from.as_deref_mut() {
            addr.clear();
            msg.msg_name = addr.as_mut_ptr() as *mut libc::c_void;
            msg.msg_namelen = addr.len();
        }
        let n = Errno::result(unsafe { libc::recvmsg(fd, &mut msg, flags) })?;
        if let Some(addr) = from.as_deref_mut() {
            *addr.len_mut() = msg.msg_namelen;
        }
        Ok((n as usize, msg.msg_flags))
    })
}

pub(crate) fn send(fd: RawFd, buf: &[u8], flags: libc::c_int) -> Result<usize, Errno> {
    restart(|| {
        Errno::result(unsafe {
            libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags | SEND_FLAGS)
        })
        .map(|n| n as usize)
    })
}

pub(crate) fn send_to(fd: RawFd, buf: &[u8], flags: libc::c_int, to: &SockAddr) -> Result<usize, Errno> {
    restart(|| {
        Errno::result(unsafe {
            libc::sendto(
                fd,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                flags | SEND_FLAGS,
                to.as_ptr(),
                to.len(),
            )
        })
        .map(|n| n as usize)
    })
}

pub(crate) fn local_endpoint(fd: RawFd) -> Result<SockAddr, Errno> {
    let mut addr = SockAddr::empty();
    Errno::result(unsafe { libc::getsockname(fd, addr.as_mut_ptr(), addr.len_mut()) })?;
    Ok(addr)
}

pub(crate) fn remote_endpoint(fd: RawFd) -> Result<SockAddr, Errno> {
    let mut addr = SockAddr::empty();
    Errno::result(unsafe { libc::getpeername(fd, addr.as_mut_ptr(), addr.len_mut()) })?;
    Ok(addr)
}

pub(crate) fn get_opt(fd: RawFd, level: libc::c_int, name: libc::c_int) -> Result<libc::c_int, Errno> {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    Errno::result(unsafe {
        libc::getsockopt(fd, level, name, &mut value as *mut _ as *mut libc::c_void, &mut len)
    })?;
    Ok(value)
}

pub(crate) fn set_opt(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> Result<(), Errno> {
    Errno::result(unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    })
    .map(drop)
}

pub(crate) fn non_blocking(fd: RawFd) -> Result<bool, Errno> {
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    Ok(flags & libc::O_NONBLOCK != 0)
}

pub(crate) fn set_non_blocking(fd: RawFd, mode: bool) -> Result<(), Errno> {
    let flags = Errno::result(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    let flags = if mode {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    Errno::result(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) }).map(drop)
}

/// Bytes readable without blocking.
pub(crate) fn available(fd: RawFd) -> Result<usize, Errno> {
    let mut value: libc::c_int = 0;
    Errno::result(unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut value) })?;
    Ok(value.max(0) as usize)
}

/// Readiness a caller can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wait {
    Read,
    Write,
}

impl Wait {
    pub(crate) fn poll_events(self) -> libc::c_short {
        match self {
            Self::Read => libc::POLLIN,
            Self::Write => libc::POLLOUT,
        }
    }
}

/// `poll(2)` timeout in milliseconds, rounded up so short waits don't spin.
pub(crate) fn poll_timeout(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let ms = d.as_millis() + u128::from(d.subsec_nanos() % 1_000_000 != 0);
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Block until `fd` is ready for `interest` or `timeout` expires.
///
/// Errors and hangups count as ready; the following call reports them.
pub(crate) fn wait(fd: RawFd, wait: Wait, timeout: Option<Duration>) -> Result<bool, Errno> {
    let mut pfd = libc::pollfd {
        fd,
        events: wait.poll_events(),
        revents: 0,
    };
    let n = restart(|| Errno::result(unsafe { libc::poll(&mut pfd, 1, poll_timeout(timeout)) }))?;
    if n > 0 && pfd.revents & libc::POLLNVAL != 0 {
        return Err(Errno::EBADF);
    }
    Ok(n > 0)
}
