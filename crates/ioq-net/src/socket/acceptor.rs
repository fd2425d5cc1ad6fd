//! Listening stream socket.

use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::buf::{IoBuf, OpKind};
use crate::endpoint::SockAddr;
use crate::error::{Context, Errno, Error, Result};
use crate::options::ReuseAddress;
use crate::protocol::Protocol;
use crate::sys::{self, Wait};

use super::ops::{self, REPORT_ABORTED};
use super::{BasicSocket, SocketCore, StreamSocket};

/// A connection taken off an acceptor.
#[derive(Debug)]
pub struct Accepted {
    pub socket: StreamSocket,
    pub endpoint: SocketAddr,
}

/// Passive stream socket producing connected [`StreamSocket`]s.
///
/// The OS handle is kept `O_NONBLOCK` so an asynchronous accept never
/// blocks the context that retries it. The blocking mode seen through
/// [`BasicSocket::non_blocking`] is tracked here and honoured by
/// [`accept`](Self::accept).
#[derive(Debug)]
pub struct StreamAcceptor {
    core: SocketCore,
    report_aborted: AtomicBool,
    non_blocking: AtomicBool,
}

impl StreamAcceptor {
    /// Unopened acceptor.
    pub fn new() -> Self {
        Self {
            core: SocketCore::new(true),
            report_aborted: AtomicBool::new(false),
            non_blocking: AtomicBool::new(false),
        }
    }

    /// Switch a freshly adopted handle to `O_NONBLOCK`, remembering the
    /// mode it came with.
    fn adopted(&mut self, op: &'static str, fd: RawFd) -> Result<()> {
        let mode = sys::non_blocking(fd).and_then(|mode| {
            sys::set_non_blocking(fd, true)?;
            Ok(mode)
        });
        match mode {
            Ok(mode) => {
                self.non_blocking.store(mode, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let _ = self.core.close();
                Err(Error::new(op, e))
            }
        }
    }

    /// Open in `endpoint`'s family with `SO_REUSEADDR`, bind and listen
    /// with the system's default backlog.
    pub fn listen_on(endpoint: &SocketAddr) -> Result<Self> {
        let mut acceptor = Self::new();
        acceptor.open(Protocol::tcp_for(endpoint))?;
        acceptor.set_option(ReuseAddress(true))?;
        acceptor.bind(endpoint)?;
        acceptor.listen(libc::SOMAXCONN)?;
        Ok(acceptor)
    }

    pub fn listen(&self, backlog: i32) -> Result<()> {
        let fd = self.core.check_open("listen")?;
        sys::listen(fd, backlog).op("listen")
    }

    /// When disabled (the default) `ECONNABORTED` from accept is retried.
    pub fn enable_connection_aborted(&self, enable: bool) {
        self.report_aborted.store(enable, Ordering::Relaxed);
    }

    pub fn connection_aborted(&self) -> bool {
        self.report_aborted.load(Ordering::Relaxed)
    }

    /// Wait for and take one connection, following the blocking mode.
    pub fn accept(&self) -> Result<(StreamSocket, SocketAddr)> {
        const OP: &str = "accept";
        let fd = self.core.check_open(OP)?;
        let mut peer = SockAddr::empty();
        loop {
            match sys::accept(fd, &mut peer) {
                Ok(new_fd) => {
                    let socket = StreamSocket::from_fd(new_fd);
                    return Ok((socket, peer.to_socket_addr().op(OP)?));
                }
                Err(Errno::ECONNABORTED) if !self.connection_aborted() => continue,
                Err(Errno::EAGAIN) if !self.non_blocking.load(Ordering::Relaxed) => {
                    sys::wait(fd, Wait::Read, None).op(OP)?;
                }
                Err(e) => return Err(Error::new(OP, e)),
            }
        }
    }

    pub fn async_accept(&self, buf: IoBuf) {
        let flags = if self.connection_aborted() { REPORT_ABORTED } else { 0 };
        ops::start(&self.core, buf, OpKind::Accept, flags, None);
    }

    /// Move the accepted connection out of `buf`.
    ///
    /// Returns `None` if `buf` carried another operation. Once the socket
    /// has been taken, further calls fail with `EBADF`.
    pub fn async_accept_result(buf: &mut IoBuf) -> Option<Result<Accepted>> {
        const OP: &str = "async_accept";
        let op = &mut buf.slot_mut().op;
        if op.kind != OpKind::Accept {
            return None;
        }
        if let Err(e) = op.status(OP) {
            return Some(Err(e));
        }
        if op.accepted < 0 {
            return Some(Err(Error::new(OP, Errno::EBADF)));
        }
        let socket = StreamSocket::from_fd(std::mem::replace(&mut op.accepted, sys::INVALID));
        Some(op.addr.to_socket_addr().op(OP).map(|endpoint| Accepted { socket, endpoint }))
    }
}

impl Default for StreamAcceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicSocket for StreamAcceptor {
    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }

    fn open(&mut self, protocol: Protocol) -> Result<()> {
        self.core.open(protocol)?;
        self.adopted("open", self.core.fd)
    }

    fn assign(&mut self, _protocol: Protocol, handle: RawFd) -> Result<()> {
        self.core.assign(handle)?;
        self.adopted("assign", handle)
    }

    /// The handle leaves in the blocking mode last set by the caller.
    fn release(&mut self) -> Result<RawFd> {
        let fd = self.core.check_open("release")?;
        sys::set_non_blocking(fd, self.non_blocking.load(Ordering::Relaxed)).op("release")?;
        self.core.detach("release")
    }

    fn non_blocking(&self) -> Result<bool> {
        self.core.check_open("non_blocking")?;
        Ok(self.non_blocking.load(Ordering::Relaxed))
    }

    fn set_non_blocking(&self, mode: bool) -> Result<()> {
        self.core.check_open("set_non_blocking")?;
        self.non_blocking.store(mode, Ordering::Relaxed);
        Ok(())
    }
}
