//! Sockets
//!
//! [`BasicSocket`] carries what every socket kind shares: lifecycle,
//! binding, options and half-close. The typed wrappers add their own
//! synchronous and asynchronous operations.
//!
//! Synchronous calls go straight to the OS and follow the socket's
//! blocking mode. Asynchronous calls take an [`IoBuf`](crate::IoBuf) by
//! value and complete through the buffer's context; the socket must be
//! associated with the service that context belongs to.

use std::net::{Shutdown, SocketAddr};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::SockAddr;
use crate::error::{Context, Errno, Error, Result, SocketErrc};
use crate::options::SocketOption;
use crate::protocol::Protocol;
use crate::service::ServiceShared;
use crate::sys::{self, Wait};

mod acceptor;
mod datagram;
pub(crate) mod ops;
mod stream;

pub use acceptor::{Accepted, StreamAcceptor};
pub use datagram::DatagramSocket;
pub use stream::StreamSocket;

/// Completion view of a send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transferred {
    pub transferred: usize,
}

/// Completion view of a `receive_from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrom {
    pub transferred: usize,
    pub endpoint: SocketAddr,
}

/// Handle plus association state shared by every socket kind.
#[doc(hidden)]
pub struct SocketCore {
    pub(crate) fd: RawFd,
    pub(crate) stream: bool,
    pub(crate) service: Option<Arc<ServiceShared>>,
    shut_read: AtomicBool,
    shut_write: AtomicBool,
}

impl SocketCore {
    pub(crate) fn new(stream: bool) -> Self {
        Self::from_fd(sys::INVALID, stream)
    }

    pub(crate) fn from_fd(fd: RawFd, stream: bool) -> Self {
        Self {
            fd,
            stream,
            service: None,
            shut_read: AtomicBool::new(false),
            shut_write: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.fd >= 0
    }

    pub(crate) fn is_shut(&self, dir: Wait) -> bool {
        match dir {
            Wait::Read => self.shut_read.load(Ordering::Acquire),
            Wait::Write => self.shut_write.load(Ordering::Acquire),
        }
    }

    pub(crate) fn check_open(&self, op: &'static str) -> Result<RawFd> {
        if self.is_open() {
            Ok(self.fd)
        } else {
            Err(Error::new(op, Errno::EBADF))
        }
    }

    fn open(&mut self, protocol: Protocol) -> Result<()> {
        const OP: &str = "open";
        if self.is_open() {
            return Err(Error::new(OP, SocketErrc::AlreadyOpen));
        }
        let fd = sys::open(protocol).op(OP)?;
        self.adopt(fd);
        Ok(())
    }

    fn assign(&mut self, handle: RawFd) -> Result<()> {
        const OP: &str = "assign";
        if self.is_open() {
            return Err(Error::new(OP, SocketErrc::AlreadyOpen));
        }
        if handle < 0 {
            return Err(Error::new(OP, Errno::EBADF));
        }
        self.adopt(handle);
        Ok(())
    }

    fn adopt(&mut self, fd: RawFd) {
        self.fd = fd;
        self.shut_read.store(false, Ordering::Release);
        self.shut_write.store(false, Ordering::Release);
    }

    /// Detach the handle: pending operations complete with `ECANCELED`
    /// and the association is dropped.
    fn detach(&mut self, op: &'static str) -> Result<RawFd> {
        let fd = self.check_open(op)?;
        if let Some(service) = self.service.take() {
            let cancelled = service.cancel(fd, None, Errno::ECANCELED.into());
            service.forget(fd);
            tracing::trace!(fd, cancelled, "socket detached");
        }
        self.adopt(sys::INVALID);
        Ok(fd)
    }

    fn close(&mut self) -> Result<()> {
        let fd = self.detach("close")?;
        sys::close(fd).op("close")
    }

    fn shutdown(&self, how: Shutdown) -> Result<()> {
        const OP: &str = "shutdown";
        let fd = self.check_open(OP)?;
        let raw = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        match sys::shutdown(fd, raw) {
            Ok(()) => {}
            // Unconnected datagram sockets report ENOTCONN but are shut anyway.
            Err(Errno::ENOTCONN) if !self.stream => {}
            Err(e) => return Err(Error::new(OP, e)),
        }

        let dirs: &[Wait] = match how {
            Shutdown::Read => &[Wait::Read],
            Shutdown::Write => &[Wait::Write],
            Shutdown::Both => &[Wait::Read, Wait::Write],
        };
        for &dir in dirs {
            match dir {
                Wait::Read => self.shut_read.store(true, Ordering::Release),
                Wait::Write => self.shut_write.store(true, Ordering::Release),
            }
            if let Some(service) = &self.service {
                service.cancel(fd, Some(dir), SocketErrc::OrderlyShutdown.into());
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for SocketCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketCore")
            .field("fd", &self.fd)
            .field("stream", &self.stream)
            .field("associated", &self.service.is_some())
            .finish()
    }
}

impl Drop for SocketCore {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "close on drop failed");
            }
        }
    }
}

/// Operations common to every socket kind.
///
/// State machine: unopened `--open/assign-->` open `--close-->` unopened.
/// Anything but `open`/`assign` on an unopened socket fails with `EBADF`.
pub trait BasicSocket {
    #[doc(hidden)]
    fn core(&self) -> &SocketCore;
    #[doc(hidden)]
    fn core_mut(&mut self) -> &mut SocketCore;

    fn is_open(&self) -> bool {
        self.core().is_open()
    }

    /// OS handle, `-1` when unopened.
    fn native_handle(&self) -> RawFd {
        self.core().fd
    }

    fn open(&mut self, protocol: Protocol) -> Result<()> {
        self.core_mut().open(protocol)
    }

    /// Take ownership of an existing handle.
    fn assign(&mut self, _protocol: Protocol, handle: RawFd) -> Result<()> {
        self.core_mut().assign(handle)
    }

    /// Close the handle. Pending asynchronous operations complete with
    /// `ECANCELED` first.
    fn close(&mut self) -> Result<()> {
        self.core_mut().close()
    }

    /// Give up the handle without closing it. Pending asynchronous
    /// operations complete with `ECANCELED`.
    fn release(&mut self) -> Result<RawFd> {
        self.core_mut().detach("release")
    }

    fn bind(&self, endpoint: &SocketAddr) -> Result<()> {
        let fd = self.core().check_open("bind")?;
        sys::bind(fd, &SockAddr::from_socket_addr(endpoint)).op("bind")
    }

    fn local_endpoint(&self) -> Result<SocketAddr> {
        let fd = self.core().check_open("local_endpoint")?;
        sys::local_endpoint(fd)
            .and_then(|addr| addr.to_socket_addr())
            .op("local_endpoint")
    }

    fn set_option<O: SocketOption>(&self, option: O) -> Result<()> {
        let fd = self.core().check_open("set_option")?;
        sys::set_opt(fd, O::LEVEL, O::NAME, option.to_raw()).op("set_option")
    }

    fn get_option<O: SocketOption>(&self) -> Result<O> {
        let fd = self.core().check_open("get_option")?;
        sys::get_opt(fd, O::LEVEL, O::NAME).map(O::from_raw).op("get_option")
    }

    fn non_blocking(&self) -> Result<bool> {
        let fd = self.core().check_open("non_blocking")?;
        sys::non_blocking(fd).op("non_blocking")
    }

    fn set_non_blocking(&self, mode: bool) -> Result<()> {
        let fd = self.core().check_open("set_non_blocking")?;
        sys::set_non_blocking(fd, mode).op("set_non_blocking")
    }

    /// Bytes that can be read without blocking.
    fn available(&self) -> Result<usize> {
        let fd = self.core().check_open("available")?;
        sys::available(fd).op("available")
    }

    /// Wait until readable or writable. `false` on timeout;
    /// `Duration::MAX` waits without bound.
    fn wait(&self, what: Wait, timeout: Duration) -> Result<bool> {
        let fd = self.core().check_open("wait")?;
        let timeout = (timeout != Duration::MAX).then_some(timeout);
        sys::wait(fd, what, timeout).op("wait")
    }

    /// Half-close. Pending and later asynchronous operations in the shut
    /// direction complete with `OrderlyShutdown`.
    fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.core().shutdown(how)
    }

    /// Whether asynchronous operations can be issued.
    fn is_associated(&self) -> bool {
        self.core().service.is_some()
    }
}
