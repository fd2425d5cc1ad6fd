//! Stream (TCP) socket.

use std::net::SocketAddr;
use std::os::fd::RawFd;

use ioq_core::buf::{ConstBuf, MutBuf};

use crate::buf::{IoBuf, OpKind};
use crate::endpoint::SockAddr;
use crate::error::{Context, Error, Result, SocketErrc};
use crate::protocol::{MessageFlags, Protocol};
use crate::sys;

use super::ops;
use super::{BasicSocket, SocketCore, Transferred};

/// Connected byte-stream socket.
#[derive(Debug)]
pub struct StreamSocket {
    core: SocketCore,
}

impl StreamSocket {
    /// Unopened socket.
    pub fn new() -> Self {
        Self { core: SocketCore::new(true) }
    }

    pub(crate) fn from_fd(fd: RawFd) -> Self {
        Self { core: SocketCore::from_fd(fd, true) }
    }

    /// Open in `endpoint`'s family and connect.
    pub fn connect_to(endpoint: &SocketAddr) -> Result<Self> {
        let mut socket = Self::new();
        socket.connect(endpoint)?;
        Ok(socket)
    }

    /// Connect, opening the socket first if needed.
    pub fn connect(&mut self, endpoint: &SocketAddr) -> Result<()> {
        if !self.is_open() {
            self.open(Protocol::tcp_for(endpoint))?;
        }
        sys::connect(self.core.fd, &SockAddr::from_socket_addr(endpoint)).op("connect")
    }

    pub fn remote_endpoint(&self) -> Result<SocketAddr> {
        let fd = self.core.check_open("remote_endpoint")?;
        sys::remote_endpoint(fd)
            .and_then(|addr| addr.to_socket_addr())
            .op("remote_endpoint")
    }

    /// Read what is available, up to `buf.len()` bytes.
    ///
    /// A peer that closed its side shows up as `OrderlyShutdown`.
    pub fn receive<'a>(&self, buf: impl Into<MutBuf<'a>>, flags: MessageFlags) -> Result<usize> {
        const OP: &str = "receive";
        let fd = self.core.check_open(OP)?;
        let buf: MutBuf<'_> = buf.into();
        let buf = buf.into_slice();
        let n = sys::recv(fd, buf, flags.bits()).op(OP)?;
        if n == 0 && !buf.is_empty() {
            return Err(Error::new(OP, SocketErrc::OrderlyShutdown));
        }
        Ok(n)
    }

    /// Write some of `data`; returns the count written.
    pub fn send<'a>(&self, data: impl Into<ConstBuf<'a>>, flags: MessageFlags) -> Result<usize> {
        let fd = self.core.check_open("send")?;
        let data: ConstBuf<'_> = data.into();
        sys::send(fd, &data, flags.bits()).op("send")
    }

    pub fn async_receive(&self, buf: IoBuf, flags: MessageFlags) {
        ops::start(&self.core, buf, OpKind::Receive, flags.bits(), None);
    }

    pub fn async_send(&self, buf: IoBuf, flags: MessageFlags) {
        ops::start(&self.core, buf, OpKind::Send, flags.bits(), None);
    }

    pub fn async_receive_result(buf: &IoBuf) -> Option<Result<Transferred>> {
        stream_transferred(buf, OpKind::Receive, "async_receive")
    }

    pub fn async_send_result(buf: &IoBuf) -> Option<Result<Transferred>> {
        stream_transferred(buf, OpKind::Send, "async_send")
    }
}

fn stream_transferred(buf: &IoBuf, kind: OpKind, name: &'static str) -> Option<Result<Transferred>> {
    let op = buf.op();
    if op.kind != kind || !op.stream {
        return None;
    }
    Some(op.status(name).map(|transferred| Transferred { transferred }))
}

impl Default for StreamSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicSocket for StreamSocket {
    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }
}
