//! Datagram (UDP) socket.

use std::net::SocketAddr;

use ioq_core::buf::{ConstBuf, MutBuf};

use crate::buf::{IoBuf, OpKind};
use crate::endpoint::SockAddr;
use crate::error::{Context, Error, Result};
use crate::protocol::{MessageFlags, Protocol};
use crate::sys;

use super::ops::{self, receive_datagram};
use super::{BasicSocket, ReceivedFrom, SocketCore, Transferred};

/// Connectionless message socket.
///
/// ```ignore
/// let socket = DatagramSocket::bound(&"127.0.0.1:0".parse()?)?;
/// socket.send_to(b"ping", &peer, MessageFlags::NONE)?;
/// ```
#[derive(Debug)]
pub struct DatagramSocket {
    core: SocketCore,
}

impl DatagramSocket {
    /// Unopened socket.
    pub fn new() -> Self {
        Self { core: SocketCore::new(false) }
    }

    /// Socket of `protocol`, opened but unbound.
    pub fn with_protocol(protocol: Protocol) -> Result<Self> {
        let mut socket = Self::new();
        socket.open(protocol)?;
        Ok(socket)
    }

    /// Socket opened in `endpoint`'s family and bound to it.
    pub fn bound(endpoint: &SocketAddr) -> Result<Self> {
        let socket = Self::with_protocol(Protocol::udp_for(endpoint))?;
        socket.bind(endpoint)?;
        Ok(socket)
    }

    /// Set the default destination and filter incoming datagrams.
    pub fn connect(&self, endpoint: &SocketAddr) -> Result<()> {
        let fd = self.core.check_open("connect")?;
        sys::connect(fd, &SockAddr::from_socket_addr(endpoint)).op("connect")
    }

    pub fn remote_endpoint(&self) -> Result<SocketAddr> {
        let fd = self.core.check_open("remote_endpoint")?;
        sys::remote_endpoint(fd)
            .and_then(|addr| addr.to_socket_addr())
            .op("remote_endpoint")
    }

    /// Receive one datagram. A datagram longer than `buf` is consumed and
    /// reported as `EMSGSIZE`.
    pub fn receive<'a>(&self, buf: impl Into<MutBuf<'a>>, flags: MessageFlags) -> Result<usize> {
        const OP: &str = "receive";
        let fd = self.core.check_open(OP)?;
        let buf: MutBuf<'_> = buf.into();
        match receive_datagram(fd, buf.into_slice(), flags.bits(), None).op(OP)? {
            (_, Some(code)) => Err(Error::new(OP, code)),
            (n, None) => Ok(n),
        }
    }

    /// Receive one datagram and its source.
    pub fn receive_from<'a>(
        &self,
        buf: impl Into<MutBuf<'a>>,
        flags: MessageFlags,
    ) -> Result<(usize, SocketAddr)> {
        const OP: &str = "receive_from";
        let fd = self.core.check_open(OP)?;
        let mut from = SockAddr::empty();
        let buf: MutBuf<'_> = buf.into();
        let buf = buf.into_slice();
        match receive_datagram(fd, buf, flags.bits(), Some(&mut from)).op(OP)? {
            (_, Some(code)) => Err(Error::new(OP, code)),
            (n, None) => Ok((n, from.to_socket_addr().op(OP)?)),
        }
    }

    /// Send to the connected peer; `EDESTADDRREQ` when not connected.
    pub fn send<'a>(&self, data: impl Into<ConstBuf<'a>>, flags: MessageFlags) -> Result<usize> {
        let fd = self.core.check_open("send")?;
        let data: ConstBuf<'_> = data.into();
        sys::send(fd, &data, flags.bits()).op("send")
    }

    pub fn send_to<'a>(
        &self,
        data: impl Into<ConstBuf<'a>>,
        endpoint: &SocketAddr,
        flags: MessageFlags,
    ) -> Result<usize> {
        let fd = self.core.check_open("send_to")?;
        let data: ConstBuf<'_> = data.into();
        sys::send_to(fd, &data, flags.bits(), &SockAddr::from_socket_addr(endpoint)).op("send_to")
    }

    /// Receive into `buf[..len()]`.
    pub fn async_receive(&self, buf: IoBuf, flags: MessageFlags) {
        ops::start(&self.core, buf, OpKind::Receive, flags.bits(), None);
    }

    /// Receive into `buf[..len()]`, recording the source endpoint.
    pub fn async_receive_from(&self, buf: IoBuf, flags: MessageFlags) {
        ops::start(&self.core, buf, OpKind::ReceiveFrom, flags.bits(), None);
    }

    /// Send `buf.data()` to the connected peer.
    pub fn async_send(&self, buf: IoBuf, flags: MessageFlags) {
        ops::start(&self.core, buf, OpKind::Send, flags.bits(), None);
    }

    /// Send `buf.data()` to `endpoint`.
    pub fn async_send_to(&self, buf: IoBuf, endpoint: &SocketAddr, flags: MessageFlags) {
        ops::start(&self.core, buf, OpKind::SendTo, flags.bits(), Some(endpoint));
    }

    /// Outcome of an `async_receive`, `None` if `buf` carried another
    /// operation.
    pub fn async_receive_result(buf: &IoBuf) -> Option<Result<Transferred>> {
        transferred(buf, OpKind::Receive, "async_receive")
    }

    pub fn async_receive_from_result(buf: &IoBuf) -> Option<Result<ReceivedFrom>> {
        const OP: &str = "async_receive_from";
        let op = buf.op();
        if op.kind != OpKind::ReceiveFrom || op.stream {
            return None;
        }
        Some(op.status(OP).and_then(|transferred| {
            let endpoint = op.addr.to_socket_addr().op(OP)?;
            Ok(ReceivedFrom { transferred, endpoint })
        }))
    }

    pub fn async_send_result(buf: &IoBuf) -> Option<Result<Transferred>> {
        transferred(buf, OpKind::Send, "async_send")
    }

    pub fn async_send_to_result(buf: &IoBuf) -> Option<Result<Transferred>> {
        transferred(buf, OpKind::SendTo, "async_send_to")
    }
}

fn transferred(buf: &IoBuf, kind: OpKind, name: &'static str) -> Option<Result<Transferred>> {
    let op = buf.op();
    if op.kind != kind || op.stream {
        return None;
    }
    Some(op.status(name).map(|transferred| Transferred { transferred }))
}

impl Default for DatagramSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicSocket for DatagramSocket {
    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Errno;

    #[test]
    fn test_unconnected_send_needs_destination() {
        let socket = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let err = socket.send(b"x", MessageFlags::NONE).unwrap_err();
        assert_eq!(err, Errno::EDESTADDRREQ);
        assert_eq!(err.op(), "send");
        assert_eq!(socket.remote_endpoint().unwrap_err(), Errno::ENOTCONN);
    }

    #[test]
    fn test_connected_send_receive() {
        let a = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let b = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
        a.connect(&b.local_endpoint().unwrap()).unwrap();
        assert_eq!(a.remote_endpoint().unwrap(), b.local_endpoint().unwrap());

        assert_eq!(a.send(b"hello", MessageFlags::NONE).unwrap(), 5);
        let mut buf = [0u8; 16];
        assert_eq!(b.receive(&mut buf, MessageFlags::NONE).unwrap(), 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_sized_views_clamp_transfers() {
        use ioq_core::buf::{make_buf, make_buf_mut};

        let a = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let b = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let to = b.local_endpoint().unwrap();

        assert_eq!(a.send_to(make_buf(b"hello world", 5), &to, MessageFlags::NONE).unwrap(), 5);
        let mut buf = [0u8; 16];
        let (n, _) = b.receive_from(make_buf_mut(&mut buf, 64), MessageFlags::NONE).unwrap();
        assert_eq!(&buf[..n], b"hello");

        a.send_to("hello", &to, MessageFlags::NONE).unwrap();
        let err = b.receive(make_buf_mut(&mut buf, 3), MessageFlags::NONE).unwrap_err();
        assert_eq!(err, Errno::EMSGSIZE);
        assert_eq!(&buf[..3], b"hel");
    }
}
