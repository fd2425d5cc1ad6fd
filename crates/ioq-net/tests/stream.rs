//! Stream sockets and acceptors over loopback.

use std::net::{Shutdown, SocketAddr};
use std::thread;
use std::time::Duration;

use ioq_net::{
    BasicSocket, DatagramSocket, Errno, IoContext, IoService, MessageFlags, SocketErrc,
    StreamAcceptor, StreamSocket, Wait,
};

const WAIT: Duration = Duration::from_secs(5);

fn listener() -> (StreamAcceptor, SocketAddr) {
    let acceptor = StreamAcceptor::listen_on(&"127.0.0.1:0".parse().unwrap()).unwrap();
    let endpoint = acceptor.local_endpoint().unwrap();
    (acceptor, endpoint)
}

fn connected_pair() -> (StreamSocket, StreamSocket) {
    let (acceptor, endpoint) = listener();
    let client = StreamSocket::connect_to(&endpoint).unwrap();
    let (server, peer) = acceptor.accept().unwrap();
    assert_eq!(peer, client.local_endpoint().unwrap());
    (client, server)
}

fn receive_exact(socket: &StreamSocket, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        filled += socket.receive(&mut out[filled..], MessageFlags::NONE).unwrap();
    }
    out
}

fn next(ctx: &IoContext) -> ioq_net::IoBuf {
    ctx.get(WAIT).unwrap().expect("completion within timeout")
}

#[test]
fn test_accept_and_exchange() {
    let (client, server) = connected_pair();
    assert_eq!(server.remote_endpoint().unwrap(), client.local_endpoint().unwrap());
    assert_eq!(client.remote_endpoint().unwrap(), server.local_endpoint().unwrap());

    client.send(b"ping", MessageFlags::NONE).unwrap();
    assert_eq!(receive_exact(&server, 4), b"ping");
    server.send(b"pong", MessageFlags::NONE).unwrap();
    assert_eq!(receive_exact(&client, 4), b"pong");
}

#[test]
fn test_peer_close_is_orderly_shutdown() {
    let (client, server) = connected_pair();
    drop(client);

    let mut buf = [0u8; 16];
    let err = server.receive(&mut buf, MessageFlags::NONE).unwrap_err();
    assert_eq!(err, SocketErrc::OrderlyShutdown);

    // An empty read is not mistaken for end of stream.
    assert_eq!(server.receive(&mut [0u8; 0], MessageFlags::NONE).unwrap(), 0);
}

#[test]
fn test_connect_refused() {
    // Bind a port, then close it so nothing listens there.
    let endpoint = listener().1;
    let err = StreamSocket::connect_to(&endpoint).unwrap_err();
    assert_eq!(err, Errno::ECONNREFUSED);
}

#[test]
fn test_accept_non_blocking_would_block() {
    let (acceptor, _) = listener();
    acceptor.set_non_blocking(true).unwrap();
    assert_eq!(acceptor.accept().unwrap_err(), Errno::EWOULDBLOCK);
    assert!(!acceptor.wait(Wait::Read, Duration::from_millis(10)).unwrap());
}

#[test]
fn test_connection_aborted_flag() {
    let acceptor = StreamAcceptor::new();
    assert!(!acceptor.connection_aborted());
    acceptor.enable_connection_aborted(true);
    assert!(acceptor.connection_aborted());
    assert_eq!(acceptor.accept().unwrap_err(), Errno::EBADF);
}

#[test]
fn test_async_accept() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (mut acceptor, endpoint) = listener();
    service.associate(&mut acceptor).unwrap();

    acceptor.async_accept(ctx.make_buf().unwrap());
    assert!(ctx.get(Duration::ZERO).unwrap().is_none());

    let client = StreamSocket::connect_to(&endpoint).unwrap();
    let mut buf = next(&ctx);
    let accepted = StreamAcceptor::async_accept_result(&mut buf).unwrap().unwrap();
    assert_eq!(accepted.endpoint, client.local_endpoint().unwrap());
    assert!(accepted.socket.is_open());
    assert!(!accepted.socket.is_associated());

    // The connection can only be taken once.
    let err = StreamAcceptor::async_accept_result(&mut buf).unwrap().unwrap_err();
    assert_eq!(err, Errno::EBADF);

    client.send(b"hello", MessageFlags::NONE).unwrap();
    assert_eq!(receive_exact(&accepted.socket, 5), b"hello");
}

#[test]
fn test_blocking_accept_beside_pending_async_accept() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (mut acceptor, endpoint) = listener();
    service.associate(&mut acceptor).unwrap();
    assert!(!acceptor.non_blocking().unwrap());

    acceptor.async_accept(ctx.make_buf().unwrap());
    let first = StreamSocket::connect_to(&endpoint).unwrap();
    let (taken, peer) = acceptor.accept().unwrap();
    assert_eq!(peer, first.local_endpoint().unwrap());
    assert!(!taken.non_blocking().unwrap());

    // The pending accept finds nothing and the context stays responsive.
    assert!(ctx.get(Duration::from_millis(50)).unwrap().is_none());
    assert_eq!(ctx.stats().pending, 1);

    let second = StreamSocket::connect_to(&endpoint).unwrap();
    let mut buf = next(&ctx);
    let accepted = StreamAcceptor::async_accept_result(&mut buf).unwrap().unwrap();
    assert_eq!(accepted.endpoint, second.local_endpoint().unwrap());
}

#[test]
fn test_async_accept_unclaimed_connection_closed() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (mut acceptor, endpoint) = listener();
    service.associate(&mut acceptor).unwrap();

    let client = StreamSocket::connect_to(&endpoint).unwrap();
    acceptor.async_accept(ctx.make_buf().unwrap());
    drop(next(&ctx));

    // Dropping the buffer closed the accepted side.
    let mut buf = [0u8; 8];
    let err = client.receive(&mut buf, MessageFlags::NONE).unwrap_err();
    assert_eq!(err, SocketErrc::OrderlyShutdown);
}

#[test]
fn test_async_accept_cancelled_by_close() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (mut acceptor, _) = listener();
    service.associate(&mut acceptor).unwrap();

    acceptor.async_accept(ctx.make_buf().unwrap());
    acceptor.close().unwrap();

    let mut buf = next(&ctx);
    let err = StreamAcceptor::async_accept_result(&mut buf).unwrap().unwrap_err();
    assert_eq!(err, Errno::ECANCELED);
}

#[test]
fn test_async_receive_and_send() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (client, mut server) = connected_pair();
    service.associate(&mut server).unwrap();

    server.async_receive(ctx.make_buf().unwrap(), MessageFlags::NONE);
    client.send(b"request", MessageFlags::NONE).unwrap();

    let mut buf = next(&ctx);
    let received = StreamSocket::async_receive_result(&buf).unwrap().unwrap();
    assert_eq!(received.transferred, 7);
    assert_eq!(buf.data(), b"request");

    buf.reset();
    buf.copy_from(b"response");
    server.async_send(buf, MessageFlags::NONE);
    let buf = next(&ctx);
    let sent = StreamSocket::async_send_result(&buf).unwrap().unwrap();
    assert_eq!(sent.transferred, 8);
    assert_eq!(receive_exact(&client, 8), b"response");

    // Datagram accessors do not interpret stream completions.
    assert!(DatagramSocket::async_send_result(&buf).is_none());
}

#[test]
fn test_async_receive_peer_closed() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (client, mut server) = connected_pair();
    service.associate(&mut server).unwrap();

    server.async_receive(ctx.make_buf().unwrap(), MessageFlags::NONE);
    drop(client);

    let buf = next(&ctx);
    let err = StreamSocket::async_receive_result(&buf).unwrap().unwrap_err();
    assert_eq!(err, SocketErrc::OrderlyShutdown);
    assert_eq!(buf.transferred(), 0);
}

#[test]
fn test_async_send_after_shutdown() {
    let service = IoService::new();
    let ctx = service.make_context(4).unwrap();
    let (_client, mut server) = connected_pair();
    service.associate(&mut server).unwrap();

    server.shutdown(Shutdown::Write).unwrap();
    let mut buf = ctx.make_buf().unwrap();
    buf.copy_from(b"late");
    server.async_send(buf, MessageFlags::NONE);

    let buf = next(&ctx);
    let err = StreamSocket::async_send_result(&buf).unwrap().unwrap_err();
    assert_eq!(err, SocketErrc::OrderlyShutdown);
}

#[test]
fn test_async_receive_from_other_thread() {
    let service = IoService::new();
    let (client, mut server) = connected_pair();
    service.associate(&mut server).unwrap();

    thread::scope(|s| {
        let worker = s.spawn(|| {
            let ctx = service.make_context(1).unwrap();
            server.async_receive(ctx.make_buf().unwrap(), MessageFlags::NONE);
            let buf = next(&ctx);
            StreamSocket::async_receive_result(&buf).unwrap().unwrap().transferred
        });
        thread::sleep(Duration::from_millis(20));
        client.send(b"across", MessageFlags::NONE).unwrap();
        assert_eq!(worker.join().unwrap(), 6);
    });
}
