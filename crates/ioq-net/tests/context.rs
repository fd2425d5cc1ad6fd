//! Several contexts sharing one service and one socket.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use ioq_net::{BasicSocket, DatagramSocket, Errno, IoService, MessageFlags};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_close_cancels_in_every_context() {
    let service = IoService::new();
    let mut socket = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
    service.associate(&mut socket).unwrap();

    let a = service.make_context(1).unwrap();
    let b = service.make_context(1).unwrap();
    socket.async_receive_from(a.make_buf().unwrap(), MessageFlags::NONE);
    socket.async_receive_from(b.make_buf().unwrap(), MessageFlags::NONE);
    assert_eq!(a.stats().pending + b.stats().pending, 2);

    socket.close().unwrap();
    for ctx in [&a, &b] {
        let buf = ctx.get(WAIT).unwrap().unwrap();
        let err = DatagramSocket::async_receive_from_result(&buf).unwrap().unwrap_err();
        assert_eq!(err, Errno::ECANCELED);
        assert!(ctx.try_get().unwrap().is_none());
    }
}

#[test]
fn test_each_datagram_completes_once_across_workers() {
    const WORKERS: usize = 4;
    const DATAGRAMS: usize = 200;

    let service = IoService::new();
    let mut socket = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();
    service.associate(&mut socket).unwrap();
    let endpoint = socket.local_endpoint().unwrap();
    let sender = DatagramSocket::bound(&"127.0.0.1:0".parse().unwrap()).unwrap();

    let seen: Vec<u32> = thread::scope(|s| {
        let workers: Vec<_> = (0..WORKERS)
            .map(|_| {
                let (service, socket) = (&service, &socket);
                s.spawn(move || {
                    let ctx = service.make_context(4).unwrap();
                    for _ in 0..4 {
                        socket.async_receive_from(ctx.make_buf().unwrap(), MessageFlags::NONE);
                    }
                    let mut seen = Vec::new();
                    while let Some(mut buf) = ctx.get(Duration::from_millis(500)).unwrap() {
                        match DatagramSocket::async_receive_from_result(&buf).unwrap() {
                            Ok(_) => {
                                seen.push(u32::from_le_bytes(buf.data().try_into().unwrap()));
                                buf.reset();
                                socket.async_receive_from(buf, MessageFlags::NONE);
                            }
                            Err(e) => {
                                assert_eq!(e, Errno::ECANCELED);
                                break;
                            }
                        }
                    }
                    seen
                })
            })
            .collect();

        for i in 0..DATAGRAMS as u32 {
            sender.send_to(&i.to_le_bytes(), &endpoint, MessageFlags::NONE).unwrap();
            if i % 16 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
    });

    // Loopback may drop under pressure, never duplicate.
    let unique: HashSet<u32> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len());
    assert!(seen.len() > DATAGRAMS / 2);
}
