//! Non-blocking attempts behind the asynchronous operations.

use std::net::SocketAddr;
use std::os::fd::RawFd;

use crate::buf::{IoBuf, OpKind, SlotData};
use crate::endpoint::SockAddr;
use crate::error::{Errno, ErrorCode, SocketErrc};
use crate::sys::{self, Wait};

use super::SocketCore;

/// `Op::flags` bit for accept: report `ECONNABORTED` instead of retrying.
pub(crate) const REPORT_ABORTED: libc::c_int = 1;

pub(crate) enum Progress {
    Done,
    WouldBlock,
}

/// Stamp `buf` with the operation and hand it to its context.
///
/// Refused submissions complete at once: `ENOTSOCK` on a closed socket,
/// `EINVAL` when unassociated or when `buf` comes from another service's
/// context, `OrderlyShutdown` in a shut direction.
pub(crate) fn start(
    core: &SocketCore,
    mut buf: IoBuf,
    kind: OpKind,
    flags: libc::c_int,
    to: Option<&SocketAddr>,
) {
    let dir = match kind {
        OpKind::Send | OpKind::SendTo => Wait::Write,
        _ => Wait::Read,
    };
    let op = &mut buf.slot_mut().op;
    op.prepare(kind, core.stream, flags);
    if let Some(to) = to {
        op.addr = SockAddr::from_socket_addr(to);
    }

    let (raw, ctx) = buf.into_raw();
    let refused: Option<ErrorCode> = if !core.is_open() {
        Some(Errno::ENOTSOCK.into())
    } else if !core.service.as_ref().is_some_and(|service| ctx.belongs_to(service)) {
        Some(Errno::EINVAL.into())
    } else if core.is_shut(dir) {
        Some(SocketErrc::OrderlyShutdown.into())
    } else {
        None
    };
    tracing::trace!(fd = core.fd, ?kind, ?refused, "submit");
    match refused {
        Some(code) => ctx.complete_now(raw, code),
        None => ctx.submit(raw, core.fd, dir),
    }
}

/// Try the slot's operation once without blocking.
pub(crate) fn perform(fd: RawFd, slot: &mut SlotData) -> Progress {
    match attempt(fd, slot) {
        Err(Errno::EAGAIN) => Progress::WouldBlock,
        Ok((transferred, error)) => {
            slot.complete(transferred, error);
            Progress::Done
        }
        Err(e) => {
            slot.complete(0, Some(e.into()));
            Progress::Done
        }
    }
}

type Outcome = Result<(usize, Option<ErrorCode>), Errno>;

fn attempt(fd: RawFd, slot: &mut SlotData) -> Outcome {
    let SlotData { data, len, op, .. } = slot;
    let len = *len;
    let flags = op.flags | libc::MSG_DONTWAIT;

    match op.kind {
        OpKind::Receive | OpKind::ReceiveFrom if op.stream => {
            let n = sys::recv(fd, &mut data[..len], flags)?;
            if n == 0 && len > 0 {
                Ok((0, Some(SocketErrc::OrderlyShutdown.into())))
            } else {
                Ok((n, None))
            }
        }
        OpKind::Receive => receive_datagram(fd, &mut data[..len], flags, None),
        OpKind::ReceiveFrom => receive_datagram(fd, &mut data[..len], flags, Some(&mut op.addr)),
        OpKind::Send => Ok((sys::send(fd, &data[..len], flags)?, None)),
        OpKind::SendTo => Ok((sys::send_to(fd, &data[..len], flags, &op.addr)?, None)),
        // Acceptor handles are always O_NONBLOCK at the OS level.
        OpKind::Accept => {
            match sys::accept(fd, &mut op.addr) {
                Ok(accepted) => {
                    op.accepted = accepted;
                    Ok((0, None))
                }
                Err(Errno::ECONNABORTED) if op.flags & REPORT_ABORTED == 0 => Err(Errno::EAGAIN),
                Err(e) => Err(e),
            }
        }
        OpKind::Idle => Err(Errno::EINVAL),
    }
}

/// Truncation keeps the stored prefix and reports `EMSGSIZE`.
pub(crate) fn receive_datagram(
    fd: RawFd,
    buf: &mut [u8],
    flags: libc::c_int,
    from: Option<&mut SockAddr>,
) -> Outcome {
    let (n, msg_flags) = sys::recv_msg(fd, buf, flags, from)?;
    let error = (msg_flags & libc::MSG_TRUNC != 0).then_some(ErrorCode::System(Errno::EMSGSIZE));
    Ok((n.min(buf.len()), error))
}
