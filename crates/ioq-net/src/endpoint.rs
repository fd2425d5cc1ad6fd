//! Raw socket address storage
//!
//! Endpoints are `std::net::SocketAddr` at the API surface. [`SockAddr`] is
//! the `sockaddr_storage` the syscalls read and write, and the storage an
//! io_buf keeps for `send_to` destinations and `receive_from` sources.

use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::error::Errno;

#[derive(Clone, Copy)]
pub(crate) struct SockAddr {
    storage: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl SockAddr {
    /// Zeroed storage sized for any address family.
    pub(crate) fn empty() -> Self {
        Self {
            // SAFETY: sockaddr_storage is plain old data.
            storage: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        }
    }

    pub(crate) fn from_socket_addr(addr: &SocketAddr) -> Self {
        let mut this = Self::empty();
        match addr {
            SocketAddr::V4(v4) => {
                // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in.
                let sin = unsafe { &mut *(&mut this.storage as *mut _ as *mut libc::sockaddr_in) };
                sin.sin_family = libc::AF_INET as libc::sa_family_t;
                sin.sin_port = v4.port().to_be();
                sin.sin_addr = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                };
                this.len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
            }
            SocketAddr::V6(v6) => {
                // SAFETY: as above, for sockaddr_in6.
                let sin6 = unsafe { &mut *(&mut this.storage as *mut _ as *mut libc::sockaddr_in6) };
                sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                sin6.sin6_port = v6.port().to_be();
                sin6.sin6_flowinfo = v6.flowinfo();
                sin6.sin6_addr = libc::in6_addr {
                    s6_addr: v6.ip().octets(),
                };
                sin6.sin6_scope_id = v6.scope_id();
                this.len = mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
            }
        }
        this
    }

    pub(crate) fn to_socket_addr(&self) -> Result<SocketAddr, Errno> {
        match self.family() {
            libc::AF_INET => {
                // SAFETY: family says the storage holds a sockaddr_in.
                let sin = unsafe { &*(&self.storage as *const _ as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 => {
                // SAFETY: family says the storage holds a sockaddr_in6.
                let sin6 = unsafe { &*(&self.storage as *const _ as *const libc::sockaddr_in6) };
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => Err(Errno::EAFNOSUPPORT),
        }
    }

    pub(crate) fn family(&self) -> libc::c_int {
        self.storage.ss_family as libc::c_int
    }

    /// Reset to empty before handing the storage to the kernel to fill.
    pub(crate) fn clear(&mut self) {
        *self = Self::empty();
    }

    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        &self.storage as *const _ as *const libc::sockaddr
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        &mut self.storage as *mut _ as *mut libc::sockaddr
    }

    pub(crate) fn len(&self) -> libc::socklen_t {
        self.len
    }

    pub(crate) fn len_mut(&mut self) -> &mut libc::socklen_t {
        &mut self.len
    }
}

impl std::fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_socket_addr() {
            Ok(addr) => write!(f, "SockAddr({})", addr),
            Err(_) => write!(f, "SockAddr(family={})", self.family()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_round_trip() {
        let addr: SocketAddr = "127.0.0.1:8192".parse().unwrap();
        let raw = SockAddr::from_socket_addr(&addr);
        assert_eq!(raw.family(), libc::AF_INET);
        assert_eq!(raw.len() as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(raw.to_socket_addr().unwrap(), addr);
    }

    #[test]
    fn test_v6_round_trip() {
        let addr: SocketAddr = "[::1]:8193".parse().unwrap();
        let raw = SockAddr::from_socket_addr(&addr);
        assert_eq!(raw.family(), libc::AF_INET6);
        assert_eq!(raw.to_socket_addr().unwrap(), addr);
    }

    #[test]
    fn test_empty_has_no_family() {
        let raw = SockAddr::empty();
        assert_eq!(raw.to_socket_addr(), Err(Errno::EAFNOSUPPORT));
    }
}
