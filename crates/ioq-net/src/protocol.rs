//! Protocol tags and message flags

use std::net::SocketAddr;
use std::ops::{BitOr, BitOrAssign};

/// `(family, type, protocol)` triple handed to `socket(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Protocol {
    family: libc::c_int,
    ty: libc::c_int,
    protocol: libc::c_int,
}

impl Protocol {
    pub const fn new(family: libc::c_int, ty: libc::c_int, protocol: libc::c_int) -> Self {
        Self { family, ty, protocol }
    }

    pub const fn udp_v4() -> Self {
        Self::new(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP)
    }

    pub const fn udp_v6() -> Self {
        Self::new(libc::AF_INET6, libc::SOCK_DGRAM, libc::IPPROTO_UDP)
    }

    pub const fn tcp_v4() -> Self {
        Self::new(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_TCP)
    }

    pub const fn tcp_v6() -> Self {
        Self::new(libc::AF_INET6, libc::SOCK_STREAM, libc::IPPROTO_TCP)
    }

    /// UDP in the family of `endpoint`.
    pub fn udp_for(endpoint: &SocketAddr) -> Self {
        match endpoint {
            SocketAddr::V4(_) => Self::udp_v4(),
            SocketAddr::V6(_) => Self::udp_v6(),
        }
    }

    /// TCP in the family of `endpoint`.
    pub fn tcp_for(endpoint: &SocketAddr) -> Self {
        match endpoint {
            SocketAddr::V4(_) => Self::tcp_v4(),
            SocketAddr::V6(_) => Self::tcp_v6(),
        }
    }

    pub const fn family(&self) -> libc::c_int {
        self.family
    }

    pub const fn ty(&self) -> libc::c_int {
        self.ty
    }

    pub const fn protocol(&self) -> libc::c_int {
        self.protocol
    }
}

/// Flags for send and receive calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(libc::c_int);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    /// Leave received data queued.
    pub const PEEK: Self = Self(libc::MSG_PEEK);
    /// Bypass routing, send to directly attached hosts only.
    pub const DO_NOT_ROUTE: Self = Self(libc::MSG_DONTROUTE);
    pub const OUT_OF_BAND: Self = Self(libc::MSG_OOB);

    pub const fn bits(self) -> libc::c_int {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for MessageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
