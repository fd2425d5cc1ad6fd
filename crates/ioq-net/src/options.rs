//! Typed socket options
//!
//! Each option is a small value type naming its `(level, name)` pair and
//! how it maps to the `c_int` the kernel stores.
//!
//! ```ignore
//! socket.set_option(ReuseAddress(true))?;
//! let ReceiveBufferSize(size) = socket.get_option()?;
//! ```

/// A value settable through `setsockopt`.
pub trait SocketOption: Sized {
    const LEVEL: libc::c_int;
    const NAME: libc::c_int;

    fn to_raw(&self) -> libc::c_int;
    fn from_raw(raw: libc::c_int) -> Self;
}

macro_rules! bool_option {
    ($(#[$meta:meta])* $name:ident, $level:expr, $opt:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub bool);

        impl SocketOption for $name {
            const LEVEL: libc::c_int = $level;
            const NAME: libc::c_int = $opt;

            fn to_raw(&self) -> libc::c_int {
                self.0 as libc::c_int
            }

            fn from_raw(raw: libc::c_int) -> Self {
                Self(raw != 0)
            }
        }
    };
}

macro_rules! size_option {
    ($(#[$meta:meta])* $name:ident, $level:expr, $opt:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub usize);

        impl SocketOption for $name {
            const LEVEL: libc::c_int = $level;
            const NAME: libc::c_int = $opt;

            fn to_raw(&self) -> libc::c_int {
                self.0.min(libc::c_int::MAX as usize) as libc::c_int
            }

            fn from_raw(raw: libc::c_int) -> Self {
                Self(raw.max(0) as usize)
            }
        }
    };
}

bool_option!(
    /// `SO_REUSEADDR`
    ReuseAddress,
    libc::SOL_SOCKET,
    libc::SO_REUSEADDR
);
bool_option!(
    /// `SO_BROADCAST`
    Broadcast,
    libc::SOL_SOCKET,
    libc::SO_BROADCAST
);
bool_option!(KeepAlive, libc::SOL_SOCKET, libc::SO_KEEPALIVE);
bool_option!(DoNotRoute, libc::SOL_SOCKET, libc::SO_DONTROUTE);
bool_option!(
    /// `TCP_NODELAY`
    NoDelay,
    libc::IPPROTO_TCP,
    libc::TCP_NODELAY
);
size_option!(
    /// `SO_RCVBUF`. Linux reports double the requested size.
    ReceiveBufferSize,
    libc::SOL_SOCKET,
    libc::SO_RCVBUF
);
size_option!(SendBufferSize, libc::SOL_SOCKET, libc::SO_SNDBUF);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_mapping() {
        assert_eq!(ReuseAddress(true).to_raw(), 1);
        assert_eq!(ReuseAddress::from_raw(4), ReuseAddress(true));
        assert_eq!(KeepAlive::from_raw(0), KeepAlive(false));
        assert_eq!(ReceiveBufferSize::from_raw(-1), ReceiveBufferSize(0));
        assert_eq!(SendBufferSize(usize::MAX).to_raw(), libc::c_int::MAX);
        assert_eq!(NoDelay::LEVEL, libc::IPPROTO_TCP);
    }
}
