//! Portable error taxonomy
//!
//! Every socket and reactor operation returns [`Result`]. Its [`Error`]
//! pairs the failing operation's name with an [`ErrorCode`] drawn from one
//! of three categories:
//!
//! - `System`: the platform's errno conditions, reused as-is
//!   (`EBADF`, `EWOULDBLOCK`, `EMSGSIZE`, `ECANCELED`, `ENOTSOCK`, ...)
//! - `Socket`: conditions the OS has no errno for ([`SocketErrc`])
//! - `Resolver`: `getaddrinfo` failures, rendered with `gai_strerror`
//!
//! Hot paths match on [`Error::code`]; callers that just want to bail use
//! `?` and get the operation name in the message for free.

use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt;
use std::io;

pub use nix::errno::Errno;

/// Socket-category conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum SocketErrc {
    #[error("Already open")]
    AlreadyOpen = 1,
    #[error("Orderly shutdown")]
    OrderlyShutdown = 2,
    #[error("Not found")]
    NotFound = 3,
}

impl SocketErrc {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::AlreadyOpen),
            2 => Some(Self::OrderlyShutdown),
            3 => Some(Self::NotFound),
            _ => None,
        }
    }

    /// Message for a raw socket-category value, including unknown ones.
    pub fn message(value: i32) -> &'static str {
        match Self::from_raw(value) {
            Some(Self::AlreadyOpen) => "Already open",
            Some(Self::OrderlyShutdown) => "Orderly shutdown",
            Some(Self::NotFound) => "Not found",
            None => "Unknown error",
        }
    }
}

/// Name-resolution error message, verbatim from the platform.
pub fn resolver_message(code: i32) -> Cow<'static, str> {
    // SAFETY: gai_strerror returns a pointer to a static NUL-terminated
    // string for every input.
    let msg = unsafe { libc::gai_strerror(code) };
    if msg.is_null() {
        return Cow::Borrowed("Unknown error");
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy()
}

/// One condition from the portable taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    #[error("{}", .0.desc())]
    System(Errno),
    #[error(transparent)]
    Socket(SocketErrc),
    #[error("{}", resolver_message(*.0))]
    Resolver(i32),
}

impl ErrorCode {
    /// Errno of the calling thread's last failed libc call.
    pub fn last_os_error() -> Self {
        Self::System(Errno::last())
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Socket(_) => "socket",
            Self::Resolver(_) => "resolver",
        }
    }
}

impl From<Errno> for ErrorCode {
    fn from(e: Errno) -> Self {
        Self::System(e)
    }
}

impl From<SocketErrc> for ErrorCode {
    fn from(e: SocketErrc) -> Self {
        Self::Socket(e)
    }
}

impl From<&io::Error> for ErrorCode {
    fn from(e: &io::Error) -> Self {
        Self::System(e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO))
    }
}

/// A failed operation: its name plus the condition it hit.
#[derive(Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{op}: {code}")]
pub struct Error {
    op: &'static str,
    code: ErrorCode,
}

impl Error {
    pub fn new(op: &'static str, code: impl Into<ErrorCode>) -> Self {
        Self {
            op,
            code: code.into(),
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Errno, if this is a system-category error.
    pub fn errno(&self) -> Option<Errno> {
        match self.code {
            ErrorCode::System(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error({}: {:?} {})", self.op, self.code, self.code)
    }
}

impl PartialEq<Errno> for Error {
    fn eq(&self, other: &Errno) -> bool {
        self.code == ErrorCode::System(*other)
    }
}

impl PartialEq<SocketErrc> for Error {
    fn eq(&self, other: &SocketErrc) -> bool {
        self.code == ErrorCode::Socket(*other)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e.code {
            ErrorCode::System(errno) => {
                let os = io::Error::from_raw_os_error(errno as i32);
                io::Error::new(os.kind(), e)
            }
            _ => io::Error::new(io::ErrorKind::Other, e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach an operation name to a raw errno result.
pub(crate) trait Context<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> Context<T> for std::result::Result<T, Errno> {
    #[inline]
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| Error::new(op, e))
    }
}
