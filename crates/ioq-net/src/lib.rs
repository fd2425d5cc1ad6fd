//! # ioq-net
//!
//! Completion-style socket reactor for Unix.
//!
//! A process creates one [`IoService`], associates sockets with it, and
//! gives each worker thread its own [`IoContext`]. Workers draw pooled
//! [`IoBuf`]s from their context, submit them with the sockets'
//! `async_*` calls, and collect them back from [`IoContext::get`], where
//! the matching `*_result` accessor interprets the completion.
//!
//! ```ignore
//! use ioq_net::{BasicSocket, DatagramSocket, IoService, MessageFlags};
//! use std::time::Duration;
//!
//! let service = IoService::new();
//! let mut socket = DatagramSocket::bound(&"127.0.0.1:0".parse()?)?;
//! service.associate(&mut socket)?;
//!
//! let ctx = service.make_context(64)?;
//! socket.async_receive_from(ctx.make_buf()?, MessageFlags::NONE);
//! if let Some(buf) = ctx.get(Duration::from_secs(1))? {
//!     if let Some(result) = DatagramSocket::async_receive_from_result(&buf) {
//!         let received = result?;
//!         println!("{} bytes from {}", received.transferred, received.endpoint);
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - `error` - Portable error taxonomy
//! - `config` - Service configuration
//! - `context` / `service` - Buffer pools, completion queues, association
//! - `facility` - Readiness notification (poll, optional io_uring)
//! - `socket` - Datagram, stream and acceptor sockets
//! - `options` - Typed socket options

pub mod error;
pub mod config;
pub mod options;
pub mod facility;
pub mod socket;

mod buf;
mod context;
mod endpoint;
mod protocol;
mod service;
mod sys;

// Re-exports for convenience
pub use buf::IoBuf;
pub use ioq_core::buf::{make_buf, make_buf_mut, ConstBuf, MutBuf};
pub use config::ServiceConfig;
pub use context::{ContextStats, IoContext};
pub use error::{Errno, Error, ErrorCode, Result, SocketErrc};
pub use protocol::{MessageFlags, Protocol};
pub use service::IoService;
pub use socket::{
    Accepted, BasicSocket, DatagramSocket, ReceivedFrom, StreamAcceptor, StreamSocket, Transferred,
};
pub use sys::Wait;
