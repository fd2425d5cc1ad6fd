//! # ioq-core
//!
//! Platform-agnostic building blocks for the `ioq` reactor.
//!
//! This crate contains no OS-specific code. Socket and notification
//! plumbing lives in `ioq-net`.
//!
//! ## Modules
//!
//! - `queue` - Intrusive lock-free queue with four usage modes
//! - `spin` - Caller-side adaptive backoff for empty pops
//! - `buf` - Size-clamping byte views
//! - `env` - Environment variable utilities

pub mod queue;
pub mod spin;
pub mod buf;
pub mod env;

// Re-exports for convenience
pub use queue::{Linked, Mpmc, Mpsc, Node, Queue, QueueHook, Spmc, Spsc, Usage};
pub use spin::adaptive_spin;
pub use buf::{make_buf, make_buf_mut, ConstBuf, MutBuf};
pub use env::{env_get, env_get_opt};
