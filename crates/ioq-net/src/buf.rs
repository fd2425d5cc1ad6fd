//! Pooled I/O buffers
//!
//! An [`IoBuf`] is the single owner of one slot in a context's pool. The
//! slot holds the data bytes plus the descriptor of the asynchronous
//! operation last started with it. Ownership moves with the token: into a
//! submission, through the context's completed queue, back to the caller
//! from `get`, and finally into the free queue when the token drops.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use ioq_core::queue::{Node, QueueHook};

use crate::context::ContextShared;
use crate::endpoint::SockAddr;
use crate::error::{Error, ErrorCode, Result};
use crate::sys;

/// Bytes of data each buffer carries.
pub const CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Idle,
    Receive,
    ReceiveFrom,
    Send,
    SendTo,
    Accept,
}

/// Descriptor of the asynchronous operation a slot is carrying.
pub(crate) struct Op {
    pub(crate) kind: OpKind,
    /// Issued by a stream socket.
    pub(crate) stream: bool,
    pub(crate) flags: libc::c_int,
    /// Destination for `send_to`, source for `receive_from`, peer for accept.
    pub(crate) addr: SockAddr,
    /// Descriptor produced by accept, until claimed.
    pub(crate) accepted: RawFd,
    pub(crate) transferred: usize,
    pub(crate) error: Option<ErrorCode>,
}

impl Op {
    fn new() -> Self {
        Self {
            kind: OpKind::Idle,
            stream: false,
            flags: 0,
            addr: SockAddr::empty(),
            accepted: sys::INVALID,
            transferred: 0,
            error: None,
        }
    }

    pub(crate) fn prepare(&mut self, kind: OpKind, stream: bool, flags: libc::c_int) {
        self.release_accepted();
        self.kind = kind;
        self.stream = stream;
        self.flags = flags;
        self.transferred = 0;
        self.error = None;
    }

    /// Completion status as a result, tagged with `op`.
    pub(crate) fn status(&self, op: &'static str) -> Result<usize> {
        match self.error {
            Some(code) => Err(Error::new(op, code)),
            None => Ok(self.transferred),
        }
    }

    fn release_accepted(&mut self) {
        if self.accepted >= 0 {
            let _ = sys::close(self.accepted);
            self.accepted = sys::INVALID;
        }
    }
}

pub(crate) struct SlotData {
    pub(crate) data: [u8; CAPACITY],
    pub(crate) len: usize,
    pub(crate) user_data: usize,
    pub(crate) op: Op,
}

impl SlotData {
    /// Record a finished operation. The visible length becomes the count.
    pub(crate) fn complete(&mut self, transferred: usize, error: Option<ErrorCode>) {
        self.op.transferred = transferred;
        self.op.error = error;
        self.len = transferred.min(CAPACITY);
    }

    /// Back to the state `make_buf` hands out.
    pub(crate) fn recycle(&mut self) {
        self.op.release_accepted();
        self.op.kind = OpKind::Idle;
        self.op.error = None;
        self.op.transferred = 0;
        self.len = CAPACITY;
        self.user_data = 0;
    }
}

/// One pool entry. The hook comes first so a hook pointer is a slot pointer.
#[repr(C)]
pub(crate) struct Slot {
    hook: QueueHook,
    data: UnsafeCell<SlotData>,
}

impl Slot {
    pub(crate) fn new() -> Self {
        Self {
            hook: QueueHook::new(),
            data: UnsafeCell::new(SlotData {
                data: [0; CAPACITY],
                len: CAPACITY,
                user_data: 0,
                op: Op::new(),
            }),
        }
    }

    /// # Safety
    ///
    /// Caller has exclusive ownership of the slot.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data_mut(&self) -> &mut SlotData {
        &mut *self.data.get()
    }
}

/// Raw slot token as carried by the free, completed and pending lists.
///
/// Holds no reference count; the context that owns the slab outlives it.
pub(crate) struct RawBuf(NonNull<Slot>);

// Safety: a RawBuf is a unique handle to its slot.
unsafe impl Send for RawBuf {}

impl RawBuf {
    pub(crate) fn new(slot: &Slot) -> Self {
        Self(NonNull::from(slot))
    }

    /// # Safety
    ///
    /// The token is owned by the caller and its slab is alive.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data(&self) -> &mut SlotData {
        self.0.as_ref().data_mut()
    }
}

// Safety: `Slot` is repr(C) with the hook at offset zero.
unsafe impl Node for RawBuf {
    #[inline]
    fn into_hook(self) -> NonNull<QueueHook> {
        self.0.cast()
    }

    #[inline]
    unsafe fn from_hook(hook: NonNull<QueueHook>) -> Self {
        Self(hook.cast())
    }
}

/// Owned pooled buffer.
///
/// Obtained from [`IoContext::make_buf`](crate::IoContext::make_buf) or
/// [`IoContext::get`](crate::IoContext::get). Dropping it returns the slot
/// to its context's pool from any thread.
pub struct IoBuf {
    slot: NonNull<Slot>,
    ctx: Arc<ContextShared>,
}

// Safety: the token is the slot's only owner; the pool queues are
// multi-producer.
unsafe impl Send for IoBuf {}
unsafe impl Sync for IoBuf {}

impl IoBuf {
    pub const CAPACITY: usize = CAPACITY;

    pub(crate) fn from_raw(raw: RawBuf, ctx: Arc<ContextShared>) -> Self {
        Self { slot: raw.0, ctx }
    }

    /// Give up ownership without recycling the slot.
    pub(crate) fn into_raw(self) -> (RawBuf, Arc<ContextShared>) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the Arc is moved out once.
        let ctx = unsafe { ptr::read(&this.ctx) };
        (RawBuf(this.slot), ctx)
    }

    #[inline]
    pub(crate) fn slot(&self) -> &SlotData {
        // SAFETY: the token owns the slot.
        unsafe { &*self.slot.as_ref().data.get() }
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self) -> &mut SlotData {
        // SAFETY: the token owns the slot and `&mut self` is unique.
        unsafe { self.slot.as_ref().data_mut() }
    }

    pub(crate) fn op(&self) -> &Op {
        &self.slot().op
    }

    /// Current bytes, `len()` long.
    pub fn data(&self) -> &[u8] {
        let slot = self.slot();
        &slot.data[..slot.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let slot = self.slot_mut();
        &mut slot.data[..slot.len]
    }

    pub fn len(&self) -> usize {
        self.slot().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        CAPACITY
    }

    /// Set the visible length, clamped to the capacity.
    ///
    /// Receives fill at most `len()` bytes; sends transmit exactly `len()`.
    pub fn resize(&mut self, len: usize) {
        self.slot_mut().len = len.min(CAPACITY);
    }

    /// Restore the full length and forget the last operation.
    ///
    /// The user tag is kept.
    pub fn reset(&mut self) {
        let slot = self.slot_mut();
        let user_data = slot.user_data;
        slot.recycle();
        slot.user_data = user_data;
    }

    /// Copy `src` in and set the length to the copied size.
    pub fn copy_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(CAPACITY);
        let slot = self.slot_mut();
        slot.data[..n].copy_from_slice(&src[..n]);
        slot.len = n;
        n
    }

    /// Bytes moved by the last completed operation.
    pub fn transferred(&self) -> usize {
        self.op().transferred
    }

    pub fn user_data(&self) -> usize {
        self.slot().user_data
    }

    pub fn set_user_data(&mut self, value: usize) {
        self.slot_mut().user_data = value;
    }
}

impl Drop for IoBuf {
    fn drop(&mut self) {
        self.slot_mut().recycle();
        self.ctx.release(RawBuf(self.slot));
    }
}

impl fmt::Debug for IoBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.op();
        f.debug_struct("IoBuf")
            .field("len", &self.len())
            .field("user_data", &self.user_data())
            .field("op", &op.kind)
            .field("transferred", &op.transferred)
            .field("error", &op.error)
            .finish()
    }
}
