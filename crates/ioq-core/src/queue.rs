//! Intrusive lock-free queue
//!
//! A singly linked FIFO whose link field ([`QueueHook`]) lives inside the
//! queued value. The queue never allocates per node and never owns the
//! storage behind a node; it only carries an owning pointer ([`Node`]) from
//! producer to consumer.
//!
//! ## Usage modes
//!
//! The producer/consumer cardinality is a type parameter:
//!
//! | marker | producers | consumers | `try_pop` |
//! |--------|-----------|-----------|-----------|
//! | [`Spsc`] | 1 | 1 | `unsafe` |
//! | [`Mpsc`] | many | 1 | `unsafe` |
//! | [`Spmc`] | 1 | many | safe |
//! | [`Mpmc`] | many | many | safe |
//!
//! Producers append with an atomic exchange on the tail and then publish
//! the link with a release store. Single-producer modes keep the exchange:
//! detaching the last node re-links the stub from the consumer side, so the
//! tail always has two writers.
//!
//! The consumer end is a plain pointer owned by the single consumer.
//! Multi-consumer modes take that pointer with an atomic exchange, leaving
//! null behind, and put it back when done; a consumer that finds null
//! reports "empty" instead of waiting. Consumers never read the link of a
//! node they have not taken, which matters because a popped node goes back
//! to its owner at once.
//!
//! `try_pop` also reports "empty" when it catches a producer between its
//! tail exchange and its link store. Callers that busy-wait pair it with
//! [`adaptive_spin`](crate::spin::adaptive_spin).
//!
//! ```ignore
//! struct Job { hook: QueueHook, id: u64 }
//! ioq_core::impl_linked!(Job, hook);
//!
//! let queue: Queue<Box<Job>, Mpmc> = Queue::new();
//! queue.push(Box::new(Job { hook: QueueHook::new(), id: 7 }));
//! assert_eq!(queue.try_pop().map(|j| j.id), Some(7));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Link field embedded in every queued value.
pub struct QueueHook {
    next: AtomicPtr<QueueHook>,
}

impl QueueHook {
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl Default for QueueHook {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueueHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHook").finish_non_exhaustive()
    }
}

/// A type that embeds a [`QueueHook`] at a fixed offset.
///
/// # Safety
///
/// `HOOK_OFFSET` must be the byte offset of a `QueueHook` field of `Self`.
/// Prefer [`impl_linked!`](crate::impl_linked) over a hand-written impl.
pub unsafe trait Linked {
    const HOOK_OFFSET: usize;
}

/// Implement [`Linked`] for `$ty` using its `$field` hook.
#[macro_export]
macro_rules! impl_linked {
    ($ty:ty, $field:ident) => {
        unsafe impl $crate::queue::Linked for $ty {
            const HOOK_OFFSET: usize = ::core::mem::offset_of!($ty, $field);
        }
    };
}

#[inline]
fn hook_of<T: Linked>(node: *const T) -> NonNull<QueueHook> {
    // SAFETY: HOOK_OFFSET stays inside the allocation behind `node`, which
    // is non-null because it came from a reference or a Box.
    unsafe {
        NonNull::new_unchecked(
            node.cast::<u8>()
                .add(T::HOOK_OFFSET)
                .cast_mut()
                .cast::<QueueHook>(),
        )
    }
}

#[inline]
unsafe fn node_of<T: Linked>(hook: NonNull<QueueHook>) -> *mut T {
    hook.as_ptr().cast::<u8>().sub(T::HOOK_OFFSET).cast::<T>()
}

/// Owning pointer that can travel through a [`Queue`].
///
/// # Safety
///
/// `from_hook(into_hook(p))` must give back `p`, and the hook must stay at
/// the same address for as long as the pointer sits in a queue.
pub unsafe trait Node: Sized {
    /// Give up the pointer, returning the address of its hook.
    fn into_hook(self) -> NonNull<QueueHook>;

    /// Rebuild the pointer from a hook produced by [`Node::into_hook`].
    ///
    /// # Safety
    ///
    /// `hook` must come from `into_hook` on the same pointer type and must
    /// not be rebuilt twice.
    unsafe fn from_hook(hook: NonNull<QueueHook>) -> Self;
}

unsafe impl<T: Linked> Node for Box<T> {
    #[inline]
    fn into_hook(self) -> NonNull<QueueHook> {
        hook_of(Box::into_raw(self))
    }

    #[inline]
    unsafe fn from_hook(hook: NonNull<QueueHook>) -> Self {
        Box::from_raw(node_of::<T>(hook))
    }
}

unsafe impl<'a, T: Linked + Sync> Node for &'a T {
    #[inline]
    fn into_hook(self) -> NonNull<QueueHook> {
        hook_of(self as *const T)
    }

    #[inline]
    unsafe fn from_hook(hook: NonNull<QueueHook>) -> Self {
        &*node_of::<T>(hook)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Declared producer/consumer cardinality of a [`Queue`].
pub trait Usage: sealed::Sealed + Send + Sync + 'static {
    const MULTI_PRODUCER: bool;
    const MULTI_CONSUMER: bool;
    const NAME: &'static str;
}

macro_rules! usage {
    ($(#[$doc:meta])* $name:ident, $mp:expr, $mc:expr, $text:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl Usage for $name {
            const MULTI_PRODUCER: bool = $mp;
            const MULTI_CONSUMER: bool = $mc;
            const NAME: &'static str = $text;
        }
    };
}

usage!(
    /// Single producer, single consumer.
    Spsc, false, false, "spsc"
);
usage!(
    /// Single producer, many consumers.
    Spmc, false, true, "spmc"
);
usage!(
    /// Many producers, single consumer.
    Mpsc, true, false, "mpsc"
);
usage!(
    /// Many producers, many consumers.
    Mpmc, true, true, "mpmc"
);

#[repr(align(64))]
struct CacheAligned<T>(T);

/// Intrusive FIFO carrying owning pointers `P` under usage mode `U`.
///
/// Pushing more concurrently than `U` declares producers is harmless, but
/// popping from more threads than `U` declares consumers is undefined; the
/// single-consumer modes therefore expose `try_pop` as an `unsafe fn`.
pub struct Queue<P: Node, U: Usage> {
    /// Most recently linked hook.
    tail: CacheAligned<AtomicPtr<QueueHook>>,
    /// Oldest hook; null while a multi-consumer pop holds it.
    head: CacheAligned<AtomicPtr<QueueHook>>,
    /// Placeholder node that keeps the list non-empty. Heap pinned.
    stub: NonNull<QueueHook>,
    _marker: PhantomData<(P, U)>,
}

// Safety: nodes cross threads only through the atomic tail exchange and
// release/acquire link stores; `head` moves between consumers by exchange
// or under the caller's single-consumer contract.
unsafe impl<P: Node + Send, U: Usage> Send for Queue<P, U> {}
unsafe impl<P: Node + Send, U: Usage> Sync for Queue<P, U> {}

impl<P: Node, U: Usage> Queue<P, U> {
    pub fn new() -> Self {
        let stub = NonNull::from(Box::leak(Box::new(QueueHook::new())));
        Self {
            tail: CacheAligned(AtomicPtr::new(stub.as_ptr())),
            head: CacheAligned(AtomicPtr::new(stub.as_ptr())),
            stub,
            _marker: PhantomData,
        }
    }

    /// Append `node` at the tail. Never blocks, never fails.
    #[inline]
    pub fn push(&self, node: P) {
        // SAFETY: the hook belongs to a pointer the queue now owns.
        unsafe { self.link(node.into_hook()) }
    }

    /// Pop through `&mut self`; exclusive access satisfies every usage mode.
    pub fn try_pop_mut(&mut self) -> Option<P> {
        // SAFETY: `&mut self` rules out any concurrent consumer.
        unsafe { self.try_pop_unchecked() }
    }

    /// Pop without naming the usage mode.
    ///
    /// Multi-consumer modes take the consumer end first, so this is sound
    /// from any number of threads for them.
    ///
    /// # Safety
    ///
    /// For single-consumer modes the caller guarantees that no other thread
    /// pops concurrently.
    #[inline]
    pub unsafe fn try_pop_unchecked(&self) -> Option<P> {
        let (take, put) = if U::MULTI_CONSUMER {
            (self.head.0.swap(ptr::null_mut(), Ordering::Acquire), Ordering::Release)
        } else {
            // Callers serialize single-consumer pops themselves.
            (self.head.0.load(Ordering::Relaxed), Ordering::Relaxed)
        };
        // Null: another consumer holds the end.
        let mut head = NonNull::new(take)?;
        let node = self.pop_from(&mut head);
        self.head.0.store(head.as_ptr(), put);
        node
    }

    #[inline]
    unsafe fn link(&self, hook: NonNull<QueueHook>) {
        hook.as_ref().next.store(ptr::null_mut(), Ordering::Relaxed);
        let prev = self.tail.0.swap(hook.as_ptr(), Ordering::AcqRel);
        (*prev).next.store(hook.as_ptr(), Ordering::Release);
    }

    /// Pop behind `head`, which the caller holds exclusively.
    unsafe fn pop_from(&self, head: &mut NonNull<QueueHook>) -> Option<P> {
        let mut first = *head;
        let mut next = first.as_ref().next.load(Ordering::Acquire);

        if first == self.stub {
            let after = NonNull::new(next)?;
            *head = after;
            first = after;
            next = after.as_ref().next.load(Ordering::Acquire);
        }

        if let Some(after) = NonNull::new(next) {
            *head = after;
            return Some(P::from_hook(first));
        }

        // `first` has no successor yet; a producer may be mid-push.
        if self.tail.0.load(Ordering::Acquire) != first.as_ptr() {
            return None;
        }

        // Re-link the stub behind the last node so it can be detached.
        self.link(self.stub);
        next = first.as_ref().next.load(Ordering::Acquire);
        let after = NonNull::new(next)?;
        *head = after;
        Some(P::from_hook(first))
    }
}

impl<P: Node> Queue<P, Spsc> {
    /// Pop the oldest node, or `None` when empty.
    ///
    /// # Safety
    ///
    /// At most one thread pops at a time.
    #[inline]
    pub unsafe fn try_pop(&self) -> Option<P> {
        self.try_pop_unchecked()
    }
}

impl<P: Node> Queue<P, Mpsc> {
    /// Pop the oldest node, or `None` when empty.
    ///
    /// # Safety
    ///
    /// At most one thread pops at a time.
    #[inline]
    pub unsafe fn try_pop(&self) -> Option<P> {
        self.try_pop_unchecked()
    }
}

impl<P: Node> Queue<P, Spmc> {
    /// Pop the oldest node, or `None` when empty or contended.
    #[inline]
    pub fn try_pop(&self) -> Option<P> {
        // SAFETY: multi-consumer modes hand the consumer end over by exchange.
        unsafe { self.try_pop_unchecked() }
    }
}

impl<P: Node> Queue<P, Mpmc> {
    /// Pop the oldest node, or `None` when empty or contended.
    #[inline]
    pub fn try_pop(&self) -> Option<P> {
        // SAFETY: multi-consumer modes hand the consumer end over by exchange.
        unsafe { self.try_pop_unchecked() }
    }
}

impl<P: Node, U: Usage> Default for Queue<P, U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Node, U: Usage> fmt::Debug for Queue<P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("usage", &U::NAME).finish_non_exhaustive()
    }
}

impl<P: Node, U: Usage> Drop for Queue<P, U> {
    fn drop(&mut self) {
        while let Some(node) = self.try_pop_mut() {
            drop(node);
        }
        // SAFETY: allocated by Box in `new`; only the queue references it.
        unsafe { drop(Box::from_raw(self.stub.as_ptr())) }
    }
}
