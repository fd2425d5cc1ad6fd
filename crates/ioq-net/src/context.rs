//! Per-thread completion context
//!
//! An [`IoContext`] owns a growable pool of [`IoBuf`]s, a free queue, a
//! completed queue and one notification [`Facility`]. Exactly one thread
//! polls a context at a time; any thread may submit with its buffers or
//! drop them.
//!
//! Operations are emulated on top of readiness: a submission is tried once
//! without blocking, and whatever would block waits in the pending table
//! until `get` sees its descriptor ready.
//!
//! ```text
//!  submit ──try──> completed queue ──get──> caller ──drop──> free queue
//!     │                  ^
//!     └─> pending ──ready┘
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::os::fd::RawFd;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use ioq_core::queue::{Mpsc, Queue};

use crate::buf::{IoBuf, RawBuf, Slot};
use crate::config::ServiceConfig;
use crate::error::{Errno, Error, ErrorCode, Result};
use crate::facility::{Facility, Interest, Readiness};
use crate::service::ServiceShared;
use crate::socket::ops::{perform, Progress};
use crate::sys::Wait;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Operation waiting for its descriptor to become ready.
struct PendingOp {
    fd: RawFd,
    dir: Wait,
    buf: RawBuf,
}

/// Diagnostic snapshot of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    /// Buffers allocated across all slabs
    pub pool_size: usize,
    /// Buffers sitting in the free queue (approximate)
    pub free: usize,
    /// Operations waiting in the pending table
    pub pending: usize,
}

pub(crate) struct ContextShared {
    id: usize,
    config: ServiceConfig,
    /// Service that created this context; sockets of other services refuse its buffers.
    service: Weak<ServiceShared>,
    pool_size: AtomicUsize,
    free_count: AtomicUsize,
    free: Queue<RawBuf, Mpsc>,
    completed: Queue<RawBuf, Mpsc>,
    pending: Mutex<Vec<PendingOp>>,
    facility: Box<dyn Facility>,
    /// Set while the polling thread is inside `Facility::wait`.
    parked: AtomicBool,
    /// Append-only; slabs never move once pushed. Declared last: fields
    /// drop in order and the queues above still link through slot hooks.
    slabs: Mutex<Vec<Box<[Slot]>>>,
}

impl ContextShared {
    pub(crate) fn new(
        id: usize,
        service: &Arc<ServiceShared>,
        facility: Box<dyn Facility>,
    ) -> Self {
        Self {
            id,
            config: service.config.clone(),
            service: Arc::downgrade(service),
            pool_size: AtomicUsize::new(0),
            free_count: AtomicUsize::new(0),
            free: Queue::new(),
            completed: Queue::new(),
            pending: Mutex::new(Vec::new()),
            facility,
            parked: AtomicBool::new(false),
            slabs: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn belongs_to(&self, service: &Arc<ServiceShared>) -> bool {
        Weak::as_ptr(&self.service) == Arc::as_ptr(service)
    }

    /// Add one slab and link its slots into the free queue.
    pub(crate) fn grow(&self) -> std::result::Result<(), Errno> {
        let n = self.config.slab_size;
        let mut slots: Vec<Slot> = Vec::new();
        slots.try_reserve_exact(n).map_err(|_| Errno::ENOBUFS)?;
        slots.extend((0..n).map(|_| Slot::new()));
        let slab = slots.into_boxed_slice();

        let mut slabs = lock(&self.slabs);
        slabs.try_reserve(1).map_err(|_| Errno::ENOBUFS)?;
        for slot in slab.iter() {
            self.free.push(RawBuf::new(slot));
        }
        slabs.push(slab);
        let pool = self.pool_size.fetch_add(n, Ordering::Relaxed) + n;
        self.free_count.fetch_add(n, Ordering::Relaxed);
        tracing::debug!(ctx = self.id, slab = slabs.len(), pool, "pool grown");
        Ok(())
    }

    /// Return a recycled slot to the free queue.
    pub(crate) fn release(&self, raw: RawBuf) {
        self.free.push(raw);
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_free(&self) -> Option<RawBuf> {
        // SAFETY: only the IoContext handle pops, and it is !Sync.
        let raw = unsafe { self.free.try_pop() }?;
        self.free_count.fetch_sub(1, Ordering::Relaxed);
        Some(raw)
    }

    fn pop_completed(&self) -> Option<RawBuf> {
        // SAFETY: as for `pop_free`.
        unsafe { self.completed.try_pop() }
    }

    fn wake_if_parked(&self) {
        fence(Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) {
            self.facility.wake();
        }
    }

    /// Publish a finished operation.
    pub(crate) fn deliver(&self, raw: RawBuf) {
        self.completed.push(raw);
        self.wake_if_parked();
    }

    /// Finish `raw` without touching the socket.
    pub(crate) fn complete_now(&self, raw: RawBuf, code: ErrorCode) {
        // SAFETY: the caller handed over ownership of the token.
        unsafe { raw.data() }.complete(0, Some(code));
        tracing::trace!(ctx = self.id, %code, "immediate completion");
        self.deliver(raw);
    }

    /// Try `raw` now unless earlier operations in the same direction are
    /// still waiting, in which case it queues behind them.
    pub(crate) fn submit(&self, raw: RawBuf, fd: RawFd, dir: Wait) {
        let mut pending = lock(&self.pending);
        if !pending.iter().any(|p| p.fd == fd && p.dir == dir) {
            // SAFETY: ownership came with the token.
            if let Progress::Done = perform(fd, unsafe { raw.data() }) {
                drop(pending);
                tracing::trace!(ctx = self.id, fd, "immediate completion");
                self.deliver(raw);
                return;
            }
        }
        pending.push(PendingOp { fd, dir, buf: raw });
        drop(pending);
        tracing::trace!(ctx = self.id, fd, ?dir, "operation pending");
        self.wake_if_parked();
    }

    /// Complete pending operations on `fd` (one direction or both) with
    /// `code`. Returns how many were completed.
    pub(crate) fn cancel(&self, fd: RawFd, dir: Option<Wait>, code: ErrorCode) -> usize {
        let cancelled: Vec<RawBuf> = {
            let mut pending = lock(&self.pending);
            let mut taken = Vec::new();
            let mut i = 0;
            while i < pending.len() {
                let p = &pending[i];
                if p.fd == fd && dir.map_or(true, |d| d == p.dir) {
                    taken.push(pending.remove(i).buf);
                } else {
                    i += 1;
                }
            }
            taken
        };
        let n = cancelled.len();
        for raw in cancelled {
            // SAFETY: removed from the pending table, so owned here.
            unsafe { raw.data() }.complete(0, Some(code));
            self.completed.push(raw);
        }
        if n > 0 {
            tracing::trace!(ctx = self.id, fd, n, %code, "pending operations completed");
            self.wake_if_parked();
        }
        n
    }

    pub(crate) fn forget(&self, fd: RawFd) {
        self.facility.forget(fd);
    }

    fn interest(&self) -> Vec<Interest> {
        let pending = lock(&self.pending);
        let mut interest: Vec<Interest> = Vec::new();
        for p in pending.iter() {
            let entry = match interest.iter_mut().find(|i| i.fd == p.fd) {
                Some(entry) => entry,
                None => {
                    interest.push(Interest { fd: p.fd, read: false, write: false });
                    let last = interest.len() - 1;
                    &mut interest[last]
                }
            };
            match p.dir {
                Wait::Read => entry.read = true,
                Wait::Write => entry.write = true,
            }
        }
        interest
    }

    /// Retry pending operations whose descriptors are ready, oldest first,
    /// stopping per (fd, direction) at the first that would block.
    fn drive(&self, ready: &[Readiness]) -> usize {
        let limit = self.config.max_completions_per_wait;
        let mut delivered = 0;
        let mut pending = lock(&self.pending);
        'ready: for r in ready {
            for (dir, is_ready) in [(Wait::Read, r.read), (Wait::Write, r.write)] {
                if !is_ready {
                    continue;
                }
                let mut i = 0;
                while i < pending.len() {
                    if delivered >= limit {
                        break 'ready;
                    }
                    if pending[i].fd != r.fd || pending[i].dir != dir {
                        i += 1;
                        continue;
                    }
                    // SAFETY: the pending table owns the token.
                    match perform(r.fd, unsafe { pending[i].buf.data() }) {
                        Progress::WouldBlock => break,
                        Progress::Done => {
                            let op = pending.remove(i);
                            self.completed.push(op.buf);
                            delivered += 1;
                        }
                    }
                }
            }
        }
        if delivered > 0 {
            tracing::trace!(ctx = self.id, delivered, "completions drained");
        }
        delivered
    }

    /// One wait round. Returns a completion if one is available afterwards.
    fn poll_once(&self, timeout: Option<Duration>) -> Result<Option<RawBuf>> {
        self.parked.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        // Anything submitted or completed before the flag was visible is
        // seen here; anything after will wake the facility.
        if let Some(raw) = self.pop_completed() {
            self.parked.store(false, Ordering::SeqCst);
            return Ok(Some(raw));
        }
        let interest = self.interest();

        let mut ready = Vec::new();
        let waited = self.facility.wait(&interest, timeout, &mut ready);
        self.parked.store(false, Ordering::SeqCst);
        if let Err(e) = waited {
            tracing::warn!(ctx = self.id, facility = self.facility.name(), error = %e, "wait failed");
            return Err(Error::new("get", ErrorCode::from(&e)));
        }

        self.drive(&ready);
        Ok(self.pop_completed())
    }
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        // Unlink every slot while the slabs are still allocated.
        while self.free.try_pop_mut().is_some() {}
        while self.completed.try_pop_mut().is_some() {}
        self.pending.get_mut().unwrap_or_else(PoisonError::into_inner).clear();

        // Slots still pending or completed may hold accepted descriptors.
        let slabs = self.slabs.get_mut().unwrap_or_else(PoisonError::into_inner);
        for slot in slabs.iter().flat_map(|slab| slab.iter()) {
            // SAFETY: no IoBuf is alive, each holds a reference to `self`.
            unsafe { slot.data_mut() }.recycle();
        }
        tracing::debug!(ctx = self.id, "context destroyed");
    }
}

/// Per-thread owner of a buffer pool and its completions.
///
/// Created by [`IoService::make_context`](crate::IoService::make_context).
/// `Send` but not `Sync`: one thread polls it at a time.
pub struct IoContext {
    shared: Arc<ContextShared>,
    _not_sync: PhantomData<Cell<()>>,
}

impl IoContext {
    pub(crate) fn new(shared: Arc<ContextShared>) -> Self {
        Self {
            shared,
            _not_sync: PhantomData,
        }
    }

    /// Take a buffer from the pool, growing it by one slab when empty.
    ///
    /// Fails with `ENOBUFS` only if the allocation fails.
    pub fn make_buf(&self) -> Result<IoBuf> {
        let raw = match self.shared.pop_free() {
            Some(raw) => raw,
            None => {
                self.shared.grow().map_err(|e| Error::new("make_buf", e))?;
                self.shared.pop_free().ok_or(Error::new("make_buf", Errno::ENOBUFS))?
            }
        };
        Ok(IoBuf::from_raw(raw, Arc::clone(&self.shared)))
    }

    /// Next completed buffer, waiting up to `timeout`.
    ///
    /// `Duration::ZERO` polls once without blocking; `Duration::MAX` waits
    /// without bound. `Ok(None)` means the timeout expired.
    pub fn get(&self, timeout: Duration) -> Result<Option<IoBuf>> {
        let shared = &self.shared;
        if let Some(raw) = shared.pop_completed() {
            return Ok(Some(IoBuf::from_raw(raw, Arc::clone(shared))));
        }

        let deadline = if timeout == Duration::MAX {
            None
        } else {
            Instant::now().checked_add(timeout)
        };
        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if let Some(raw) = shared.poll_once(remaining)? {
                return Ok(Some(IoBuf::from_raw(raw, Arc::clone(shared))));
            }
            if remaining.is_some_and(|r| r.is_zero()) {
                return Ok(None);
            }
        }
    }

    /// [`get`](Self::get) with a zero timeout.
    pub fn try_get(&self) -> Result<Option<IoBuf>> {
        self.get(Duration::ZERO)
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            pool_size: self.shared.pool_size.load(Ordering::Relaxed),
            free: self.shared.free_count.load(Ordering::Relaxed),
            pending: lock(&self.shared.pending).len(),
        }
    }

    /// Name of the notification facility behind this context.
    pub fn facility(&self) -> &'static str {
        self.shared.facility.name()
    }
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("id", &self.shared.id)
            .field("facility", &self.facility())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::OpKind;
    use crate::IoService;
    use std::thread;

    #[test]
    fn test_make_context_pregrows_pool() {
        let service = IoService::with_config(ServiceConfig::new().slab_size(4));
        let ctx = service.make_context(10).unwrap();
        let stats = ctx.stats();
        assert!(stats.pool_size >= 10);
        assert_eq!(stats.pool_size % 4, 0);
        assert_eq!(stats.free, stats.pool_size);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_pool_grows_beyond_initial() {
        let service = IoService::with_config(ServiceConfig::new().slab_size(2));
        let ctx = service.make_context(2).unwrap();
        let bufs: Vec<IoBuf> = (0..7).map(|_| ctx.make_buf().unwrap()).collect();
        assert_eq!(bufs.len(), 7);
        assert_eq!(ctx.stats().pool_size, 8);
        drop(bufs);
        assert_eq!(ctx.stats().free, 8);
    }

    #[test]
    fn test_get_nothing_completed() {
        let service = IoService::new();
        let ctx = service.make_context(0).unwrap();
        assert!(ctx.try_get().unwrap().is_none());
        assert!(ctx.get(Duration::ZERO).unwrap().is_none());

        let start = Instant::now();
        assert!(ctx.get(Duration::from_millis(30)).unwrap().is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_cross_thread_completion_wakes_get() {
        let service = IoService::new();
        let ctx = service.make_context(1).unwrap();
        let mut buf = ctx.make_buf().unwrap();
        buf.set_user_data(5);
        let (raw, shared) = buf.into_raw();

        thread::scope(|s| {
            s.spawn(move || {
                thread::sleep(Duration::from_millis(50));
                shared.complete_now(raw, ErrorCode::from(Errno::ECANCELED));
            });
            let start = Instant::now();
            let buf = ctx.get(Duration::from_secs(10)).unwrap().unwrap();
            assert!(start.elapsed() < Duration::from_secs(5));
            assert_eq!(buf.user_data(), 5);
            assert_eq!(buf.op().error, Some(ErrorCode::System(Errno::ECANCELED)));
        });
    }

    #[test]
    fn test_drop_with_default_config() {
        let service = IoService::new();
        let ctx = service.make_context(1).unwrap();
        let buf = ctx.make_buf().unwrap();
        drop(buf);
        drop(ctx);
    }

    #[test]
    fn test_drop_with_completed_and_pending_ops() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let service = IoService::new();
        let ctx = service.make_context(2).unwrap();

        let (raw, shared) = ctx.make_buf().unwrap().into_raw();
        shared.complete_now(raw, ErrorCode::from(Errno::ECANCELED));

        let mut buf = ctx.make_buf().unwrap();
        buf.slot_mut().op.prepare(OpKind::Receive, false, 0);
        let (raw, shared) = buf.into_raw();
        shared.submit(raw, std::os::fd::AsRawFd::as_raw_fd(&socket), Wait::Read);
        assert_eq!(ctx.stats().pending, 1);

        drop(shared);
        drop(ctx);
    }

    #[test]
    fn test_context_belongs_to_its_service() {
        let a = IoService::new();
        let b = IoService::new();
        let ctx = a.make_context(1).unwrap();
        let (raw, shared) = ctx.make_buf().unwrap().into_raw();
        assert!(shared.belongs_to(a.shared()));
        assert!(!shared.belongs_to(b.shared()));
        drop(IoBuf::from_raw(raw, shared));
    }

    #[test]
    fn test_context_is_send_not_sync() {
        fn assert_send<T: Send>() {}
        assert_send::<IoContext>();
    }
}
