//! Process-wide reactor service
//!
//! The service creates contexts and associates sockets. Closing or
//! half-closing an associated socket reaches every live context through
//! the service, so operations pending anywhere are completed.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::config::ServiceConfig;
use crate::context::{lock, ContextShared, IoContext};
use crate::error::{Errno, Error, ErrorCode, Result};
use crate::facility::new_facility;
use crate::socket::BasicSocket;
use crate::sys::Wait;

pub(crate) struct ServiceShared {
    pub(crate) config: ServiceConfig,
    contexts: Mutex<Vec<Weak<ContextShared>>>,
    next_id: AtomicUsize,
}

impl ServiceShared {
    fn live_contexts(&self) -> Vec<Arc<ContextShared>> {
        let mut contexts = lock(&self.contexts);
        contexts.retain(|w| w.strong_count() > 0);
        contexts.iter().filter_map(Weak::upgrade).collect()
    }

    /// Complete operations pending on `fd` in every context.
    pub(crate) fn cancel(&self, fd: RawFd, dir: Option<Wait>, code: ErrorCode) -> usize {
        self.live_contexts().iter().map(|ctx| ctx.cancel(fd, dir, code)).sum()
    }

    pub(crate) fn forget(&self, fd: RawFd) {
        for ctx in self.live_contexts() {
            ctx.forget(fd);
        }
    }
}

/// Owner of the notification bookkeeping.
///
/// Cheap to construct; shared state is allocated on first use. Share one
/// service between worker threads by reference.
pub struct IoService {
    config: ServiceConfig,
    shared: OnceLock<Arc<ServiceShared>>,
}

impl IoService {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        Self {
            config,
            shared: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> &Arc<ServiceShared> {
        self.shared.get_or_init(|| {
            tracing::debug!(
                slab_size = self.config.slab_size,
                max_completions = self.config.max_completions_per_wait,
                "service started"
            );
            Arc::new(ServiceShared {
                config: self.config.clone(),
                contexts: Mutex::new(Vec::new()),
                next_id: AtomicUsize::new(0),
            })
        })
    }

    /// New context whose pool holds at least `initial_pool_size` buffers.
    pub fn make_context(&self, initial_pool_size: usize) -> Result<IoContext> {
        const OP: &str = "make_context";
        self.config
            .validate()
            .map_err(|reason| {
                tracing::warn!(reason, "invalid service configuration");
                Error::new(OP, Errno::EINVAL)
            })?;

        let shared = self.shared();
        let facility = new_facility().map_err(|e| Error::new(OP, ErrorCode::from(&e)))?;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(ContextShared::new(id, shared, facility));

        let slabs = initial_pool_size.div_ceil(shared.config.slab_size);
        for _ in 0..slabs {
            ctx.grow().map_err(|e| Error::new(OP, e))?;
        }

        lock(&shared.contexts).push(Arc::downgrade(&ctx));
        let ctx = IoContext::new(ctx);
        tracing::debug!(id, ?ctx, "context created");
        Ok(ctx)
    }

    /// Route `socket`'s asynchronous operations through this service.
    ///
    /// Fails with `EBADF` if the socket is not open and with `EINVAL` if
    /// it is associated with another service. Associating twice is a no-op.
    pub fn associate<S: BasicSocket>(&self, socket: &mut S) -> Result<()> {
        const OP: &str = "associate";
        let shared = self.shared();
        let core = socket.core_mut();
        if !core.is_open() {
            return Err(Error::new(OP, Errno::EBADF));
        }
        match &core.service {
            Some(existing) if Arc::ptr_eq(existing, shared) => Ok(()),
            Some(_) => Err(Error::new(OP, Errno::EINVAL)),
            None => {
                core.service = Some(Arc::clone(shared));
                tracing::debug!(fd = core.fd, "socket associated");
                Ok(())
            }
        }
    }
}

impl Default for IoService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoService")
            .field("config", &self.config)
            .field("started", &self.shared.get().is_some())
            .finish()
    }
}
