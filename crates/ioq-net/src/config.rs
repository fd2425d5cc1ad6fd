//! Reactor configuration

use ioq_core::env::env_get;

/// Slots added to a context's pool per growth step.
pub const DEFAULT_SLAB_SIZE: usize = 64;

/// Completions a single `get` round drains from the facility.
pub const DEFAULT_MAX_COMPLETIONS: usize = 64;

/// Configuration shared by a service and every context it makes.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Buffers allocated per slab when a context's pool runs dry
    pub slab_size: usize,

    /// Upper bound on completions retrieved per wait round
    pub max_completions_per_wait: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            slab_size: DEFAULT_SLAB_SIZE,
            max_completions_per_wait: DEFAULT_MAX_COMPLETIONS,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, overridden by `IOQ_SLAB_SIZE` and `IOQ_MAX_COMPLETIONS`.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            slab_size: env_get("IOQ_SLAB_SIZE", base.slab_size),
            max_completions_per_wait: env_get("IOQ_MAX_COMPLETIONS", base.max_completions_per_wait),
        }
    }

    /// Set buffers per slab
    pub fn slab_size(mut self, n: usize) -> Self {
        self.slab_size = n;
        self
    }

    /// Set the per-round completion cap
    pub fn max_completions_per_wait(mut self, n: usize) -> Self {
        self.max_completions_per_wait = n;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.slab_size == 0 {
            return Err("slab_size must be at least 1");
        }
        if self.max_completions_per_wait == 0 {
            return Err("max_completions_per_wait must be at least 1");
        }
        Ok(())
    }
}
