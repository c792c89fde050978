//! Context
//!
//! Everything a training or prediction call needs besides its configuration:
//! the random seed, the size of the worker pool and a cancellation token.
use crate::constants::DEFAULT_SEED;
use crate::errors::ConformalError;
use hashbrown::HashMap;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// Worker pools built for a context, keyed by thread count. Clones share them.
type PoolCache = Arc<Mutex<HashMap<usize, Arc<ThreadPool>>>>;

/// Cooperative cancellation flag, shared between the caller and running work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Work in progress stops at its next check point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` when cancellation was requested.
    pub fn check(&self) -> Result<(), ConformalError> {
        if self.is_cancelled() {
            Err(ConformalError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Explicit per-call context.
#[derive(Debug, Clone)]
pub struct Context {
    /// Seed of every random decision made during the call.
    pub seed: u64,
    /// Upper bound on worker threads, `None` uses the available parallelism.
    pub num_threads: Option<usize>,
    pub cancellation: CancellationToken,
    pools: PoolCache,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            seed: DEFAULT_SEED,
            num_threads: None,
            cancellation: CancellationToken::new(),
            pools: PoolCache::default(),
        }
    }
}

impl Context {
    pub fn new(seed: u64) -> Self {
        Context {
            seed,
            ..Default::default()
        }
    }

    /// Set the seed.
    /// * `seed` - Seed for sampling and any other random decision.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of threads.
    /// * `num_threads` - Maximum number of worker threads.
    pub fn set_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the cancellation token.
    pub fn set_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Pool with at most `max_tasks` threads, built on first use and reused afterwards.
    pub(crate) fn thread_pool(&self, max_tasks: usize) -> Result<Arc<ThreadPool>, ConformalError> {
        let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let num_threads = self.num_threads.unwrap_or(available).min(max_tasks).max(1);
        let mut pools = self
            .pools
            .lock()
            .map_err(|e| ConformalError::ThreadPool(e.to_string()))?;
        if let Some(pool) = pools.get(&num_threads) {
            return Ok(Arc::clone(pool));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map(Arc::new)
            .map_err(|e| ConformalError::ThreadPool(e.to_string()))?;
        pools.insert(num_threads, Arc::clone(&pool));
        Ok(pool)
    }
}
