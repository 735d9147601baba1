use rayon::prelude::*;
use std::sync::Arc;

/// Worker pool for parsing and analysis. The `parallel` flag is set per
/// recheck batch; below the gate, work runs serially on the caller thread.
#[derive(Clone)]
pub struct Scheduler {
    pool: Arc<rayon::ThreadPool>,
    parallel: bool,
}

impl Scheduler {
    pub fn new(jobs: usize) -> Result<Scheduler, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
        Ok(Scheduler { pool: Arc::new(pool), parallel: true })
    }

    pub fn with_parallel(&self, parallel: bool) -> Scheduler {
        Scheduler { pool: Arc::clone(&self.pool), parallel }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Map `work` over `items`, fanning out to the pool when parallel.
    /// Joins before returning; results keep input order.
    pub fn map<T, R, F>(&self, items: &[T], work: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.parallel {
            self.pool.install(|| items.par_iter().map(&work).collect())
        } else {
            items.iter().map(work).collect()
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").field("parallel", &self.parallel).finish()
    }
}
