use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tracing::debug;

use crate::asset::Asset;
use crate::error::RunnerError;
use crate::result::MetricResult;

/// One mutual-exclusion lock per distinct logical asset, shared by
/// every scheduled task whose asset has the same canonical string.
///
/// Built once per scheduling batch and passed by reference into the
/// scheduler; there is no process-wide registry.
pub struct LockRegistry {
    locks: HashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn for_assets(assets: &[Asset]) -> Self {
        let mut locks = HashMap::new();
        for asset in assets {
            locks
                .entry(asset.canonical_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
        }
        debug!(
            assets = assets.len(),
            distinct = locks.len(),
            "lock registry built"
        );
        Self { locks }
    }

    /// The lock shared by all tasks on this logical asset. Panics when
    /// the asset was not part of the batch this registry was built for.
    pub fn lock_for(&self, asset: &Asset) -> Arc<Mutex<()>> {
        self.locks
            .get(&asset.canonical_string())
            .cloned()
            .expect("asset must belong to the batch the registry was built for")
    }

    pub fn distinct_assets(&self) -> usize {
        self.locks.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Map assets in order on the calling thread.
    Sequential,
    /// Fan out across a bounded worker pool; `workers = None` uses the
    /// system default pool size.
    Parallel { workers: Option<usize> },
}

/// Run the per-asset task across the batch, holding each asset's lock
/// for the full task duration. Results come back in input order
/// regardless of completion order, one per asset; a failed asset never
/// affects its siblings.
pub fn run_batch<F>(
    assets: &[Asset],
    registry: &LockRegistry,
    mode: ExecutionMode,
    task: F,
) -> Vec<Result<MetricResult, RunnerError>>
where
    F: Fn(&Asset) -> Result<MetricResult, RunnerError> + Sync,
{
    let locked_task = |asset: &Asset| {
        let lock = registry.lock_for(asset);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        task(asset)
    };

    match mode {
        ExecutionMode::Sequential => assets.iter().map(locked_task).collect(),
        ExecutionMode::Parallel { workers: None } => {
            assets.par_iter().map(locked_task).collect()
        }
        ExecutionMode::Parallel {
            workers: Some(workers),
        } => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .expect("worker pool should build");
            pool.install(|| assets.par_iter().map(locked_task).collect())
        }
    }
}
