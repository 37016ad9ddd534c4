use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::asset::Asset;
use crate::config::RunnerConfig;
use crate::engine::ComputationEngine;
use crate::error::RunnerError;
use crate::identity;
use crate::result::MetricResult;
use crate::scheduler::{self, ExecutionMode, LockRegistry};
use crate::store::ResultStore;
use crate::workfile::{self, WorkfileMode};

/// Drives the full lifecycle of a computation across a batch of assets:
/// cache lookup, precondition validation, workfile preparation,
/// engine invocation, result extraction, caching and cleanup.
///
/// The executor owns the computation identity, derived once from the
/// engine's type/version and the config's impacts-result parameters,
/// and an optional result store consulted before and after every
/// computation. Without a store, every run computes.
pub struct Executor<E: ComputationEngine> {
    engine: E,
    store: Option<Box<dyn ResultStore>>,
    config: RunnerConfig,
    computation_id: String,
}

impl<E: ComputationEngine> std::fmt::Debug for Executor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("computation_id", &self.computation_id)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl<E: ComputationEngine> Executor<E> {
    pub fn new(engine: E, store: Option<Box<dyn ResultStore>>, config: RunnerConfig) -> Self {
        let computation_id = identity::computation_id(
            engine.kind(),
            engine.version(),
            config.params.as_ref(),
        );
        Self {
            engine,
            store,
            config,
            computation_id,
        }
    }

    pub fn computation_id(&self) -> &str {
        &self.computation_id
    }

    /// Run the computation across the batch. One lock per distinct
    /// logical asset serializes duplicate entries; results return in
    /// input order with per-asset errors isolated.
    pub fn run(&self, assets: &[Asset]) -> Vec<Result<MetricResult, RunnerError>> {
        info!(
            id = %self.computation_id,
            assets = assets.len(),
            "running computation for each asset unless a cached result exists"
        );

        let registry = LockRegistry::for_assets(assets);
        let mode = if self.config.parallelize {
            ExecutionMode::Parallel {
                workers: self.config.workers,
            }
        } else {
            ExecutionMode::Sequential
        };

        scheduler::run_batch(assets, &registry, mode, |asset| self.run_on_asset(asset))
    }

    /// The per-asset state machine. Callers must hold the asset's lock
    /// when duplicates of the asset may be in flight; [`Executor::run`]
    /// does this for the whole batch.
    pub fn run_on_asset(&self, asset: &Asset) -> Result<MetricResult, RunnerError> {
        if let Some(store) = &self.store {
            if let Some(result) = store
                .load(asset, &self.computation_id)
                .map_err(RunnerError::Store)?
            {
                info!(id = %self.computation_id, "result exists, skipping run");
                return self.engine.post_process(result).map_err(RunnerError::Engine);
            }
        }
        info!(id = %self.computation_id, "result does not exist, performing computation");

        crate::validate::validate(asset, self.engine.capability())?;

        // Derived state is decided once per run, on a working copy.
        let mut asset = asset.clone();
        if workfile::needs_transcode(&asset, self.engine.capability()) {
            asset.assign_workfile_paths(self.engine.capability());
        } else {
            asset.mark_use_source_as_workfile();
        }

        let result = match self.compute(&asset) {
            Ok(result) => result,
            Err(error) => {
                if !asset.use_source_as_workfile() {
                    if let Err(cleanup) =
                        workfile::close_workfiles(&asset, self.engine.capability())
                    {
                        warn!("best-effort workfile teardown failed: {cleanup}");
                    }
                }
                return Err(error);
            }
        };

        self.engine.post_process(result).map_err(RunnerError::Engine)
    }

    /// Ask the result store to drop each asset's entry for this
    /// computation id. Takes no locks; callers must not race an active
    /// run on the same assets.
    pub fn remove_results(&self, assets: &[Asset]) -> Result<(), RunnerError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        for asset in assets {
            store
                .delete(asset, &self.computation_id)
                .map_err(RunnerError::Store)?;
        }
        Ok(())
    }

    /// The log artifact the engine writes machine-readable output into:
    /// `<workdir>/<computation_id>_<sha1-of-asset-string>`.
    pub fn log_path(&self, asset: &Asset) -> PathBuf {
        asset
            .workdir
            .join(format!("{}_{}", self.computation_id, asset.string_hash()))
    }

    fn compute(&self, asset: &Asset) -> Result<MetricResult, RunnerError> {
        let capability = self.engine.capability();
        let transcoding = !asset.use_source_as_workfile();

        // Tear down leftovers early: workfile identity may overlap
        // across assets, and a stale entry would fail pipe creation.
        if transcoding {
            workfile::close_workfiles(asset, capability)?;
        }

        let log_path = self.log_path(asset);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if transcoding {
            let mode = if self.config.fifo_mode {
                WorkfileMode::Fifo
            } else {
                WorkfileMode::Direct
            };
            workfile::open_workfiles(asset, mode, capability)?;
        }

        self.prepare_log_file(&log_path)?;

        self.engine
            .generate(asset, &log_path)
            .map_err(RunnerError::Engine)?;

        if self.config.delete_workdir && transcoding {
            workfile::close_workfiles(asset, capability)?;
        }

        info!(id = %self.computation_id, "reading log artifact for scores");
        let scores = self
            .engine
            .read(asset, &log_path)
            .map_err(RunnerError::Engine)?;
        let result = MetricResult {
            computation_id: self.computation_id.clone(),
            asset_string: asset.canonical_string(),
            scores,
        };

        if let Some(store) = &self.store {
            store.save(&result).map_err(RunnerError::Store)?;
        }

        if self.config.delete_workdir {
            self.remove_log_file(&log_path)?;
            if let Some(parent) = log_path.parent() {
                remove_log_dir(parent)?;
            }
        }

        Ok(result)
    }

    /// Seed the log artifact with a header identifying the computation.
    fn prepare_log_file(&self, log_path: &Path) -> Result<(), RunnerError> {
        fs::write(
            log_path,
            format!("{} V{}\n\n", self.engine.kind(), self.engine.version()),
        )?;
        Ok(())
    }

    fn remove_log_file(&self, log_path: &Path) -> Result<(), RunnerError> {
        match fs::remove_file(log_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remove the log artifact's parent directory, tolerating exactly one
/// failure class: a non-empty directory. Some computation engines leave
/// auxiliary informational files behind, and those are kept.
fn remove_log_dir(dir: &Path) -> Result<(), RunnerError> {
    match fs::remove_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if is_directory_not_empty(&e) => {
            debug!(dir = %dir.display(), "log directory not empty, leaving it in place");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_directory_not_empty(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::DirectoryNotEmpty {
        return true;
    }
    #[cfg(unix)]
    if error.raw_os_error() == Some(libc::ENOTEMPTY) {
        return true;
    }
    false
}
