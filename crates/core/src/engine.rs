use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::result::{MetricResult, Scores};

/// Which sides of an asset a computation consumes.
///
/// Full-reference computations compare the distorted side against the
/// reference; no-reference computations only look at the distorted
/// side, which drops every reference-side precondition and workfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    #[default]
    FullPair,
    DistortedOnly,
}

impl Capability {
    pub fn considers_reference(self) -> bool {
        matches!(self, Self::FullPair)
    }
}

/// The pluggable computation step.
///
/// `generate` is expected to read the asset's input paths (workfiles
/// when prepared, sources otherwise) and append machine-readable output
/// to the log artifact; `read` parses that artifact back into scores.
/// Both hooks must be idempotent for identical inputs and must never
/// delete source or workfile paths.
pub trait ComputationEngine: Send + Sync {
    fn kind(&self) -> &str;

    fn version(&self) -> &str;

    fn capability(&self) -> Capability {
        Capability::default()
    }

    fn generate(&self, asset: &Asset, log_path: &Path) -> Result<()>;

    fn read(&self, asset: &Asset, log_path: &Path) -> Result<Scores>;

    /// Transforms a finished result before it is returned to the
    /// caller. Identity by default.
    fn post_process(&self, result: MetricResult) -> Result<MetricResult> {
        Ok(result)
    }
}
