use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asset::Asset;
use crate::engine::{Capability, ComputationEngine};
use crate::result::{Scores, ScoreValue};
use crate::transcode;

/// Declarative description of an external metric tool, typically loaded
/// from the `[engine]` section of the config file.
///
/// `args` entries may contain the placeholders `{fmt}`, `{width}`,
/// `{height}`, `{ref}` and `{dis}`; the path placeholders substitute the
/// workfile paths when workfiles were prepared, the source paths
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEngineSpec {
    pub kind: String,
    pub version: String,
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub capability: Capability,
}

/// Computation engine that shells out to a metric binary whose stdout
/// is machine-parseable `name: value` lines, appended to the asset's
/// log artifact and read back after the run.
pub struct CommandEngine {
    spec: CommandEngineSpec,
}

impl CommandEngine {
    pub fn new(spec: CommandEngineSpec) -> Self {
        Self { spec }
    }

    fn substituted_args(&self, asset: &Asset) -> Result<Vec<String>> {
        let target = asset
            .target_dimensions()
            .ok_or_else(|| anyhow!("asset has no target dimensions"))?;
        let fmt = transcode::workfile_pix_fmt(asset, self.spec.capability);

        Ok(self
            .spec
            .args
            .iter()
            .map(|template| {
                template
                    .replace("{fmt}", &fmt)
                    .replace("{width}", &target.width.to_string())
                    .replace("{height}", &target.height.to_string())
                    .replace("{ref}", &asset.ref_input_path().display().to_string())
                    .replace("{dis}", &asset.dis_input_path().display().to_string())
            })
            .collect())
    }
}

impl ComputationEngine for CommandEngine {
    fn kind(&self) -> &str {
        &self.spec.kind
    }

    fn version(&self) -> &str {
        &self.spec.version
    }

    fn capability(&self) -> Capability {
        self.spec.capability
    }

    fn generate(&self, asset: &Asset, log_path: &Path) -> Result<()> {
        let args = self.substituted_args(asset)?;
        debug!(
            command = %self.spec.command.display(),
            "invoking metric command: {}",
            args.join(" ")
        );

        let output = Command::new(&self.spec.command)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| {
                format!(
                    "failed to execute metric command: {}",
                    self.spec.command.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "metric command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        let mut log_file = OpenOptions::new()
            .append(true)
            .open(log_path)
            .with_context(|| format!("failed to open log artifact: {}", log_path.display()))?;
        log_file
            .write_all(&output.stdout)
            .context("failed to append metric output to log artifact")?;
        Ok(())
    }

    fn read(&self, _asset: &Asset, log_path: &Path) -> Result<Scores> {
        let content = std::fs::read_to_string(log_path)
            .with_context(|| format!("failed to read log artifact: {}", log_path.display()))?;
        parse_scores(&content)
    }
}

/// Parse `name: value` lines into scores. A name repeated across lines
/// accumulates into a per-frame series. Lines without a colon are
/// informational and ignored (the log header among them); a colon line
/// whose value does not parse is an error.
pub fn parse_scores(content: &str) -> Result<Scores> {
    let mut accumulated: Vec<(String, Vec<f64>)> = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("malformed score line: '{line}'"))?;

        match accumulated.iter_mut().find(|(known, _)| known == name) {
            Some((_, values)) => values.push(value),
            None => accumulated.push((name.to_string(), vec![value])),
        }
    }

    Ok(accumulated
        .into_iter()
        .map(|(name, mut values)| {
            let score = if values.len() == 1 {
                ScoreValue::Scalar(values.remove(0))
            } else {
                ScoreValue::Series(values)
            };
            (name, score)
        })
        .collect())
}
