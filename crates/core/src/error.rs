use thiserror::Error;

/// Failure taxonomy for the per-asset orchestration.
///
/// Every variant is fatal for the asset being processed. A batch run
/// isolates failures per asset, so one asset's error never aborts its
/// siblings.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("transcoder binary '{0}' is required but could not be resolved")]
    MissingTool(String),

    #[error("raw pixel formats disagree: reference is {reference}, distorted is {distorted}")]
    FormatMismatch {
        reference: String,
        distorted: String,
    },

    #[error("{0} requested but quality width/height were not explicitly set")]
    AmbiguousGeometry(&'static str),

    #[error("workfile path(s) still missing after {waited_ms} ms: {missing}")]
    WorkfileTimeout { waited_ms: u64, missing: String },

    #[error("transcoder exited with {status}: {stderr}")]
    TranscodeFailure { status: String, stderr: String },

    #[error("computation engine failed: {0}")]
    Engine(#[source] anyhow::Error),

    #[error("result store failed: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_variant_context() {
        let error = RunnerError::FormatMismatch {
            reference: "yuv420p".to_string(),
            distorted: "yuv422p".to_string(),
        };
        let rendered = error.to_string();
        assert!(rendered.contains("yuv420p"));
        assert!(rendered.contains("yuv422p"));

        let error = RunnerError::AmbiguousGeometry("crop");
        assert!(error.to_string().contains("crop"));
    }

    #[test]
    fn io_errors_convert_transparently() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error: RunnerError = io.into();
        assert!(matches!(error, RunnerError::Io(_)));
        assert!(error.to_string().contains("gone"));
    }
}
