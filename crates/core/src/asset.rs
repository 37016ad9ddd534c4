use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::Capability;
use crate::identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Inclusive frame selection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
}

impl FrameRange {
    pub fn frame_count(&self) -> u32 {
        self.end - self.start + 1
    }
}

/// How a source file's pixels are stored on disk.
///
/// `Container` is the sentinel for "not raw video, let the transcoder
/// decode whatever the container/codec holds".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Raw { pix_fmt: String },
    Container,
}

impl SourceFormat {
    pub fn raw(pix_fmt: &str) -> Self {
        Self::Raw {
            pix_fmt: pix_fmt.to_string(),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }

    pub fn pix_fmt(&self) -> Option<&str> {
        match self {
            Self::Raw { pix_fmt } => Some(pix_fmt),
            Self::Container => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw { pix_fmt } => f.write_str(pix_fmt),
            Self::Container => f.write_str("container"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Bilinear,
    #[default]
    Bicubic,
    Lanczos,
}

impl Resampling {
    /// Flag value handed to the transcoder's `-sws_flags`.
    pub fn flag(self) -> &'static str {
        match self {
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Lanczos => "lanczos",
        }
    }
}

fn default_workfile_format() -> String {
    "yuv420p".to_string()
}

/// One unit of work: a reference/distorted media pair plus the
/// processing parameters that define how it is brought into the
/// computation's working format.
///
/// Everything except the derived workfile state is immutable identity:
/// two assets are "the same" for locking and log naming iff their
/// [`canonical_string`](Asset::canonical_string) values are equal. The
/// derived state (`use_source_as_workfile` and the two workfile paths)
/// is set exactly once per run by the orchestrator and never enters the
/// canonical string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub ref_path: PathBuf,
    pub dis_path: PathBuf,
    pub workdir: PathBuf,
    pub ref_format: SourceFormat,
    pub dis_format: SourceFormat,
    #[serde(default)]
    pub ref_size: Option<Dimensions>,
    #[serde(default)]
    pub dis_size: Option<Dimensions>,
    /// Caller-supplied target quality dimensions. When absent, the
    /// target derives from the native sizes and crop/pad become
    /// unavailable (the geometry would be ambiguous).
    #[serde(default)]
    pub quality: Option<Dimensions>,
    /// Crop filter spec, `w:h:x:y`.
    #[serde(default)]
    pub crop: Option<String>,
    /// Pad filter spec, `w:h:x:y`.
    #[serde(default)]
    pub pad: Option<String>,
    #[serde(default)]
    pub ref_frames: Option<FrameRange>,
    #[serde(default)]
    pub dis_frames: Option<FrameRange>,
    #[serde(default)]
    pub resampling: Resampling,
    /// Raw format for the workfiles when both sources are `Container`
    /// and there is no raw side to inherit from.
    #[serde(default = "default_workfile_format")]
    pub workfile_format: String,

    #[serde(skip)]
    use_source_as_workfile: bool,
    #[serde(skip)]
    ref_workfile: Option<PathBuf>,
    #[serde(skip)]
    dis_workfile: Option<PathBuf>,
}

impl Asset {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ref_path: impl Into<PathBuf>,
        dis_path: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        ref_format: SourceFormat,
        dis_format: SourceFormat,
        ref_size: Option<Dimensions>,
        dis_size: Option<Dimensions>,
        quality: Option<Dimensions>,
    ) -> Self {
        Self {
            ref_path: ref_path.into(),
            dis_path: dis_path.into(),
            workdir: workdir.into(),
            ref_format,
            dis_format,
            ref_size,
            dis_size,
            quality,
            crop: None,
            pad: None,
            ref_frames: None,
            dis_frames: None,
            resampling: Resampling::default(),
            workfile_format: default_workfile_format(),
            use_source_as_workfile: false,
            ref_workfile: None,
            dis_workfile: None,
        }
    }

    /// Effective target dimensions: the explicit quality size when the
    /// caller supplied one, otherwise the reference's native size,
    /// otherwise the distorted side's.
    pub fn target_dimensions(&self) -> Option<Dimensions> {
        self.quality.or(self.ref_size).or(self.dis_size)
    }

    /// Whether the quality dimensions came from the caller rather than
    /// being derived from a native size.
    pub fn has_explicit_quality(&self) -> bool {
        self.quality.is_some()
    }

    /// Deterministic identity string. Equal strings mean the same
    /// logical asset; the string also names the asset in logs and cache
    /// entries (via its SHA-1).
    pub fn canonical_string(&self) -> String {
        let mut tokens = vec![
            format!("ref_{}", self.ref_path.display()),
            self.ref_format.to_string(),
        ];
        if let Some(size) = self.ref_size {
            tokens.push(size.to_string());
        }
        tokens.push(format!("dis_{}", self.dis_path.display()));
        tokens.push(self.dis_format.to_string());
        if let Some(size) = self.dis_size {
            tokens.push(size.to_string());
        }
        match self.target_dimensions() {
            Some(target) => tokens.push(format!("q_{target}")),
            None => tokens.push("q_unset".to_string()),
        }
        if let Some(crop) = &self.crop {
            tokens.push(format!("crop_{crop}"));
        }
        if let Some(pad) = &self.pad {
            tokens.push(format!("pad_{pad}"));
        }
        if let Some(range) = self.ref_frames {
            tokens.push(format!("reff_{}to{}", range.start, range.end));
        }
        if let Some(range) = self.dis_frames {
            tokens.push(format!("disf_{}to{}", range.start, range.end));
        }
        tokens.push(self.resampling.flag().to_string());
        // The fallback format only matters when a container side exists.
        if !self.ref_format.is_raw() || !self.dis_format.is_raw() {
            tokens.push(format!("wf_{}", self.workfile_format));
        }
        tokens.join("_")
    }

    /// SHA-1 hex of the canonical string; used in log-artifact and
    /// cache-entry file names.
    pub fn string_hash(&self) -> String {
        identity::sha1_hex(&self.canonical_string())
    }

    pub fn use_source_as_workfile(&self) -> bool {
        self.use_source_as_workfile
    }

    pub fn ref_workfile(&self) -> Option<&Path> {
        self.ref_workfile.as_deref()
    }

    pub fn dis_workfile(&self) -> Option<&Path> {
        self.dis_workfile.as_deref()
    }

    /// Path the computation should read the reference from: the
    /// workfile when one was prepared, the source otherwise.
    pub fn ref_input_path(&self) -> &Path {
        self.ref_workfile.as_deref().unwrap_or(&self.ref_path)
    }

    pub fn dis_input_path(&self) -> &Path {
        self.dis_workfile.as_deref().unwrap_or(&self.dis_path)
    }

    /// Marks the asset as needing no transcoding at all. Set at most
    /// once per run; mutually exclusive with workfile paths.
    pub(crate) fn mark_use_source_as_workfile(&mut self) {
        debug_assert!(
            self.ref_workfile.is_none() && self.dis_workfile.is_none(),
            "workfile paths must not be populated when sources are used directly"
        );
        self.use_source_as_workfile = true;
    }

    /// Derives the ephemeral workfile paths under the workdir for the
    /// sides the capability considers. Set at most once per run.
    pub(crate) fn assign_workfile_paths(&mut self, capability: Capability) {
        debug_assert!(
            !self.use_source_as_workfile,
            "cannot assign workfile paths after choosing sources as workfiles"
        );
        if capability.considers_reference() {
            debug_assert!(self.ref_workfile.is_none());
            self.ref_workfile = Some(derived_workfile_path(&self.workdir, "ref", &self.ref_path));
        }
        debug_assert!(self.dis_workfile.is_none());
        self.dis_workfile = Some(derived_workfile_path(&self.workdir, "dis", &self.dis_path));
    }
}

fn derived_workfile_path(workdir: &Path, side: &str, source: &Path) -> PathBuf {
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    workdir.join(format!("{side}_{file_name}"))
}
