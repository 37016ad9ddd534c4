use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Stdio;
use std::thread;

use tracing::debug;

use crate::asset::{Asset, FrameRange, SourceFormat};
use crate::engine::Capability;
use crate::error::RunnerError;
use crate::runtime;

/// Which side of the asset pair a transcoder invocation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ref,
    Dis,
}

impl Side {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Ref => "ref",
            Self::Dis => "dis",
        }
    }
}

/// Container formats whose frame numbering confuses the transcoder;
/// worked around with a single start-number flag instead of raw-input
/// declarations.
const FRAME_NUMBERING_WORKAROUND_EXTENSIONS: [&str; 2] = ["icpf", "j2c"];

/// Raw pixel format the workfiles are written in.
///
/// Inherits from whichever side is raw; when every considered side is a
/// container source, falls back to the asset's configured workfile
/// format. Both-raw pairs have matching formats by validation.
pub fn workfile_pix_fmt(asset: &Asset, capability: Capability) -> String {
    if !capability.considers_reference() {
        return match asset.dis_format.pix_fmt() {
            Some(pix_fmt) => pix_fmt.to_string(),
            None => asset.workfile_format.clone(),
        };
    }

    match (asset.ref_format.pix_fmt(), asset.dis_format.pix_fmt()) {
        (None, None) => asset.workfile_format.clone(),
        (Some(pix_fmt), None) | (None, Some(pix_fmt)) | (Some(pix_fmt), Some(_)) => {
            pix_fmt.to_string()
        }
    }
}

/// Build the full transcoder argument list for one side.
///
/// Folds together, in order: the input declaration (raw-format flags or
/// the container frame-numbering workaround), frame-count limiting, the
/// filter chain (frame selection, crop, pad, scale to target), raw
/// output, the resampling algorithm and the overwrite flag.
pub fn build_transcode_args(
    asset: &Asset,
    side: Side,
    workfile_fmt: &str,
) -> Result<Vec<String>, RunnerError> {
    let (source, format, size, frames, workfile) = match side {
        Side::Ref => (
            &asset.ref_path,
            &asset.ref_format,
            asset.ref_size,
            asset.ref_frames,
            asset.ref_workfile(),
        ),
        Side::Dis => (
            &asset.dis_path,
            &asset.dis_format,
            asset.dis_size,
            asset.dis_frames,
            asset.dis_workfile(),
        ),
    };

    let target = asset.target_dimensions().ok_or_else(|| {
        RunnerError::Precondition("target quality dimensions are not available".to_string())
    })?;
    let workfile = workfile.ok_or_else(|| {
        RunnerError::Precondition(format!(
            "{} workfile path has not been assigned",
            side.tag()
        ))
    })?;

    let mut args: Vec<String> = Vec::new();

    match format {
        SourceFormat::Raw { pix_fmt } => {
            let native = size.ok_or_else(|| {
                RunnerError::Precondition(format!(
                    "{} side declares a raw format but no native dimensions",
                    side.tag()
                ))
            })?;
            args.extend([
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                pix_fmt.clone(),
                "-s".to_string(),
                native.to_string(),
            ]);
        }
        SourceFormat::Container => {
            if has_workaround_extension(source) {
                // 2147483647 is INT_MAX for a 4-byte int.
                args.extend([
                    "-start_number_range".to_string(),
                    "2147483647".to_string(),
                ]);
            }
        }
    }

    args.extend(["-i".to_string(), source.display().to_string()]);
    args.extend([
        "-an".to_string(),
        "-vsync".to_string(),
        "0".to_string(),
        "-pix_fmt".to_string(),
        workfile_fmt.to_string(),
    ]);

    let (vframes, select_filter) = frame_range_args(frames);
    args.extend(vframes);

    let crop_filter = asset
        .crop
        .as_ref()
        .map(|spec| format!("crop={spec},"))
        .unwrap_or_default();
    let pad_filter = asset
        .pad
        .as_ref()
        .map(|spec| format!("pad={spec},"))
        .unwrap_or_default();
    args.extend([
        "-vf".to_string(),
        format!("{select_filter}{crop_filter}{pad_filter}scale={target}"),
    ]);

    args.extend([
        "-f".to_string(),
        "rawvideo".to_string(),
        "-sws_flags".to_string(),
        asset.resampling.flag().to_string(),
        "-y".to_string(),
        workfile.display().to_string(),
    ]);

    Ok(args)
}

fn has_workaround_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            FRAME_NUMBERING_WORKAROUND_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// `-vframes` limit plus the leading frame-selection filter expression,
/// both derived from the inclusive (start, end) window.
fn frame_range_args(frames: Option<FrameRange>) -> (Vec<String>, String) {
    match frames {
        None => (Vec::new(), String::new()),
        Some(range) => (
            vec!["-vframes".to_string(), range.frame_count().to_string()],
            format!(
                "select='gte(n\\,{start})*gte({end}\\,n)',setpts=PTS-STARTPTS,",
                start = range.start,
                end = range.end
            ),
        ),
    }
}

/// Run the transcoder to completion. Stderr is drained on a background
/// thread and re-emitted under the `transcoder_stderr` target; a
/// non-zero exit is fatal for the asset and carries the tail of stderr.
pub fn run_transcoder(args: &[String]) -> Result<(), RunnerError> {
    let mut command = runtime::transcoder_command()?;
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!(target: "transcoder", "invoking transcoder: {}", args.join(" "));

    let mut child = command.spawn()?;
    let stderr = child.stderr.take().expect("stderr should be piped");
    let stderr_thread = thread::spawn(move || {
        let reader = BufReader::new(stderr);
        let mut lines = Vec::new();
        for line in reader.lines() {
            match line {
                Ok(line) if !line.is_empty() => {
                    debug!(target: "transcoder_stderr", "{}", line);
                    lines.push(line);
                }
                Err(error) => {
                    debug!(target: "transcoder_stderr", "read error: {}", error);
                    break;
                }
                _ => {}
            }
        }
        lines
    });

    let status = child.wait()?;
    let stderr_lines = stderr_thread.join().unwrap_or_default();

    if !status.success() {
        return Err(RunnerError::TranscodeFailure {
            status: status.to_string(),
            stderr: tail_of(&stderr_lines, 8),
        });
    }
    Ok(())
}

fn tail_of(lines: &[String], count: usize) -> String {
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
