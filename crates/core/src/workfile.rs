use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::asset::Asset;
use crate::engine::Capability;
use crate::error::RunnerError;
use crate::transcode::{self, Side};

/// How workfiles are materialized when transcoding is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkfileMode {
    /// Transcode each side synchronously into an ordinary file.
    Direct,
    /// Write each side into a named pipe from a background producer
    /// while the computation concurrently drains it.
    Fifo,
}

const PIPE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const PIPE_POLL_ATTEMPTS: u32 = 10;

/// Whether the asset's sources can be fed to the computation as-is.
///
/// Transcoding is needed when the target quality size differs from a
/// considered side's native size, a crop or pad is requested, a
/// considered side restricts its frame range, or a considered side is a
/// container source. `DistortedOnly` evaluates the distorted side only.
pub fn needs_transcode(asset: &Asset, capability: Capability) -> bool {
    if asset.crop.is_some() || asset.pad.is_some() {
        return true;
    }

    let target = asset.target_dimensions();
    let mut sides = vec![(&asset.dis_format, asset.dis_size, asset.dis_frames)];
    if capability.considers_reference() {
        sides.push((&asset.ref_format, asset.ref_size, asset.ref_frames));
    }

    sides.into_iter().any(|(format, size, frames)| {
        !format.is_raw() || frames.is_some() || size != target
    })
}

/// Create the workfiles for every considered side.
///
/// Direct mode blocks until both sides are fully written; a transcoder
/// failure is fatal. Fifo mode spawns one detached producer per side
/// and returns once every pipe path exists; the producers keep running
/// until the computation drains them. Callers must have torn down stale
/// workfiles first; a leftover entry at a pipe path fails the producer.
pub fn open_workfiles(
    asset: &Asset,
    mode: WorkfileMode,
    capability: Capability,
) -> Result<(), RunnerError> {
    let workfile_fmt = transcode::workfile_pix_fmt(asset, capability);

    match mode {
        WorkfileMode::Direct => {
            for side in considered_sides(capability) {
                let args = transcode::build_transcode_args(asset, side, &workfile_fmt)?;
                transcode::run_transcoder(&args)?;
            }
            Ok(())
        }
        WorkfileMode::Fifo => {
            let mut pipe_paths = Vec::new();
            for side in considered_sides(capability) {
                let args = transcode::build_transcode_args(asset, side, &workfile_fmt)?;
                let pipe_path = workfile_path(asset, side)?.to_path_buf();
                pipe_paths.push(pipe_path.clone());
                spawn_pipe_producer(side, pipe_path, args);
            }
            wait_for_workfiles(&pipe_paths)
        }
    }
}

/// Remove the workfiles for every considered side, never touching the
/// corresponding sources. A no-op when the sources are used directly or
/// when no workfile paths were assigned yet.
pub fn close_workfiles(asset: &Asset, capability: Capability) -> Result<(), RunnerError> {
    if asset.use_source_as_workfile() {
        return Ok(());
    }

    for side in considered_sides(capability) {
        let (source, workfile) = match side {
            Side::Ref => (&asset.ref_path, asset.ref_workfile()),
            Side::Dis => (&asset.dis_path, asset.dis_workfile()),
        };
        let Some(workfile) = workfile else {
            continue;
        };

        if workfile == source.as_path() {
            // Deleting here would destroy the caller's media.
            warn!(
                side = side.tag(),
                path = %workfile.display(),
                "workfile path equals the source path, skipping teardown"
            );
            continue;
        }

        match fs::remove_file(workfile) {
            Ok(()) => debug!(side = side.tag(), path = %workfile.display(), "workfile removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Tear down and re-create the workfiles before a second computation
/// pass over the same asset. Only meaningful in fifo mode: a drained
/// pipe cannot be rewound, an ordinary file can simply be re-read.
pub fn refresh_workfiles(
    asset: &Asset,
    mode: WorkfileMode,
    capability: Capability,
) -> Result<(), RunnerError> {
    if mode == WorkfileMode::Fifo && !asset.use_source_as_workfile() {
        close_workfiles(asset, capability)?;
        open_workfiles(asset, WorkfileMode::Fifo, capability)?;
    }
    Ok(())
}

fn considered_sides(capability: Capability) -> Vec<Side> {
    if capability.considers_reference() {
        vec![Side::Ref, Side::Dis]
    } else {
        vec![Side::Dis]
    }
}

fn workfile_path(asset: &Asset, side: Side) -> Result<&Path, RunnerError> {
    let path = match side {
        Side::Ref => asset.ref_workfile(),
        Side::Dis => asset.dis_workfile(),
    };
    path.ok_or_else(|| {
        RunnerError::Precondition(format!(
            "{} workfile path has not been assigned",
            side.tag()
        ))
    })
}

/// A fifo producer creates the pipe itself, then blocks inside the
/// transcoder until a reader attaches. It is detached: if the run times
/// out or the reader misbehaves, the thread exits on its own once the
/// pipe is drained or the process tears down.
fn spawn_pipe_producer(side: Side, pipe_path: PathBuf, args: Vec<String>) {
    thread::spawn(move || {
        if let Err(e) = make_fifo(&pipe_path) {
            error!(
                side = side.tag(),
                path = %pipe_path.display(),
                "failed to create named pipe: {e}"
            );
            return;
        }
        if let Err(e) = transcode::run_transcoder(&args) {
            warn!(side = side.tag(), "pipe producer transcode failed: {e}");
        }
    });
}

/// Poll for the pipe paths at 100 ms intervals, at most 10 attempts.
/// Missing paths after the ~1 second ceiling abort the asset's run.
pub fn wait_for_workfiles(paths: &[PathBuf]) -> Result<(), RunnerError> {
    for _ in 0..PIPE_POLL_ATTEMPTS {
        if paths.iter().all(|path| path.exists()) {
            return Ok(());
        }
        thread::sleep(PIPE_POLL_INTERVAL);
    }

    let missing: Vec<String> = paths
        .iter()
        .filter(|path| !path.exists())
        .map(|path| path.display().to_string())
        .collect();
    Err(RunnerError::WorkfileTimeout {
        waited_ms: u64::from(PIPE_POLL_ATTEMPTS) * PIPE_POLL_INTERVAL.as_millis() as u64,
        missing: missing.join(", "),
    })
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> io::Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))?;
    if unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "named pipes are only supported on Unix platforms",
    ))
}
