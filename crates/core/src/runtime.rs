use std::env;
#[cfg(windows)]
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use crate::error::RunnerError;

/// Binary name of the external transcoder.
pub const TRANSCODER_BINARY: &str = "ffmpeg";
const ENV_TRANSCODER: &str = "VIDEVAL_FFMPEG";

/// Search directories relative to the current executable for the
/// transcoder binary, probed before falling back to `PATH`:
///   1. `<exe_dir>/`
///   2. `<exe_dir>/bin/`
///   3. `<exe_dir>/../bin/`
///   4. `<cwd>/` and `<cwd>/bin/`
fn candidate_bin_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(exe) = env::current_exe().and_then(|p| p.canonicalize()) {
        if let Some(exe_dir) = exe.parent() {
            dirs.push(exe_dir.to_path_buf());
            dirs.push(exe_dir.join("bin"));
            if let Some(parent) = exe_dir.parent() {
                dirs.push(parent.join("bin"));
            }
        }
    }

    if let Ok(cwd) = env::current_dir() {
        if !dirs.contains(&cwd) {
            dirs.push(cwd.clone());
        }
        let cwd_bin = cwd.join("bin");
        if !dirs.contains(&cwd_bin) {
            dirs.push(cwd_bin);
        }
    }

    dirs
}

fn path_dirs() -> Vec<PathBuf> {
    env::var_os("PATH")
        .map(|path| env::split_paths(&path).collect())
        .unwrap_or_default()
}

#[cfg(unix)]
fn candidate_binary_names(binary: &str) -> Vec<String> {
    vec![binary.to_string()]
}

#[cfg(windows)]
fn candidate_binary_names(binary: &str) -> Vec<String> {
    if Path::new(binary).components().count() > 1 {
        return vec![binary.to_string()];
    }

    let lower = binary.to_ascii_lowercase();
    if lower.ends_with(".exe") || lower.ends_with(".cmd") || lower.ends_with(".bat") {
        return vec![binary.to_string()];
    }

    vec![
        format!("{binary}.exe"),
        format!("{binary}.cmd"),
        format!("{binary}.bat"),
        binary.to_string(),
    ]
}

fn find_binary_in_dirs(binary: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let names = candidate_binary_names(binary);
    for dir in dirs {
        for name in &names {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Resolve the transcoder executable.
///
/// A `VIDEVAL_FFMPEG` override wins and is honored strictly: if it is
/// set but does not point at a file, resolution fails rather than
/// silently searching elsewhere.
pub fn resolve_transcoder() -> Result<PathBuf, RunnerError> {
    if let Some(overridden) = env::var_os(ENV_TRANSCODER) {
        let path = PathBuf::from(overridden);
        if path.is_file() {
            return Ok(path);
        }
        return Err(RunnerError::MissingTool(path.display().to_string()));
    }

    if let Some(path) = find_binary_in_dirs(TRANSCODER_BINARY, &candidate_bin_dirs()) {
        return Ok(path);
    }
    if let Some(path) = find_binary_in_dirs(TRANSCODER_BINARY, &path_dirs()) {
        return Ok(path);
    }

    Err(RunnerError::MissingTool(TRANSCODER_BINARY.to_string()))
}

/// A [`Command`] for the resolved transcoder, or `MissingTool`.
pub fn transcoder_command() -> Result<Command, RunnerError> {
    Ok(Command::new(resolve_transcoder()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_bin_dirs_includes_cwd_bin() {
        let dirs = candidate_bin_dirs();
        if let Ok(cwd) = env::current_dir() {
            assert!(dirs.contains(&cwd.join("bin")));
        }
    }

    #[test]
    fn find_binary_in_dirs_prefers_first_match() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let first = temp.path().join("first");
        let second = temp.path().join("second");
        std::fs::create_dir_all(&first).expect("first dir should be created");
        std::fs::create_dir_all(&second).expect("second dir should be created");

        #[cfg(unix)]
        let binary_name = "ffmpeg";
        #[cfg(windows)]
        let binary_name = "ffmpeg.exe";

        std::fs::write(first.join(binary_name), b"first").expect("first binary should exist");
        std::fs::write(second.join(binary_name), b"second").expect("second binary should exist");

        let resolved = find_binary_in_dirs("ffmpeg", &[first.clone(), second.clone()])
            .expect("binary should be resolved");
        assert_eq!(resolved, first.join(binary_name));
    }

    #[test]
    fn find_binary_in_dirs_returns_none_for_empty_dirs() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        assert!(find_binary_in_dirs("ffmpeg", &[temp.path().to_path_buf()]).is_none());
    }
}
