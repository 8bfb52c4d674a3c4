//! Output path selection: templated default name plus collision avoidance.

use std::path::{Path, PathBuf};

use crate::error::Error;

/// Renders the target loudness for the filename suffix, dropping a trailing
/// `.0` so the default target reads `_-14LUFS`.
fn target_label(integrated: f64) -> String {
    if integrated.fract() == 0.0 {
        format!("{integrated:.0}")
    } else {
        format!("{integrated}")
    }
}

/// Default destination next to the input: stem, target-loudness suffix, and
/// the original extension (`.mp3` when the input has none).
pub fn default_output_path(input: &Path, target_integrated: f64) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| String::from(".mp3"));
    input.with_file_name(format!(
        "{stem}_{}LUFS{ext}",
        target_label(target_integrated)
    ))
}

/// Returns the first candidate that does not exist: the bare name, then
/// `-001`..`-999` inserted before the extension. Existence checks only;
/// nothing is created or locked.
pub fn next_free_path(path: PathBuf) -> Result<PathBuf, Error> {
    if !path.exists() {
        return Ok(path);
    }
    let stem = path
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    for n in 1..1000 {
        let candidate = path.with_file_name(format!("{stem}-{n:03}{ext}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(Error::OutputPathsExhausted { path })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn default_name_keeps_the_extension() {
        let out = default_output_path(Path::new("/music/song.mp3"), -14.0);
        assert_eq!(out, Path::new("/music/song_-14LUFS.mp3"));
    }

    #[test]
    fn default_name_without_extension_falls_back_to_mp3() {
        let out = default_output_path(Path::new("/music/song"), -14.0);
        assert_eq!(out, Path::new("/music/song_-14LUFS.mp3"));
    }

    #[test]
    fn fractional_target_is_rendered_exactly() {
        let out = default_output_path(Path::new("/music/song.wav"), -16.5);
        assert_eq!(out, Path::new("/music/song_-16.5LUFS.wav"));
    }

    #[test]
    fn free_name_is_used_bare() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("song_-14LUFS.mp3");
        let picked = next_free_path(candidate.clone()).unwrap();
        assert_eq!(picked, candidate);
    }

    #[test]
    fn collisions_append_zero_padded_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("song_-14LUFS.mp3");
        fs::write(&candidate, b"taken").unwrap();

        let first = next_free_path(candidate.clone()).unwrap();
        assert_eq!(first, dir.path().join("song_-14LUFS-001.mp3"));

        fs::write(&first, b"also taken").unwrap();
        let second = next_free_path(candidate).unwrap();
        assert_eq!(second, dir.path().join("song_-14LUFS-002.mp3"));
    }
}
