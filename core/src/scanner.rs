use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lower-cases extensions and strips a leading dot, so `".JPG"` and `"jpg"` match alike.
pub fn normalize_extensions<I, S>(extensions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extensions
        .into_iter()
        .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_lowercase();
            extensions.iter().any(|candidate| candidate == &lower)
        })
        .unwrap_or(false)
}

/// Recursively lists files under `root` with a recognized extension.
///
/// Entries are visited in file-name order so that runs over an unchanged
/// tree see the same candidate sequence on every platform. Unreadable
/// entries below the root are skipped; an unreadable root is an error.
pub fn collect_images(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut images = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.depth() == 0 => return Err(error),
            Err(_) => continue,
        };
        if entry.file_type().is_file() && has_image_extension(entry.path(), extensions) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}
