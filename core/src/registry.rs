//! Registry of images that were part of the labelled set.
//!
//! Identity is deliberately weak: two files are considered the same image
//! when their file name, byte length and containing folder name agree. No
//! content hash is taken.

use crate::scanner::collect_images;
use rustc_hash::FxHashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix applied to sorted copies of images that match a known entry.
pub const KNOWN_PREFIX: &str = "known_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KnownImage {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub parent_name: Option<OsString>,
}

#[derive(Clone, Debug, Default)]
pub struct KnownImageRegistry {
    by_name: FxHashMap<OsString, Vec<KnownImage>>,
    count: usize,
}

impl KnownImageRegistry {
    /// Records every readable file among `paths`; paths that cannot be
    /// stat'ed are left out.
    pub fn from_paths<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut registry = Self::default();
        for path in paths {
            let path = path.as_ref();
            if let Ok(metadata) = fs::metadata(path) {
                registry.insert(path.to_path_buf(), metadata.len());
            }
        }
        registry
    }

    /// Treats every recognized image under `root` as known.
    pub fn scan(root: &Path, extensions: &[String]) -> Result<Self, walkdir::Error> {
        Ok(Self::from_paths(collect_images(root, extensions)?))
    }

    pub fn insert(&mut self, path: PathBuf, size_bytes: u64) {
        let Some(name) = path.file_name().map(|name| name.to_os_string()) else {
            return;
        };
        let parent_name = parent_name(&path);
        self.by_name.entry(name).or_default().push(KnownImage {
            path,
            size_bytes,
            parent_name,
        });
        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether a known entry shares the file name, the size and the parent
    /// folder name of `destination`.
    pub fn is_known(&self, destination: &Path, size_bytes: u64) -> bool {
        let Some(name) = destination.file_name() else {
            return false;
        };
        let destination_parent = parent_name(destination);
        self.by_name.get(name).is_some_and(|matches| {
            matches.iter().any(|known| {
                known.size_bytes == size_bytes && known.parent_name == destination_parent
            })
        })
    }

    /// Returns the path a sorted copy should be written to: `destination`
    /// itself, or the same folder with a `known_` prefixed file name when the
    /// copy probably duplicates a labelled image.
    pub fn resolve_dest_name(&self, destination: &Path, size_bytes: u64) -> PathBuf {
        if !self.is_known(destination, size_bytes) {
            return destination.to_path_buf();
        }
        let Some(name) = destination.file_name() else {
            return destination.to_path_buf();
        };
        let mut renamed = OsString::from(KNOWN_PREFIX);
        renamed.push(name);
        destination.with_file_name(renamed)
    }
}

fn parent_name(path: &Path) -> Option<OsString> {
    path.parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_os_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(path: &Path, data: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    #[test]
    fn matching_name_size_and_folder_gets_known_prefix() {
        let dir = tempdir().unwrap();
        let known = dir.path().join("images/cat/img1.jpg");
        write_file(&known, b"12345");
        let registry = KnownImageRegistry::from_paths([&known]);

        let destination = dir.path().join("result/cat/img1.jpg");
        assert_eq!(
            registry.resolve_dest_name(&destination, 5),
            dir.path().join("result/cat/known_img1.jpg")
        );
    }

    #[test]
    fn any_mismatch_leaves_name_unchanged() {
        let dir = tempdir().unwrap();
        let known = dir.path().join("images/cat/img1.jpg");
        write_file(&known, b"12345");
        let registry = KnownImageRegistry::from_paths([&known]);

        let other_size = dir.path().join("result/cat/img1.jpg");
        assert_eq!(registry.resolve_dest_name(&other_size, 6), other_size);

        let other_folder = dir.path().join("result/dog/img1.jpg");
        assert_eq!(registry.resolve_dest_name(&other_folder, 5), other_folder);

        let other_name = dir.path().join("result/cat/img2.jpg");
        assert_eq!(registry.resolve_dest_name(&other_name, 5), other_name);
    }

    #[test]
    fn one_of_several_same_named_entries_is_enough() {
        let dir = tempdir().unwrap();
        let dog = dir.path().join("images/dog/img1.jpg");
        let cat = dir.path().join("images/cat/img1.jpg");
        write_file(&dog, b"dog");
        write_file(&cat, b"cat-bytes");
        let registry = KnownImageRegistry::from_paths([&dog, &cat]);
        assert_eq!(registry.len(), 2);

        let destination = dir.path().join("result/cat/img1.jpg");
        assert!(registry.is_known(&destination, 9));
        assert!(!registry.is_known(&destination, 3));
    }

    #[test]
    fn unreadable_paths_are_skipped() {
        let dir = tempdir().unwrap();
        let registry = KnownImageRegistry::from_paths([dir.path().join("missing/a.jpg")]);
        assert!(registry.is_empty());
    }

    #[test]
    fn scan_registers_recognized_images_only() {
        let dir = tempdir().unwrap();
        write_file(&dir.path().join("cat/a.jpg"), b"a");
        write_file(&dir.path().join("dog/b.png"), b"b");
        write_file(&dir.path().join("tags.tsv"), b"x");
        let registry =
            KnownImageRegistry::scan(dir.path(), &[String::from("jpg"), String::from("png")])
                .unwrap();
        assert_eq!(registry.len(), 2);
    }
}
