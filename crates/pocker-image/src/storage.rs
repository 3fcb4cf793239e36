//! On-disk image store.
//!
//! Layout under the images directory:
//!
//! - `<name>/` an extracted tree, or `<name>/rootfs/` when the tree was
//!   unpacked together with metadata
//! - `<name>.tar` an archive, only reported so users know to extract it

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use pocker_common::constants::{IMAGE_ARCHIVE_EXTENSION, IMAGE_ROOTFS_SUBDIR};
use pocker_common::error::{PockerError, Result};
use pocker_common::types::Image;
use serde::Serialize;

/// One image known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageEntry {
    /// Image name.
    pub name: String,
    /// Tree containers are rooted in, if extracted.
    pub rootfs: Option<PathBuf>,
    /// Archive next to the tree, if any.
    pub archive: Option<PathBuf>,
}

impl ImageEntry {
    /// Returns `true` if the image can be run.
    #[must_use]
    pub const fn is_extracted(&self) -> bool {
        self.rootfs.is_some()
    }
}

/// Read-only view of the images directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    images_dir: PathBuf,
}

impl ImageStore {
    /// Opens the store rooted at `images_dir`. The directory may not exist yet.
    #[must_use]
    pub fn open(images_dir: impl Into<PathBuf>) -> Self {
        let images_dir = images_dir.into();
        tracing::debug!(path = %images_dir.display(), "opening image store");
        Self { images_dir }
    }

    /// Returns the images directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.images_dir
    }

    /// Resolves `name` to the tree a container will use as its lower layer.
    ///
    /// # Errors
    ///
    /// Returns `Config` for a name that is not a single path component and
    /// `ImageNotFound` if no extracted tree exists. The message mentions an
    /// archive lying next to the missing tree.
    pub fn resolve(&self, name: &str) -> Result<Image> {
        validate_name(name)?;
        let dir = self.images_dir.join(name);
        if dir.is_dir() {
            let rootfs = dir.join(IMAGE_ROOTFS_SUBDIR);
            let path = if rootfs.is_dir() { rootfs } else { dir };
            tracing::debug!(image = name, path = %path.display(), "image resolved");
            return Ok(Image {
                name: name.to_owned(),
                path,
            });
        }

        let archive = self.archive_path(name);
        let hint = if archive.is_file() {
            format!(
                " (archive {} is present but not extracted)",
                archive.display()
            )
        } else {
            String::new()
        };
        Err(PockerError::ImageNotFound {
            name: name.to_owned(),
            hint,
        })
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.images_dir
            .join(format!("{name}.{IMAGE_ARCHIVE_EXTENSION}"))
    }

    /// Lists every image by name, extracted or archived.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the images directory exists but cannot be read.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        let entries = match std::fs::read_dir(&self.images_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PockerError::Io {
                    path: self.images_dir.clone(),
                    source: e,
                });
            }
        };

        let mut images: BTreeMap<String, ImageEntry> = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| PockerError::Io {
                path: self.images_dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            if path.is_dir() {
                let image = images
                    .entry(file_name.clone())
                    .or_insert_with(|| empty_entry(&file_name));
                let rootfs = path.join(IMAGE_ROOTFS_SUBDIR);
                image.rootfs = Some(if rootfs.is_dir() { rootfs } else { path });
            } else if path.extension().is_some_and(|ext| ext == IMAGE_ARCHIVE_EXTENSION) {
                let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned())
                else {
                    continue;
                };
                let image = images
                    .entry(stem.clone())
                    .or_insert_with(|| empty_entry(&stem));
                image.archive = Some(path);
            }
        }
        Ok(images.into_values().collect())
    }
}

fn empty_entry(name: &str) -> ImageEntry {
    ImageEntry {
        name: name.to_owned(),
        rootfs: None,
        archive: None,
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0']);
    if valid {
        Ok(())
    } else {
        Err(PockerError::Config {
            message: format!("invalid image name: {name:?}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("images"));
        std::fs::create_dir_all(store.root()).expect("mkdir images");
        (dir, store)
    }

    #[test]
    fn resolves_plain_tree() {
        let (_dir, store) = store();
        std::fs::create_dir(store.root().join("ubuntu")).expect("mkdir");

        let image = store.resolve("ubuntu").expect("resolve");
        assert_eq!(image.name, "ubuntu");
        assert_eq!(image.path, store.root().join("ubuntu"));
    }

    #[test]
    fn prefers_rootfs_subdirectory() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.root().join("alpine/rootfs")).expect("mkdir");

        let image = store.resolve("alpine").expect("resolve");
        assert_eq!(image.path, store.root().join("alpine/rootfs"));
    }

    #[test]
    fn missing_image_is_not_found() {
        let (_dir, store) = store();
        let err = store.resolve("nonexistent-image").expect_err("missing");
        assert!(matches!(err, PockerError::ImageNotFound { ref hint, .. } if hint.is_empty()));
    }

    #[test]
    fn archive_only_image_gets_hint() {
        let (_dir, store) = store();
        std::fs::write(store.root().join("busybox.tar"), b"").expect("write tar");

        let err = store.resolve("busybox").expect_err("not extracted");
        assert!(err.to_string().contains("present but not extracted"));
    }

    #[test]
    fn rejects_path_like_names() {
        let (_dir, store) = store();
        for name in ["", ".", "..", "../etc", "a/b"] {
            assert!(
                matches!(store.resolve(name), Err(PockerError::Config { .. })),
                "{name:?} accepted"
            );
        }
    }

    #[test]
    fn list_merges_trees_and_archives() {
        let (_dir, store) = store();
        std::fs::create_dir(store.root().join("ubuntu")).expect("mkdir");
        std::fs::write(store.root().join("ubuntu.tar"), b"").expect("tar");
        std::fs::write(store.root().join("busybox.tar"), b"").expect("tar");
        std::fs::write(store.root().join("notes.txt"), b"").expect("other");

        let images = store.list().expect("list");
        let names: Vec<&str> = images.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["busybox", "ubuntu"]);
        assert!(!images[0].is_extracted());
        assert!(images[1].is_extracted());
        assert!(images[1].archive.is_some());
    }

    #[test]
    fn list_of_missing_store_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ImageStore::open(dir.path().join("nowhere"));
        assert!(store.list().expect("list").is_empty());
    }
}
