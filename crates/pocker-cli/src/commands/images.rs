//! `pocker images`: list local images.

use clap::Args;
use pocker_common::config::PockerConfig;
use pocker_image::{ImageEntry, ImageStore};

use crate::output;

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Print the list as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if the images directory cannot be read.
pub fn execute(config: &PockerConfig, args: &ImagesArgs) -> anyhow::Result<i32> {
    let store = ImageStore::open(config.images_dir());
    let images = store.list()?;
    tracing::debug!(count = images.len(), path = %store.root().display(), "images listed");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&images)?);
    } else {
        print!("{}", output::render_table(&["IMAGE", "STATUS", "PATH"], &rows(&images)));
    }
    Ok(0)
}

fn rows(images: &[ImageEntry]) -> Vec<Vec<String>> {
    images
        .iter()
        .map(|image| {
            let (status, path) = match (&image.rootfs, &image.archive) {
                (Some(rootfs), _) => ("ready", rootfs.display().to_string()),
                (None, Some(archive)) => ("archive only", archive.display().to_string()),
                (None, None) => ("empty", String::new()),
            };
            vec![image.name.clone(), status.to_owned(), path]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn rows_describe_image_state() {
        let images = vec![
            ImageEntry {
                name: "busybox".into(),
                rootfs: None,
                archive: Some(PathBuf::from("/s/images/busybox.tar")),
            },
            ImageEntry {
                name: "ubuntu".into(),
                rootfs: Some(PathBuf::from("/s/images/ubuntu")),
                archive: None,
            },
        ];
        let rows = rows(&images);
        assert_eq!(rows[0], vec!["busybox", "archive only", "/s/images/busybox.tar"]);
        assert_eq!(rows[1], vec!["ubuntu", "ready", "/s/images/ubuntu"]);
    }
}
