use anyhow::{Context, Result};
use opencv::prelude::*;
use opencv::{core, imgcodecs, imgproc};
use std::path::{Path, PathBuf};

use crate::border::BorderCleaner;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "png", "tif"];

/// Load an image from disk with timing and logging
pub fn load_image(path: &Path) -> Result<Mat> {
    let start = std::time::Instant::now();
    let filename = path.file_name().unwrap_or_default().to_string_lossy();
    let path_str = path
        .to_str()
        .with_context(|| format!("non UTF-8 path: {}", path.display()))?;

    let img = imgcodecs::imread(path_str, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        anyhow::bail!("could not decode image {}", path.display());
    }

    log::info!(
        "Loaded {} in {:?} - Size: {}x{}, Channels: {}",
        filename,
        start.elapsed(),
        img.cols(),
        img.rows(),
        img.channels()
    );
    Ok(img)
}

/// Loads every image of a directory, in path order.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    pub image_dir: PathBuf,
    /// Target `(width, height)` applied to every image.
    pub resize_shape: Option<(i32, i32)>,
}

impl ImageLoader {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            resize_shape: None,
        }
    }

    pub fn with_resize(mut self, width: i32, height: i32) -> Self {
        self.resize_shape = Some((width, height));
        self
    }

    /// `.jpg`, `.png` and `.tif` files, sorted by path.
    pub fn list_images(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.image_dir)
            .with_context(|| format!("cannot read directory {}", self.image_dir.display()))?
        {
            let path = entry?.path();
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext));
            if matches && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn load_images(&self) -> Result<Vec<Mat>> {
        let files = self.list_images()?;
        let mut images = Vec::with_capacity(files.len());
        for path in &files {
            let img = load_image(path)?;
            let img = match self.resize_shape {
                Some((width, height)) => {
                    let mut resized = Mat::default();
                    imgproc::resize(
                        &img,
                        &mut resized,
                        core::Size::new(width, height),
                        0.0,
                        0.0,
                        imgproc::INTER_AREA,
                    )?;
                    resized
                }
                None => img,
            };
            images.push(img);
        }

        log::info!(
            "Number of loaded images from {} is: {}",
            self.image_dir.display(),
            images.len()
        );
        if let Some((width, height)) = self.resize_shape {
            log::info!("Images resized to {}x{} for stitching", width, height);
        }
        Ok(images)
    }
}

/// Write the stitching result, optionally cropped to its painted content.
pub fn save_result(image: &Mat, path: &Path, crop_to_content: bool) -> Result<()> {
    let to_write = if crop_to_content {
        BorderCleaner::default()
            .crop(image)
            .context("cannot crop result to content")?
    } else {
        image.clone()
    };

    let path_str = path
        .to_str()
        .with_context(|| format!("non UTF-8 path: {}", path.display()))?;
    let written = imgcodecs::imwrite(path_str, &to_write, &core::Vector::new())?;
    if !written {
        anyhow::bail!("OpenCV could not write {}", path.display());
    }

    log::info!(
        "Saved {}x{} result to {}",
        to_write.cols(),
        to_write.rows(),
        path.display()
    );
    Ok(())
}
