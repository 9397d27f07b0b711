//! Face-crop retrieval for workers that need pixel data for existing
//! records when the package carries no in-memory image.
//!
//! Tries the thumbnail cache first (crops are stored there by the database
//! writer), then falls back to decoding a fresh preview of the original
//! file. Retrieval is abortable: once the pipeline cancels, outstanding
//! requests return nothing instead of decoding further files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::DynamicImage;

use crate::imageio;
use crate::package::{Region, WorkPackage};
use crate::store::ThumbnailStore;

pub struct ItemRetriever {
    thumbs: Arc<dyn ThumbnailStore>,
    preview_size: u32,
    aborted: Arc<AtomicBool>,
}

impl ItemRetriever {
    pub fn new(thumbs: Arc<dyn ThumbnailStore>, preview_size: u32, aborted: Arc<AtomicBool>) -> Self {
        Self {
            thumbs,
            preview_size,
            aborted,
        }
    }

    /// Fetch one crop per region, in input order. `None` entries mark crops
    /// that could not be retrieved; callers must keep positional alignment.
    pub fn crops(&self, package: &WorkPackage, regions: &[Region]) -> Vec<Option<DynamicImage>> {
        let mut preview: Option<Option<DynamicImage>> = None;
        let mut out = Vec::with_capacity(regions.len());

        for region in regions {
            if self.aborted.load(Ordering::SeqCst) {
                out.push(None);
                continue;
            }

            // Crop from the package image when one is cached.
            if let Some(image) = &package.image {
                let mapped =
                    imageio::map_to_image(&region.display_rect(), package.original_size, image);
                out.push(imageio::crop_region(image, &mapped).ok());
                continue;
            }

            // Stored display-rect thumbnail, written alongside the record.
            let display = region.display_rect();
            if let Ok(Some(thumb)) = self.thumbs.load_detail(&package.info.file_path, &display) {
                out.push(Some(thumb));
                continue;
            }

            // Last resort: decode a preview of the original file, once.
            let decoded = preview.get_or_insert_with(|| {
                match imageio::load_preview(&package.info.file_path, self.preview_size) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        tracing::warn!(
                            path = %package.info.file_path.display(),
                            error = %e,
                            "Failed to decode preview for face retrieval"
                        );
                        None
                    }
                }
            });

            match decoded {
                Some(img) => {
                    // The preview may be downscaled relative to the original
                    // coordinates the region is expressed in.
                    let original = imageio::probe_size(&package.info.file_path);
                    let mapped = imageio::map_to_image(&display, original, img);
                    out.push(imageio::crop_region(img, &mapped).ok());
                }
                None => out.push(None),
            }
        }

        out
    }
}
