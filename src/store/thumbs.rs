//! Filesystem-backed per-face thumbnail cache.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use image::DynamicImage;

use super::ThumbnailStore;
use crate::package::Region;

pub struct FsThumbnailStore {
    cache_dir: PathBuf,
}

impl FsThumbnailStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    fn ensure_cache_dir(&self) -> Result<()> {
        if !self.cache_dir.exists() {
            fs::create_dir_all(&self.cache_dir)?;
        }
        Ok(())
    }

    /// Cache filename derived from the original path and the region, so each
    /// face crop of an image gets its own entry.
    fn cache_path(&self, original: &Path, region: &Region) -> PathBuf {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        original.to_string_lossy().hash(&mut hasher);
        (region.x, region.y, region.width, region.height).hash(&mut hasher);
        let hash = hasher.finish();

        self.cache_dir.join(format!("{:016x}.png", hash))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

impl ThumbnailStore for FsThumbnailStore {
    fn store_detail(&self, file_path: &Path, region: &Region, detail: &DynamicImage) -> Result<()> {
        self.ensure_cache_dir()?;
        detail.save(self.cache_path(file_path, region))?;
        Ok(())
    }

    fn load_detail(&self, file_path: &Path, region: &Region) -> Result<Option<DynamicImage>> {
        let path = self.cache_path(file_path, region);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(image::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_store_and_load_detail() {
        let dir = tempfile::tempdir().unwrap();
        let thumbs = FsThumbnailStore::new(dir.path());
        let crop = DynamicImage::ImageRgb8(RgbImage::new(24, 24));
        let region = Region::new(5, 5, 24, 24);
        let path = Path::new("/photos/img.jpg");

        assert!(thumbs.load_detail(path, &region).unwrap().is_none());
        thumbs.store_detail(path, &region, &crop).unwrap();
        let loaded = thumbs.load_detail(path, &region).unwrap().unwrap();
        assert_eq!(loaded.width(), 24);

        // a different region is a different cache entry
        let other = Region::new(0, 0, 24, 24);
        assert!(thumbs.load_detail(path, &other).unwrap().is_none());
    }
}
