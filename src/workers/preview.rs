use std::sync::Arc;

use crate::imageio;
use crate::package::WorkPackage;
use crate::workers::{FlowGate, Worker};

/// First stage of a scanning pipeline: decodes a bounded preview of each
/// item so detection never has to touch the full-resolution file.
///
/// Decoded previews dominate the pipeline's memory footprint, so admission
/// goes through a [`FlowGate`] that caps how many loaded packages are in
/// flight downstream at once.
pub struct PreviewLoader {
    max_edge: u32,
    gate: Arc<FlowGate>,
}

impl PreviewLoader {
    pub fn new(max_edge: u32, gate: Arc<FlowGate>) -> Self {
        Self { max_edge, gate }
    }
}

impl Worker for PreviewLoader {
    fn name(&self) -> &'static str {
        "preview-loader"
    }

    fn process(&mut self, mut package: Box<WorkPackage>) -> Box<WorkPackage> {
        // Items submitted with an already-decoded image need no load and
        // bypass the gate; the caller owns that memory either way.
        if package.image.is_some() {
            package.flags.mark_preview_loaded();
            return package;
        }

        self.gate.acquire();

        let path = &package.info.file_path;
        match imageio::load_preview(path, self.max_edge) {
            Ok(image) => {
                package.original_size =
                    imageio::probe_size(path).or(Some((image.width(), image.height())));
                package.image = Some(image);
            }
            Err(e) => {
                // The package still travels the full pipeline so the item
                // gets its scan marker and completion accounting.
                tracing::warn!(path = %path.display(), error = %e, "preview load failed");
            }
        }
        package.flags.mark_preview_loaded();
        package
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::ItemInfo;
    use image::{DynamicImage, RgbImage};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn write_png(dir: &tempfile::TempDir, name: &str, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.path().join(name);
        DynamicImage::ImageRgb8(RgbImage::new(w, h))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_loads_and_records_original_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "big.png", 400, 200);

        let gate = Arc::new(FlowGate::new(4));
        let mut loader = PreviewLoader::new(100, gate.clone());
        let package = loader.process(Box::new(WorkPackage::new(ItemInfo::new(1, path))));

        let image = package.image.as_ref().unwrap();
        assert!(image.width() <= 100 && image.height() <= 100);
        assert_eq!(package.original_size, Some((400, 200)));
        assert!(package.flags.preview_loaded());
        assert_eq!(gate.sent_out(), 1);
    }

    #[test]
    fn test_unreadable_file_passes_through_without_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jpg");

        let mut loader = PreviewLoader::new(100, Arc::new(FlowGate::new(4)));
        let package = loader.process(Box::new(WorkPackage::new(ItemInfo::new(2, path))));

        assert!(package.image.is_none());
        assert!(package.flags.preview_loaded());
    }

    #[test]
    fn test_preattached_image_skips_the_gate() {
        let gate = Arc::new(FlowGate::new(1));
        gate.acquire();

        let gate2 = gate.clone();
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        let t = std::thread::spawn(move || {
            let mut loader = PreviewLoader::new(100, gate2);
            let mut package = Box::new(WorkPackage::new(ItemInfo::new(3, "/x.jpg")));
            package.image = Some(DynamicImage::ImageRgb8(RgbImage::new(8, 8)));
            let package = loader.process(package);
            assert!(package.image.is_some());
            done2.store(true, Ordering::SeqCst);
        });
        t.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
    }
}
