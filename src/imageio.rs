//! Preview decoding and face-region cropping.
//!
//! Previews are decoded at a capped size: detection quality does not improve
//! past roughly 2000px on the long edge, while memory use keeps growing.
//! EXIF orientation is applied so regions are always expressed in upright
//! original-image coordinates.

use anyhow::{anyhow, Result};
use image::DynamicImage;
use std::path::Path;

use crate::package::Region;

/// The EXIF orientation field, when the file carries one. Anything that
/// fails to parse counts as upright.
fn exif_orientation(path: &Path) -> Option<u16> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    match field.value {
        exif::Value::Short(ref v) => v.first().copied(),
        _ => None,
    }
}

/// Rotate a decoded image to upright. Mirrored orientations (2, 4, 5, 7)
/// are rare in camera output and left alone; a mirrored face still detects.
fn upright(img: DynamicImage, path: &Path) -> DynamicImage {
    match exif_orientation(path) {
        Some(6) => img.rotate90(),
        Some(3) => img.rotate180(),
        Some(8) => img.rotate270(),
        _ => img,
    }
}

/// Decode a file into an upright preview, downscaled so the long edge does
/// not exceed `max_edge`.
pub fn load_preview(path: &Path, max_edge: u32) -> Result<DynamicImage> {
    let img = image::open(path)
        .map_err(|e| anyhow!("Failed to decode {}: {}", path.display(), e))?;
    let img = upright(img, path);

    if img.width() > max_edge || img.height() > max_edge {
        // thumbnail() keeps aspect ratio and uses a fast filter
        Ok(img.thumbnail(max_edge, max_edge))
    } else {
        Ok(img)
    }
}

/// Read the pixel dimensions from the file header without decoding, in
/// upright orientation so they compare against preview dimensions.
pub fn probe_size(path: &Path) -> Option<(u32, u32)> {
    let (w, h) = image::image_dimensions(path).ok()?;
    match exif_orientation(path) {
        Some(6) | Some(8) => Some((h, w)),
        _ => Some((w, h)),
    }
}

/// Map a region in original-image coordinates into the coordinate space of a
/// (possibly downscaled) preview.
pub fn map_to_image(
    region: &Region,
    original_size: Option<(u32, u32)>,
    img: &DynamicImage,
) -> Region {
    match original_size {
        Some((ow, oh)) if ow > 0 && oh > 0 && (ow, oh) != (img.width(), img.height()) => region
            .scaled(
                img.width() as f64 / ow as f64,
                img.height() as f64 / oh as f64,
            ),
        _ => *region,
    }
}

/// Crop a face region out of an image, clamped to the image bounds.
pub fn crop_region(img: &DynamicImage, region: &Region) -> Result<DynamicImage> {
    let clamped = region.clamped(img.width(), img.height());
    if !clamped.is_valid() {
        return Err(anyhow!(
            "Region {:?} lies outside a {}x{} image",
            region,
            img.width(),
            img.height()
        ));
    }

    Ok(img.crop_imm(
        clamped.x as u32,
        clamped.y as u32,
        clamped.width as u32,
        clamped.height as u32,
    ))
}

/// Crop a face with its display margin, the variant fed to the recognizer and
/// stored as the display thumbnail.
pub fn crop_face(img: &DynamicImage, region: &Region) -> Result<DynamicImage> {
    crop_region(img, &region.display_rect())
}
