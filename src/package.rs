//! Value types flowing through the face pipeline: items, regions, face records,
//! role flags and the work package itself.

use std::path::PathBuf;

use image::DynamicImage;

use crate::engine::RecognitionResult;

/// Reference to one managed photo, supplied by the surrounding collection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: i64,
    pub file_path: PathBuf,
}

impl ItemInfo {
    pub fn new(id: i64, file_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            file_path: file_path.into(),
        }
    }

    /// An item without a resolvable file path cannot be processed.
    pub fn has_file_path(&self) -> bool {
        !self.file_path.as_os_str().is_empty()
    }
}

/// Rectangle in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    fn intersection_area(&self, other: &Region) -> i64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        (x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64
    }

    /// Intersection over union, used for benchmarking detection quality.
    pub fn iou(&self, other: &Region) -> f64 {
        let intersection = self.intersection_area(other) as f64;
        let union = (self.area() + other.area()) as f64 - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// True when the two regions overlap by at least `fraction` of the smaller
    /// region's area. `fraction <= 0` degenerates to a plain intersection test,
    /// `fraction >= 1` requires one region to contain the other.
    pub fn intersects(&self, other: &Region, fraction: f64) -> bool {
        let intersection = self.intersection_area(other);
        if fraction <= 0.0 {
            return intersection > 0;
        }
        let smaller = self.area().min(other.area());
        if smaller <= 0 {
            return false;
        }
        intersection as f64 / smaller as f64 >= fraction
    }

    /// Region with a 10% margin on each side, derived from the larger edge.
    /// Thumbnails are stored for both the exact and the display rectangle, so
    /// this value must stay stable across releases.
    pub fn display_rect(&self) -> Region {
        let margin = self.width.max(self.height) / 10;
        Region {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + 2 * margin,
            height: self.height + 2 * margin,
        }
    }

    /// Scale by independent horizontal/vertical factors, e.g. to map between
    /// original-image and preview coordinates.
    pub fn scaled(&self, sx: f64, sy: f64) -> Region {
        Region {
            x: (self.x as f64 * sx).round() as i32,
            y: (self.y as f64 * sy).round() as i32,
            width: (self.width as f64 * sx).round() as i32,
            height: (self.height as f64 * sy).round() as i32,
        }
    }

    /// Clamp to the bounds of a `width` x `height` image.
    pub fn clamped(&self, width: u32, height: u32) -> Region {
        let x = self.x.clamp(0, width as i32);
        let y = self.y.clamp(0, height as i32);
        Region {
            x,
            y,
            width: self.width.min(width as i32 - x),
            height: self.height.min(height as i32 - y),
        }
    }
}

/// Persisted confirmation state of a face record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceKind {
    /// Detected, nobody recognized.
    UnknownName,
    /// Detected with a suggested identity, not yet confirmed by the user.
    UnconfirmedName,
    /// Confirmed by the user.
    ConfirmedName,
    /// Confirmed and queued as a training sample.
    FaceForTraining,
}

impl FaceKind {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, FaceKind::ConfirmedName | FaceKind::FaceForTraining)
    }

    pub fn is_unconfirmed(&self) -> bool {
        matches!(self, FaceKind::UnknownName | FaceKind::UnconfirmedName)
    }

    pub fn to_db(&self) -> i64 {
        match self {
            FaceKind::UnknownName => 0,
            FaceKind::UnconfirmedName => 1,
            FaceKind::ConfirmedName => 2,
            FaceKind::FaceForTraining => 3,
        }
    }

    pub fn from_db(value: i64) -> FaceKind {
        match value {
            1 => FaceKind::UnconfirmedName,
            2 => FaceKind::ConfirmedName,
            3 => FaceKind::FaceForTraining,
            _ => FaceKind::UnknownName,
        }
    }
}

/// Database-facing face entry. A record is identified by its
/// (item, tag, region) triple; the storage layer keys rows internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceRecord {
    pub item_id: i64,
    pub tag_id: i64,
    pub region: Region,
    pub kind: FaceKind,
}

impl FaceRecord {
    pub fn new(item_id: i64, tag_id: i64, region: Region, kind: FaceKind) -> Self {
        Self {
            item_id,
            tag_id,
            region,
            kind,
        }
    }

    pub fn is_null(&self) -> bool {
        self.tag_id <= 0 || !self.region.is_valid()
    }
}

/// Package-local role flags on a face record, indicating why the record is in
/// the package and which workers should act on it. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaceRoles(u32);

impl FaceRoles {
    pub const NONE: FaceRoles = FaceRoles(0);
    pub const READ_FROM_DATABASE: FaceRoles = FaceRoles(1 << 0);
    pub const FOR_RECOGNITION: FaceRoles = FaceRoles(1 << 1);
    pub const FOR_CONFIRMATION: FaceRoles = FaceRoles(1 << 2);
    pub const FOR_EDITING: FaceRoles = FaceRoles(1 << 3);
    pub const FOR_TRAINING: FaceRoles = FaceRoles(1 << 4);
    pub const CONFIRMED: FaceRoles = FaceRoles(1 << 5);
    pub const EDITED: FaceRoles = FaceRoles(1 << 6);
    pub const TRAINED: FaceRoles = FaceRoles(1 << 7);
    pub const DETECTED_FROM_IMAGE: FaceRoles = FaceRoles(1 << 8);

    pub fn contains(&self, role: FaceRoles) -> bool {
        self.0 & role.0 == role.0 && role.0 != 0
    }

    pub fn insert(&mut self, role: FaceRoles) {
        self.0 |= role.0;
    }

    pub fn remove(&mut self, role: FaceRoles) {
        self.0 &= !role.0;
    }

    /// Transition a record from one role to the next, e.g. FOR_TRAINING to
    /// TRAINED once the trainer has consumed it.
    pub fn replace(&mut self, old: FaceRoles, new: FaceRoles) {
        self.remove(old);
        self.insert(new);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for FaceRoles {
    type Output = FaceRoles;

    fn bitor(self, rhs: FaceRoles) -> FaceRoles {
        FaceRoles(self.0 | rhs.0)
    }
}

/// A face record as it travels inside a package, carrying any pending edit.
/// `record: None` means a brand-new manual face that does not exist in the
/// database yet.
#[derive(Debug, Clone, Default)]
pub struct PackageFace {
    pub record: Option<FaceRecord>,
    pub assigned_tag_id: Option<i64>,
    pub assigned_region: Option<Region>,
    pub roles: FaceRoles,
}

impl PackageFace {
    pub fn from_record(record: FaceRecord) -> Self {
        Self {
            record: Some(record),
            ..Default::default()
        }
    }

    /// Region an edit or training operation should use: the assigned region
    /// when one is pending, else the stored one.
    pub fn effective_region(&self) -> Option<Region> {
        self.assigned_region
            .filter(|r| r.is_valid())
            .or_else(|| self.record.as_ref().map(|r| r.region))
    }
}

/// Bulk role operations on the face list of a package.
pub trait FaceListOps {
    fn add_role(&mut self, role: FaceRoles);
    fn clear_role(&mut self, role: FaceRoles);
    fn replace_role(&mut self, old: FaceRoles, new: FaceRoles);
}

impl FaceListOps for [PackageFace] {
    fn add_role(&mut self, role: FaceRoles) {
        for face in self.iter_mut() {
            face.roles.insert(role);
        }
    }

    fn clear_role(&mut self, role: FaceRoles) {
        for face in self.iter_mut() {
            face.roles.remove(role);
        }
    }

    fn replace_role(&mut self, old: FaceRoles, new: FaceRoles) {
        for face in self.iter_mut() {
            if face.roles.contains(old) {
                face.roles.replace(old, new);
            }
        }
    }
}

/// Completed-stage flags on a package. Monotonic: stages only ever set their
/// flag, nothing clears one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageFlags(u32);

impl StageFlags {
    const PREVIEW_LOADED: u32 = 1 << 0;
    const PROCESSED_BY_DETECTOR: u32 = 1 << 1;
    const PROCESSED_BY_RECOGNIZER: u32 = 1 << 2;
    const WRITTEN_TO_DATABASE: u32 = 1 << 3;

    pub fn mark_preview_loaded(&mut self) {
        self.0 |= Self::PREVIEW_LOADED;
    }

    pub fn mark_detected(&mut self) {
        self.0 |= Self::PROCESSED_BY_DETECTOR;
    }

    pub fn mark_recognized(&mut self) {
        self.0 |= Self::PROCESSED_BY_RECOGNIZER;
    }

    pub fn mark_written(&mut self) {
        self.0 |= Self::WRITTEN_TO_DATABASE;
    }

    pub fn preview_loaded(&self) -> bool {
        self.0 & Self::PREVIEW_LOADED != 0
    }

    pub fn detected(&self) -> bool {
        self.0 & Self::PROCESSED_BY_DETECTOR != 0
    }

    pub fn recognized(&self) -> bool {
        self.0 & Self::PROCESSED_BY_RECOGNIZER != 0
    }

    pub fn written(&self) -> bool {
        self.0 & Self::WRITTEN_TO_DATABASE != 0
    }
}

/// The unit of work for one item flowing through the pipeline. Owned by
/// exactly one stage at a time and moved on by value once that stage is done.
#[derive(Debug)]
pub struct WorkPackage {
    pub info: ItemInfo,
    /// Decoded preview, filled in by the preview loader when absent.
    pub image: Option<DynamicImage>,
    /// Pixel size of the original file when `image` is a downscaled preview.
    /// None means `image` is original-sized. Regions on the package are
    /// always expressed in original coordinates.
    pub original_size: Option<(u32, u32)>,
    /// Candidate regions produced by the detector.
    pub detected_regions: Vec<Region>,
    /// One result per detected region, or per face marked FOR_RECOGNITION.
    pub recognition_results: Vec<RecognitionResult>,
    /// Face records read from or destined for the database.
    pub faces: Vec<PackageFace>,
    pub flags: StageFlags,
}

impl WorkPackage {
    pub fn new(info: ItemInfo) -> Self {
        Self {
            info,
            image: None,
            original_size: None,
            detected_regions: Vec::new(),
            recognition_results: Vec::new(),
            faces: Vec::new(),
            flags: StageFlags::default(),
        }
    }

    pub fn with_faces(info: ItemInfo, records: Vec<FaceRecord>, roles: FaceRoles) -> Self {
        let mut package = Self::new(info);
        package.faces = records
            .into_iter()
            .map(|record| {
                let mut face = PackageFace::from_record(record);
                face.roles = roles;
                face
            })
            .collect();
        package
    }

    pub fn with_face(info: ItemInfo, face: PackageFace) -> Self {
        let mut package = Self::new(info);
        package.faces.push(face);
        package
    }

    pub fn item_id(&self) -> i64 {
        self.info.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_iou() {
        let a = Region::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);

        let b = Region::new(20, 20, 10, 10);
        assert!(a.iou(&b).abs() < 1e-9);

        // Half overlap: intersection 50, union 150.
        let c = Region::new(5, 0, 10, 10);
        assert!((a.iou(&c) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_region_intersects_fraction() {
        let big = Region::new(0, 0, 100, 100);
        let small = Region::new(10, 10, 20, 20);
        // small is fully inside big
        assert!(big.intersects(&small, 1.0));
        assert!(small.intersects(&big, 1.0));

        let edge = Region::new(90, 90, 20, 20);
        assert!(big.intersects(&edge, 0.0));
        assert!(!big.intersects(&edge, 0.5));
    }

    #[test]
    fn test_display_rect_margin() {
        let r = Region::new(100, 100, 50, 30);
        let d = r.display_rect();
        assert_eq!(d, Region::new(95, 95, 60, 40));
    }

    #[test]
    fn test_roles_replace() {
        let mut roles = FaceRoles::READ_FROM_DATABASE | FaceRoles::FOR_TRAINING;
        roles.replace(FaceRoles::FOR_TRAINING, FaceRoles::TRAINED);
        assert!(roles.contains(FaceRoles::TRAINED));
        assert!(roles.contains(FaceRoles::READ_FROM_DATABASE));
        assert!(!roles.contains(FaceRoles::FOR_TRAINING));
    }

    #[test]
    fn test_face_list_replace_role() {
        let record = FaceRecord::new(1, 5, Region::new(0, 0, 10, 10), FaceKind::FaceForTraining);
        let mut faces = vec![
            {
                let mut f = PackageFace::from_record(record.clone());
                f.roles.insert(FaceRoles::FOR_TRAINING);
                f
            },
            PackageFace::from_record(record),
        ];
        faces.replace_role(FaceRoles::FOR_TRAINING, FaceRoles::TRAINED);
        assert!(faces[0].roles.contains(FaceRoles::TRAINED));
        // the second face never had the role, it must stay untouched
        assert!(faces[1].roles.is_empty());
    }

    #[test]
    fn test_stage_flags_monotonic() {
        let mut flags = StageFlags::default();
        flags.mark_detected();
        flags.mark_written();
        assert!(flags.detected());
        assert!(flags.written());
        assert!(!flags.preview_loaded());
    }

    #[test]
    fn test_face_record_null() {
        let null = FaceRecord::new(1, 0, Region::default(), FaceKind::UnknownName);
        assert!(null.is_null());
        let ok = FaceRecord::new(1, 7, Region::new(0, 0, 4, 4), FaceKind::UnconfirmedName);
        assert!(!ok.is_null());
    }
}
