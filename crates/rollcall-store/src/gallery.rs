//! Filesystem photo storage.
//!
//! Two trees under the data directory:
//! - `employee_photos/<code>/<code>.jpg` — the single reference image per
//!   employee. Enroll always overwrites; old images are deleted first.
//! - `attendance_photos/<code>/<code>_<event>_<timestamp>.jpg` — append-only
//!   snapshots taken at check-in and check-out.
//!
//! This layer accepts any decodable image; face-quality screening happens
//! in the service before a photo reaches it.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

/// Reference photos are downscaled to at most this width.
const REFERENCE_MAX_WIDTH: u32 = 800;
/// Attendance event snapshots are smaller.
const EVENT_MAX_WIDTH: u32 = 400;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image write failed: {0}")]
    Encode(String),
}

/// Attendance event kind, used in event photo filenames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckIn,
    CheckOut,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::CheckIn => "checkin",
            EventKind::CheckOut => "checkout",
        }
    }
}

/// Photo storage rooted at a data directory.
pub struct GalleryStore {
    photos_dir: PathBuf,
    events_dir: PathBuf,
}

impl GalleryStore {
    pub fn new(data_dir: &Path) -> Result<Self, GalleryError> {
        let photos_dir = data_dir.join("employee_photos");
        let events_dir = data_dir.join("attendance_photos");
        fs::create_dir_all(&photos_dir)?;
        fs::create_dir_all(&events_dir)?;
        Ok(Self {
            photos_dir,
            events_dir,
        })
    }

    /// Store the reference photo for an employee, replacing any prior one.
    ///
    /// After a successful enroll exactly one reference image exists for the
    /// code. Returns the path relative to the photo root.
    pub fn enroll(&self, code: &str, photo: &[u8]) -> Result<String, GalleryError> {
        let img = decode(photo)?;
        let img = downscale(img, REFERENCE_MAX_WIDTH);

        let dir = self.photos_dir.join(code);
        fs::create_dir_all(&dir)?;

        // Delete old reference images so the new one never accumulates
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "jpg") {
                fs::remove_file(&path)?;
            }
        }

        let filename = format!("{code}.jpg");
        let path = dir.join(&filename);
        save_jpeg(&img, &path)?;

        tracing::info!(code, path = %path.display(), "reference photo enrolled");
        Ok(format!("{code}/{filename}"))
    }

    /// Absolute path of an employee's reference photo, if enrolled.
    pub fn reference_path(&self, code: &str) -> Option<PathBuf> {
        let path = self.photos_dir.join(code).join(format!("{code}.jpg"));
        path.exists().then_some(path)
    }

    /// Codes of all employees with a reference photo on disk.
    pub fn list_identities(&self) -> Result<Vec<String>, GalleryError> {
        let mut codes = Vec::new();
        for entry in fs::read_dir(&self.photos_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let code = entry.file_name().to_string_lossy().into_owned();
            if self.reference_path(&code).is_some() {
                codes.push(code);
            }
        }
        codes.sort();
        Ok(codes)
    }

    /// True iff no employee has ever enrolled a reference photo.
    pub fn is_empty(&self) -> Result<bool, GalleryError> {
        Ok(self.list_identities()?.is_empty())
    }

    /// Append an attendance event snapshot. Returns the relative path.
    pub fn save_event_photo(
        &self,
        code: &str,
        event: EventKind,
        timestamp: NaiveDateTime,
        photo: &[u8],
    ) -> Result<String, GalleryError> {
        let img = decode(photo)?;
        let img = downscale(img, EVENT_MAX_WIDTH);

        let dir = self.events_dir.join(code);
        fs::create_dir_all(&dir)?;

        let filename = format!(
            "{code}_{}_{}.jpg",
            event.as_str(),
            timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(&filename);
        save_jpeg(&img, &path)?;

        Ok(format!("{code}/{filename}"))
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, GalleryError> {
    image::load_from_memory(bytes).map_err(|e| GalleryError::Decode(e.to_string()))
}

fn downscale(img: DynamicImage, max_width: u32) -> DynamicImage {
    if img.width() <= max_width {
        return img;
    }
    let height = (img.height() as u64 * max_width as u64 / img.width() as u64).max(1) as u32;
    img.resize_exact(max_width, height, FilterType::Triangle)
}

fn save_jpeg(img: &DynamicImage, path: &Path) -> Result<(), GalleryError> {
    // JPEG has no alpha; force RGB before encoding
    img.to_rgb8()
        .save_with_format(path, image::ImageFormat::Jpeg)
        .map_err(|e| GalleryError::Encode(e.to_string()))
}
