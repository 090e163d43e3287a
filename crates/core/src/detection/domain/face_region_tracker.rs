use std::sync::{Arc, PoisonError, RwLock};

use crate::shared::face_region::FaceRegion;

use super::metadata_face::{MetadataFace, OutputRectTransform};

/// Holds the latest padded face regions in frame-pixel space.
///
/// Each detection event replaces the whole list. Readers get a cheap
/// `Arc` snapshot and never observe a partially written list.
pub struct FaceRegionTracker {
    current: RwLock<Arc<[FaceRegion]>>,
}

impl FaceRegionTracker {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Converts and pads every face, then swaps in the new list.
    ///
    /// Faces the transform cannot map are skipped. Returns the number of
    /// regions now tracked.
    pub fn update<T>(&self, faces: &[MetadataFace], transform: &T) -> usize
    where
        T: OutputRectTransform + ?Sized,
    {
        let regions: Vec<FaceRegion> = faces
            .iter()
            .filter_map(|face| transform.to_output_rect(face))
            .map(|region| region.padded())
            .collect();
        let count = regions.len();
        if count < faces.len() {
            log::debug!("Skipped {} unmappable face(s)", faces.len() - count);
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = regions.into();
        count
    }

    pub fn current(&self) -> Arc<[FaceRegion]> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::from(Vec::new());
    }
}

impl Default for FaceRegionTracker {
    fn default() -> Self {
        Self::new()
    }
}
