use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::domain::capture_source::CaptureError;
use crate::detection::domain::metadata_face::MetadataFace;

/// A face box in normalized metadata coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFace {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<ScriptedFace> for MetadataFace {
    fn from(face: ScriptedFace) -> Self {
        MetadataFace::new(face.x, face.y, face.width, face.height)
    }
}

/// The faces detected at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub time_ms: u64,
    #[serde(default)]
    pub faces: Vec<ScriptedFace>,
}

/// Prerecorded face-detection events for a replayed file.
///
/// ```json
/// { "events": [ { "time_ms": 0, "faces": [ { "x": 0.4, "y": 0.3, "width": 0.2, "height": 0.25 } ] } ] }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionScript {
    pub events: Vec<DetectionEvent>,
}

impl DetectionScript {
    pub fn new(mut events: Vec<DetectionEvent>) -> Self {
        events.sort_by_key(|e| e.time_ms);
        Self { events }
    }

    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::Open(format!("{}: {e}", path.display())))?;
        Self::parse(&contents)
            .map_err(|e| CaptureError::Open(format!("{}: {e}", path.display())))
    }

    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let script: DetectionScript = serde_json::from_str(json)?;
        Ok(Self::new(script.events))
    }

    pub fn cursor(&self) -> DetectionCursor<'_> {
        DetectionCursor {
            events: &self.events,
            next: 0,
        }
    }
}

/// Walks a script forward in time.
pub struct DetectionCursor<'a> {
    events: &'a [DetectionEvent],
    next: usize,
}

impl<'a> DetectionCursor<'a> {
    /// Returns every event due at or before `pts` not yet returned.
    pub fn advance(&mut self, pts: Duration) -> &'a [DetectionEvent] {
        let start = self.next;
        let now = pts.as_millis();
        while self
            .events
            .get(self.next)
            .is_some_and(|e| u128::from(e.time_ms) <= now)
        {
            self.next += 1;
        }
        &self.events[start..self.next]
    }
}
