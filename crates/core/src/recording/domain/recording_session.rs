use std::path::{Path, PathBuf};

use uuid::Uuid;

/// One recording attempt, identified from start to finalize.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingSession {
    pub id: Uuid,
    pub destination: PathBuf,
    pub has_audio: bool,
}

impl RecordingSession {
    /// Allocates a new id and places the file at `<directory>/<id>.<extension>`.
    pub fn allocate(directory: &Path, extension: &str, has_audio: bool) -> Self {
        let id = Uuid::new_v4();
        let destination = directory.join(format!("{id}.{extension}"));
        Self {
            id,
            destination,
            has_audio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_named_after_id() {
        let session = RecordingSession::allocate(Path::new("/tmp/rec"), "mp4", true);
        assert_eq!(
            session.destination,
            PathBuf::from(format!("/tmp/rec/{}.mp4", session.id))
        );
        assert!(session.has_audio);
    }

    #[test]
    fn test_each_session_gets_fresh_id() {
        let a = RecordingSession::allocate(Path::new("/tmp"), "mp4", false);
        let b = RecordingSession::allocate(Path::new("/tmp"), "mp4", false);
        assert_ne!(a.id, b.id);
        assert_ne!(a.destination, b.destination);
    }
}
