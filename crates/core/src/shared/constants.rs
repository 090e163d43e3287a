/// Side length, in source pixels, of one pixellation cell.
pub const PIXELLATE_CELL_SIZE: f32 = 50.0;

/// Rec. 709 luminance weights used by the desaturation kernel.
pub const LUMINANCE_WEIGHTS: [f32; 3] = [0.2125, 0.7154, 0.0721];

pub const DEFAULT_CONTAINER_EXTENSION: &str = "mp4";

pub const DEFAULT_VIDEO_BIT_RATE: usize = 6_000_000;

pub const DEFAULT_AUDIO_BIT_RATE: usize = 128_000;

/// Capacity of each observer channel; events beyond this are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Samples per chunk delivered by the replay capture source.
pub const AUDIO_CHUNK_FRAMES: usize = 1024;

pub const SETTINGS_DIR_NAME: &str = "FaceTrack";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
