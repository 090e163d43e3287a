pub mod detection_script;
pub mod ffmpeg_audio_reader;
pub mod ffmpeg_frame_reader;
pub mod replay_capture_source;
