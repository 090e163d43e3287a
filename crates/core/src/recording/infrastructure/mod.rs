pub mod ffmpeg_muxing_writer;
