//! Real-time face-tracking effect pipeline: face regions from a capture
//! source drive a per-frame effect, rendered on the GPU (or CPU) and
//! optionally recorded to an MPEG-4 file.

pub mod shared {
    pub mod constants;
    pub mod event_bus;
    pub mod face_region;
    pub mod frame;
    pub mod sample_buffer;
    pub mod session_state;
    pub mod settings;
}

pub mod detection {
    pub mod domain {
        pub mod face_region_tracker;
        pub mod metadata_face;
    }
}

pub mod effects {
    pub mod domain {
        pub mod effect_variant;
        pub mod render_command;
    }
}

pub mod rendering {
    pub mod domain {
        pub mod image_renderer;
    }
    pub mod infrastructure;
}

pub mod recording {
    pub mod domain {
        pub mod muxing_writer;
        pub mod recording_controller;
        pub mod recording_error;
        pub mod recording_session;
    }
    pub mod infrastructure;
}

pub mod capture {
    pub mod domain {
        pub mod capture_source;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod capture_pipeline;
    pub mod control_queue;
    pub mod pipeline_logger;
}
