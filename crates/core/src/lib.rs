pub mod shared {
    pub mod cancellation;
    pub mod constants;
    pub mod frame;
    pub mod geometry;
    pub mod video_dimensions;
}

pub mod video {
    pub mod domain {
        pub mod decoder_command;
        pub mod dimension_probe;
    }
    pub mod infrastructure {
        pub mod ffmpeg_decoder;
        pub mod ffprobe_probe;
        pub mod frame_stream;
    }
}

pub mod devices {
    pub mod domain {
        pub mod device;
        pub mod device_pool;
    }
    pub mod infrastructure {
        pub mod device_discovery;
    }
}

pub mod classification {
    pub mod domain {
        pub mod frame_classifier;
        pub mod frame_preprocessor;
        pub mod probability_matrix;
    }
    pub mod infrastructure;
}

pub mod report {
    pub mod domain {
        pub mod probability_transform;
        pub mod report_writer;
        pub mod timestamp_decoder;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod concurrency_budget;
    pub mod error;
    pub mod job_scheduler;
    pub mod job_settings;
    pub mod pipeline_logger;
    pub mod video_discovery;
    pub mod video_job;
}
