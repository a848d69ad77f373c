//! Upload metrics.
//!
//! Recorded through the `metrics` facade. Nothing is exported unless the
//! embedding application installs a recorder.

use metrics::{counter, histogram};

use crate::session::UploadResult;

/// Metric names.
pub mod names {
    pub const UPLOADS_TOTAL: &str = "marquee_uploads_total";
    pub const FRAMES_WRITTEN_TOTAL: &str = "marquee_frames_written_total";
    pub const WRITE_RETRIES_TOTAL: &str = "marquee_write_retries_total";
    pub const BYTES_WRITTEN_TOTAL: &str = "marquee_bytes_written_total";
    pub const UPLOAD_SECONDS: &str = "marquee_upload_seconds";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(names::UPLOADS_TOTAL, "Total number of finished uploads");
    metrics::describe_counter!(
        names::FRAMES_WRITTEN_TOTAL,
        "Total number of acknowledged data frames"
    );
    metrics::describe_counter!(names::WRITE_RETRIES_TOTAL, "Total number of frame retries");
    metrics::describe_counter!(
        names::BYTES_WRITTEN_TOTAL,
        "Total bytes of acknowledged data frames"
    );
    metrics::describe_histogram!(names::UPLOAD_SECONDS, "Upload duration in seconds");
}

/// Record an acknowledged data frame.
pub fn record_frame(bytes: usize) {
    counter!(names::FRAMES_WRITTEN_TOTAL).increment(1);
    counter!(names::BYTES_WRITTEN_TOTAL).increment(bytes as u64);
}

/// Record a frame retry.
pub fn record_retry() {
    counter!(names::WRITE_RETRIES_TOTAL).increment(1);
}

/// Record a finished upload.
pub fn record_upload(result: &UploadResult) {
    let outcome = match result.cause() {
        None => "succeeded",
        Some(cause) => cause.label(),
    };
    counter!(names::UPLOADS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::UPLOAD_SECONDS).record(result.stats().elapsed.as_secs_f64());
}
