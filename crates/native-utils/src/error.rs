#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No default input device available")]
    NoDefaultDevice,
    #[error("No input device named {0:?}")]
    DeviceNotFound(String),
    #[error("Unsupported input sample format: {0}")]
    UnsupportedFormat(String),
    #[error("Capture thread exited before the stream started")]
    ThreadGone,
}

#[derive(Debug, thiserror::Error)]
pub enum NarratorError {
    #[error("Speech engine {0:?} is not installed")]
    NotInstalled(String),
    #[error("Narration needs a running tokio runtime")]
    NoRuntime,
}
