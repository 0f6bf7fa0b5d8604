//! Desktop audio plumbing for the coach: microphone capture, recording,
//! chunked recognition and spoken narration.

pub mod audio;
pub mod capture;
pub mod device;
pub mod error;
pub mod narrator;
pub mod recognizer;
pub mod recorder;

pub use capture::{AudioFrame, CaptureTap, CpalMicrophone};
pub use narrator::{ConsoleNarrator, EspeakNarrator};
pub use recognizer::ChunkedRecognizer;
pub use recorder::BufferedRecorder;
