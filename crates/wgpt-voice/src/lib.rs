//! Speech capture for the WGPT chat client.
//!
//! Wraps a platform speech recognizer behind a small state machine:
//! Idle -> Listening -> Idle. Only one session runs at a time.

pub mod error;
pub mod recognizer;
pub mod service;
pub mod state;

pub use error::CaptureError;
pub use recognizer::{MockRecognizer, RecognitionRequest, SpeechRecognizer, UnavailableRecognizer};
pub use service::CaptureService;
pub use state::CaptureState;
