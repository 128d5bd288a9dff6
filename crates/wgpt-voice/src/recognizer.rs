//! Speech recognizer abstraction.
//!
//! The host platform supplies the actual recognizer; the capture service only
//! needs a way to probe availability and to run one single-utterance session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::CaptureError;

/// Parameters for one recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionRequest {
    /// BCP 47 locale, e.g. `en-US`.
    pub locale: String,
    /// Keep listening after the first final result.
    pub continuous: bool,
    /// Deliver partial transcripts.
    pub interim_results: bool,
}

impl RecognitionRequest {
    /// Single utterance, final result only.
    pub fn single_utterance(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            continuous: false,
            interim_results: false,
        }
    }
}

/// A platform speech recognizer.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Whether recognition is available on this host.
    fn probe(&self) -> bool;

    /// Run one session and return the final transcript.
    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, CaptureError>;
}

/// Recognizer for hosts without speech support.
#[derive(Debug, Default)]
pub struct UnavailableRecognizer;

#[async_trait]
impl SpeechRecognizer for UnavailableRecognizer {
    fn probe(&self) -> bool {
        false
    }

    async fn recognize(&self, _request: &RecognitionRequest) -> Result<String, CaptureError> {
        Err(CaptureError::Unsupported)
    }
}

// =============================================================================
// Mock
// =============================================================================

/// Scriptable recognizer for tests.
///
/// When a gate is set, `recognize` waits on it before returning the scripted
/// outcome, which lets tests hold a session open.
#[derive(Debug)]
pub struct MockRecognizer {
    supported: bool,
    outcome: Mutex<Result<String, CaptureError>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<RecognitionRequest>>,
}

impl MockRecognizer {
    /// A supported recognizer that hears `transcript`.
    pub fn hearing(transcript: impl Into<String>) -> Self {
        Self {
            supported: true,
            outcome: Mutex::new(Ok(transcript.into())),
            gate: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// A supported recognizer that fails with `error`.
    pub fn failing(error: CaptureError) -> Self {
        Self {
            outcome: Mutex::new(Err(error)),
            ..Self::hearing("")
        }
    }

    /// A recognizer whose probe reports no support.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::hearing("")
        }
    }

    /// Hold each session open until `gate` is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Number of sessions started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Request passed to the most recent session.
    pub fn last_request(&self) -> Option<RecognitionRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SpeechRecognizer for MockRecognizer {
    fn probe(&self) -> bool {
        self.supported
    }

    async fn recognize(&self, request: &RecognitionRequest) -> Result<String, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
