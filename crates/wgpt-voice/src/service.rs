//! Single-utterance speech capture.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wgpt_core::config::VoiceConfig;

use crate::error::CaptureError;
use crate::recognizer::{RecognitionRequest, SpeechRecognizer};
use crate::state::{CaptureState, StateMachine};

/// Bookkeeping for the in-flight session.
#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    cancel: Arc<Notify>,
}

/// Turns one spoken utterance into text.
///
/// At most one session runs at a time. A second `listen` while one is active
/// fails with `AlreadyActive` and leaves the running session untouched.
pub struct CaptureService {
    recognizer: Arc<dyn SpeechRecognizer>,
    request: RecognitionRequest,
    enabled: bool,
    state: StateMachine,
    session: Mutex<Option<ActiveSession>>,
}

impl std::fmt::Debug for CaptureService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureService")
            .field("request", &self.request)
            .field("enabled", &self.enabled)
            .field("state", &self.state.current())
            .finish()
    }
}

impl CaptureService {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, config: &VoiceConfig) -> Self {
        Self {
            recognizer,
            request: RecognitionRequest::single_utterance(config.locale.clone()),
            enabled: config.enabled,
            state: StateMachine::new(),
            session: Mutex::new(None),
        }
    }

    /// Whether capture can be offered at all.
    pub fn is_supported(&self) -> bool {
        self.enabled && self.recognizer.probe()
    }

    pub fn is_listening(&self) -> bool {
        self.state.current() == CaptureState::Listening
    }

    /// Capture one utterance and return its final transcript.
    ///
    /// Returns to idle on every exit path: result, error or cancellation.
    pub async fn listen(&self) -> Result<String, CaptureError> {
        if !self.is_supported() {
            return Err(CaptureError::Unsupported);
        }

        let (id, cancel) = {
            let mut slot = self.session.lock().unwrap_or_else(|e| e.into_inner());
            self.state.begin()?;
            let session = ActiveSession {
                id: Uuid::new_v4(),
                started_at: Utc::now(),
                cancel: Arc::new(Notify::new()),
            };
            let handle = (session.id, session.cancel.clone());
            *slot = Some(session);
            handle
        };
        info!(session_id = %id, locale = %self.request.locale, "Speech capture started");

        let result = tokio::select! {
            outcome = self.recognizer.recognize(&self.request) => outcome,
            _ = cancel.notified() => Err(CaptureError::Cancelled),
        };

        self.release(id);

        match &result {
            Ok(text) => info!(session_id = %id, text_len = text.len(), "Speech captured"),
            Err(CaptureError::Cancelled) => debug!(session_id = %id, "Speech capture cancelled"),
            Err(e) => warn!(session_id = %id, error = %e, "Speech capture failed"),
        }
        result
    }

    /// Stop the active session, if any. Its `listen` resolves with
    /// `Cancelled`. Returns whether a session was stopped.
    pub fn cancel(&self) -> bool {
        let taken = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match taken {
            Some(session) => {
                session.cancel.notify_one();
                self.state.finish();
                let elapsed = Utc::now() - session.started_at;
                info!(
                    session_id = %session.id,
                    elapsed_ms = elapsed.num_milliseconds(),
                    "Speech capture stopped"
                );
                true
            }
            None => false,
        }
    }

    /// Clear the session slot if it still belongs to `id`.
    fn release(&self, id: Uuid) {
        let mut slot = self.session.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|s| s.id == id) {
            *slot = None;
            self.state.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{MockRecognizer, UnavailableRecognizer};

    fn service(recognizer: MockRecognizer) -> (Arc<CaptureService>, Arc<MockRecognizer>) {
        let recognizer = Arc::new(recognizer);
        let svc = CaptureService::new(recognizer.clone(), &VoiceConfig::default());
        (Arc::new(svc), recognizer)
    }

    async fn wait_until_listening(svc: &CaptureService) {
        for _ in 0..1000 {
            if svc.is_listening() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("capture never started");
    }

    #[tokio::test]
    async fn test_listen_returns_transcript() {
        let (svc, rec) = service(MockRecognizer::hearing("what oil for a 2015 civic"));
        assert!(svc.is_supported());
        let text = svc.listen().await.unwrap();
        assert_eq!(text, "what oil for a 2015 civic");
        assert!(!svc.is_listening());
        assert_eq!(rec.calls(), 1);
        assert_eq!(
            rec.last_request(),
            Some(RecognitionRequest::single_utterance("en-US"))
        );
    }

    #[tokio::test]
    async fn test_unsupported_host() {
        let svc = CaptureService::new(Arc::new(UnavailableRecognizer), &VoiceConfig::default());
        assert!(!svc.is_supported());
        assert_eq!(svc.listen().await, Err(CaptureError::Unsupported));
        assert!(!svc.is_listening());
    }

    #[tokio::test]
    async fn test_failed_probe_never_starts_recognition() {
        let rec = Arc::new(MockRecognizer::unsupported());
        let svc = CaptureService::new(rec.clone(), &VoiceConfig::default());
        assert!(!svc.is_supported());
        assert_eq!(svc.listen().await, Err(CaptureError::Unsupported));
        assert_eq!(rec.calls(), 0);
        assert!(!svc.is_listening());
    }

    #[tokio::test]
    async fn test_disabled_in_config() {
        let config = VoiceConfig {
            enabled: false,
            ..VoiceConfig::default()
        };
        let rec = Arc::new(MockRecognizer::hearing("hi"));
        let svc = CaptureService::new(rec.clone(), &config);
        assert!(!svc.is_supported());
        assert_eq!(svc.listen().await, Err(CaptureError::Unsupported));
        assert_eq!(rec.calls(), 0);
    }

    #[tokio::test]
    async fn test_recognizer_error_returns_to_idle() {
        let (svc, _) = service(MockRecognizer::failing(CaptureError::Failed(
            "network".into(),
        )));
        assert_eq!(
            svc.listen().await,
            Err(CaptureError::Failed("network".into()))
        );
        assert!(!svc.is_listening());
        // A fresh session can start afterwards.
        assert!(svc.listen().await.is_err());
    }

    #[tokio::test]
    async fn test_second_listen_is_already_active() {
        let gate = Arc::new(Notify::new());
        let (svc, rec) = service(MockRecognizer::hearing("brake noise").with_gate(gate.clone()));

        let first = tokio::spawn({
            let svc = svc.clone();
            async move { svc.listen().await }
        });
        wait_until_listening(&svc).await;

        assert_eq!(svc.listen().await, Err(CaptureError::AlreadyActive));
        assert!(svc.is_listening());

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), "brake noise");
        assert!(!svc.is_listening());
        assert_eq!(rec.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_session() {
        let gate = Arc::new(Notify::new());
        let (svc, _) = service(MockRecognizer::hearing("never heard").with_gate(gate));

        let pending = tokio::spawn({
            let svc = svc.clone();
            async move { svc.listen().await }
        });
        wait_until_listening(&svc).await;

        assert!(svc.cancel());
        assert!(!svc.is_listening());
        assert_eq!(pending.await.unwrap(), Err(CaptureError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let (svc, _) = service(MockRecognizer::hearing("x"));
        assert!(!svc.cancel());
        assert!(!svc.is_listening());
    }
}
