//! Chat orchestrator: turns user intent into store and service calls.
//!
//! Holds the transient UI state (draft, staged attachments, per-conversation
//! send phase, dictation) and sequences the send flow:
//! user message -> store -> completion -> formatter -> store.
//!
//! All methods take `&self`. The store and UI state sit behind std mutexes
//! that are never held across an await, so a send can be in flight while
//! the user keeps typing, dictating or editing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use wgpt_core::types::{Message, Role};
use wgpt_voice::{CaptureError, CaptureService};

use crate::attachment::{
    AttachmentDescriptor, AttachmentService, DisplayHandle, SelectedFile, StagedAttachment,
};
use crate::completion::{ChatTurn, CompletionClient};
use crate::error::ChatError;
use crate::formatter;
use crate::notifier::{Notification, Notifier};
use crate::session::{Redirect, Session};
use crate::store::ConversationStore;

/// Shown when a completion call fails.
pub const SEND_FAILED_MESSAGE: &str =
    "Failed to get AI response. Please check your connection and try again.";

/// Appended to the prompt when the user message carries images. The images
/// themselves are never uploaded.
pub const ATTACHMENT_NOTE: &str = "The user attached the images listed above. You cannot see \
image contents. Answer from the text, and if the images matter, ask the user to describe what \
they show (for example a warning light, a part or damage).";

// =============================================================================
// Send state
// =============================================================================

/// Lifecycle of one send within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendPhase {
    Idle,
    Sending,
    Succeeded,
    Failed,
}

impl SendPhase {
    pub fn can_transition_to(&self, target: &SendPhase) -> bool {
        matches!(
            (self, target),
            (SendPhase::Idle, SendPhase::Sending)
                | (SendPhase::Sending, SendPhase::Succeeded)
                | (SendPhase::Sending, SendPhase::Failed)
                | (SendPhase::Succeeded, SendPhase::Idle)
                | (SendPhase::Failed, SendPhase::Idle)
                // Orphaned by an edit or delete
                | (SendPhase::Sending, SendPhase::Idle)
        )
    }
}

/// Result of `send` and `resend`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing to send, or a send is already in flight.
    Ignored,
    /// There was no active conversation. One was created; the draft is kept
    /// for the caller to send again.
    ConversationCreated { conversation_id: String },
    /// The reply was appended.
    Succeeded { message_id: String },
    /// The completion call failed. No reply was appended.
    Failed,
    /// The reply arrived after the conversation was edited or deleted and
    /// was dropped.
    Discarded,
}

/// Result of `toggle_dictation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictationOutcome {
    /// No speech capability. Nothing changed.
    Unsupported,
    /// The transcript was appended to the draft.
    Transcribed(String),
    /// A running session was stopped by this call.
    Stopped,
    /// This call's session was stopped by another toggle.
    Cancelled,
    Failed(CaptureError),
}

/// Message currently open for editing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTarget {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Default)]
struct UiState {
    draft: String,
    pending: Vec<StagedAttachment>,
    phases: HashMap<String, SendPhase>,
    /// Sequence number of the latest request per conversation.
    latest_seq: HashMap<String, u64>,
    next_seq: u64,
    /// Display handles owned by sent messages, keyed by message id.
    rendered: HashMap<String, Vec<DisplayHandle>>,
    editing: Option<EditTarget>,
}

impl UiState {
    fn phase(&self, conversation_id: &str) -> SendPhase {
        self.phases
            .get(conversation_id)
            .copied()
            .unwrap_or(SendPhase::Idle)
    }

    fn advance(&mut self, conversation_id: &str, target: SendPhase) {
        let current = self.phase(conversation_id);
        if current.can_transition_to(&target) {
            debug!(conversation_id, "Send phase: {:?} -> {:?}", current, target);
            self.phases.insert(conversation_id.to_string(), target);
        } else {
            warn!(conversation_id, "Ignored send phase change {:?} -> {:?}", current, target);
        }
    }

    /// Issue a new sequence number, invalidating any request in flight.
    fn bump_seq(&mut self, conversation_id: &str) -> u64 {
        self.next_seq += 1;
        self.latest_seq
            .insert(conversation_id.to_string(), self.next_seq);
        self.next_seq
    }

    fn is_latest(&self, conversation_id: &str, seq: u64) -> bool {
        self.latest_seq.get(conversation_id) == Some(&seq)
    }

    fn release_messages<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) {
        for message in messages {
            self.rendered.remove(&message.id);
        }
    }

    /// Orphan any request in flight for `conversation_id`.
    fn invalidate(&mut self, conversation_id: &str) {
        self.bump_seq(conversation_id);
        if self.phase(conversation_id) == SendPhase::Sending {
            self.advance(conversation_id, SendPhase::Idle);
        }
    }
}

/// A completion request ready to go out.
struct PreparedSend {
    conversation_id: String,
    seq: u64,
    prompt: String,
    history: Vec<ChatTurn>,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct ChatOrchestrator {
    store: Mutex<ConversationStore>,
    ui: Mutex<UiState>,
    completion: Arc<dyn CompletionClient>,
    attachments: AttachmentService,
    capture: Arc<CaptureService>,
    notifier: Arc<dyn Notifier>,
}

impl ChatOrchestrator {
    pub fn new(
        store: ConversationStore,
        completion: Arc<dyn CompletionClient>,
        attachments: AttachmentService,
        capture: Arc<CaptureService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            ui: Mutex::new(UiState::default()),
            completion,
            attachments,
            capture,
            notifier,
        }
    }

    // Lock order is always ui, then store.
    fn ui(&self) -> MutexGuard<'_, UiState> {
        self.ui.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self) -> MutexGuard<'_, ConversationStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read from the store. Do not call back into the orchestrator from `f`.
    pub fn with_store<R>(&self, f: impl FnOnce(&ConversationStore) -> R) -> R {
        f(&self.store())
    }

    pub fn capture(&self) -> &CaptureService {
        &self.capture
    }

    // =========================================================================
    // Draft
    // =========================================================================

    pub fn set_draft(&self, text: impl Into<String>) {
        self.ui().draft = text.into();
    }

    pub fn draft(&self) -> String {
        self.ui().draft.clone()
    }

    /// Drop the draft and every staged attachment.
    pub fn clear_draft(&self) {
        let mut ui = self.ui();
        ui.draft.clear();
        ui.pending.clear();
    }

    pub async fn add_attachment(
        &self,
        file: &SelectedFile,
    ) -> Result<AttachmentDescriptor, ChatError> {
        match self.attachments.stage(file).await {
            Ok(staged) => {
                let descriptor = staged.descriptor.clone();
                self.ui().pending.push(staged);
                Ok(descriptor)
            }
            Err(e) => {
                self.notifier
                    .notify(Notification::error("Invalid attachment", e.to_string()));
                Err(e)
            }
        }
    }

    /// Unstage an attachment and release its display reference.
    pub fn remove_attachment(&self, id: &str) -> bool {
        let mut ui = self.ui();
        let before = ui.pending.len();
        ui.pending.retain(|s| s.descriptor.id != id);
        before != ui.pending.len()
    }

    pub fn pending_attachments(&self) -> Vec<AttachmentDescriptor> {
        self.ui()
            .pending
            .iter()
            .map(|s| s.descriptor.clone())
            .collect()
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub fn new_conversation(&self) -> String {
        self.store().create_conversation().id.clone()
    }

    pub fn select_conversation(&self, id: &str) -> Result<(), ChatError> {
        self.store().select_conversation(id)
    }

    pub fn rename_conversation(&self, id: &str, title: &str) {
        self.store().rename_conversation(id, title);
    }

    /// Delete a conversation and release everything it displayed.
    pub fn delete_conversation(&self, id: &str) -> bool {
        let mut ui = self.ui();
        let Some(removed) = self.store().delete_conversation(id) else {
            return false;
        };
        ui.release_messages(&removed.messages);
        ui.phases.remove(id);
        ui.latest_seq.remove(id);
        if ui.editing.as_ref().is_some_and(|e| e.conversation_id == id) {
            ui.editing = None;
        }
        drop(ui);

        self.notifier.notify(Notification::info(
            "Chat deleted",
            "The conversation has been removed.",
        ));
        true
    }

    /// Whether the active conversation has a send in flight.
    pub fn is_loading(&self) -> bool {
        let ui = self.ui();
        let store = self.store();
        store
            .active_id()
            .is_some_and(|id| ui.phase(id) == SendPhase::Sending)
    }

    pub fn send_phase(&self, conversation_id: &str) -> SendPhase {
        self.ui().phase(conversation_id)
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send the draft and staged attachments to the active conversation.
    pub async fn send(&self) -> SendOutcome {
        let prepared = {
            let mut ui = self.ui();
            if ui.draft.trim().is_empty() && ui.pending.is_empty() {
                return SendOutcome::Ignored;
            }

            let mut store = self.store();
            let Some(conversation_id) = store.active_id().map(str::to_string) else {
                let conversation_id = store.create_conversation().id.clone();
                return SendOutcome::ConversationCreated { conversation_id };
            };
            if ui.phase(&conversation_id) == SendPhase::Sending {
                debug!(conversation_id = %conversation_id, "Send ignored: already sending");
                return SendOutcome::Ignored;
            }

            let draft = std::mem::take(&mut ui.draft);
            let staged = std::mem::take(&mut ui.pending);
            let descriptors: Vec<AttachmentDescriptor> =
                staged.iter().map(|s| s.descriptor.clone()).collect();
            let content = compose_content(draft.trim(), &descriptors);

            let message = Message::user(
                content,
                descriptors.iter().map(AttachmentDescriptor::to_ref).collect(),
            );
            let message_id = message.id.clone();
            store.append_message(&conversation_id, message);

            let handles: Vec<DisplayHandle> = staged.into_iter().map(|s| s.handle).collect();
            if !handles.is_empty() {
                ui.rendered.insert(message_id, handles);
            }

            match prepare(&mut ui, &store, &conversation_id) {
                Some(prepared) => prepared,
                None => return SendOutcome::Ignored,
            }
        };

        self.complete(prepared).await
    }

    /// Request a fresh reply for a conversation whose last message is from
    /// the user, typically after `edit_message`.
    pub async fn resend(&self, conversation_id: &str) -> SendOutcome {
        let prepared = {
            let mut ui = self.ui();
            let store = self.store();
            if ui.phase(conversation_id) == SendPhase::Sending {
                return SendOutcome::Ignored;
            }
            match prepare(&mut ui, &store, conversation_id) {
                Some(prepared) => prepared,
                None => return SendOutcome::Ignored,
            }
        };

        self.complete(prepared).await
    }

    async fn complete(&self, prepared: PreparedSend) -> SendOutcome {
        let PreparedSend {
            conversation_id,
            seq,
            prompt,
            history,
        } = prepared;

        info!(
            conversation_id = %conversation_id,
            seq,
            history_len = history.len(),
            "Requesting completion"
        );
        let result = self.completion.generate_response(&prompt, &history).await;

        let mut ui = self.ui();
        if !ui.is_latest(&conversation_id, seq) {
            info!(conversation_id = %conversation_id, seq, "Discarding stale completion");
            return SendOutcome::Discarded;
        }

        match result {
            Ok(raw) => {
                let reply = Message::assistant(formatter::format(&raw));
                let message_id = reply.id.clone();
                self.store().append_message(&conversation_id, reply);
                ui.advance(&conversation_id, SendPhase::Succeeded);
                ui.advance(&conversation_id, SendPhase::Idle);
                SendOutcome::Succeeded { message_id }
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Completion failed");
                ui.advance(&conversation_id, SendPhase::Failed);
                ui.advance(&conversation_id, SendPhase::Idle);
                drop(ui);
                self.notifier
                    .notify(Notification::error("Error", SEND_FAILED_MESSAGE));
                SendOutcome::Failed
            }
        }
    }

    // =========================================================================
    // Editing
    // =========================================================================

    pub fn start_editing(&self, conversation_id: &str, message_id: &str) {
        self.ui().editing = Some(EditTarget {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });
    }

    pub fn cancel_editing(&self) {
        self.ui().editing = None;
    }

    pub fn editing(&self) -> Option<EditTarget> {
        self.ui().editing.clone()
    }

    /// Replace a message's content and drop everything after it.
    ///
    /// Does not request a new reply; call `resend` for that. Any reply still
    /// in flight for the conversation is discarded when it arrives.
    pub fn edit_message(&self, conversation_id: &str, message_id: &str, new_content: &str) -> bool {
        let mut ui = self.ui();
        let Some(removed) = self
            .store()
            .edit_message(conversation_id, message_id, new_content)
        else {
            return false;
        };
        ui.release_messages(&removed);
        ui.invalidate(conversation_id);
        ui.editing = None;
        true
    }

    // =========================================================================
    // Dictation
    // =========================================================================

    pub fn is_listening(&self) -> bool {
        self.capture.is_listening()
    }

    /// Start dictation, or stop it if already listening.
    pub async fn toggle_dictation(&self) -> DictationOutcome {
        if !self.capture.is_supported() {
            self.notifier.notify(Notification::error(
                "Voice input unavailable",
                CaptureError::Unsupported.to_string(),
            ));
            return DictationOutcome::Unsupported;
        }

        if self.capture.is_listening() {
            self.capture.cancel();
            return DictationOutcome::Stopped;
        }

        match self.capture.listen().await {
            Ok(transcript) => {
                let mut ui = self.ui();
                if !ui.draft.is_empty() {
                    ui.draft.push(' ');
                }
                ui.draft.push_str(&transcript);
                DictationOutcome::Transcribed(transcript)
            }
            Err(CaptureError::Cancelled) => DictationOutcome::Cancelled,
            Err(e) => {
                self.notifier
                    .notify(Notification::error("Voice input error", e.to_string()));
                DictationOutcome::Failed(e)
            }
        }
    }

    // =========================================================================
    // Logout
    // =========================================================================

    /// Clear the user record and every conversation.
    pub fn logout(&self, session: &Session) -> Redirect {
        self.capture.cancel();
        {
            let mut ui = self.ui();
            *ui = UiState {
                next_seq: ui.next_seq,
                ..UiState::default()
            };
            self.store().clear();
        }
        session.clear_user();
        info!("User signed out");
        self.notifier
            .notify(Notification::info("Signed out successfully", ""));
        Redirect::Landing
    }
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("store", &*self.store())
            .field("attachments", &self.attachments)
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}

/// Outgoing text: the draft followed by one `[Image: name]` line per
/// attachment.
fn compose_content(draft: &str, attachments: &[AttachmentDescriptor]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(attachments.len() + 1);
    if !draft.is_empty() {
        parts.push(draft.to_string());
    }
    parts.extend(attachments.iter().map(|a| format!("[Image: {}]", a.name)));
    parts.join("\n")
}

/// Build the request for the conversation's last user message and mark the
/// conversation as sending.
fn prepare(ui: &mut UiState, store: &ConversationStore, conversation_id: &str) -> Option<PreparedSend> {
    let conv = store.get(conversation_id)?;
    let last = conv.messages.last().filter(|m| m.role == Role::User)?;

    let prompt = if last.attachments.is_empty() {
        last.content.clone()
    } else {
        format!("{}\n\n{}", last.content, ATTACHMENT_NOTE)
    };
    let history = conv.messages.iter().map(ChatTurn::from).collect();

    ui.advance(conversation_id, SendPhase::Sending);
    let seq = ui.bump_seq(conversation_id);
    Some(PreparedSend {
        conversation_id: conversation_id.to_string(),
        seq,
        prompt,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::InMemoryDisplayRefs;
    use crate::completion::{MockCompletionClient, TurnRole};
    use crate::notifier::{RecordingNotifier, Severity};
    use tokio::sync::Notify;
    use wgpt_core::config::{AttachmentConfig, VoiceConfig};
    use wgpt_core::types::UserRecord;
    use wgpt_storage::{keys, LocalStore, MemoryLocalStore};
    use wgpt_voice::{MockRecognizer, SpeechRecognizer, UnavailableRecognizer};

    struct Harness {
        orch: ChatOrchestrator,
        completion: Arc<MockCompletionClient>,
        refs: Arc<InMemoryDisplayRefs>,
        notifier: Arc<RecordingNotifier>,
        backend: Arc<MemoryLocalStore>,
    }

    fn harness_with(completion: MockCompletionClient, recognizer: Arc<dyn SpeechRecognizer>) -> Harness {
        let backend = Arc::new(MemoryLocalStore::new());
        let completion = Arc::new(completion);
        let refs = Arc::new(InMemoryDisplayRefs::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let orch = ChatOrchestrator::new(
            ConversationStore::load(backend.clone()),
            completion.clone(),
            AttachmentService::new(refs.clone(), &AttachmentConfig::default()),
            Arc::new(CaptureService::new(recognizer, &VoiceConfig::default())),
            notifier.clone(),
        );
        Harness {
            orch,
            completion,
            refs,
            notifier,
            backend,
        }
    }

    fn harness(completion: MockCompletionClient) -> Harness {
        harness_with(completion, Arc::new(UnavailableRecognizer))
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never became true");
    }

    fn messages(h: &Harness, conversation_id: &str) -> Vec<Message> {
        h.orch
            .with_store(|s| s.get(conversation_id).map(|c| c.messages.clone()))
            .unwrap_or_default()
    }

    fn png(name: &str) -> SelectedFile {
        SelectedFile::new(name, "image/png", 1024)
    }

    #[test]
    fn test_send_phase_transitions() {
        assert!(SendPhase::Idle.can_transition_to(&SendPhase::Sending));
        assert!(SendPhase::Sending.can_transition_to(&SendPhase::Succeeded));
        assert!(SendPhase::Sending.can_transition_to(&SendPhase::Failed));
        assert!(SendPhase::Failed.can_transition_to(&SendPhase::Idle));
        assert!(!SendPhase::Idle.can_transition_to(&SendPhase::Succeeded));
        assert!(!SendPhase::Succeeded.can_transition_to(&SendPhase::Sending));
    }

    #[test]
    fn test_compose_content() {
        let att = |name: &str| AttachmentDescriptor {
            id: "img".into(),
            url: "blob:x".into(),
            name: name.into(),
            size: 1,
        };
        assert_eq!(compose_content("hi", &[]), "hi");
        assert_eq!(
            compose_content("what is this", &[att("a.png"), att("b.png")]),
            "what is this\n[Image: a.png]\n[Image: b.png]"
        );
        assert_eq!(compose_content("", &[att("a.png")]), "[Image: a.png]");
    }

    #[tokio::test]
    async fn test_empty_draft_is_ignored() {
        let h = harness(MockCompletionClient::new());
        h.orch.set_draft("   ");
        assert_eq!(h.orch.send().await, SendOutcome::Ignored);
        assert!(h.orch.with_store(|s| s.list_conversations().is_empty()));
        assert!(h.completion.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_conversation_creates_one_and_defers() {
        let h = harness(MockCompletionClient::new());
        h.orch.set_draft("How often should I change my oil?");

        let outcome = h.orch.send().await;
        let SendOutcome::ConversationCreated { conversation_id } = &outcome else {
            panic!("expected ConversationCreated, got {:?}", outcome);
        };
        assert!(messages(&h, conversation_id).is_empty());
        assert_eq!(h.orch.draft(), "How often should I change my oil?");
        assert!(h.completion.calls().is_empty());

        assert!(matches!(h.orch.send().await, SendOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn test_send_success_appends_formatted_reply() {
        let h = harness(MockCompletionClient::new().reply("**Every** 5,000 miles"));
        let conv = h.orch.new_conversation();
        h.orch.set_draft("  How often should I change my oil?  ");

        let outcome = h.orch.send().await;
        let SendOutcome::Succeeded { message_id } = &outcome else {
            panic!("expected Succeeded, got {:?}", outcome);
        };

        let msgs = messages(&h, &conv);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "How often should I change my oil?");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(&msgs[1].id, message_id);
        assert_eq!(msgs[1].content, "Every 5,000 miles");

        let title = h.orch.with_store(|s| s.get(&conv).unwrap().title.clone());
        assert_eq!(title, "How often should I change my oil?");
        assert!(h.orch.draft().is_empty());
        assert!(!h.orch.is_loading());
        assert_eq!(h.orch.send_phase(&conv), SendPhase::Idle);
    }

    #[tokio::test]
    async fn test_history_includes_new_message_in_order() {
        let h = harness(MockCompletionClient::new().reply("first reply"));
        h.orch.new_conversation();
        h.orch.set_draft("q1");
        h.orch.send().await;
        h.orch.set_draft("q2");
        h.orch.send().await;

        let calls = h.completion.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].prompt, "q2");
        let roles: Vec<TurnRole> = calls[1].history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![TurnRole::User, TurnRole::Chatbot, TurnRole::User]);
        let texts: Vec<&str> = calls[1].history.iter().map(|t| t.message.as_str()).collect();
        assert_eq!(texts, vec!["q1", "first reply", "q2"]);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_user_message_and_notifies() {
        let h = harness(MockCompletionClient::new().fail("HTTP 503"));
        let conv = h.orch.new_conversation();
        h.orch.set_draft("How often should I change my oil?");

        assert_eq!(h.orch.send().await, SendOutcome::Failed);
        let msgs = messages(&h, &conv);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(h.orch.send_phase(&conv), SendPhase::Idle);

        let last = h.notifier.last().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert_eq!(last.description, SEND_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn test_send_with_attachments() {
        let h = harness(MockCompletionClient::new());
        let conv = h.orch.new_conversation();
        let desc = h.orch.add_attachment(&png("dash.png")).await.unwrap();
        h.orch.set_draft("What does this light mean?");

        h.orch.send().await;

        let msgs = messages(&h, &conv);
        assert_eq!(msgs[0].content, "What does this light mean?\n[Image: dash.png]");
        assert_eq!(msgs[0].attachments, vec![desc.to_ref()]);
        assert!(h.orch.pending_attachments().is_empty());
        // Held by the rendered message.
        assert!(h.refs.is_live(&desc.url));

        let call = &h.completion.calls()[0];
        assert!(call.prompt.starts_with("What does this light mean?\n[Image: dash.png]"));
        assert!(call.prompt.ends_with(ATTACHMENT_NOTE));
    }

    #[tokio::test]
    async fn test_attachment_only_send() {
        let h = harness(MockCompletionClient::new());
        let conv = h.orch.new_conversation();
        h.orch.add_attachment(&png("tire.png")).await.unwrap();
        assert!(matches!(h.orch.send().await, SendOutcome::Succeeded { .. }));
        assert_eq!(messages(&h, &conv)[0].content, "[Image: tire.png]");
    }

    #[tokio::test]
    async fn test_remove_attachment_releases_reference() {
        let h = harness(MockCompletionClient::new());
        let keep = h.orch.add_attachment(&png("keep.png")).await.unwrap();
        let drop_me = h.orch.add_attachment(&png("drop.png")).await.unwrap();
        assert_eq!(h.refs.live_count(), 2);

        assert!(h.orch.remove_attachment(&drop_me.id));
        assert!(!h.orch.remove_attachment(&drop_me.id));
        assert!(!h.refs.is_live(&drop_me.url));
        assert_eq!(h.orch.pending_attachments(), vec![keep.clone()]);

        h.orch.clear_draft();
        assert_eq!(h.refs.live_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_attachment_notifies() {
        let h = harness(MockCompletionClient::new());
        let err = h
            .orch
            .add_attachment(&SelectedFile::new("big.png", "image/png", 15 * 1024 * 1024))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(h.orch.pending_attachments().is_empty());
        assert_eq!(h.notifier.last().unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_send_while_sending_is_ignored() {
        let gate = Arc::new(Notify::new());
        let h = harness(MockCompletionClient::new().with_gate(gate.clone()));
        let conv = h.orch.new_conversation();
        h.orch.set_draft("first");

        let (first, second) = tokio::join!(h.orch.send(), async {
            wait_until(|| h.orch.is_loading()).await;
            h.orch.set_draft("second");
            let outcome = h.orch.send().await;
            gate.notify_one();
            outcome
        });

        assert!(matches!(first, SendOutcome::Succeeded { .. }));
        assert_eq!(second, SendOutcome::Ignored);
        assert_eq!(h.orch.draft(), "second");
        assert_eq!(messages(&h, &conv).len(), 2);
        assert_eq!(h.completion.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_then_resend() {
        let h = harness(
            MockCompletionClient::new()
                .reply("a1")
                .reply("a2")
                .reply("a2 revised"),
        );
        let conv = h.orch.new_conversation();
        h.orch.set_draft("q1");
        h.orch.send().await;
        h.orch.set_draft("q2");
        h.orch.send().await;

        let q1 = messages(&h, &conv)[0].id.clone();
        h.orch.start_editing(&conv, &q1);
        assert!(h.orch.edit_message(&conv, &q1, "q1 revised"));
        assert!(h.orch.editing().is_none());

        let msgs = messages(&h, &conv);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].id, q1);
        assert_eq!(msgs[0].content, "q1 revised");
        // Editing alone does not call the service.
        assert_eq!(h.completion.calls().len(), 2);

        assert!(matches!(h.orch.resend(&conv).await, SendOutcome::Succeeded { .. }));
        let calls = h.completion.calls();
        assert_eq!(calls[2].prompt, "q1 revised");
        assert_eq!(calls[2].history.len(), 1);
        assert_eq!(messages(&h, &conv)[1].content, "a2 revised");
    }

    #[tokio::test]
    async fn test_cancel_editing_leaves_conversation_intact() {
        let h = harness(MockCompletionClient::new());
        let conv = h.orch.new_conversation();
        h.orch.set_draft("q1");
        h.orch.send().await;

        let q1 = messages(&h, &conv)[0].id.clone();
        h.orch.start_editing(&conv, &q1);
        assert_eq!(
            h.orch.editing(),
            Some(EditTarget {
                conversation_id: conv.clone(),
                message_id: q1,
            })
        );

        h.orch.cancel_editing();
        assert!(h.orch.editing().is_none());
        assert_eq!(messages(&h, &conv).len(), 2);
        assert_eq!(h.orch.send_phase(&conv), SendPhase::Idle);
    }

    #[tokio::test]
    async fn test_resend_requires_trailing_user_message() {
        let h = harness(MockCompletionClient::new());
        let conv = h.orch.new_conversation();
        assert_eq!(h.orch.resend(&conv).await, SendOutcome::Ignored);
        h.orch.set_draft("q");
        h.orch.send().await;
        assert_eq!(h.orch.resend(&conv).await, SendOutcome::Ignored);
        assert_eq!(h.orch.resend("conv_missing").await, SendOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_stale_reply_after_edit_is_discarded() {
        let gate = Arc::new(Notify::new());
        let h = harness(MockCompletionClient::new().with_gate(gate.clone()).reply("stale"));
        let conv = h.orch.new_conversation();
        h.orch.set_draft("original question");

        let (outcome, _) = tokio::join!(h.orch.send(), async {
            wait_until(|| h.orch.is_loading()).await;
            let id = messages(&h, &conv)[0].id.clone();
            assert!(h.orch.edit_message(&conv, &id, "edited question"));
            assert!(!h.orch.is_loading());
            gate.notify_one();
        });

        assert_eq!(outcome, SendOutcome::Discarded);
        let msgs = messages(&h, &conv);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "edited question");
    }

    #[tokio::test]
    async fn test_reply_for_deleted_conversation_is_discarded() {
        let gate = Arc::new(Notify::new());
        let h = harness(MockCompletionClient::new().with_gate(gate.clone()));
        let conv = h.orch.new_conversation();
        h.orch.set_draft("question");

        let (outcome, _) = tokio::join!(h.orch.send(), async {
            wait_until(|| h.orch.is_loading()).await;
            assert!(h.orch.delete_conversation(&conv));
            gate.notify_one();
        });

        assert_eq!(outcome, SendOutcome::Discarded);
        assert!(h.orch.with_store(|s| s.list_conversations().is_empty()));
    }

    #[tokio::test]
    async fn test_edit_releases_removed_attachments() {
        let h = harness(MockCompletionClient::new());
        let conv = h.orch.new_conversation();
        h.orch.set_draft("q1");
        h.orch.send().await;
        let desc = h.orch.add_attachment(&png("later.png")).await.unwrap();
        h.orch.set_draft("q2");
        h.orch.send().await;
        assert!(h.refs.is_live(&desc.url));

        let q1 = messages(&h, &conv)[0].id.clone();
        h.orch.edit_message(&conv, &q1, "q1 again");
        assert!(!h.refs.is_live(&desc.url));
    }

    #[tokio::test]
    async fn test_delete_conversation_notifies_and_releases() {
        let h = harness(MockCompletionClient::new());
        let conv = h.orch.new_conversation();
        let desc = h.orch.add_attachment(&png("a.png")).await.unwrap();
        h.orch.send().await;

        assert!(h.orch.delete_conversation(&conv));
        assert!(!h.refs.is_live(&desc.url));
        let last = h.notifier.last().unwrap();
        assert_eq!(last.title, "Chat deleted");
        assert_eq!(last.description, "The conversation has been removed.");

        assert!(!h.orch.delete_conversation(&conv));
        assert_eq!(h.notifier.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_dictation_unsupported() {
        let h = harness(MockCompletionClient::new());
        h.orch.set_draft("typed");
        assert_eq!(h.orch.toggle_dictation().await, DictationOutcome::Unsupported);
        assert_eq!(h.orch.draft(), "typed");
        assert!(!h.orch.is_listening());
        assert_eq!(
            h.notifier.last().unwrap().description,
            "Speech recognition not supported"
        );
    }

    #[tokio::test]
    async fn test_dictation_appends_to_draft() {
        let h = harness_with(
            MockCompletionClient::new(),
            Arc::new(MockRecognizer::hearing("for a 2018 Civic")),
        );
        h.orch.set_draft("Best oil");
        assert_eq!(
            h.orch.toggle_dictation().await,
            DictationOutcome::Transcribed("for a 2018 Civic".into())
        );
        assert_eq!(h.orch.draft(), "Best oil for a 2018 Civic");

        h.orch.set_draft("");
        h.orch.toggle_dictation().await;
        assert_eq!(h.orch.draft(), "for a 2018 Civic");
    }

    #[tokio::test]
    async fn test_toggle_while_listening_stops_without_changing_draft() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(
            MockCompletionClient::new(),
            Arc::new(MockRecognizer::hearing("unused").with_gate(gate)),
        );
        h.orch.set_draft("keep me");

        let (first, second) = tokio::join!(h.orch.toggle_dictation(), async {
            wait_until(|| h.orch.is_listening()).await;
            h.orch.toggle_dictation().await
        });

        assert_eq!(first, DictationOutcome::Cancelled);
        assert_eq!(second, DictationOutcome::Stopped);
        assert_eq!(h.orch.draft(), "keep me");
        assert!(!h.orch.is_listening());
    }

    #[tokio::test]
    async fn test_concurrent_listen_is_already_active() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(
            MockCompletionClient::new(),
            Arc::new(MockRecognizer::hearing("heard").with_gate(gate.clone())),
        );
        h.orch.set_draft("before");

        let (first, _) = tokio::join!(h.orch.toggle_dictation(), async {
            wait_until(|| h.orch.is_listening()).await;
            assert_eq!(
                h.orch.capture().listen().await,
                Err(CaptureError::AlreadyActive)
            );
            assert_eq!(h.orch.draft(), "before");
            gate.notify_one();
        });

        assert_eq!(first, DictationOutcome::Transcribed("heard".into()));
        assert_eq!(h.orch.draft(), "before heard");
    }

    #[tokio::test]
    async fn test_dictation_failure_notifies() {
        let h = harness_with(
            MockCompletionClient::new(),
            Arc::new(MockRecognizer::failing(CaptureError::Failed(
                "not-allowed".into(),
            ))),
        );
        let outcome = h.orch.toggle_dictation().await;
        assert_eq!(
            outcome,
            DictationOutcome::Failed(CaptureError::Failed("not-allowed".into()))
        );
        assert!(h.orch.draft().is_empty());
        assert_eq!(h.notifier.last().unwrap().severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let h = harness(MockCompletionClient::new());
        let session = Session::new(h.backend.clone());
        session
            .sign_in(&UserRecord {
                name: "Ada".into(),
                email: "ada@example.com".into(),
            })
            .unwrap();
        h.orch.new_conversation();
        h.orch.add_attachment(&png("a.png")).await.unwrap();
        h.orch.send().await;
        h.orch.add_attachment(&png("b.png")).await.unwrap();
        h.orch.set_draft("unsent");

        assert_eq!(h.orch.logout(&session), Redirect::Landing);

        assert!(session.current_user().is_none());
        assert!(h.backend.get(keys::USER).unwrap().is_none());
        assert!(h.backend.get(keys::CONVERSATIONS).unwrap().is_none());
        assert!(h.orch.with_store(|s| s.list_conversations().is_empty()));
        assert!(h.orch.draft().is_empty());
        assert_eq!(h.refs.live_count(), 0);
        assert_eq!(
            h.notifier.last().unwrap().title,
            "Signed out successfully"
        );
        assert_eq!(session.require_user(), Err(Redirect::Login));
    }
}
