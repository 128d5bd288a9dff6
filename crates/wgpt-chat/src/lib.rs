//! Conversation core for the WGPT chat client.
//!
//! Owns conversations and messages, mediates between user input, local
//! persistence and the remote completion service, and resolves the
//! edit-and-resend flow.

pub mod attachment;
pub mod completion;
pub mod display;
pub mod error;
pub mod formatter;
pub mod notifier;
pub mod orchestrator;
pub mod persistence;
pub mod session;
pub mod store;

pub use attachment::{
    AttachmentDescriptor, AttachmentService, DisplayRefAllocator, InMemoryDisplayRefs,
    SelectedFile,
};
pub use completion::{ChatTurn, CohereClient, CompletionClient, MockCompletionClient, TurnRole};
pub use error::ChatError;
pub use notifier::{Notification, Notifier, RecordingNotifier, Severity};
pub use orchestrator::{ChatOrchestrator, DictationOutcome, SendOutcome, SendPhase};
pub use session::{Redirect, Session};
pub use store::{ConversationStore, ConversationUpdate};
