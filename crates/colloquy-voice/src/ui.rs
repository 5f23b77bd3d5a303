//! UI boundary: read-only state projection out, user intents in.
//!
//! The presentation layer never touches engine handles; it observes
//! `UiSnapshot`s and `ConversationEvent`s and injects intents, all through
//! `UiHandle`.

use crate::turn::{Phase, TurnInput};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Read-only projection of controller state, published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiSnapshot {
    pub phase: Phase,
    pub live_transcript: String,
    pub status: Option<String>,
}

impl Default for UiSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            live_transcript: String::new(),
            status: None,
        }
    }
}

/// A completed exchange, for an external message-list renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    UserUtterance {
        text: String,
        timestamp: DateTime<Utc>,
    },
    AssistantReply {
        text: String,
        timestamp: DateTime<Utc>,
    },
}

/// Handle the presentation layer holds. Dropping it (the surface unmounting)
/// closes the feature and releases engine resources.
pub struct UiHandle {
    intents: mpsc::UnboundedSender<TurnInput>,
    snapshots: watch::Receiver<UiSnapshot>,
    conversation: Option<mpsc::UnboundedReceiver<ConversationEvent>>,
    task: Option<JoinHandle<()>>,
}

impl UiHandle {
    pub(crate) fn new(
        intents: mpsc::UnboundedSender<TurnInput>,
        snapshots: watch::Receiver<UiSnapshot>,
        conversation: mpsc::UnboundedReceiver<ConversationEvent>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            intents,
            snapshots,
            conversation: Some(conversation),
            task: Some(task),
        }
    }

    /// The mic button: starts listening when idle, stops when listening.
    pub fn toggle_mic(&self) {
        let _ = self.intents.send(TurnInput::ToggleMic);
    }

    /// Drop the current turn and start a fresh conversation.
    pub fn restart_conversation(&self) {
        let _ = self.intents.send(TurnInput::RestartConversation);
    }

    /// Close the voice feature and release engine resources.
    pub fn close(&self) {
        let _ = self.intents.send(TurnInput::Close);
    }

    /// Latest published state.
    pub fn snapshot(&self) -> UiSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch state changes (one notification per handled event).
    pub fn watch(&self) -> watch::Receiver<UiSnapshot> {
        self.snapshots.clone()
    }

    /// Take the conversation event stream. Callable once.
    pub fn take_conversation_events(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<ConversationEvent>> {
        self.conversation.take()
    }

    /// Wait until the controller task has fully shut down.
    pub async fn closed(&mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for UiHandle {
    fn drop(&mut self) {
        let _ = self.intents.send(TurnInput::Close);
    }
}
