//! PlaybackSession — one text-to-speech utterance from speak to completion
//! or cancellation.
//!
//! At most one utterance is ever in flight: a new `speak` cancels the
//! previous one first (latest request wins, no queueing), and a cancelled
//! utterance's completion event is never delivered.

use crate::capability::{SpeechSynthesis, SynthesizerEvent, UtteranceControl};
use crate::error::VoiceResult;
use crate::turn::TurnInput;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// An in-flight utterance: the text being spoken plus the engine control handle.
pub struct PlaybackSession {
    text: String,
    control: Box<dyn UtteranceControl>,
}

impl PlaybackSession {
    /// Text currently being spoken.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// The single playback slot.
pub struct PlaybackSlot {
    tts: Arc<dyn SpeechSynthesis>,
    current: Option<PlaybackSession>,
}

impl PlaybackSlot {
    pub fn new(tts: Arc<dyn SpeechSynthesis>) -> Self {
        Self { tts, current: None }
    }

    /// Cancel any in-progress utterance, then speak `text`. The natural
    /// completion is reported to the controller queue as `SpeakEnded`.
    pub fn speak(
        &mut self,
        text: &str,
        locale: &str,
        queue: &mpsc::UnboundedSender<TurnInput>,
    ) -> VoiceResult<()> {
        self.cancel_all();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let control = self.tts.speak(text, locale, done_tx)?;
        debug!(text, "playback started");
        let queue = queue.clone();
        tokio::spawn(async move {
            if let Some(SynthesizerEvent::SpeakEnded) = done_rx.recv().await {
                let _ = queue.send(TurnInput::SpeakEnded);
            }
        });
        self.current = Some(PlaybackSession {
            text: text.to_string(),
            control,
        });
        Ok(())
    }

    /// Stop any in-progress or pending utterance. Its completion event is
    /// never delivered. Idempotent and safe to call when nothing is active.
    pub fn cancel_all(&mut self) {
        if let Some(mut session) = self.current.take() {
            debug!(text = %session.text, "cancelling playback");
            session.control.cancel();
        }
    }

    /// Drop the handle for an utterance that finished on its own.
    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Text currently being spoken, if any.
    pub fn current_text(&self) -> Option<&str> {
        self.current.as_ref().map(PlaybackSession::text)
    }
}
