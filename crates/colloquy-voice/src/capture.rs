//! CaptureSession — one run of speech-to-text from start to terminal event.
//!
//! Engine events are forwarded onto the controller queue tagged with the
//! generation the session was created under, so late callbacks from a dead
//! session are discarded by the state machine instead of restarting it.

use crate::capability::{CaptureOptions, RecognizerControl, RecognizerEvent, SpeechToText};
use crate::error::VoiceResult;
use crate::turn::TurnInput;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A live capture session: the engine control handle plus the generation it
/// was created under.
pub struct CaptureSession {
    generation: u64,
    control: Box<dyn RecognizerControl>,
}

impl CaptureSession {
    fn start(
        stt: &dyn SpeechToText,
        options: &CaptureOptions,
        generation: u64,
        queue: mpsc::UnboundedSender<TurnInput>,
    ) -> VoiceResult<Self> {
        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let control = stt.start(options, engine_tx)?;
        debug!(generation, "capture session started");
        tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                let terminal = event == RecognizerEvent::Ended;
                if queue
                    .send(TurnInput::Capture { generation, event })
                    .is_err()
                {
                    break;
                }
                if terminal {
                    break;
                }
            }
        });
        Ok(Self { generation, control })
    }

    /// Generation this session was created under.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// The single live-capture slot. Starting a new session always aborts the
/// previous one first, so no two engine sessions are ever live at once.
pub struct CaptureSlot {
    stt: Arc<dyn SpeechToText>,
    current: Option<CaptureSession>,
}

impl CaptureSlot {
    pub fn new(stt: Arc<dyn SpeechToText>) -> Self {
        Self { stt, current: None }
    }

    /// Abort any live session, then start a fresh one under `generation`.
    pub fn start(
        &mut self,
        options: &CaptureOptions,
        generation: u64,
        queue: &mpsc::UnboundedSender<TurnInput>,
    ) -> VoiceResult<()> {
        self.abort();
        let session =
            CaptureSession::start(self.stt.as_ref(), options, generation, queue.clone())?;
        self.current = Some(session);
        Ok(())
    }

    /// Graceful end; the engine may still deliver a final result.
    pub fn stop(&mut self) {
        if let Some(session) = self.current.as_mut() {
            session.control.stop();
        }
    }

    /// Immediate end; pending finals are suppressed. Idempotent and safe to
    /// call with no live session.
    pub fn abort(&mut self) {
        if let Some(mut session) = self.current.take() {
            debug!(generation = session.generation, "aborting capture session");
            session.control.abort();
        }
    }

    /// Drop the handle for a session the engine already ended on its own.
    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Generation of the live session, if any.
    pub fn generation(&self) -> Option<u64> {
        self.current.as_ref().map(CaptureSession::generation)
    }
}
