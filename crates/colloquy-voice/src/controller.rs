//! VoiceTurnController — the runtime that drives the turn state machine.
//!
//! One task owns the machine and a single event queue; capability callbacks,
//! gateway completions, and UI intents all serialize through it and are
//! handled one at a time. The task executes reducer effects against the
//! capture/playback slots and publishes a read-only projection for the UI.

use crate::capability::{RecognizerEvent, SpeechSynthesis, SpeechToText};
use crate::capture::CaptureSlot;
use crate::config::ControllerConfig;
use crate::error::VoiceResult;
use crate::gateway::ReplyGateway;
use crate::playback::PlaybackSlot;
use crate::turn::{Effect, TurnInput, TurnMachine, TurnPolicy};
use crate::ui::{ConversationEvent, UiHandle, UiSnapshot};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Orchestrates capture, reply generation, and playback into the hands-free
/// turn loop. Construction spawns the controller task; interaction happens
/// through the returned `UiHandle`.
pub struct VoiceTurnController {
    config: ControllerConfig,
    machine: TurnMachine,
    capture: CaptureSlot,
    playback: PlaybackSlot,
    gateway: Arc<dyn ReplyGateway>,
    queue_tx: mpsc::UnboundedSender<TurnInput>,
    snapshot_tx: watch::Sender<UiSnapshot>,
    conversation_tx: mpsc::UnboundedSender<ConversationEvent>,
}

impl VoiceTurnController {
    /// Validate the config, spawn the controller task, and hand back the UI
    /// surface. The speech engines and gateway are injected so tests can
    /// substitute deterministic fakes.
    pub fn spawn(
        config: ControllerConfig,
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn SpeechSynthesis>,
        gateway: Arc<dyn ReplyGateway>,
    ) -> VoiceResult<UiHandle> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(UiSnapshot::default());
        let (conversation_tx, conversation_rx) = mpsc::unbounded_channel();
        let policy = TurnPolicy {
            max_consecutive_errors: config.max_consecutive_errors,
        };
        let controller = Self {
            machine: TurnMachine::new(policy),
            capture: CaptureSlot::new(stt),
            playback: PlaybackSlot::new(tts),
            gateway,
            queue_tx: queue_tx.clone(),
            snapshot_tx,
            conversation_tx,
            config,
        };
        let task = tokio::spawn(controller.run(queue_rx));
        Ok(UiHandle::new(queue_tx, snapshot_rx, conversation_rx, task))
    }

    async fn run(mut self, mut queue_rx: mpsc::UnboundedReceiver<TurnInput>) {
        info!("voice turn controller started");
        self.publish();
        while let Some(event) = queue_rx.recv().await {
            let shutdown = self.step(event).await;
            self.publish();
            if shutdown {
                break;
            }
        }
        self.capture.abort();
        self.playback.cancel_all();
        info!("voice turn controller stopped");
    }

    /// Handle one event; returns true when the feature should release
    /// resources and exit.
    async fn step(&mut self, event: TurnInput) -> bool {
        // Bookkeeping for sessions the engine already ended on its own, so
        // the slots reflect reality before the machine decides anything.
        match &event {
            TurnInput::Capture {
                generation,
                event: RecognizerEvent::Ended,
            } => {
                if self.capture.generation() == Some(*generation) {
                    self.capture.clear();
                }
            }
            TurnInput::SpeakEnded => self.playback.clear(),
            _ => {}
        }

        let effects = self.machine.handle(event);
        let shutdown = effects.contains(&Effect::ReleaseResources);
        for effect in effects {
            self.apply(effect).await;
        }

        // Turn-taking discipline: capture and playback are never live at once.
        debug_assert!(!(self.capture.is_active() && self.playback.is_active()));

        shutdown
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::StartCapture { generation, delayed } => {
                if delayed && !self.config.restart_delay.is_zero() {
                    tokio::time::sleep(self.config.restart_delay).await;
                }
                let options = self.config.capture_options();
                if let Err(error) = self.capture.start(&options, generation, &self.queue_tx) {
                    warn!(%error, "capture start failed");
                    let _ = self
                        .queue_tx
                        .send(TurnInput::CaptureStartFailed { generation, error });
                }
            }
            Effect::AbortCapture => self.capture.abort(),
            Effect::CancelPlayback => self.playback.cancel_all(),
            Effect::CallGateway { generation, utterance } => {
                let gateway = Arc::clone(&self.gateway);
                let queue = self.queue_tx.clone();
                tokio::spawn(async move {
                    let result = gateway.reply(&utterance).await;
                    let _ = queue.send(TurnInput::GatewayResolved { generation, result });
                });
            }
            Effect::Speak { text } => {
                if let Err(error) =
                    self.playback.speak(&text, &self.config.locale, &self.queue_tx)
                {
                    warn!(%error, "playback start failed");
                    let _ = self.queue_tx.send(TurnInput::SpeakFailed { error });
                }
            }
            Effect::UserUtterance { text } => {
                let _ = self.conversation_tx.send(ConversationEvent::UserUtterance {
                    text,
                    timestamp: Utc::now(),
                });
            }
            Effect::AssistantReply { text } => {
                let _ = self.conversation_tx.send(ConversationEvent::AssistantReply {
                    text,
                    timestamp: Utc::now(),
                });
            }
            Effect::ReleaseResources => {
                // The run loop exits after this event's effects drain; the
                // slots are torn down there.
            }
        }
    }

    fn publish(&self) {
        let state = self.machine.state();
        self.snapshot_tx.send_replace(UiSnapshot {
            phase: state.phase,
            live_transcript: state.live_transcript.clone(),
            status: state.status.clone(),
        });
    }
}
