//! The voice-turn state machine.
//!
//! A pure reducer over (state, event) -> effect list. Every capability
//! callback, gateway completion, and UI intent enters through
//! `TurnMachine::handle`; the runtime in `controller` executes the returned
//! effects. The silence-retry and relisten-after-reply loops are transitions
//! here rather than recursive calls, and the generation guard that discards
//! stale engine callbacks lives in exactly one place.

use crate::capability::RecognizerEvent;
use crate::error::{CaptureErrorCode, VoiceError};
use tracing::{debug, info, warn};

pub const STATUS_LISTENING: &str = "Listening...";
pub const STATUS_GOT_IT: &str = "Got it!";
pub const STATUS_SPEAKING: &str = "Speaking...";
pub const STATUS_DIDNT_CATCH: &str = "Didn't catch that";
pub const STATUS_GATEWAY_FAILED: &str = "Failed to fetch response. Please try again.";
pub const STATUS_UNSUPPORTED: &str = "Speech is not supported on this device.";

/// Phases of the turn-taking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Listening,
    AwaitingReply,
    Speaking,
    Stopped,
}

/// Controller-owned state. Mutated only by `TurnMachine::handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnState {
    pub phase: Phase,
    /// Current best-effort transcript for the in-progress capture.
    pub live_transcript: String,
    /// Set the instant a user-initiated stop or close occurs.
    pub manual_stop_requested: bool,
    /// Bumped every time a new capture session starts; events tagged with an
    /// older generation are discarded without touching state.
    pub generation: u64,
    /// Human-readable status line for the UI.
    pub status: Option<String>,
    consecutive_errors: u32,
    last_error: Option<CaptureErrorCode>,
    session_error: Option<CaptureErrorCode>,
}

impl Default for TurnState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            live_transcript: String::new(),
            manual_stop_requested: false,
            generation: 0,
            status: None,
            consecutive_errors: 0,
            last_error: None,
            session_error: None,
        }
    }
}

impl TurnState {
    /// Current same-error streak (for tests and diagnostics).
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

/// Everything that can happen to the controller, serialized onto one queue.
#[derive(Debug)]
pub enum TurnInput {
    /// UI: the mic button. Starts listening when idle, stops when listening.
    ToggleMic,
    /// UI: drop everything and start a fresh conversation.
    RestartConversation,
    /// UI: close the voice feature and release resources.
    Close,
    /// Event from the capture session started under `generation`.
    Capture {
        generation: u64,
        event: RecognizerEvent,
    },
    /// The reply gateway finished for the utterance captured under `generation`.
    GatewayResolved {
        generation: u64,
        result: Result<String, VoiceError>,
    },
    /// Playback of the current reply finished naturally.
    SpeakEnded,
    /// Starting a capture session failed (reported by the runtime).
    CaptureStartFailed { generation: u64, error: VoiceError },
    /// Starting playback failed (reported by the runtime).
    SpeakFailed { error: VoiceError },
}

/// Side effects the runtime executes after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start a capture session under `generation`, aborting any live one first.
    /// `delayed` applies the configured restart pause before rearming.
    StartCapture { generation: u64, delayed: bool },
    /// Abort the live capture session, if any.
    AbortCapture,
    /// Cancel in-flight playback, if any.
    CancelPlayback,
    /// Send the utterance to the reply gateway.
    CallGateway { generation: u64, utterance: String },
    /// Speak the reply text.
    Speak { text: String },
    /// Surface a completed user utterance to the conversation feed.
    UserUtterance { text: String },
    /// Surface the assistant reply to the conversation feed.
    AssistantReply { text: String },
    /// Tear down engine resources; the feature session is over.
    ReleaseResources,
}

/// Retry policy for engine-level capture errors.
#[derive(Debug, Clone)]
pub struct TurnPolicy {
    /// Stop relistening once the same error code recurs this many times in a
    /// row with no clean session in between.
    pub max_consecutive_errors: u32,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 2,
        }
    }
}

/// The turn-taking state machine.
pub struct TurnMachine {
    state: TurnState,
    policy: TurnPolicy,
}

impl TurnMachine {
    pub fn new(policy: TurnPolicy) -> Self {
        Self {
            state: TurnState::default(),
            policy,
        }
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    /// Advance the machine by one event, returning the effects to execute.
    pub fn handle(&mut self, input: TurnInput) -> Vec<Effect> {
        match input {
            TurnInput::ToggleMic => self.on_toggle_mic(),
            TurnInput::RestartConversation => self.on_restart(),
            TurnInput::Close => self.on_close(),
            TurnInput::Capture { generation, event } => self.on_capture(generation, event),
            TurnInput::GatewayResolved { generation, result } => {
                self.on_gateway(generation, result)
            }
            TurnInput::SpeakEnded => self.on_speak_ended(),
            TurnInput::CaptureStartFailed { generation, error } => {
                self.on_capture_start_failed(generation, error)
            }
            TurnInput::SpeakFailed { error } => self.on_speak_failed(error),
        }
    }

    /// Shared rearm path: fresh generation, cleared transcript, Listening.
    fn begin_listening(&mut self, status: &str, delayed: bool, mut effects: Vec<Effect>) -> Vec<Effect> {
        self.state.generation += 1;
        self.state.phase = Phase::Listening;
        self.state.live_transcript.clear();
        self.state.session_error = None;
        self.state.status = Some(status.to_string());
        effects.push(Effect::StartCapture {
            generation: self.state.generation,
            delayed,
        });
        effects
    }

    fn reset_error_streak(&mut self) {
        self.state.consecutive_errors = 0;
        self.state.last_error = None;
        self.state.session_error = None;
    }

    fn on_toggle_mic(&mut self) -> Vec<Effect> {
        if self.state.phase == Phase::Listening {
            info!("mic toggled off");
            self.state.manual_stop_requested = true;
            self.state.phase = Phase::Stopped;
            self.state.status = None;
            return vec![Effect::AbortCapture];
        }
        info!("mic toggled on");
        self.state.manual_stop_requested = false;
        self.reset_error_streak();
        self.begin_listening(
            STATUS_LISTENING,
            false,
            vec![Effect::AbortCapture, Effect::CancelPlayback],
        )
    }

    fn on_restart(&mut self) -> Vec<Effect> {
        info!("conversation restarted");
        self.state.manual_stop_requested = false;
        self.reset_error_streak();
        self.begin_listening(
            STATUS_LISTENING,
            true,
            vec![Effect::AbortCapture, Effect::CancelPlayback],
        )
    }

    fn on_close(&mut self) -> Vec<Effect> {
        info!("voice chat closed");
        self.state.manual_stop_requested = true;
        self.state.phase = Phase::Stopped;
        self.state.status = None;
        vec![
            Effect::AbortCapture,
            Effect::CancelPlayback,
            Effect::ReleaseResources,
        ]
    }

    fn on_capture(&mut self, generation: u64, event: RecognizerEvent) -> Vec<Effect> {
        if generation != self.state.generation {
            debug!(
                stale = generation,
                current = self.state.generation,
                "discarding stale capture event"
            );
            return Vec::new();
        }
        match event {
            RecognizerEvent::Partial(text) => {
                if self.state.phase == Phase::Listening {
                    self.state.live_transcript = text;
                }
                Vec::new()
            }
            RecognizerEvent::Final(text) => self.on_final(text),
            RecognizerEvent::Error(code) => self.on_capture_error(code),
            RecognizerEvent::Ended => self.on_capture_ended(),
        }
    }

    fn on_final(&mut self, text: String) -> Vec<Effect> {
        if self.state.phase != Phase::Listening {
            return Vec::new();
        }
        self.state.live_transcript = text;
        let utterance = self.state.live_transcript.trim().to_string();
        if utterance.is_empty() {
            // Whitespace-only finals behave exactly like silence; the
            // session's Ended event decides what happens next.
            return Vec::new();
        }
        // Tear the session down eagerly so capture is inactive before any
        // playback can start; the trailing Ended is absorbed by the guards.
        self.advance_with_utterance(utterance, vec![Effect::AbortCapture])
    }

    fn advance_with_utterance(&mut self, utterance: String, mut effects: Vec<Effect>) -> Vec<Effect> {
        info!(%utterance, "utterance captured");
        self.reset_error_streak();
        self.state.phase = Phase::AwaitingReply;
        self.state.status = Some(STATUS_GOT_IT.to_string());
        effects.push(Effect::UserUtterance {
            text: utterance.clone(),
        });
        effects.push(Effect::CallGateway {
            generation: self.state.generation,
            utterance,
        });
        effects
    }

    fn on_capture_error(&mut self, code: CaptureErrorCode) -> Vec<Effect> {
        if self.state.phase != Phase::Listening {
            return Vec::new();
        }
        warn!(%code, "capture error");
        if self.state.last_error == Some(code) {
            self.state.consecutive_errors += 1;
        } else {
            self.state.last_error = Some(code);
            self.state.consecutive_errors = 1;
        }
        self.state.session_error = Some(code);
        self.state.status = Some(format!("Error: {}", code));
        Vec::new()
    }

    fn on_capture_ended(&mut self) -> Vec<Effect> {
        if self.state.phase != Phase::Listening {
            return Vec::new();
        }
        if self.state.manual_stop_requested {
            self.state.phase = Phase::Stopped;
            return Vec::new();
        }
        if let Some(code) = self.state.session_error {
            if self.state.consecutive_errors >= self.policy.max_consecutive_errors {
                warn!(
                    %code,
                    streak = self.state.consecutive_errors,
                    "repeated capture errors, giving up"
                );
                self.state.phase = Phase::Stopped;
                return Vec::new();
            }
            debug!(%code, "relisten after capture error");
            let status = format!("Error: {}", code);
            return self.begin_listening(&status, false, Vec::new());
        }
        let utterance = self.state.live_transcript.trim().to_string();
        if utterance.is_empty() {
            debug!("capture ended with no usable transcript, relistening");
            self.reset_error_streak();
            return self.begin_listening(STATUS_DIDNT_CATCH, false, Vec::new());
        }
        // The engine can end without a final result; the last partial is the
        // authoritative transcript for the utterance.
        self.advance_with_utterance(utterance, Vec::new())
    }

    fn on_gateway(&mut self, generation: u64, result: Result<String, VoiceError>) -> Vec<Effect> {
        if self.state.phase != Phase::AwaitingReply || generation != self.state.generation {
            debug!("discarding gateway resolution for a dead turn");
            return Vec::new();
        }
        match result {
            Ok(reply) if !reply.trim().is_empty() => {
                let reply = reply.trim().to_string();
                info!(%reply, "reply received, speaking");
                self.state.phase = Phase::Speaking;
                self.state.status = Some(STATUS_SPEAKING.to_string());
                vec![
                    Effect::AssistantReply { text: reply.clone() },
                    Effect::Speak { text: reply },
                ]
            }
            Ok(_) => {
                warn!("gateway returned an empty reply");
                self.begin_listening(STATUS_GATEWAY_FAILED, false, Vec::new())
            }
            Err(error) => {
                warn!(%error, "reply gateway failed");
                self.begin_listening(STATUS_GATEWAY_FAILED, false, Vec::new())
            }
        }
    }

    fn on_speak_ended(&mut self) -> Vec<Effect> {
        if self.state.phase != Phase::Speaking {
            return Vec::new();
        }
        if self.state.manual_stop_requested {
            self.state.phase = Phase::Stopped;
            self.state.status = None;
            return Vec::new();
        }
        debug!("reply finished, relistening");
        self.begin_listening(STATUS_LISTENING, false, Vec::new())
    }

    fn on_capture_start_failed(&mut self, generation: u64, error: VoiceError) -> Vec<Effect> {
        if generation != self.state.generation {
            return Vec::new();
        }
        warn!(%error, "could not start capture");
        self.state.phase = Phase::Stopped;
        self.state.status = Some(match &error {
            VoiceError::CapabilityUnavailable(_) => STATUS_UNSUPPORTED.to_string(),
            other => format!("Error: {}", other),
        });
        vec![Effect::CancelPlayback, Effect::ReleaseResources]
    }

    fn on_speak_failed(&mut self, error: VoiceError) -> Vec<Effect> {
        if self.state.phase != Phase::Speaking {
            return Vec::new();
        }
        warn!(%error, "playback failed");
        if matches!(error, VoiceError::CapabilityUnavailable(_)) {
            self.state.phase = Phase::Stopped;
            self.state.status = Some(STATUS_UNSUPPORTED.to_string());
            return vec![Effect::ReleaseResources];
        }
        // The reply could not be spoken; keep the loop alive.
        self.begin_listening(STATUS_LISTENING, false, Vec::new())
    }
}
