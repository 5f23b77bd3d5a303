//! # Colloquy Voice — hands-free conversational turn loop
//!
//! Coordinates speech capture, remote reply generation, and speech playback
//! into a continuous "listen → transcribe → send → speak reply → relisten"
//! loop, with manual interruption, auto-restart on silence, and strict
//! turn-taking (capture and playback are never live at once).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    VoiceTurnController                       │
//! │                                                              │
//! │   UI intents ──┐                       ┌── CaptureSlot       │
//! │                ▼                       │   (SpeechToText)    │
//! │         ┌─────────────┐    effects     │                     │
//! │         │ TurnMachine │───────────────►├── PlaybackSlot      │
//! │         │ (reducer)   │                │   (SpeechSynthesis) │
//! │         └─────────────┘                │                     │
//! │                ▲                       └── ReplyGateway      │
//! │                │        one serialized     (HTTP /chat)      │
//! │                └──────── event queue ◄─────────────────      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Engine callbacks are tagged with the capture session's generation; the
//! machine discards anything stale, which is what keeps a just-aborted
//! session's trailing events from restarting a newer one.

pub mod capability;
pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod playback;
pub mod turn;
pub mod ui;

pub use capability::{
    CaptureOptions, RecognizerControl, RecognizerEvent, ScriptedRecognizer, ScriptedSynthesizer,
    SpeechSynthesis, SpeechToText, SynthesizerEvent, UtteranceControl,
};
pub use capture::{CaptureSession, CaptureSlot};
pub use config::ControllerConfig;
pub use controller::VoiceTurnController;
pub use error::{CaptureErrorCode, VoiceError, VoiceResult};
pub use gateway::{HttpReplyGateway, ReplyGateway, ScriptedGateway};
pub use playback::{PlaybackSession, PlaybackSlot};
pub use turn::{Effect, Phase, TurnInput, TurnMachine, TurnPolicy, TurnState};
pub use ui::{ConversationEvent, UiHandle, UiSnapshot};
