//! Capability seams for the host's speech engines.
//!
//! The controller never reaches for ambient globals: the speech-to-text and
//! speech-synthesis engines are injected behind these traits at construction.
//! Scripted implementations live here too, so tests and demos can replay
//! deterministic event sequences without real engines or timers.

use crate::error::{CaptureErrorCode, VoiceError, VoiceResult};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Options for one capture session.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// BCP-47 locale tag passed to the engine (single supported value).
    pub locale: String,
    /// Whether the engine should deliver interim (partial) transcripts.
    pub interim_results: bool,
    /// Whether the engine should keep capturing across pauses.
    pub continuous: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            interim_results: true,
            continuous: false,
        }
    }
}

/// Events a speech-to-text engine emits for one capture session, in engine order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Full current-best transcript so far; supersedes any previous partial.
    Partial(String),
    /// The engine judged the utterance complete. At most once per session.
    Final(String),
    /// Engine-level failure. No final result follows.
    Error(CaptureErrorCode),
    /// Terminal event; exactly once per session, after any final or error.
    Ended,
}

/// Completion signal from a speech-synthesis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesizerEvent {
    /// The utterance finished playing. Never delivered for a cancelled utterance.
    SpeakEnded,
}

/// Host speech-to-text engine. One call to `start` is one capture session.
pub trait SpeechToText: Send + Sync {
    /// Begin a capture session; events arrive on `events` in engine order.
    /// Fails with `CapabilityUnavailable` when the host has no recognizer.
    fn start(
        &self,
        options: &CaptureOptions,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> VoiceResult<Box<dyn RecognizerControl>>;
}

/// Control surface for a live capture session.
pub trait RecognizerControl: Send {
    /// Graceful end; the engine may still deliver a final result before `Ended`.
    fn stop(&mut self);
    /// Immediate end; pending finals are suppressed, only `Ended` follows.
    fn abort(&mut self);
}

/// Host speech-synthesis engine.
pub trait SpeechSynthesis: Send + Sync {
    /// Speak `text`; `SpeakEnded` arrives on `events` when playback completes
    /// naturally. Fails with `CapabilityUnavailable` when the host cannot
    /// synthesize speech.
    fn speak(
        &self,
        text: &str,
        locale: &str,
        events: mpsc::UnboundedSender<SynthesizerEvent>,
    ) -> VoiceResult<Box<dyn UtteranceControl>>;
}

/// Control surface for an in-flight utterance.
pub trait UtteranceControl: Send {
    /// Stop playback immediately. The completion event is never delivered afterward.
    fn cancel(&mut self);
}

// -----------------------------------------------------------------------------
// Scripted engines for tests and demos
// -----------------------------------------------------------------------------

/// Deterministic recognizer: the caller plays the engine's part.
///
/// `start` registers a live session; `emit` delivers events to the most
/// recent live session as if the engine produced them. `abort` delivers
/// `Ended` and nothing else; `stop` does the same (script a final explicitly
/// with `emit` first when a graceful stop should still transcribe).
#[derive(Clone, Default)]
pub struct ScriptedRecognizer {
    inner: Arc<Mutex<RecognizerScript>>,
}

#[derive(Default)]
struct RecognizerScript {
    unavailable: bool,
    sessions: Vec<ScriptedCaptureSession>,
    starts: u64,
    aborts: u64,
}

struct ScriptedCaptureSession {
    events: Option<mpsc::UnboundedSender<RecognizerEvent>>,
}

impl RecognizerScript {
    fn end_session(&mut self, index: usize) {
        if let Some(tx) = self.sessions[index].events.take() {
            let _ = tx.send(RecognizerEvent::Ended);
        }
    }
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a host without speech-to-text; subsequent `start`s fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Deliver an event to the most recent live session. Returns false when
    /// no session is live. `Ended` also terminates that session.
    pub fn emit(&self, event: RecognizerEvent) -> bool {
        let mut script = self.inner.lock().unwrap();
        let Some(index) = script
            .sessions
            .iter()
            .rposition(|s| s.events.is_some())
        else {
            return false;
        };
        if event == RecognizerEvent::Ended {
            script.end_session(index);
            return true;
        }
        script.sessions[index]
            .events
            .as_ref()
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Total sessions ever started.
    pub fn starts(&self) -> u64 {
        self.inner.lock().unwrap().starts
    }

    /// Total sessions torn down via `abort`.
    pub fn aborts(&self) -> u64 {
        self.inner.lock().unwrap().aborts
    }

    /// Sessions currently live. The single-capture invariant means this is
    /// always 0 or 1 when driven by the controller.
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .iter()
            .filter(|s| s.events.is_some())
            .count()
    }
}

impl SpeechToText for ScriptedRecognizer {
    fn start(
        &self,
        _options: &CaptureOptions,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> VoiceResult<Box<dyn RecognizerControl>> {
        let mut script = self.inner.lock().unwrap();
        if script.unavailable {
            return Err(VoiceError::CapabilityUnavailable(
                "speech capture".to_string(),
            ));
        }
        script.sessions.push(ScriptedCaptureSession {
            events: Some(events),
        });
        script.starts += 1;
        let index = script.sessions.len() - 1;
        Ok(Box::new(ScriptedRecognizerControl {
            inner: Arc::clone(&self.inner),
            index,
        }))
    }
}

struct ScriptedRecognizerControl {
    inner: Arc<Mutex<RecognizerScript>>,
    index: usize,
}

impl RecognizerControl for ScriptedRecognizerControl {
    fn stop(&mut self) {
        let mut script = self.inner.lock().unwrap();
        script.end_session(self.index);
    }

    fn abort(&mut self) {
        let mut script = self.inner.lock().unwrap();
        if script.sessions[self.index].events.is_some() {
            script.aborts += 1;
        }
        script.end_session(self.index);
    }
}

/// Deterministic synthesizer: records every requested utterance and lets the
/// caller decide when (and whether) playback completes.
#[derive(Clone, Default)]
pub struct ScriptedSynthesizer {
    inner: Arc<Mutex<SynthesizerScript>>,
}

#[derive(Default)]
struct SynthesizerScript {
    unavailable: bool,
    utterances: Vec<ScriptedUtterance>,
    cancels: u64,
}

struct ScriptedUtterance {
    text: String,
    events: Option<mpsc::UnboundedSender<SynthesizerEvent>>,
}

impl ScriptedSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a host without speech synthesis; subsequent `speak`s fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Complete the most recent in-flight utterance. Returns false when
    /// nothing is in flight (e.g. it was cancelled; cancellation is silent).
    pub fn finish_current(&self) -> bool {
        let mut script = self.inner.lock().unwrap();
        let Some(index) = script
            .utterances
            .iter()
            .rposition(|u| u.events.is_some())
        else {
            return false;
        };
        script.utterances[index]
            .events
            .take()
            .map(|tx| tx.send(SynthesizerEvent::SpeakEnded).is_ok())
            .unwrap_or(false)
    }

    /// Every text ever requested, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .utterances
            .iter()
            .map(|u| u.text.clone())
            .collect()
    }

    /// Utterances currently in flight (0 or 1 when driven by the controller).
    pub fn live_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .utterances
            .iter()
            .filter(|u| u.events.is_some())
            .count()
    }

    /// Total cancelled utterances.
    pub fn cancels(&self) -> u64 {
        self.inner.lock().unwrap().cancels
    }
}

impl SpeechSynthesis for ScriptedSynthesizer {
    fn speak(
        &self,
        text: &str,
        _locale: &str,
        events: mpsc::UnboundedSender<SynthesizerEvent>,
    ) -> VoiceResult<Box<dyn UtteranceControl>> {
        let mut script = self.inner.lock().unwrap();
        if script.unavailable {
            return Err(VoiceError::CapabilityUnavailable(
                "speech synthesis".to_string(),
            ));
        }
        script.utterances.push(ScriptedUtterance {
            text: text.to_string(),
            events: Some(events),
        });
        let index = script.utterances.len() - 1;
        Ok(Box::new(ScriptedUtteranceControl {
            inner: Arc::clone(&self.inner),
            index,
        }))
    }
}

struct ScriptedUtteranceControl {
    inner: Arc<Mutex<SynthesizerScript>>,
    index: usize,
}

impl UtteranceControl for ScriptedUtteranceControl {
    fn cancel(&mut self) {
        let mut script = self.inner.lock().unwrap();
        if script.utterances[self.index].events.take().is_some() {
            script.cancels += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_options_defaults() {
        let options = CaptureOptions::default();
        assert_eq!(options.locale, "en-US");
        assert!(options.interim_results);
        assert!(!options.continuous);
    }

    #[tokio::test]
    async fn scripted_recognizer_delivers_to_latest_session() {
        let recognizer = ScriptedRecognizer::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        let mut first = recognizer.start(&CaptureOptions::default(), tx_a).unwrap();
        let _second = recognizer.start(&CaptureOptions::default(), tx_b).unwrap();
        assert_eq!(recognizer.live_count(), 2);

        assert!(recognizer.emit(RecognizerEvent::Partial("hi".to_string())));
        assert_eq!(
            rx_b.recv().await,
            Some(RecognizerEvent::Partial("hi".to_string()))
        );

        first.abort();
        assert_eq!(rx_a.recv().await, Some(RecognizerEvent::Ended));
        assert_eq!(rx_a.recv().await, None);
        assert_eq!(recognizer.live_count(), 1);
        assert_eq!(recognizer.aborts(), 1);
    }

    #[tokio::test]
    async fn scripted_recognizer_abort_is_idempotent() {
        let recognizer = ScriptedRecognizer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut control = recognizer.start(&CaptureOptions::default(), tx).unwrap();

        control.abort();
        control.abort();
        assert_eq!(recognizer.aborts(), 1);
        assert_eq!(rx.recv().await, Some(RecognizerEvent::Ended));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn unavailable_recognizer_fails_to_start() {
        let recognizer = ScriptedRecognizer::new();
        recognizer.set_unavailable(true);
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = recognizer.start(&CaptureOptions::default(), tx);
        assert!(matches!(
            result.err(),
            Some(VoiceError::CapabilityUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_utterance_never_completes() {
        let synthesizer = ScriptedSynthesizer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut control = synthesizer.speak("hello", "en-US", tx).unwrap();

        control.cancel();
        assert!(!synthesizer.finish_current());
        assert_eq!(rx.recv().await, None);
        assert_eq!(synthesizer.cancels(), 1);
        assert_eq!(synthesizer.spoken(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn finished_utterance_signals_once() {
        let synthesizer = ScriptedSynthesizer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _control = synthesizer.speak("hello", "en-US", tx).unwrap();

        assert!(synthesizer.finish_current());
        assert!(!synthesizer.finish_current());
        assert_eq!(rx.recv().await, Some(SynthesizerEvent::SpeakEnded));
        assert_eq!(rx.recv().await, None);
    }
}
