//! Voice Chat Demo — the full turn loop with console stand-ins for the
//! speech engines.
//!
//! Each line you type plays the part of a finished utterance; replies are
//! printed instead of spoken. Set `CHAT_API_URL` in `.env` to use a real
//! reply service, otherwise an echo gateway answers locally.
//!
//! Press Ctrl+D (EOF) twice to stop the loop, or type a line and watch the
//! conversation cycle: listen → reply → "speak" → relisten.

use colloquy_voice::{
    CaptureErrorCode, CaptureOptions, ControllerConfig, ConversationEvent, HttpReplyGateway,
    Phase, RecognizerControl, RecognizerEvent, ReplyGateway, SpeechSynthesis, SpeechToText,
    SynthesizerEvent, UtteranceControl, VoiceResult, VoiceTurnController,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Recognizer that treats each console line as one utterance.
struct ConsoleRecognizer {
    lines: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl SpeechToText for ConsoleRecognizer {
    fn start(
        &self,
        _options: &CaptureOptions,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> VoiceResult<Box<dyn RecognizerControl>> {
        let alive = Arc::new(AtomicBool::new(true));
        let lines = Arc::clone(&self.lines);
        let task_alive = Arc::clone(&alive);
        let task_events = events.clone();
        tokio::spawn(async move {
            let line = { lines.lock().await.recv().await };
            if !task_alive.swap(false, Ordering::SeqCst) {
                return; // aborted while waiting for input
            }
            match line {
                Some(text) => {
                    let _ = task_events.send(RecognizerEvent::Partial(text.clone()));
                    let _ = task_events.send(RecognizerEvent::Final(text));
                }
                None => {
                    // Console closed: report it like a dead audio device so
                    // the repeat-error cap winds the loop down.
                    let _ = task_events
                        .send(RecognizerEvent::Error(CaptureErrorCode::AudioCapture));
                }
            }
            let _ = task_events.send(RecognizerEvent::Ended);
        });
        Ok(Box::new(ConsoleControl { alive, events }))
    }
}

struct ConsoleControl {
    alive: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<RecognizerEvent>,
}

impl ConsoleControl {
    fn finish(&mut self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(RecognizerEvent::Ended);
        }
    }
}

impl RecognizerControl for ConsoleControl {
    fn stop(&mut self) {
        self.finish();
    }

    fn abort(&mut self) {
        self.finish();
    }
}

/// Synthesizer that prints the reply and completes immediately.
struct ConsolePrinter;

impl SpeechSynthesis for ConsolePrinter {
    fn speak(
        &self,
        text: &str,
        _locale: &str,
        events: mpsc::UnboundedSender<SynthesizerEvent>,
    ) -> VoiceResult<Box<dyn UtteranceControl>> {
        println!("(spoken) {text}");
        let _ = events.send(SynthesizerEvent::SpeakEnded);
        Ok(Box::new(NoopUtterance))
    }
}

struct NoopUtterance;

impl UtteranceControl for NoopUtterance {
    fn cancel(&mut self) {}
}

/// Local fallback when no chat endpoint is configured.
struct EchoGateway;

#[async_trait::async_trait]
impl ReplyGateway for EchoGateway {
    async fn reply(&self, utterance: &str) -> VoiceResult<String> {
        Ok(format!("You said: {}.", utterance.trim()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Voice Chat Demo — type a line to speak; Ctrl+D to close.");

    let gateway: Arc<dyn ReplyGateway> = match HttpReplyGateway::from_env() {
        Ok(gateway) => {
            info!("Using the HTTP reply gateway from CHAT_API_URL.");
            Arc::new(gateway)
        }
        Err(_) => {
            info!("CHAT_API_URL not set; echoing replies locally.");
            Arc::new(EchoGateway)
        }
    };

    // Pump stdin into a line channel shared by all capture sessions.
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
        // Dropping the sender signals EOF to the recognizer.
    });
    let recognizer = ConsoleRecognizer {
        lines: Arc::new(tokio::sync::Mutex::new(line_rx)),
    };

    let mut ui = VoiceTurnController::spawn(
        ControllerConfig::default(),
        Arc::new(recognizer),
        Arc::new(ConsolePrinter),
        gateway,
    )?;

    let mut conversation = ui.take_conversation_events().expect("events taken once");
    tokio::spawn(async move {
        while let Some(event) = conversation.recv().await {
            match event {
                ConversationEvent::UserUtterance { text, .. } => info!("you: {text}"),
                ConversationEvent::AssistantReply { text, .. } => info!("assistant: {text}"),
            }
        }
    });

    ui.toggle_mic();

    let mut snapshots = ui.watch();
    let mut last_status: Option<String> = None;
    loop {
        if snapshots.changed().await.is_err() {
            break;
        }
        let snap = snapshots.borrow_and_update().clone();
        if snap.status != last_status {
            if let Some(status) = &snap.status {
                info!("{status}");
            }
            last_status = snap.status.clone();
        }
        if snap.phase == Phase::Stopped {
            ui.close();
        }
    }
    ui.closed().await;
    Ok(())
}
