//! End-to-end turn-loop tests against scripted engines and a scripted gateway.
//!
//! The scripted recognizer plays the speech engine's part: tests emit the
//! events a real engine would, and assert on the published UI snapshots and
//! on what the engines and gateway were asked to do.

use colloquy_voice::turn::{
    STATUS_DIDNT_CATCH, STATUS_GATEWAY_FAILED, STATUS_LISTENING, STATUS_UNSUPPORTED,
};
use colloquy_voice::{
    CaptureErrorCode, ControllerConfig, Phase, RecognizerEvent, ScriptedGateway,
    ScriptedRecognizer, ScriptedSynthesizer, UiHandle, UiSnapshot, VoiceError,
    VoiceTurnController,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

struct Harness {
    stt: ScriptedRecognizer,
    tts: ScriptedSynthesizer,
    gateway: ScriptedGateway,
    ui: UiHandle,
    snapshots: watch::Receiver<UiSnapshot>,
}

fn spawn_harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = ControllerConfig {
        restart_delay: Duration::ZERO,
        ..ControllerConfig::default()
    };
    let stt = ScriptedRecognizer::new();
    let tts = ScriptedSynthesizer::new();
    let gateway = ScriptedGateway::new();
    let ui = VoiceTurnController::spawn(
        config,
        Arc::new(stt.clone()),
        Arc::new(tts.clone()),
        Arc::new(gateway.clone()),
    )
    .expect("controller spawns");
    let snapshots = ui.watch();
    Harness {
        stt,
        tts,
        gateway,
        ui,
        snapshots,
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<UiSnapshot>,
    what: &str,
    predicate: impl Fn(&UiSnapshot) -> bool,
) -> UiSnapshot {
    let fut = async {
        loop {
            {
                let snap = rx.borrow_and_update();
                if predicate(&snap) {
                    return snap.clone();
                }
            }
            rx.changed()
                .await
                .unwrap_or_else(|_| panic!("controller exited while waiting for {what}"));
        }
    };
    timeout(Duration::from_secs(2), fut)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Let queued events drain before asserting that nothing further happened.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

/// Wait until the recognizer has been started `n` times (i.e. the n-th
/// capture session exists and can receive scripted events).
async fn wait_for_session(stt: &ScriptedRecognizer, n: u64) {
    timeout(Duration::from_secs(2), async {
        while stt.starts() < n {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for capture session {n}"));
}

#[tokio::test]
async fn full_turn_roundtrip_relistens() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;
    assert_eq!(h.stt.starts(), 1);

    h.gateway.push_reply("hi there");
    assert!(h.stt.emit(RecognizerEvent::Final("hello".to_string())));

    wait_for(&mut h.snapshots, "speaking", |s| s.phase == Phase::Speaking).await;
    assert_eq!(h.gateway.calls(), vec!["hello".to_string()]);
    assert_eq!(h.tts.spoken(), vec!["hi there".to_string()]);
    // Turn-taking: no capture is live while the reply plays.
    assert_eq!(h.stt.live_count(), 0);

    assert!(h.tts.finish_current());
    let snap = wait_for(&mut h.snapshots, "relisten", |s| {
        s.phase == Phase::Listening
    })
    .await;
    assert_eq!(h.stt.starts(), 2);
    assert_eq!(snap.live_transcript, "");
    assert_eq!(h.tts.live_count(), 0);
}

#[tokio::test]
async fn silent_capture_relistens_without_a_gateway_call() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    assert!(h.stt.emit(RecognizerEvent::Ended));
    wait_for(&mut h.snapshots, "didn't catch that", |s| {
        s.status.as_deref() == Some(STATUS_DIDNT_CATCH)
    })
    .await;

    settle().await;
    assert_eq!(h.stt.starts(), 2);
    assert!(h.gateway.calls().is_empty());
    assert!(h.tts.spoken().is_empty());
}

#[tokio::test]
async fn whitespace_final_never_reaches_the_gateway() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    assert!(h.stt.emit(RecognizerEvent::Final("   ".to_string())));
    assert!(h.stt.emit(RecognizerEvent::Ended));
    wait_for(&mut h.snapshots, "relisten", |s| {
        s.status.as_deref() == Some(STATUS_DIDNT_CATCH)
    })
    .await;

    settle().await;
    assert_eq!(h.stt.starts(), 2);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn gateway_failure_shows_a_status_and_relistens() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    h.gateway.push_failure("service offline");
    assert!(h.stt.emit(RecognizerEvent::Final("weather".to_string())));

    let snap = wait_for(&mut h.snapshots, "failure status", |s| {
        s.status.as_deref() == Some(STATUS_GATEWAY_FAILED)
    })
    .await;
    assert_eq!(snap.phase, Phase::Listening);

    settle().await;
    assert_eq!(h.gateway.calls(), vec!["weather".to_string()]);
    assert!(h.tts.spoken().is_empty());
    assert_eq!(h.stt.starts(), 2);
}

#[tokio::test]
async fn close_while_awaiting_reply_discards_the_late_resolution() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    // No queued reply: the gateway call parks until resolved by hand.
    assert!(h.stt.emit(RecognizerEvent::Final("hello".to_string())));
    wait_for(&mut h.snapshots, "awaiting reply", |s| {
        s.phase == Phase::AwaitingReply
    })
    .await;
    timeout(Duration::from_secs(2), async {
        while h.gateway.pending_utterances().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("gateway call parks");
    assert_eq!(h.gateway.pending_utterances(), vec!["hello".to_string()]);

    h.ui.close();
    wait_for(&mut h.snapshots, "stopped", |s| s.phase == Phase::Stopped).await;

    assert!(h.gateway.resolve(Ok("too late".to_string())));
    settle().await;

    assert_eq!(h.ui.snapshot().phase, Phase::Stopped);
    assert!(h.tts.spoken().is_empty());
    assert_eq!(h.stt.starts(), 1);
    assert_eq!(h.stt.live_count(), 0);

    // Close also shuts the controller task down.
    h.ui.closed().await;
}

#[tokio::test]
async fn restart_while_speaking_cancels_playback_silently() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    h.gateway.push_reply("a very long reply");
    assert!(h.stt.emit(RecognizerEvent::Final("hello".to_string())));
    wait_for(&mut h.snapshots, "speaking", |s| s.phase == Phase::Speaking).await;

    h.ui.restart_conversation();
    let snap = wait_for(&mut h.snapshots, "relisten", |s| {
        s.phase == Phase::Listening
    })
    .await;
    assert_eq!(snap.live_transcript, "");
    assert_eq!(snap.status.as_deref(), Some(STATUS_LISTENING));

    // The cancelled utterance's completion never fires.
    assert_eq!(h.tts.cancels(), 1);
    assert!(!h.tts.finish_current());

    settle().await;
    assert_eq!(h.ui.snapshot().phase, Phase::Listening);
    assert_eq!(h.stt.starts(), 2);
    assert_eq!(h.stt.live_count(), 1);
}

#[tokio::test]
async fn toggle_off_aborts_capture_and_stays_stopped() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "stopped", |s| s.phase == Phase::Stopped).await;

    settle().await;
    assert_eq!(h.stt.aborts(), 1);
    assert_eq!(h.stt.live_count(), 0);
    // The aborted session's trailing Ended must not restart listening.
    assert_eq!(h.stt.starts(), 1);
    assert_eq!(h.ui.snapshot().phase, Phase::Stopped);

    // The mic button still works afterwards.
    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening again", |s| {
        s.phase == Phase::Listening
    })
    .await;
    assert_eq!(h.stt.starts(), 2);
}

#[tokio::test]
async fn repeated_identical_errors_stop_the_loop() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    assert!(h.stt.emit(RecognizerEvent::Error(CaptureErrorCode::PermissionDenied)));
    assert!(h.stt.emit(RecognizerEvent::Ended));
    wait_for(&mut h.snapshots, "first retry", |s| {
        s.status.as_deref() == Some("Error: not-allowed") && s.phase == Phase::Listening
    })
    .await;
    wait_for_session(&h.stt, 2).await;

    assert!(h.stt.emit(RecognizerEvent::Error(CaptureErrorCode::PermissionDenied)));
    assert!(h.stt.emit(RecognizerEvent::Ended));
    wait_for(&mut h.snapshots, "gave up", |s| s.phase == Phase::Stopped).await;

    settle().await;
    assert_eq!(h.stt.starts(), 2);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn differing_errors_keep_retrying() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    assert!(h.stt.emit(RecognizerEvent::Error(CaptureErrorCode::Network)));
    assert!(h.stt.emit(RecognizerEvent::Ended));
    wait_for(&mut h.snapshots, "network retry", |s| {
        s.status.as_deref() == Some("Error: network")
    })
    .await;
    wait_for_session(&h.stt, 2).await;

    assert!(h.stt.emit(RecognizerEvent::Error(CaptureErrorCode::NoSpeech)));
    assert!(h.stt.emit(RecognizerEvent::Ended));
    wait_for(&mut h.snapshots, "no-speech retry", |s| {
        s.status.as_deref() == Some("Error: no-speech")
    })
    .await;

    settle().await;
    assert_eq!(h.stt.starts(), 3);
    assert_eq!(h.ui.snapshot().phase, Phase::Listening);
}

#[tokio::test]
async fn unavailable_recognizer_stops_the_feature() {
    let mut h = spawn_harness();
    h.stt.set_unavailable(true);

    h.ui.toggle_mic();
    let snap = wait_for(&mut h.snapshots, "unsupported", |s| {
        s.phase == Phase::Stopped
    })
    .await;
    assert_eq!(snap.status.as_deref(), Some(STATUS_UNSUPPORTED));

    // Fatal: the controller task exits without a close intent.
    h.ui.closed().await;
    assert_eq!(h.stt.starts(), 0);
}

#[tokio::test]
async fn capture_and_playback_are_mutually_exclusive_across_a_trace() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;
    assert!(h.stt.live_count() <= 1 && h.tts.live_count() == 0);

    h.gateway.push_reply("one");
    assert!(h.stt.emit(RecognizerEvent::Final("first".to_string())));
    wait_for(&mut h.snapshots, "speaking one", |s| s.phase == Phase::Speaking).await;
    assert_eq!(h.stt.live_count(), 0);
    assert_eq!(h.tts.live_count(), 1);

    assert!(h.tts.finish_current());
    wait_for(&mut h.snapshots, "relisten", |s| s.phase == Phase::Listening).await;
    assert_eq!(h.stt.live_count(), 1);
    assert_eq!(h.tts.live_count(), 0);

    h.gateway.push_reply("two");
    assert!(h.stt.emit(RecognizerEvent::Final("second".to_string())));
    wait_for(&mut h.snapshots, "speaking two", |s| s.phase == Phase::Speaking).await;
    assert_eq!(h.stt.live_count(), 0);
    assert_eq!(h.tts.live_count(), 1);

    h.ui.close();
    wait_for(&mut h.snapshots, "stopped", |s| s.phase == Phase::Stopped).await;
    assert_eq!(h.stt.live_count(), 0);
    assert_eq!(h.tts.live_count(), 0);
}

#[tokio::test]
async fn conversation_events_record_each_exchange() {
    let mut h = spawn_harness();
    let mut events = h
        .ui
        .take_conversation_events()
        .expect("stream taken once");
    assert!(h.ui.take_conversation_events().is_none());

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    h.gateway.push_reply("hi there");
    assert!(h.stt.emit(RecognizerEvent::Final("hello".to_string())));
    wait_for(&mut h.snapshots, "speaking", |s| s.phase == Phase::Speaking).await;

    match events.recv().await.expect("user event") {
        colloquy_voice::ConversationEvent::UserUtterance { text, .. } => {
            assert_eq!(text, "hello");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match events.recv().await.expect("reply event") {
        colloquy_voice::ConversationEvent::AssistantReply { text, .. } => {
            assert_eq!(text, "hi there");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn partial_transcripts_reach_the_ui() {
    let mut h = spawn_harness();

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    assert!(h.stt.emit(RecognizerEvent::Partial("hel".to_string())));
    assert!(h.stt.emit(RecognizerEvent::Partial("hello".to_string())));
    let snap = wait_for(&mut h.snapshots, "live transcript", |s| {
        s.live_transcript == "hello"
    })
    .await;
    assert_eq!(snap.phase, Phase::Listening);
}

#[tokio::test]
async fn unavailable_synthesizer_stops_when_a_reply_arrives() {
    let mut h = spawn_harness();
    h.tts.set_unavailable(true);

    h.ui.toggle_mic();
    wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

    h.gateway.push_reply("hi");
    assert!(h.stt.emit(RecognizerEvent::Final("hello".to_string())));

    let snap = wait_for(&mut h.snapshots, "unsupported", |s| {
        s.phase == Phase::Stopped
    })
    .await;
    assert_eq!(snap.status.as_deref(), Some(STATUS_UNSUPPORTED));
    h.ui.closed().await;
}

#[tokio::test]
async fn gateway_error_values_are_opaque_to_the_loop() {
    // Different failure shapes all land on the same recovery path.
    for failure in [
        VoiceError::Gateway("connect timeout".to_string()),
        VoiceError::Gateway("chat API error 500: oops".to_string()),
        VoiceError::Gateway("chat response parse failed: eof".to_string()),
    ] {
        let mut h = spawn_harness();
        h.ui.toggle_mic();
        wait_for(&mut h.snapshots, "listening", |s| s.phase == Phase::Listening).await;

        assert!(h.stt.emit(RecognizerEvent::Final("hello".to_string())));
        wait_for(&mut h.snapshots, "awaiting", |s| s.phase == Phase::AwaitingReply).await;
        timeout(Duration::from_secs(2), async {
            while h.gateway.pending_utterances().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("gateway call parks");
        assert!(h.gateway.resolve(Err(failure)));

        let snap = wait_for(&mut h.snapshots, "failure status", |s| {
            s.status.as_deref() == Some(STATUS_GATEWAY_FAILED)
        })
        .await;
        assert_eq!(snap.phase, Phase::Listening);
    }
}
