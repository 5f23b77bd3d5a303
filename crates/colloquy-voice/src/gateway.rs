//! ReplyGateway — the remote service that turns a user utterance into a reply.
//!
//! The core makes exactly one gateway call per utterance and never retries;
//! all failures collapse into one opaque `Gateway` error, and the loop
//! recovers by relistening.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Remote reply service.
#[async_trait::async_trait]
pub trait ReplyGateway: Send + Sync {
    /// Produce a reply for a non-empty, trimmed utterance.
    async fn reply(&self, utterance: &str) -> VoiceResult<String>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    reply: Option<String>,
}

/// HTTP reply gateway: POST `{ "message": ... }`, expect `{ "reply": ... }`.
/// A missing or empty `reply` field yields "No response received.".
pub struct HttpReplyGateway {
    url: String,
    client: reqwest::Client,
}

impl HttpReplyGateway {
    /// Create a gateway for the given chat endpoint URL.
    pub fn new(url: impl Into<String>) -> VoiceResult<Self> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(VoiceError::Config("chat endpoint URL is empty".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Gateway(e.to_string()))?;
        Ok(Self { url, client })
    }

    /// Build from the `CHAT_API_URL` environment variable.
    pub fn from_env() -> VoiceResult<Self> {
        let url = std::env::var("CHAT_API_URL")
            .map_err(|_| VoiceError::Config("CHAT_API_URL not set".to_string()))?;
        Self::new(url)
    }
}

#[async_trait::async_trait]
impl ReplyGateway for HttpReplyGateway {
    async fn reply(&self, utterance: &str) -> VoiceResult<String> {
        let res = self
            .client
            .post(&self.url)
            .json(&ChatRequest { message: utterance })
            .send()
            .await
            .map_err(|e| VoiceError::Gateway(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Gateway(format!(
                "chat API error {}: {}",
                status, body
            )));
        }
        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Gateway(format!("chat response parse failed: {}", e)))?;
        let reply = parsed
            .reply
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "No response received.".to_string());
        Ok(reply)
    }
}

/// Deterministic gateway for tests: replies can be queued up front or a call
/// can be left parked and resolved by hand, which lets a test interleave UI
/// intents with an in-flight request.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    inner: Arc<Mutex<GatewayScript>>,
}

#[derive(Default)]
struct GatewayScript {
    queued: VecDeque<VoiceResult<String>>,
    pending: VecDeque<PendingCall>,
    calls: Vec<String>,
}

struct PendingCall {
    utterance: String,
    respond: oneshot::Sender<VoiceResult<String>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply served immediately to the next call.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .queued
            .push_back(Ok(reply.into()));
    }

    /// Queue a failure served immediately to the next call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.inner
            .lock()
            .unwrap()
            .queued
            .push_back(Err(VoiceError::Gateway(message.into())));
    }

    /// Resolve the oldest parked call. Returns false when none is parked.
    pub fn resolve(&self, result: VoiceResult<String>) -> bool {
        let pending = self.inner.lock().unwrap().pending.pop_front();
        match pending {
            Some(call) => call.respond.send(result).is_ok(),
            None => false,
        }
    }

    /// Utterances received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Utterances whose calls are parked awaiting `resolve`.
    pub fn pending_utterances(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .pending
            .iter()
            .map(|c| c.utterance.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl ReplyGateway for ScriptedGateway {
    async fn reply(&self, utterance: &str) -> VoiceResult<String> {
        let rx = {
            let mut script = self.inner.lock().unwrap();
            script.calls.push(utterance.to_string());
            if let Some(result) = script.queued.pop_front() {
                return result;
            }
            let (tx, rx) = oneshot::channel();
            script.pending.push_back(PendingCall {
                utterance: utterance.to_string(),
                respond: tx,
            });
            rx
        };
        rx.await
            .unwrap_or_else(|_| Err(VoiceError::Gateway("scripted gateway dropped".to_string())))
    }
}
