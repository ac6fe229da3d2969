#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

use english_tutor::{ChatMessage, GatewayError, GenerationGateway, Ledger};

pub async fn open_test_ledger() -> (TempDir, Ledger) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let ledger = Ledger::open(temp_dir.path().join("tutor.db"))
        .await
        .expect("failed to open ledger");
    (temp_dir, ledger)
}

/// Builds provider output in the structured shape the tutor asks for.
pub fn record_json(reply: &str, correction: Option<&str>, new_words: &[&str], goals: &[&str], level: &str) -> String {
    serde_json::json!({
        "reply": reply,
        "feedback": {
            "positive": "Bine!",
            "correction": correction,
            "tip": "Practică zilnic."
        },
        "level": level,
        "newWords": new_words,
        "goals": goals
    })
    .to_string()
}

/// Gateway that returns queued responses in order and records every request.
pub struct ScriptedGateway {
    responses: Mutex<VecDeque<Result<String, GatewayError>>>,
    histories: Mutex<Vec<Vec<ChatMessage>>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(responses: Vec<Result<String, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            histories: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn replying(raw: impl IntoIterator<Item = String>) -> Arc<Self> {
        Self::new(raw.into_iter().map(Ok).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_history(&self) -> Option<Vec<ChatMessage>> {
        self.histories.lock().last().cloned()
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().push(history.to_vec());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or(Err(GatewayError::EmptyContent))
    }
}

/// Gateway that blocks every call until `release` is notified.
pub struct GatedGateway {
    pub release: Notify,
    pub calls: AtomicUsize,
    reply: String,
}

impl GatedGateway {
    pub fn new(reply: String) -> Arc<Self> {
        Arc::new(Self {
            release: Notify::new(),
            calls: AtomicUsize::new(0),
            reply,
        })
    }
}

#[async_trait]
impl GenerationGateway for GatedGateway {
    async fn generate(&self, _history: &[ChatMessage]) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(self.reply.clone())
    }
}
