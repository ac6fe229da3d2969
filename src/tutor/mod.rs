pub mod events;
pub mod parser;
pub mod prompt;
pub mod types;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::operations::{goals, messages, sessions, stats, vocabulary};
use crate::db::{CumulativeStats, Ledger, LedgerError};
use crate::gateway::{GatewayError, GenerationGateway};

use self::events::{EventBus, EventEnvelope, TutorEvent};
use self::types::{ChatMessage, Level, Role, TutorReply};

#[derive(Debug, Error)]
pub enum TutorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Blank input; nothing was recorded.
    Ignored,
    /// A previous turn is still awaiting its response.
    Busy,
    Replied(TutorReply),
    /// The gateway failed; carries the message shown in place of a reply.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: i64,
    pub level: Level,
    pub user_messages: i64,
    pub corrections: i64,
    pub words_learned: i64,
    pub accuracy_pct: f64,
    pub goals: Vec<String>,
}

/// `max(0, 100 - corrections / max(user_messages, 1) * 100)`
pub fn accuracy_pct(corrections: i64, user_messages: i64) -> f64 {
    let ratio = corrections as f64 / user_messages.max(1) as f64;
    (100.0 - ratio * 100.0).max(0.0)
}

#[derive(Debug, Default)]
struct SessionState {
    transcript: Vec<ChatMessage>,
    corrections_count: i64,
    words_learned: HashSet<String>,
    level: Level,
    goals: Vec<String>,
}

impl SessionState {
    fn user_message_count(&self) -> i64 {
        self.transcript.iter().filter(|m| m.role == Role::User).count() as i64
    }

    fn accuracy(&self) -> f64 {
        accuracy_pct(self.corrections_count, self.user_message_count())
    }
}

struct TurnGuard<'a>(&'a AtomicBool);

impl<'a> TurnGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Live conversation for one ledger session. Runs at most one turn at a time.
pub struct TutorSession {
    session_id: i64,
    ledger: Ledger,
    gateway: Arc<dyn GenerationGateway>,
    events: EventBus,
    awaiting_response: AtomicBool,
    state: Mutex<SessionState>,
}

impl TutorSession {
    pub async fn start(
        ledger: Ledger,
        gateway: Arc<dyn GenerationGateway>,
        level: Level,
    ) -> Result<Self, TutorError> {
        let session_id = sessions::create_session(&ledger, level).await?;
        info!(session_id, %level, "tutor session started");

        let state = SessionState {
            level,
            ..SessionState::default()
        };
        Ok(Self::from_parts(session_id, ledger, gateway, state))
    }

    /// Rebuilds transcript, goals and counters of a stored session. The correction
    /// count comes from persisted stats, the word set from the vocabulary rows.
    pub async fn resume(
        ledger: Ledger,
        gateway: Arc<dyn GenerationGateway>,
        session_id: i64,
    ) -> Result<Self, TutorError> {
        let session = sessions::get_session(&ledger, session_id)
            .await?
            .ok_or(LedgerError::SessionNotFound(session_id))?;

        let transcript = messages::get_messages(&ledger, session_id)
            .await?
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect::<Vec<_>>();
        let goals = goals::get_goals(&ledger, session_id).await?;
        let corrections_count = stats::get_stats(&ledger, session_id)
            .await?
            .map(|s| s.corrections_count)
            .unwrap_or(0);
        let words_learned = vocabulary::get_vocabulary(&ledger, session_id)
            .await?
            .into_iter()
            .collect::<HashSet<_>>();

        info!(
            session_id,
            messages = transcript.len(),
            corrections_count,
            words = words_learned.len(),
            "tutor session resumed"
        );

        let state = SessionState {
            transcript,
            corrections_count,
            words_learned,
            level: session.level,
            goals,
        };
        Ok(Self::from_parts(session_id, ledger, gateway, state))
    }

    fn from_parts(
        session_id: i64,
        ledger: Ledger,
        gateway: Arc<dyn GenerationGateway>,
        state: SessionState,
    ) -> Self {
        Self {
            session_id,
            ledger,
            gateway,
            events: EventBus::new(),
            awaiting_response: AtomicBool::new(false),
            state: Mutex::new(state),
        }
    }

    /// Runs one turn. Storage failures are returned as errors; gateway failures
    /// end the turn with [`TurnOutcome::Failed`] and an `Error` event.
    pub async fn submit(&self, text: &str) -> Result<TurnOutcome, TutorError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Ignored);
        }

        let Some(_turn) = TurnGuard::acquire(&self.awaiting_response) else {
            warn!(session_id = self.session_id, "turn rejected, previous turn still awaiting response");
            return Ok(TurnOutcome::Busy);
        };

        messages::append_message(&self.ledger, self.session_id, Role::User, text).await?;
        let history = {
            let mut state = self.state.lock();
            state.transcript.push(ChatMessage::user(text));
            state.transcript.clone()
        };

        let raw = match self.gateway.generate(&history).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(session_id = self.session_id, error = %err, unconfigured = err.is_unconfigured(), "generation failed");
                let message = failure_message(&err);
                self.events.publish(TutorEvent::Error {
                    session_id: self.session_id,
                    message: message.clone(),
                });
                return Ok(TurnOutcome::Failed(message));
            }
        };

        let reply = parser::parse_response(&raw);
        if let Err(err) = self.apply_reply(&reply).await {
            self.events.publish(TutorEvent::Error {
                session_id: self.session_id,
                message: format!("Could not save the reply: {err}"),
            });
            return Err(err);
        }

        info!(
            session_id = self.session_id,
            correction = reply.feedback.has_correction(),
            new_words = reply.new_words.len(),
            goals = reply.goals.len(),
            "turn completed"
        );
        self.events.publish(TutorEvent::ReplyReady {
            session_id: self.session_id,
            reply: reply.clone(),
        });
        Ok(TurnOutcome::Replied(reply))
    }

    /// Runs [`submit`](Self::submit) on a separate task.
    pub fn spawn_submit(
        self: &Arc<Self>,
        text: impl Into<String>,
    ) -> JoinHandle<Result<TurnOutcome, TutorError>> {
        let session = Arc::clone(self);
        let text = text.into();
        tokio::spawn(async move { session.submit(&text).await })
    }

    async fn apply_reply(&self, reply: &TutorReply) -> Result<(), TutorError> {
        let session_id = self.session_id;
        let feedback = &reply.feedback;

        let message_id =
            messages::append_message(&self.ledger, session_id, Role::Assistant, &reply.reply).await?;
        messages::record_feedback(
            &self.ledger,
            message_id,
            &feedback.positive,
            feedback.correction.as_deref(),
            &feedback.tip,
        )
        .await?;

        vocabulary::append_vocabulary(&self.ledger, &reply.new_words, session_id).await?;
        self.state.lock().words_learned.extend(reply.new_words.iter().cloned());

        if !reply.goals.is_empty() {
            goals::replace_goals(&self.ledger, &reply.goals, session_id).await?;
            self.state.lock().goals = reply.goals.clone();
            self.events.publish(TutorEvent::GoalsChanged {
                session_id,
                goals: reply.goals.clone(),
            });
        }

        let (accuracy, words_learned, corrections_count, current_level) = {
            let mut state = self.state.lock();
            if feedback.has_correction() {
                state.corrections_count += 1;
            }
            (
                state.accuracy(),
                state.words_learned.len() as i64,
                state.corrections_count,
                state.level,
            )
        };
        stats::update_stats(&self.ledger, session_id, accuracy, words_learned, corrections_count).await?;

        if let Some(level) = reply.level.filter(|level| *level != current_level) {
            sessions::update_session_level(&self.ledger, session_id, level).await?;
            self.state.lock().level = level;
            info!(session_id, from = %current_level, to = %level, "level changed");
        }

        self.state.lock().transcript.push(ChatMessage::assistant(reply.reply.clone()));
        Ok(())
    }

    pub async fn add_goal(&self, text: &str) -> Result<bool, TutorError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }

        goals::add_goal(&self.ledger, text, self.session_id).await?;
        let goals = {
            let mut state = self.state.lock();
            state.goals.push(text.to_string());
            state.goals.clone()
        };
        debug!(session_id = self.session_id, goal = text, "goal added");
        self.events.publish(TutorEvent::GoalsChanged {
            session_id: self.session_id,
            goals,
        });
        Ok(true)
    }

    /// Returns whether any goal matched `text` exactly.
    pub async fn delete_goal(&self, text: &str) -> Result<bool, TutorError> {
        let removed = goals::delete_goal(&self.ledger, text, self.session_id).await?;
        if removed == 0 {
            return Ok(false);
        }

        let goals = {
            let mut state = self.state.lock();
            state.goals.retain(|g| g != text);
            state.goals.clone()
        };
        debug!(session_id = self.session_id, goal = text, removed, "goal deleted");
        self.events.publish(TutorEvent::GoalsChanged {
            session_id: self.session_id,
            goals,
        });
        Ok(true)
    }

    /// Recomputes stats from the in-memory counters and overwrites the stored row.
    pub async fn flush_stats(&self) -> Result<(), TutorError> {
        let (accuracy, words_learned, corrections_count) = {
            let state = self.state.lock();
            (
                state.accuracy(),
                state.words_learned.len() as i64,
                state.corrections_count,
            )
        };
        stats::update_stats(&self.ledger, self.session_id, accuracy, words_learned, corrections_count)
            .await?;
        Ok(())
    }

    /// Final stats flush, then releases the ledger connections.
    pub async fn shutdown(&self) -> Result<(), TutorError> {
        self.flush_stats().await?;
        info!(session_id = self.session_id, "tutor session closed");
        self.ledger.close().await;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response.load(Ordering::Acquire)
    }

    pub fn level(&self) -> Level {
        self.state.lock().level
    }

    pub fn accuracy(&self) -> f64 {
        self.state.lock().accuracy()
    }

    pub fn corrections_count(&self) -> i64 {
        self.state.lock().corrections_count
    }

    pub fn user_message_count(&self) -> i64 {
        self.state.lock().user_message_count()
    }

    pub fn words_learned(&self) -> usize {
        self.state.lock().words_learned.len()
    }

    /// Distinct words, sorted.
    pub fn distinct_words(&self) -> Vec<String> {
        let mut words: Vec<String> = self.state.lock().words_learned.iter().cloned().collect();
        words.sort();
        words
    }

    pub fn goals(&self) -> Vec<String> {
        self.state.lock().goals.clone()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.state.lock().transcript.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            session_id: self.session_id,
            level: state.level,
            user_messages: state.user_message_count(),
            corrections: state.corrections_count,
            words_learned: state.words_learned.len() as i64,
            accuracy_pct: state.accuracy(),
            goals: state.goals.clone(),
        }
    }

    pub async fn cumulative(&self) -> Result<CumulativeStats, TutorError> {
        Ok(stats::cumulative_stats(&self.ledger).await?)
    }
}

fn failure_message(err: &GatewayError) -> String {
    if err.is_unconfigured() {
        format!("No API key: {err}")
    } else {
        format!("API error: {err}")
    }
}
