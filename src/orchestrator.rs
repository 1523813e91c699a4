//! Drives a single user turn: append the question, ask the completion
//! exchange, append whatever comes back.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::completion::{CompletionExchange, ExchangeRequest};
use crate::prompt::{DEFAULT_HISTORY_WINDOW, HistoryEntry, recent};
use crate::repository::SessionRepository;
use crate::session::Message;
use crate::storage::SessionStore;

pub const EMPTY_REPLY_FALLBACK: &str = "Sorry, I could not generate a response at this time.";
pub const FAILURE_FALLBACK: &str =
    "I'm sorry, I'm having trouble connecting right now. Please try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Blank,
    Busy,
    UnknownSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The exchange answered; its text (or the empty-reply fallback) was appended.
    Answered,
    /// The exchange failed; the apology was appended instead.
    Fallback,
    Rejected(RejectReason),
}

pub type SharedRepository<S> = Arc<Mutex<SessionRepository<S>>>;

pub struct ChatOrchestrator<S: SessionStore, E: CompletionExchange> {
    repo: SharedRepository<S>,
    exchange: E,
    in_flight: Arc<StdMutex<HashSet<Uuid>>>,
    history_window: usize,
}

/// Marks a session busy until dropped.
struct InFlight {
    set: Arc<StdMutex<HashSet<Uuid>>>,
    session_id: Uuid,
}

impl InFlight {
    fn acquire(set: &Arc<StdMutex<HashSet<Uuid>>>, session_id: Uuid) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        guard.insert(session_id).then(|| Self { set: set.clone(), session_id })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.session_id);
    }
}

impl<S: SessionStore, E: CompletionExchange> ChatOrchestrator<S, E> {
    pub fn new(repo: SharedRepository<S>, exchange: E) -> Self {
        Self {
            repo,
            exchange,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn repository(&self) -> &SharedRepository<S> {
        &self.repo
    }

    pub fn is_busy(&self, session_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&session_id)
    }

    #[tracing::instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn send_message(&self, session_id: Uuid, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Rejected(RejectReason::Blank);
        }
        let Some(_busy) = InFlight::acquire(&self.in_flight, session_id) else {
            tracing::debug!("send already outstanding");
            return SendOutcome::Rejected(RejectReason::Busy);
        };

        let history = {
            let mut repo = self.repo.lock().await;
            let Some(session) = repo.session(session_id) else {
                return SendOutcome::Rejected(RejectReason::UnknownSession);
            };
            let history: Vec<HistoryEntry> = recent(&session.messages, self.history_window)
                .iter()
                .map(|m| HistoryEntry { content: m.content.clone(), is_user: m.is_user })
                .collect();
            repo.add_message(session_id, Message::user(text)).await;
            history
        };

        let req = ExchangeRequest { message: text.to_string(), conversation_history: history };
        let (reply, outcome) = match self.exchange.exchange(req).await {
            Ok(reply) if reply.response.trim().is_empty() => {
                (EMPTY_REPLY_FALLBACK.to_string(), SendOutcome::Answered)
            }
            Ok(reply) => (reply.response, SendOutcome::Answered),
            Err(e) => {
                tracing::warn!(error = %e, "completion exchange failed");
                metrics::counter!("chat_send_failures_total").increment(1);
                (FAILURE_FALLBACK.to_string(), SendOutcome::Fallback)
            }
        };

        self.repo.lock().await.add_message(session_id, Message::assistant(reply)).await;
        outcome
    }
}
