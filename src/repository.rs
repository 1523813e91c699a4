//! In-memory owner of the chat sessions and the active selection.
//!
//! Every mutation is written through to the [`SessionStore`] and announced on
//! a broadcast channel so front ends can re-render without polling.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::session::{ChatSession, Message};
use crate::storage::{SessionStore, StoreError};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created { session_id: Uuid },
    Selected { session_id: Uuid },
    Archived { session_id: Uuid },
    Deleted { session_id: Uuid },
    MessageAdded { session_id: Uuid, message: Message },
    Retitled { session_id: Uuid, title: String },
}

pub struct SessionRepository<S: SessionStore> {
    store: S,
    // most recently created first
    sessions: Vec<ChatSession>,
    active_id: Option<Uuid>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: SessionStore> SessionRepository<S> {
    /// Loads the persisted sessions and picks the active one, creating a
    /// session whenever no non-archived one is available.
    ///
    /// A store that cannot be read fails here, before anything is saved.
    pub async fn initialize(store: S) -> Result<Self, StoreError> {
        let sessions = store.load().await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut repo = Self { store, sessions, active_id: None, events };

        match repo.most_recent_open(None) {
            Some(id) => {
                repo.active_id = Some(id);
                tracing::info!(sessions = repo.sessions.len(), active = %id, "restored chat sessions");
            }
            None => {
                tracing::info!(sessions = repo.sessions.len(), "no open session found, starting a new one");
                repo.create_session().await;
            }
        }
        Ok(repo)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn session(&self, id: Uuid) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<Uuid> {
        self.active_id
    }

    pub fn active_session(&self) -> Option<&ChatSession> {
        self.active_id.and_then(|id| self.session(id))
    }

    pub fn active_sessions(&self) -> impl Iterator<Item = &ChatSession> {
        self.sessions.iter().filter(|s| !s.is_archived)
    }

    pub fn archived_sessions(&self) -> impl Iterator<Item = &ChatSession> {
        self.sessions.iter().filter(|s| s.is_archived)
    }

    pub async fn create_session(&mut self) -> ChatSession {
        let session = self.insert_new_session();
        self.persist().await;
        session
    }

    /// Selection of an unknown or archived id is ignored and the previous
    /// selection stays.
    pub fn select_session(&mut self, id: Uuid) -> bool {
        match self.session(id) {
            Some(s) if !s.is_archived => {
                self.active_id = Some(id);
                self.emit(SessionEvent::Selected { session_id: id });
                true
            }
            Some(_) => {
                tracing::debug!(session_id = %id, "ignoring selection of archived session");
                false
            }
            None => {
                tracing::debug!(session_id = %id, "ignoring selection of unknown session");
                false
            }
        }
    }

    pub async fn archive_session(&mut self, id: Uuid) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == id) else {
            tracing::debug!(session_id = %id, "archive of unknown session ignored");
            return false;
        };
        session.is_archived = true;
        self.emit(SessionEvent::Archived { session_id: id });
        if self.active_id == Some(id) {
            self.replace_active(id);
        }
        self.persist().await;
        true
    }

    pub async fn delete_session(&mut self, id: Uuid) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            tracing::debug!(session_id = %id, "delete of unknown session ignored");
            return false;
        }
        self.emit(SessionEvent::Deleted { session_id: id });
        if self.active_id == Some(id) {
            self.replace_active(id);
        }
        self.persist().await;
        true
    }

    /// Appends to the named session. Unknown ids are a silent no-op.
    pub async fn add_message(&mut self, session_id: Uuid, message: Message) -> bool {
        let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) else {
            tracing::debug!(%session_id, "dropping message for unknown session");
            return false;
        };
        let retitled = session.push_message(message.clone());
        self.emit(SessionEvent::MessageAdded { session_id, message });
        if let Some(title) = retitled {
            self.emit(SessionEvent::Retitled { session_id, title });
        }
        self.persist().await;
        true
    }

    fn insert_new_session(&mut self) -> ChatSession {
        let session = ChatSession::new();
        self.sessions.insert(0, session.clone());
        self.active_id = Some(session.id);
        tracing::debug!(session_id = %session.id, "created chat session");
        self.emit(SessionEvent::Created { session_id: session.id });
        self.emit(SessionEvent::Selected { session_id: session.id });
        session
    }

    // Archive and delete share one replacement rule: the newest open
    // session, else a brand new one.
    fn replace_active(&mut self, leaving: Uuid) {
        match self.most_recent_open(Some(leaving)) {
            Some(next) => {
                self.active_id = Some(next);
                self.emit(SessionEvent::Selected { session_id: next });
            }
            None => {
                self.insert_new_session();
            }
        }
    }

    /// Newest non-archived session by `created_at`; ties go to the earlier
    /// position in the collection.
    fn most_recent_open(&self, excluding: Option<Uuid>) -> Option<Uuid> {
        self.sessions
            .iter()
            .filter(|s| !s.is_archived && Some(s.id) != excluding)
            .fold(None::<&ChatSession>, |best, s| match best {
                Some(b) if b.created_at >= s.created_at => Some(b),
                _ => Some(s),
            })
            .map(|s| s.id)
    }

    async fn persist(&self) {
        if let Err(e) = self.store.save(&self.sessions).await {
            tracing::warn!(error = %e, "failed to persist chat sessions");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }
}
