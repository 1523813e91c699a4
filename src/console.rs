use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

use crate::completion::CompletionExchange;
use crate::format::{parse_reply, render_plain};
use crate::orchestrator::{ChatOrchestrator, RejectReason, SendOutcome};
use crate::repository::SessionEvent;
use crate::storage::SessionStore;

const HELP: &str = "commands: /new  /list  /select <id>  /archive <id>  /delete <id>  /help  /quit\nanything else is sent to the active chat\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    List,
    Select(String),
    Archive(String),
    Delete(String),
    Help,
    Quit,
    Send(String),
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Command::Send(line.trim_end_matches(['\r', '\n']).to_string());
    };
    let (name, arg) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let arg = arg.trim().to_string();
    match name {
        "new" => Command::New,
        "list" | "ls" => Command::List,
        "select" => Command::Select(arg),
        "archive" => Command::Archive(arg),
        "delete" | "rm" => Command::Delete(arg),
        "quit" | "exit" => Command::Quit,
        _ => Command::Help,
    }
}

pub struct Console<S: SessionStore, E: CompletionExchange> {
    orchestrator: ChatOrchestrator<S, E>,
    events: broadcast::Receiver<SessionEvent>,
    ansi: bool,
}

impl<S: SessionStore, E: CompletionExchange> Console<S, E> {
    pub async fn new(orchestrator: ChatOrchestrator<S, E>, ansi: bool) -> Self {
        let events = orchestrator.repository().lock().await.subscribe();
        Self { orchestrator, events, ansi }
    }

    pub async fn run<R, W>(&mut self, mut input: R, out: &mut W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        out.write_all(HELP.as_bytes()).await?;
        self.print_active(out).await?;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let Ok(line) = std::str::from_utf8(&buf) else {
                tracing::warn!(bytes = buf.len(), "skipping input line that is not valid UTF-8");
                out.write_all(b"input was not valid UTF-8, line ignored\n").await?;
                out.flush().await?;
                continue;
            };
            let command = parse_command(line.trim_end_matches(['\r', '\n']));
            if command == Command::Quit {
                break;
            }
            self.execute(command, out).await?;
            self.drain_events(out).await?;
            out.flush().await?;
        }
        out.flush().await?;
        Ok(())
    }

    async fn execute<W: AsyncWrite + Unpin>(&mut self, command: Command, out: &mut W) -> anyhow::Result<()> {
        let repo = self.orchestrator.repository().clone();
        match command {
            Command::New => {
                repo.lock().await.create_session().await;
            }
            Command::List => {
                let listing = {
                    let repo = repo.lock().await;
                    let mut s = String::from("active chats:\n");
                    for session in repo.active_sessions() {
                        let marker = if Some(session.id) == repo.active_id() { '*' } else { ' ' };
                        s.push_str(&format!(
                            " {marker} {}  {}  ({} messages, {})\n",
                            short_id(session.id),
                            session.title,
                            session.messages.len(),
                            session.created_at.format("%Y-%m-%d"),
                        ));
                    }
                    let archived: Vec<_> = repo.archived_sessions().collect();
                    if !archived.is_empty() {
                        s.push_str("archived chats:\n");
                        for session in archived {
                            s.push_str(&format!("   {}  {}\n", short_id(session.id), session.title));
                        }
                    }
                    s
                };
                out.write_all(listing.as_bytes()).await?;
            }
            Command::Select(arg) => {
                let Some(id) = self.resolve(&arg).await else {
                    return no_match(out, &arg).await;
                };
                if !repo.lock().await.select_session(id) {
                    out.write_all(b"archived chats cannot be selected\n").await?;
                }
            }
            Command::Archive(arg) => {
                let Some(id) = self.resolve(&arg).await else {
                    return no_match(out, &arg).await;
                };
                if !repo.lock().await.archive_session(id).await {
                    return no_match(out, &arg).await;
                }
            }
            Command::Delete(arg) => {
                let Some(id) = self.resolve(&arg).await else {
                    return no_match(out, &arg).await;
                };
                if !repo.lock().await.delete_session(id).await {
                    return no_match(out, &arg).await;
                }
            }
            Command::Help => out.write_all(HELP.as_bytes()).await?,
            Command::Quit => {}
            Command::Send(text) => {
                let active = repo.lock().await.active_id();
                let Some(id) = active else {
                    out.write_all(b"no active chat\n").await?;
                    return Ok(());
                };
                match self.orchestrator.send_message(id, &text).await {
                    SendOutcome::Rejected(RejectReason::Busy) => {
                        out.write_all(b"still waiting for the previous reply\n").await?;
                    }
                    SendOutcome::Rejected(_) | SendOutcome::Answered | SendOutcome::Fallback => {}
                }
            }
        }
        Ok(())
    }

    /// Accepts a known full id or any unambiguous tail of one, as printed by `/list`.
    async fn resolve(&self, arg: &str) -> Option<Uuid> {
        if arg.is_empty() {
            return None;
        }
        let repo = self.orchestrator.repository().lock().await;
        if let Ok(id) = Uuid::parse_str(arg) {
            return repo.session(id).map(|s| s.id);
        }
        let tail = arg.to_ascii_lowercase();
        let mut matches = repo.sessions().iter().filter(|s| s.id.simple().to_string().ends_with(&tail));
        match (matches.next(), matches.next()) {
            (Some(s), None) => Some(s.id),
            _ => None,
        }
    }

    async fn print_active<W: AsyncWrite + Unpin>(&self, out: &mut W) -> anyhow::Result<()> {
        let text = {
            let repo = self.orchestrator.repository().lock().await;
            let Some(session) = repo.active_session() else { return Ok(()) };
            let mut text = format!("== {} [{}]\n", session.title, short_id(session.id));
            for m in &session.messages {
                if m.is_user {
                    text.push_str(&format!("you> {}\n", m.content));
                } else {
                    text.push_str(&render_plain(&parse_reply(&m.content), self.ansi));
                }
            }
            text
        };
        out.write_all(text.as_bytes()).await?;
        Ok(())
    }

    async fn drain_events<W: AsyncWrite + Unpin>(&mut self, out: &mut W) -> anyhow::Result<()> {
        loop {
            let event = match self.events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "console fell behind session events");
                    continue;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            };
            match event {
                SessionEvent::MessageAdded { message, .. } if !message.is_user => {
                    let text = render_plain(&parse_reply(&message.content), self.ansi);
                    out.write_all(text.as_bytes()).await?;
                }
                SessionEvent::Selected { .. } => self.print_active(out).await?,
                SessionEvent::Retitled { title, .. } => {
                    out.write_all(format!("(chat titled \"{title}\")\n").as_bytes()).await?;
                }
                SessionEvent::Archived { session_id } => {
                    out.write_all(format!("archived {}\n", short_id(session_id)).as_bytes()).await?;
                }
                SessionEvent::Deleted { session_id } => {
                    out.write_all(format!("deleted {}\n", short_id(session_id)).as_bytes()).await?;
                }
                SessionEvent::Created { .. } | SessionEvent::MessageAdded { .. } => {}
            }
        }
    }
}

async fn no_match<W: AsyncWrite + Unpin>(out: &mut W, arg: &str) -> anyhow::Result<()> {
    out.write_all(format!("no unique chat matches '{arg}'\n").as_bytes()).await?;
    Ok(())
}

// v7 ids lead with the timestamp, so the random tail is what tells them apart.
fn short_id(id: Uuid) -> String {
    let hex = id.simple().to_string();
    hex[hex.len() - 8..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionError, ExchangeReply, ExchangeRequest};
    use crate::repository::SessionRepository;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct Echo;

    #[async_trait]
    impl CompletionExchange for Echo {
        async fn exchange(&self, req: ExchangeRequest) -> Result<ExchangeReply, CompletionError> {
            Ok(ExchangeReply { response: format!("1. **Echo**: {}", req.message) })
        }
    }

    async fn console() -> Console<MemoryStore, Echo> {
        let repo = SessionRepository::initialize(MemoryStore::new()).await.unwrap();
        Console::new(ChatOrchestrator::new(Arc::new(Mutex::new(repo)), Echo), false).await
    }

    async fn run(console: &mut Console<MemoryStore, Echo>, script: &str) -> String {
        run_bytes(console, script.as_bytes()).await
    }

    async fn run_bytes(console: &mut Console<MemoryStore, Echo>, input: &[u8]) -> String {
        let mut out = Vec::new();
        console.run(input, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_commands_and_messages() {
        assert_eq!(parse_command("/new"), Command::New);
        assert_eq!(parse_command("  /select abc12 "), Command::Select("abc12".into()));
        assert_eq!(parse_command("/rm 42"), Command::Delete("42".into()));
        assert_eq!(parse_command("/bogus"), Command::Help);
        assert_eq!(parse_command("/quit"), Command::Quit);
        assert_eq!(parse_command("How much sleep?"), Command::Send("How much sleep?".into()));
    }

    #[test]
    fn short_id_is_last_eight_hex_digits() {
        let id = Uuid::parse_str("0191e3c4-5a6b-7c8d-9e0f-1a2b3c4d5e6f").unwrap();
        assert_eq!(short_id(id), "3c4d5e6f");
    }

    #[tokio::test]
    async fn sending_prints_formatted_reply_and_title() {
        let mut c = console().await;
        let out = run(&mut c, "Help with sleep\n/quit\n").await;
        assert!(out.contains("  1. Echo: Help with sleep\n"), "{out}");
        assert!(out.contains("(chat titled \"Help with sleep\")"));
        let repo = c.orchestrator.repository().lock().await;
        assert_eq!(repo.active_session().unwrap().messages.len(), 3);
    }

    #[tokio::test]
    async fn new_list_and_archive_flow() {
        let mut c = console().await;
        let first = c.orchestrator.repository().lock().await.active_id().unwrap();
        let out = run(&mut c, &format!("/new\n/archive {}\n/list\n", short_id(first))).await;
        assert!(out.contains(&format!("archived {}", short_id(first))));
        assert!(out.contains("archived chats:"));

        let repo = c.orchestrator.repository().lock().await;
        assert_eq!(repo.sessions().len(), 2);
        assert!(repo.session(first).unwrap().is_archived);
        assert_ne!(repo.active_id(), Some(first));
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let mut c = console().await;
        let out = run(&mut c, "/delete zzzz\n").await;
        assert!(out.contains("no unique chat matches 'zzzz'"));
        assert_eq!(c.orchestrator.repository().lock().await.sessions().len(), 1);
    }

    #[tokio::test]
    async fn well_formed_but_unknown_uuid_is_reported() {
        let mut c = console().await;
        let stranger = Uuid::now_v7();
        let out = run(&mut c, &format!("/select {stranger}\n/archive {stranger}\n/delete {stranger}\n")).await;
        assert_eq!(out.matches(&format!("no unique chat matches '{stranger}'")).count(), 3, "{out}");
        assert!(!out.contains("archived chats cannot be selected"));
        let repo = c.orchestrator.repository().lock().await;
        assert_eq!(repo.sessions().len(), 1);
        assert!(repo.archived_sessions().next().is_none());
    }

    #[tokio::test]
    async fn full_uuid_of_known_session_still_resolves() {
        let mut c = console().await;
        let first = c.orchestrator.repository().lock().await.active_id().unwrap();
        let out = run(&mut c, &format!("/new\n/delete {first}\n")).await;
        assert!(out.contains(&format!("deleted {}", short_id(first))), "{out}");
        assert!(c.orchestrator.repository().lock().await.session(first).is_none());
    }

    #[tokio::test]
    async fn invalid_utf8_line_is_skipped_and_reading_continues() {
        let mut c = console().await;
        let mut input = b"\xff\xfe bad bytes\n".to_vec();
        input.extend_from_slice(b"Help with sleep\r\n/quit\n");
        let out = run_bytes(&mut c, &input).await;
        assert!(out.contains("input was not valid UTF-8, line ignored"), "{out}");
        assert!(out.contains("  1. Echo: Help with sleep\n"), "{out}");
        let repo = c.orchestrator.repository().lock().await;
        assert_eq!(repo.active_session().unwrap().messages.len(), 3);
        assert_eq!(repo.active_session().unwrap().messages[1].content, "Help with sleep");
    }
}
