use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use satsang_backend::{Contact, DirectMessageApi, MessageKind, UserId};
use satsang_llm::{AssistantClient, CancelHandle, ChatTurn, CompletionRequest};
use satsang_storage::KeyValueStore;

use crate::message::{Message, Sender, unix_millis};
use crate::section::Section;
use crate::snapshot::{
    ConversationSnapshot, HISTORY_KEY, SnapshotId, decode_history, encode_history, snapshot_title,
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Session strings and timing. Everything user-visible the session emits
/// comes from here, so a host can re-theme without touching the logic.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub greeting: String,
    pub fallback_title: String,
    pub system_prompt: String,
    pub error_label: String,
    pub debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: "Hare Krishna! I am the Satsang assistant. Ask me about practice, \
                       scripture, or the community."
                .to_string(),
            fallback_title: "New conversation".to_string(),
            system_prompt: "You are a kind spiritual companion for the Satsang community. \
                            Answer with warmth, and draw on traditional sources when they help."
                .to_string(),
            error_label: "The assistant could not answer".to_string(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Assistant,
    Peer,
}

/// Recipient binding; its presence selects peer mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerBinding {
    pub id: UserId,
    pub profile: Contact,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistorySummary {
    pub id: SnapshotId,
    pub title: String,
    pub last_updated: u64,
}

/// Immutable state snapshot published to watchers after every externally
/// visible mutation. `PartialEq` so consumers can dedupe redundant wakes.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub messages: Vec<Message>,
    pub history: Vec<HistorySummary>,
    pub mode: SessionMode,
    pub recipient: Option<Contact>,
    pub current_chat_id: Option<SnapshotId>,
    pub is_loading: bool,
    pub menu_open: bool,
    pub notice: Option<String>,
}

struct PendingAssistant {
    ticket: u64,
    cancel: CancelHandle,
}

struct SessionState {
    messages: Vec<Message>,
    history: Vec<ConversationSnapshot>,
    current_chat_id: Option<SnapshotId>,
    recipient: Option<PeerBinding>,
    local_user: Option<UserId>,
    is_loading: bool,
    menu_open: bool,
    notice: Option<String>,
    next_ticket: u64,
    pending: Option<PendingAssistant>,
    /// Bumped on every mode switch; in-flight peer loads compare it to
    /// discard responses that arrive after the binding changed.
    binding_epoch: u64,
    /// The armed auto-save, keyed by the snapshot it captured.
    save_task: Option<(SnapshotId, JoinHandle<()>)>,
}

impl SessionState {
    /// Fires and clears any in-flight assistant request. The late outcome
    /// is dropped on the ticket check when it eventually resolves.
    fn cancel_pending(&mut self) {
        if let Some(mut pending) = self.pending.take() {
            pending.cancel.cancel();
            self.is_loading = false;
        }
    }
}

struct SessionInner {
    assistant: Arc<dyn AssistantClient>,
    peers: Arc<dyn DirectMessageApi>,
    store: Arc<dyn KeyValueStore>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    views: watch::Sender<SessionView>,
}

impl SessionInner {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Dispatch {
    Busy,
    Assistant,
    Peer { local: Option<UserId>, recipient: UserId },
}

/// The chat session: one transcript surface multiplexing the assistant
/// conversation and peer direct messages, with debounced local persistence
/// of assistant conversations.
///
/// Cheaply cloneable; all methods take `&self`. The state mutex is never
/// held across an await, and views are published after it is released.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

impl ChatSession {
    /// Seeds the greeting, loads persisted history (a corrupt or missing
    /// store starts empty), and publishes the initial view.
    pub async fn open(
        assistant: Arc<dyn AssistantClient>,
        peers: Arc<dyn DirectMessageApi>,
        store: Arc<dyn KeyValueStore>,
        config: SessionConfig,
    ) -> Self {
        let history = match store.get(HISTORY_KEY).await {
            Ok(Some(raw)) => decode_history(&raw),
            Ok(None) => Vec::new(),
            Err(error) => {
                warn!(error = %error, "failed to read stored chat history; starting empty");
                Vec::new()
            }
        };

        let state = SessionState {
            messages: vec![Message::assistant(&config.greeting)],
            history,
            current_chat_id: None,
            recipient: None,
            local_user: None,
            is_loading: false,
            menu_open: false,
            notice: None,
            next_ticket: 0,
            pending: None,
            binding_epoch: 0,
            save_task: None,
        };
        let (views, _) = watch::channel(view_of(&state));

        Self {
            inner: Arc::new(SessionInner {
                assistant,
                peers,
                store,
                config,
                state: Mutex::new(state),
                views,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.inner.views.subscribe()
    }

    pub fn view(&self) -> SessionView {
        self.inner.views.borrow().clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    fn read<R>(&self, inspect: impl FnOnce(&SessionState) -> R) -> R {
        inspect(&self.inner.lock_state())
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, view) = {
            let mut state = self.inner.lock_state();
            let result = apply(&mut state);
            (result, view_of(&state))
        };
        self.inner.views.send_replace(view);
        result
    }

    /// Single entry point for user input. Empty input and input while a
    /// send is in flight are ignored; the bound recipient selects the path.
    pub async fn submit(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        let dispatch = self.read(|state| {
            if state.is_loading {
                Dispatch::Busy
            } else if let Some(binding) = &state.recipient {
                Dispatch::Peer {
                    local: state.local_user,
                    recipient: binding.id,
                }
            } else {
                Dispatch::Assistant
            }
        });

        match dispatch {
            Dispatch::Busy => debug!("submission ignored while a send is in flight"),
            Dispatch::Peer { local, recipient } => {
                let Some(local) = local else {
                    debug!("peer submission ignored without a local identity");
                    return;
                };
                self.send_peer(local, recipient, trimmed).await;
            }
            Dispatch::Assistant => {
                // A leading `/` is a vestigial "force assistant" marker: it is
                // stripped from the dispatched prompt but the bubble keeps the
                // raw text. A bare `/` is rejected before anything is appended.
                let prompt = trimmed
                    .strip_prefix('/')
                    .map(str::trim_start)
                    .unwrap_or(trimmed);
                if prompt.is_empty() {
                    return;
                }
                self.send_to_assistant(trimmed, prompt).await;
            }
        }
    }

    async fn send_to_assistant(&self, display: &str, prompt: &str) {
        let config = &self.inner.config;
        let (ticket, request) = self.mutate(|state| {
            let mut turns = vec![ChatTurn::system(config.system_prompt.as_str())];
            for (index, message) in state.messages.iter().enumerate() {
                // The seeded greeting (or section seed) is display-only.
                if index == 0 && message.sender == Sender::Assistant {
                    continue;
                }
                match message.sender {
                    Sender::User => turns.push(ChatTurn::user(message.text.as_str())),
                    Sender::Assistant | Sender::Peer => {
                        turns.push(ChatTurn::assistant(message.text.as_str()))
                    }
                }
            }
            turns.push(ChatTurn::user(prompt));

            state.messages.push(Message::user(display));
            state.is_loading = true;
            state.notice = None;
            state.next_ticket += 1;
            (state.next_ticket, CompletionRequest::new(turns))
        });
        self.arm_autosave();

        let handle = match self.inner.assistant.complete(request) {
            Ok(handle) => handle,
            Err(error) => {
                self.mutate(|state| {
                    state.is_loading = false;
                    state
                        .messages
                        .push(Message::assistant(format!("{}: {error}", config.error_label)));
                });
                self.arm_autosave();
                return;
            }
        };

        self.mutate(|state| {
            state.pending = Some(PendingAssistant {
                ticket,
                cancel: handle.cancel,
            });
        });
        tokio::spawn(handle.worker);
        let outcome = handle.outcome.await;

        let applied = self.mutate(|state| {
            match &state.pending {
                Some(pending) if pending.ticket == ticket => {}
                // Cancelled or superseded; the session already moved on.
                _ => {
                    debug!(ticket, "dropping assistant outcome for a superseded request");
                    return false;
                }
            }
            state.pending = None;
            state.is_loading = false;
            match outcome {
                Ok(Ok(reply)) => state.messages.push(Message::assistant(reply.content)),
                Ok(Err(error)) if error.is_cancelled() => {}
                Ok(Err(error)) => state
                    .messages
                    .push(Message::assistant(format!("{}: {error}", config.error_label))),
                Err(_) => warn!(ticket, "assistant worker dropped without resolving"),
            }
            true
        });
        if applied {
            self.arm_autosave();
        }
    }

    /// Cancels the in-flight assistant request, unblocking input
    /// immediately without waiting for the worker to wind down. No-op when
    /// nothing is pending. The optimistic user bubble stays.
    pub fn cancel_request(&self) {
        self.mutate(SessionState::cancel_pending);
    }

    async fn send_peer(&self, local: UserId, recipient: UserId, text: &str) {
        self.mutate(|state| state.is_loading = true);
        match self
            .inner
            .peers
            .send(local, recipient, text, MessageKind::Text)
            .await
        {
            Ok(record) => self.mutate(|state| {
                state.is_loading = false;
                if state.recipient.as_ref().map(|binding| binding.id) == Some(recipient) {
                    state.messages.push(Message::from_direct(&record, local));
                    state.notice = None;
                }
            }),
            Err(error) => {
                warn!(recipient = %recipient, error = %error, "failed to send direct message");
                self.mutate(|state| {
                    state.is_loading = false;
                    state.notice = Some(format!("Message not sent: {error}"));
                });
            }
        }
    }

    /// Binds a peer (entering peer mode and loading the stored transcript)
    /// or, with `None`, leaves peer mode via `start_new_chat`.
    pub async fn bind_peer(&self, contact: Option<Contact>) {
        let Some(contact) = contact else {
            self.start_new_chat();
            return;
        };

        let recipient = contact.id;
        let (local, epoch) = self.mutate(|state| {
            state.cancel_pending();
            state.recipient = Some(PeerBinding {
                id: recipient,
                profile: contact,
            });
            state.current_chat_id = None;
            state.notice = None;
            state.menu_open = false;
            // A superseded transcript load returns without touching the
            // flag, so the new binding starts from a clean one.
            state.is_loading = false;
            state.binding_epoch += 1;
            (state.local_user, state.binding_epoch)
        });

        if let Some(local) = local {
            self.load_peer_transcript(local, recipient, epoch).await;
        }
    }

    /// Records the local identity. When a recipient is already bound the
    /// peer transcript loads now that both identifiers are known.
    pub async fn set_local_user(&self, user: Option<UserId>) {
        let trigger = self.mutate(|state| {
            state.local_user = user;
            match (user, &state.recipient) {
                (Some(local), Some(binding)) => Some((local, binding.id, state.binding_epoch)),
                _ => None,
            }
        });

        if let Some((local, recipient, epoch)) = trigger {
            self.load_peer_transcript(local, recipient, epoch).await;
        }
    }

    async fn load_peer_transcript(&self, local: UserId, other: UserId, epoch: u64) {
        self.mutate(|state| state.is_loading = true);
        let result = self.inner.peers.list(local, other).await;
        self.mutate(|state| {
            if state.binding_epoch != epoch {
                debug!(other = %other, "discarding peer transcript for a superseded binding");
                return;
            }
            state.is_loading = false;
            match result {
                Ok(records) => {
                    state.messages = records
                        .iter()
                        .map(|record| Message::from_direct(record, local))
                        .collect();
                }
                // Keep the prior transcript rather than clearing a still
                // valid view.
                Err(error) => {
                    warn!(other = %other, error = %error, "failed to load peer transcript");
                }
            }
        });
    }

    /// Resets to a single seeded greeting in assistant mode. A pending
    /// auto-save is left armed: it captured its transcript by value and
    /// still commits under the id it was scheduled for.
    pub fn start_new_chat(&self) {
        let greeting = self.inner.config.greeting.clone();
        self.mutate(|state| {
            state.cancel_pending();
            state.messages = vec![Message::assistant(greeting)];
            state.current_chat_id = None;
            state.recipient = None;
            state.menu_open = false;
            state.notice = None;
            state.is_loading = false;
            state.binding_epoch += 1;
        });
    }

    /// Replaces the transcript with a saved conversation. Unknown ids are
    /// ignored.
    pub fn load_snapshot(&self, id: &SnapshotId) {
        self.mutate(|state| {
            let Some(messages) = state
                .history
                .iter()
                .find(|snapshot| &snapshot.id == id)
                .map(|snapshot| snapshot.messages.clone())
            else {
                debug!(id = %id, "ignoring load of an unknown snapshot");
                return;
            };
            state.cancel_pending();
            state.messages = messages;
            state.current_chat_id = Some(id.clone());
            state.recipient = None;
            state.notice = None;
            state.is_loading = false;
            state.binding_epoch += 1;
        });
    }

    /// Removes a snapshot and persists the updated list immediately. An
    /// auto-save armed for the deleted conversation is disarmed whether or
    /// not it is the active one (committing after an explicit delete would
    /// resurrect it); deleting the active snapshot also resets the session
    /// to a fresh greeting.
    pub async fn delete_snapshot(&self, id: &SnapshotId) {
        let (encoded, was_active) = self.mutate(|state| {
            let before = state.history.len();
            state.history.retain(|snapshot| &snapshot.id != id);
            if state.history.len() == before {
                debug!(id = %id, "ignoring delete of an unknown snapshot");
                return (None, false);
            }

            let was_active = state.current_chat_id.as_ref() == Some(id);
            if let Some((armed_id, task)) = state.save_task.take() {
                if &armed_id == id {
                    task.abort();
                } else {
                    state.save_task = Some((armed_id, task));
                }
            }
            (Some(encode_history(&state.history)), was_active)
        });

        if was_active {
            self.start_new_chat();
        }

        match encoded {
            Some(Ok(encoded)) => {
                if let Err(error) = self.inner.store.set(HISTORY_KEY, &encoded).await {
                    warn!(error = %error, "failed to persist chat history after delete");
                }
            }
            Some(Err(error)) => warn!(error = %error, "failed to encode chat history"),
            None => {}
        }
    }

    /// Seeds a guided search for a section: assistant-authored prompt with
    /// a navigation slug, detached from any peer binding or open snapshot.
    pub fn start_section_search(&self, section: Section) {
        self.mutate(|state| {
            state.cancel_pending();
            state.messages = vec![Message::section_seed(section)];
            state.current_chat_id = None;
            state.recipient = None;
            state.menu_open = false;
            state.notice = None;
            state.is_loading = false;
            state.binding_epoch += 1;
        });
    }

    pub fn set_menu_open(&self, open: bool) {
        self.mutate(|state| state.menu_open = open);
    }

    /// (Re)arms the debounced save after a transcript mutation in assistant
    /// mode, once the conversation has outgrown the seeded greeting.
    ///
    /// The snapshot id and transcript are captured by value here, at
    /// schedule time, so the commit still targets the right conversation if
    /// the session switches modes before the timer fires.
    fn arm_autosave(&self) {
        let capture = self.mutate(|state| {
            if state.recipient.is_some() {
                return None;
            }
            if state.messages.len() <= 1 && state.current_chat_id.is_none() {
                return None;
            }
            let id = state
                .current_chat_id
                .get_or_insert_with(SnapshotId::mint)
                .clone();
            // Re-arming the same conversation coalesces the writes. An armed
            // save for a different conversation keeps running detached; it
            // captured its own transcript and commits under its own id.
            if let Some((armed_id, task)) = state.save_task.take()
                && armed_id == id
            {
                task.abort();
            }
            Some((id, state.messages.clone()))
        });
        let Some((id, messages)) = capture else {
            return;
        };

        let session = self.clone();
        let debounce = self.inner.config.debounce;
        let armed_id = id.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            session.commit_snapshot(id, messages).await;
        });
        self.inner.lock_state().save_task = Some((armed_id, task));
    }

    /// Upserts the captured conversation into the live history (front of
    /// the list, newest first) and writes the whole list to the store. A
    /// write failure keeps the in-memory update authoritative.
    async fn commit_snapshot(&self, id: SnapshotId, messages: Vec<Message>) {
        let fallback = self.inner.config.fallback_title.clone();
        let encoded = self.mutate(|state| {
            let now = unix_millis();
            if let Some(position) = state.history.iter().position(|snapshot| snapshot.id == id) {
                let mut snapshot = state.history.remove(position);
                snapshot.messages = messages;
                snapshot.last_updated = now;
                state.history.insert(0, snapshot);
            } else {
                let title = snapshot_title(&messages, &fallback);
                state.history.insert(
                    0,
                    ConversationSnapshot {
                        id,
                        title,
                        messages,
                        last_updated: now,
                    },
                );
            }
            encode_history(&state.history)
        });

        match encoded {
            Ok(encoded) => {
                if let Err(error) = self.inner.store.set(HISTORY_KEY, &encoded).await {
                    warn!(error = %error, "failed to persist chat history; keeping the in-memory copy");
                }
            }
            Err(error) => warn!(error = %error, "failed to encode chat history"),
        }
    }
}

fn view_of(state: &SessionState) -> SessionView {
    SessionView {
        messages: state.messages.clone(),
        history: state
            .history
            .iter()
            .map(|snapshot| HistorySummary {
                id: snapshot.id.clone(),
                title: snapshot.title.clone(),
                last_updated: snapshot.last_updated,
            })
            .collect(),
        mode: if state.recipient.is_some() {
            SessionMode::Peer
        } else {
            SessionMode::Assistant
        },
        recipient: state.recipient.as_ref().map(|binding| binding.profile.clone()),
        current_chat_id: state.current_chat_id.clone(),
        is_loading: state.is_loading,
        menu_open: state.menu_open,
        notice: state.notice.clone(),
    }
}
