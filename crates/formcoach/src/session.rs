//! Chat session orchestrator.
//!
//! The only component that spans both pure state (the stores) and I/O (the
//! transport and the remote API). Everything else stays trivially testable:
//! stores hold data, the transport moves frames, and this module owns the
//! state machine tying them together.
//!
//! Phase machine: `Idle → Pending → Streaming → Complete → Idle`, with
//! direct drops to `Idle` on cancellation, termination, and error.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{CoachApi, NewMessage};
use crate::cache::CacheSnapshot;
use crate::config::ChatConfig;
use crate::error::{ChatError, Notice};
use crate::store::{ConversationStore, MessageStore};
use crate::transport::{ConnectionState, Transport, TransportEvent};
use formcoach_protocol::{CancelReason, ClientFrame, ConversationKind, Message, Sender};

/// Canned assistant opener for conversations created on connect.
pub const GREETING: &str = "Hey, coach here. What are we training today?";

/// Session loading state, observable by UI layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing in flight.
    Idle,
    /// Message sent, awaiting the first response chunk.
    Pending,
    /// At least one chunk received, response not yet complete.
    Streaming,
    /// Terminal signal received; side effects running before `Idle`.
    Complete,
}

/// Coordinates transport, message store, and conversation store for one
/// client process.
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    api: Arc<dyn CoachApi>,
    config: ChatConfig,
    conversations: ConversationStore,
    messages: MessageStore,

    phase: SessionPhase,
    phase_tx: watch::Sender<SessionPhase>,
    status_text: Option<String>,
    last_error: Option<String>,
    notice: Option<Notice>,
    suggested: Vec<String>,

    /// Generation counter: bumped by connect, by stream teardown (cancel,
    /// terminate, error), and by disconnect. Events from a receiver handed
    /// out under an older generation are stale and dropped.
    epoch: u64,
    /// Generation the current event receiver was installed under.
    events_epoch: u64,
    events: Option<mpsc::Receiver<TransportEvent>>,

    /// Last accepted user-requested cancel, for the cooldown window.
    last_cancel: Option<Instant>,
    /// Message queued before the session was connected.
    pending_initial: Option<String>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn Transport>, api: Arc<dyn CoachApi>, config: ChatConfig) -> Self {
        let conversations =
            ConversationStore::new(Arc::clone(&api), config.idle_timeout());
        let (phase_tx, _) = watch::channel(SessionPhase::Idle);
        Self {
            transport,
            api,
            config,
            conversations,
            messages: MessageStore::new(),
            phase: SessionPhase::Idle,
            phase_tx,
            status_text: None,
            last_error: None,
            notice: None,
            suggested: Vec::new(),
            epoch: 0,
            events_epoch: 0,
            events: None,
            last_cancel: None,
            pending_initial: None,
        }
    }

    // ========== Observation surface ==========

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Watch channel mirroring phase transitions, for UI layers that want
    /// push rather than poll.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }

    pub fn active_conversation_id(&self) -> Option<&str> {
        self.conversations.active_id()
    }

    pub fn conversation_messages(&self, conversation_id: &str) -> &[Message] {
        self.messages.messages(conversation_id)
    }

    /// Accumulated streaming content for the active conversation, if any.
    pub fn streaming_content(&self) -> Option<&str> {
        let id = self.conversations.active_id()?;
        self.messages.streaming(id).map(|s| s.content.as_str())
    }

    pub fn status_text(&self) -> Option<&str> {
        self.status_text.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Take the pending user-visible notice, if one is waiting.
    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    pub fn suggested_actions(&self) -> &[String] {
        &self.suggested
    }

    pub fn conversations(&mut self) -> &mut ConversationStore {
        &mut self.conversations
    }

    // ========== Lifecycle ==========

    /// Queue a message to be sent automatically once `connect` completes.
    pub fn queue_initial_message(&mut self, content: &str) {
        self.pending_initial = Some(content.to_string());
    }

    /// Ensure an active conversation exists (creating a greeting thread if
    /// not), open the streaming connection for it, and flush any queued
    /// initial message.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        let conversation_id = match self.conversations.active_id().map(str::to_string) {
            Some(id) => id,
            None => {
                self.create_conversation(vec![NewMessage {
                    content: GREETING.to_string(),
                    sender: Sender::Assistant,
                }])
                .await?
            }
        };

        self.open_transport(&conversation_id).await?;

        if let Some(content) = self.pending_initial.take() {
            self.send_message(&content).await?;
        }
        Ok(())
    }

    /// Close the streaming connection. Refused while an exchange is in
    /// flight: an unrelated UI lifecycle event must not sever a live stream.
    pub async fn disconnect(&mut self) -> Result<(), ChatError> {
        if matches!(self.phase, SessionPhase::Pending | SessionPhase::Streaming) {
            return Err(ChatError::StreamInFlight);
        }
        self.epoch += 1;
        self.events = None;
        self.transport.disconnect().await;
        Ok(())
    }

    /// Archive the active conversation if it idled past the configured
    /// timeout. Drive this from a periodic timer (e.g. every 60s).
    pub fn check_idle_timeout(&mut self) -> bool {
        self.conversations.check_timeout()
    }

    // ========== Sending ==========

    /// Send a user message on the active conversation, creating the
    /// conversation first if none is active.
    ///
    /// Hard precondition, enforced here and only here: at most one exchange
    /// in flight per session.
    pub async fn send_message(&mut self, content: &str) -> Result<(), ChatError> {
        if matches!(self.phase, SessionPhase::Pending | SessionPhase::Streaming) {
            return Err(ChatError::SendInFlight);
        }

        match self.send_message_inner(content).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Every failure path resolves back to a well-defined state.
                self.set_phase(SessionPhase::Idle);
                Err(e)
            }
        }
    }

    async fn send_message_inner(&mut self, content: &str) -> Result<(), ChatError> {
        let existing = self.conversations.active_id().map(str::to_string);
        let created_now = existing.is_none();
        let conversation_id = match existing {
            Some(id) => id,
            None => {
                self.create_conversation(vec![NewMessage {
                    content: content.to_string(),
                    sender: Sender::User,
                }])
                .await?
            }
        };

        // Optimistic local user message, reconciled after persistence.
        let local_id = if created_now {
            // Creation already seeded the message store with this message.
            None
        } else {
            let message = Message::local_user(
                &conversation_id,
                content,
                self.messages.next_sequence(&conversation_id),
            );
            let local_id = message.id.clone();
            self.messages.add_message(&conversation_id, message);
            Some(local_id)
        };

        self.conversations.touch(&conversation_id);
        self.set_phase(SessionPhase::Pending);

        if self.transport.state() != ConnectionState::Connected
            || self.events_epoch != self.epoch
            || self.events.is_none()
        {
            self.open_transport(&conversation_id).await?;
        }

        let history = self.messages.messages(&conversation_id).to_vec();
        self.transport
            .send(ClientFrame::Message {
                message: content.to_string(),
                conversation_history: history,
            })
            .await?;
        debug!(conversation = %conversation_id, "message sent");

        // Persist-and-reconcile is best-effort: the optimistic entry stays
        // usable if the CRUD call fails.
        if let Some(local_id) = local_id {
            match self
                .api
                .persist_message(
                    &conversation_id,
                    NewMessage {
                        content: content.to_string(),
                        sender: Sender::User,
                    },
                )
                .await
            {
                Ok(persisted) => {
                    self.messages
                        .reconcile_message(&conversation_id, &local_id, persisted);
                }
                Err(e) => warn!("failed to persist message, keeping local copy: {e}"),
            }
        }

        Ok(())
    }

    /// Cancel the in-flight response. Cooldown-limited for user-requested
    /// cancels; a no-op when nothing is streaming.
    pub async fn cancel_streaming(&mut self, reason: CancelReason) -> Result<(), ChatError> {
        if reason == CancelReason::UserRequested {
            if let Some(last) = self.last_cancel {
                if last.elapsed() < self.config.cancel_cooldown() {
                    self.notice = Some(Notice::CancelCooldown);
                    return Err(ChatError::CancelCooldown);
                }
            }
        }

        if !matches!(self.phase, SessionPhase::Pending | SessionPhase::Streaming) {
            return Ok(());
        }

        if reason == CancelReason::UserRequested {
            self.last_cancel = Some(Instant::now());
        }

        // Best-effort: the remote may keep producing tokens; we stop
        // listening either way.
        if let Err(e) = self.transport.send(ClientFrame::Cancel { reason }).await {
            warn!("failed to send cancel frame: {e}");
        }

        if let Some(id) = self.conversations.active_id().map(str::to_string) {
            self.messages.clear_streaming(&id);
        }
        self.status_text = None;
        self.notice = Some(Notice::Cancelled { reason });
        self.epoch += 1;
        self.set_phase(SessionPhase::Idle);
        info!(%reason, "streaming cancelled");
        Ok(())
    }

    // ========== Event handling ==========

    /// Receive and apply the next transport event. Returns the event for
    /// observation, or `None` once the channel is closed or absent.
    pub async fn poll_event(&mut self) -> Option<TransportEvent> {
        let events = self.events.as_mut()?;
        let event = events.recv().await?;
        let epoch = self.events_epoch;
        self.handle_event(epoch, event.clone()).await;
        Some(event)
    }

    /// Apply one transport event observed under the given generation.
    /// Events from a retired generation are dropped without side effects.
    pub async fn handle_event(&mut self, epoch: u64, event: TransportEvent) {
        if epoch != self.epoch {
            debug!(?event, "discarding stale transport event");
            return;
        }

        match event {
            TransportEvent::Content { chunk } => self.on_content(&chunk),
            TransportEvent::Status { text } => {
                self.status_text = Some(text);
            }
            TransportEvent::Complete => self.on_complete().await,
            TransportEvent::Terminated { reason } => self.on_terminated(reason),
            TransportEvent::Error { message } => self.on_error(message),
            TransportEvent::StateChanged(state) => {
                debug!(%state, "connection state changed");
            }
        }
    }

    fn on_content(&mut self, chunk: &str) {
        if !matches!(self.phase, SessionPhase::Pending | SessionPhase::Streaming) {
            debug!("content chunk outside an exchange, ignoring");
            return;
        }
        let Some(id) = self.conversations.active_id().map(str::to_string) else {
            return;
        };
        self.messages.update_streaming(&id, chunk);
        if self.phase == SessionPhase::Pending {
            self.set_phase(SessionPhase::Streaming);
        }
    }

    async fn on_complete(&mut self) {
        let Some(id) = self.conversations.active_id().map(str::to_string) else {
            return;
        };
        if self.messages.complete_streaming(&id).is_none() {
            debug!("completion without streaming state, ignoring");
        }
        self.status_text = None;
        self.set_phase(SessionPhase::Complete);

        // Side effects of a finished turn, then back to Idle.
        let context_window = self.config.suggestion_context;
        let all = self.messages.messages(&id);
        let context: Vec<Message> = all
            .iter()
            .skip(all.len().saturating_sub(context_window))
            .cloned()
            .collect();
        self.suggested = self.conversations.suggested_actions(&context).await;

        tokio::time::sleep(self.config.complete_linger()).await;
        self.set_phase(SessionPhase::Idle);
    }

    fn on_terminated(&mut self, reason: String) {
        // Deliberate cutoff: partial content discarded, not lost by a bug.
        if let Some(id) = self.conversations.active_id().map(str::to_string) {
            self.messages.clear_streaming(&id);
        }
        self.status_text = None;
        self.notice = Some(Notice::StreamTerminated { reason });
        self.epoch += 1;
        self.set_phase(SessionPhase::Idle);
    }

    fn on_error(&mut self, message: String) {
        if let Some(id) = self.conversations.active_id().map(str::to_string) {
            self.messages.clear_streaming(&id);
        }
        self.status_text = None;
        warn!("stream failed: {message}");
        self.last_error = Some(message.clone());
        self.notice = Some(Notice::StreamFailed { message });
        self.epoch += 1;
        self.set_phase(SessionPhase::Idle);
    }

    // ========== Cache ==========

    /// Snapshot both stores for the persisted local cache. Streaming state
    /// is excluded by construction.
    pub fn cache_snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            conversations: self.conversations.snapshot(),
            messages: self.messages.snapshot(),
        }
    }

    /// Seed both stores from a cache snapshot. Startup only.
    pub fn load_cache(&mut self, snapshot: CacheSnapshot) {
        self.conversations.load_snapshot(snapshot.conversations);
        self.messages.set_bulk_messages(snapshot.messages);
    }

    // ========== Internals ==========

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "session phase change");
        }
        self.phase = phase;
        let _ = self.phase_tx.send_replace(phase);
    }

    /// Create a conversation from seed messages, mark it active, and seed
    /// the message store. The store returns the conversation; seeding the
    /// messages here keeps the stores decoupled from each other.
    ///
    /// Returns the new conversation's id.
    async fn create_conversation(&mut self, seeds: Vec<NewMessage>) -> Result<String, ChatError> {
        let conversation = self
            .conversations
            .create_with_messages(&seeds, ConversationKind::default())
            .await?;

        // Prefer the server's persisted identities; fall back to local
        // synthesis if the fetch fails right after creation.
        match self.api.fetch_messages(&conversation.id).await {
            Ok(persisted) if !persisted.is_empty() => {
                self.messages.clear_messages(&conversation.id);
                let mut ordered = persisted;
                ordered.sort_by_key(|m| m.sequence);
                for message in ordered {
                    self.messages.add_message(&conversation.id, message);
                }
            }
            Ok(_) | Err(_) => {
                self.messages.clear_messages(&conversation.id);
                for (offset, seed) in seeds.into_iter().enumerate() {
                    let mut message =
                        Message::local_user(&conversation.id, &seed.content, offset as u32 + 1);
                    message.sender = seed.sender;
                    self.messages.add_message(&conversation.id, message);
                }
            }
        }
        Ok(conversation.id)
    }

    /// Open (or re-open) the transport for the given conversation under a
    /// fresh generation, and send the initialize frame.
    async fn open_transport(&mut self, conversation_id: &str) -> Result<(), ChatError> {
        self.epoch += 1;
        let events = self.transport.connect(conversation_id).await?;
        self.events_epoch = self.epoch;
        self.events = Some(events);

        let history = self.messages.messages(conversation_id).to_vec();
        if let Err(e) = self
            .transport
            .send(ClientFrame::Initialize { data: history })
            .await
        {
            warn!("failed to send initialize frame: {e}");
        }
        Ok(())
    }
}
