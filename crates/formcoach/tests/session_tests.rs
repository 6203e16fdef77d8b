//! Orchestrator integration tests against fake transport and backend.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;

use formcoach::api::{CoachApi, CreateConversationRequest, NewMessage};
use formcoach::cache::CacheSnapshot;
use formcoach::error::{ApiError, ChatError, Notice, TransportError};
use formcoach::session::{ChatSession, GREETING, SessionPhase};
use formcoach::transport::{ConnectionState, Transport, TransportEvent};
use formcoach::ChatConfig;
use formcoach::protocol::{
    CancelReason, ClientFrame, Conversation, ConversationStatus, Message, Sender,
};

/// Transport test double: records sent frames, hands events back to the
/// session through the channel a real transport would use.
#[derive(Default)]
struct FakeTransport {
    state: Mutex<Option<ConnectionState>>,
    sent: Mutex<Vec<ClientFrame>>,
    events_tx: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    fail_send: AtomicBool,
}

impl FakeTransport {
    async fn emit(&self, event: TransportEvent) {
        let tx = self
            .events_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected");
        tx.send(event).await.unwrap();
    }

    fn sent_frames(&self) -> Vec<ClientFrame> {
        self.sent.lock().unwrap().clone()
    }

    fn cancel_frames(&self) -> Vec<CancelReason> {
        self.sent_frames()
            .into_iter()
            .filter_map(|f| match f {
                ClientFrame::Cancel { reason } => Some(reason),
                _ => None,
            })
            .collect()
    }

    fn message_frames(&self) -> Vec<String> {
        self.sent_frames()
            .into_iter()
            .filter_map(|f| match f {
                ClientFrame::Message { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _target: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(64);
        *self.events_tx.lock().unwrap() = Some(tx);
        *self.state.lock().unwrap() = Some(ConnectionState::Connected);
        Ok(rx)
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn disconnect(&self) {
        *self.state.lock().unwrap() = Some(ConnectionState::Disconnected);
        *self.events_tx.lock().unwrap() = None;
    }

    fn state(&self) -> ConnectionState {
        self.state
            .lock()
            .unwrap()
            .unwrap_or(ConnectionState::Disconnected)
    }
}

/// Backend test double.
#[derive(Default)]
struct FakeApi {
    created: AtomicU32,
    persisted: AtomicU32,
}

#[async_trait]
impl CoachApi for FakeApi {
    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApiError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Conversation {
            id: format!("conv-{n}"),
            title: request.title,
            kind: request.kind,
            status: ConversationStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(vec![])
    }

    async fn get_conversation(&self, _id: &str) -> Result<Conversation, ApiError> {
        Err(ApiError::Status {
            status: 404,
            message: "not found".to_string(),
        })
    }

    async fn fetch_messages(&self, _conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        Ok(vec![])
    }

    async fn persist_message(
        &self,
        conversation_id: &str,
        message: NewMessage,
    ) -> Result<Message, ApiError> {
        let n = self.persisted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Message {
            id: format!("srv-{n}"),
            conversation_id: conversation_id.to_string(),
            content: message.content,
            sender: message.sender,
            sequence: n,
            created_at: Utc::now(),
        })
    }

    async fn delete_conversation(&self, _id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn suggested_actions(&self, _context: &[Message]) -> Result<Vec<String>, ApiError> {
        Ok(vec!["Log today's workout".to_string()])
    }
}

fn test_config() -> ChatConfig {
    ChatConfig {
        complete_linger_ms: 0,
        ..Default::default()
    }
}

fn session_with(transport: Arc<FakeTransport>) -> ChatSession {
    ChatSession::new(transport, Arc::new(FakeApi::default()), test_config())
}

#[tokio::test]
async fn first_send_creates_conversation_and_goes_pending() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));

    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.active_conversation_id().is_none());

    session.send_message("hello").await.unwrap();

    let conv_id = session.active_conversation_id().unwrap().to_string();
    assert_eq!(conv_id, "conv-1");
    assert_eq!(session.phase(), SessionPhase::Pending);

    let messages = session.conversation_messages(&conv_id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[0].sender, Sender::User);

    assert_eq!(transport.message_frames(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn chunks_accumulate_and_first_chunk_starts_streaming() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Content {
            chunk: "Hi ".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Streaming);

    transport
        .emit(TransportEvent::Content {
            chunk: "there".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Streaming);
    assert_eq!(session.streaming_content(), Some("Hi there"));
}

#[tokio::test]
async fn completion_folds_stream_into_assistant_message() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    for chunk in ["Hi ", "there"] {
        transport
            .emit(TransportEvent::Content {
                chunk: chunk.to_string(),
            })
            .await;
        session.poll_event().await.unwrap();
    }
    transport.emit(TransportEvent::Complete).await;
    session.poll_event().await.unwrap();

    let conv_id = session.active_conversation_id().unwrap().to_string();
    let messages = session.conversation_messages(&conv_id);
    let assistant = messages.last().unwrap();
    assert_eq!(assistant.sender, Sender::Assistant);
    assert_eq!(assistant.content, "Hi there");
    assert_eq!(assistant.sequence, messages[messages.len() - 2].sequence + 1);

    assert!(session.streaming_content().is_none());
    assert_eq!(session.phase(), SessionPhase::Idle);
    // Completion side effect: suggestions refreshed.
    assert_eq!(session.suggested_actions(), ["Log today's workout"]);
}

#[tokio::test]
async fn cancel_discards_partial_content() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Content {
            chunk: "partial answer".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Streaming);

    session
        .cancel_streaming(CancelReason::UserRequested)
        .await
        .unwrap();

    assert_eq!(transport.cancel_frames(), vec![CancelReason::UserRequested]);
    assert!(session.streaming_content().is_none());
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(
        session.take_notice(),
        Some(Notice::Cancelled {
            reason: CancelReason::UserRequested
        })
    );

    let conv_id = session.active_conversation_id().unwrap().to_string();
    assert!(
        !session
            .conversation_messages(&conv_id)
            .iter()
            .any(|m| m.content == "partial answer")
    );
}

#[tokio::test(start_paused = true)]
async fn repeat_cancel_inside_cooldown_is_rejected() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Content {
            chunk: "x".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();

    session
        .cancel_streaming(CancelReason::UserRequested)
        .await
        .unwrap();
    let err = session
        .cancel_streaming(CancelReason::UserRequested)
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::CancelCooldown));
    assert_eq!(session.take_notice(), Some(Notice::CancelCooldown));
    // Exactly one cancel payload crossed the wire.
    assert_eq!(transport.cancel_frames().len(), 1);
}

#[tokio::test]
async fn disconnect_refused_while_streaming() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Content {
            chunk: "x".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();

    let err = session.disconnect().await.unwrap_err();
    assert!(matches!(err, ChatError::StreamInFlight));
    assert_eq!(transport.state(), ConnectionState::Connected);

    // Subscriptions intact: the session still consumes events.
    transport
        .emit(TransportEvent::Content {
            chunk: "y".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    assert_eq!(session.streaming_content(), Some("xy"));
}

#[tokio::test]
async fn second_send_while_in_flight_is_rejected() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    let err = session.send_message("again").await.unwrap_err();
    assert!(matches!(err, ChatError::SendInFlight));
    // Only the first message reached the transport.
    assert_eq!(transport.message_frames(), vec!["hello".to_string()]);
}

#[tokio::test]
async fn late_chunk_after_cancel_is_dropped() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Content {
            chunk: "old ".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    session
        .cancel_streaming(CancelReason::UserRequested)
        .await
        .unwrap();

    // A chunk from the cancelled stream arrives after cleanup: its
    // generation is retired, so it must leave no trace.
    transport
        .emit(TransportEvent::Content {
            chunk: "stale".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();

    assert!(session.streaming_content().is_none());
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn terminated_stream_surfaces_notice_not_error() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Content {
            chunk: "half a plan".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    transport
        .emit(TransportEvent::Terminated {
            reason: "forced cutoff".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();

    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.streaming_content().is_none());
    assert!(session.last_error().is_none());
    assert_eq!(
        session.take_notice(),
        Some(Notice::StreamTerminated {
            reason: "forced cutoff".to_string()
        })
    );
}

#[tokio::test]
async fn stream_error_resets_to_idle_and_records_error() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    transport
        .emit(TransportEvent::Error {
            message: "backend fell over".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();

    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.last_error(), Some("backend fell over"));
    assert_eq!(
        session.take_notice(),
        Some(Notice::StreamFailed {
            message: "backend fell over".to_string()
        })
    );
}

#[tokio::test]
async fn send_failure_resets_phase_and_rethrows() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    // Establish the conversation and connection first.
    session.connect().await.unwrap();

    transport.fail_send.store(true, Ordering::SeqCst);
    let err = session.send_message("doomed").await.unwrap_err();
    assert!(matches!(err, ChatError::Transport(_)));
    assert_eq!(session.phase(), SessionPhase::Idle);

    // The optimistic message stays; the exchange simply never started.
    let conv_id = session.active_conversation_id().unwrap().to_string();
    assert!(
        session
            .conversation_messages(&conv_id)
            .iter()
            .any(|m| m.content == "doomed")
    );
}

#[tokio::test]
async fn connect_creates_greeting_conversation_and_flushes_queued_message() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));

    session.queue_initial_message("let's plan my week");
    session.connect().await.unwrap();

    let conv_id = session.active_conversation_id().unwrap().to_string();
    let messages = session.conversation_messages(&conv_id);
    assert_eq!(messages[0].content, GREETING);
    assert_eq!(messages[0].sender, Sender::Assistant);
    assert!(messages.iter().any(|m| m.content == "let's plan my week"));

    // The queued message went out automatically after connecting.
    assert_eq!(
        transport.message_frames(),
        vec!["let's plan my week".to_string()]
    );
    assert_eq!(session.phase(), SessionPhase::Pending);

    // An initialize frame preceded it.
    assert!(matches!(
        transport.sent_frames()[0],
        ClientFrame::Initialize { .. }
    ));
}

#[tokio::test]
async fn idle_conversation_archives_and_clears_active_pointer() {
    // An idle conversation restored from cache gets archived on the next check.
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));

    let stale = Conversation {
        id: "conv-old".to_string(),
        title: "Push day".to_string(),
        kind: Default::default(),
        status: ConversationStatus::Active,
        created_at: Utc::now() - chrono::Duration::minutes(300),
        updated_at: Utc::now() - chrono::Duration::minutes(121),
    };
    session.load_cache(CacheSnapshot {
        conversations: std::collections::HashMap::from([(stale.id.clone(), stale)]),
        messages: Default::default(),
    });
    session.conversations().set_active(Some("conv-old".to_string()));

    assert!(session.check_idle_timeout());
    assert!(session.active_conversation_id().is_none());
    assert_eq!(
        session.conversations().get("conv-old").unwrap().status,
        ConversationStatus::Archived
    );
}

#[tokio::test]
async fn cache_snapshot_round_trips_through_session() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    session.send_message("hello").await.unwrap();

    // In-flight streaming state must not appear in the snapshot.
    transport
        .emit(TransportEvent::Content {
            chunk: "partial".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();

    let snapshot = session.cache_snapshot();
    let conv_id = session.active_conversation_id().unwrap().to_string();
    assert!(snapshot.conversations.contains_key(&conv_id));
    assert_eq!(snapshot.messages[&conv_id].len(), 1);
    assert!(
        !snapshot.messages[&conv_id]
            .iter()
            .any(|m| m.content.contains("partial"))
    );

    let mut restored = session_with(Arc::new(FakeTransport::default()));
    restored.load_cache(snapshot);
    assert_eq!(restored.conversation_messages(&conv_id).len(), 1);
}

#[tokio::test]
async fn phase_watch_channel_tracks_transitions() {
    let transport = Arc::new(FakeTransport::default());
    let mut session = session_with(Arc::clone(&transport));
    let mut phases = session.subscribe_phase();

    session.send_message("hello").await.unwrap();
    assert_eq!(*phases.borrow_and_update(), SessionPhase::Pending);

    transport
        .emit(TransportEvent::Content {
            chunk: "x".to_string(),
        })
        .await;
    session.poll_event().await.unwrap();
    assert_eq!(*phases.borrow_and_update(), SessionPhase::Streaming);
}
