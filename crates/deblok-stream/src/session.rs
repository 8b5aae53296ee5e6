use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::consumer::TurnReader;
use crate::delta::DeltaMapping;
use crate::errors::DeblokError;
use crate::message::{Conversation, FailureNotices, Message};
use crate::transport::{ByteStream, TurnRequest, TurnTransport};
use crate::turn::{AbortHandle, AbortSignal, TurnEvent, TurnId, TurnOutcome, abort_pair};

/// Configuration used to create a [`ChatSession`].
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Number of most recent sealed messages sent with each request.
    pub history_window: usize,
    /// Bounded buffer between the read task and the [`TurnStream`].
    pub event_buffer_capacity: usize,
    /// Overrides the transport's own delta mapping.
    pub mapping: Option<DeltaMapping>,
    /// Text written into the assistant slot on failure or empty cancel.
    pub notices: FailureNotices,
    /// Folder the session's turns belong to.
    pub folder_id: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            history_window: 20,
            event_buffer_capacity: 128,
            mapping: None,
            notices: FailureNotices::default(),
            folder_id: None,
        }
    }
}

impl SessionOptions {
    pub fn history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn event_buffer_capacity(mut self, capacity: usize) -> Self {
        self.event_buffer_capacity = capacity;
        self
    }

    pub fn mapping(mut self, mapping: DeltaMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn notices(mut self, notices: FailureNotices) -> Self {
        self.notices = notices;
        self
    }

    pub fn folder_id(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    fn validate(&self) -> Result<(), DeblokError> {
        if self.history_window == 0 {
            return Err(DeblokError::Config(
                "history_window must be greater than 0".into(),
            ));
        }
        if self.event_buffer_capacity == 0 {
            return Err(DeblokError::Config(
                "event_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// One conversation driven over a [`TurnTransport`].
///
/// The session owns the message history and at most one running turn.
/// Starting a turn while another is still streaming aborts the old one; its
/// late updates are dropped because they carry a stale turn id.
pub struct ChatSession {
    transport: Arc<dyn TurnTransport>,
    conversation: Arc<Mutex<Conversation>>,
    options: SessionOptions,
    active: Option<AbortHandle>,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn TurnTransport>,
        options: SessionOptions,
    ) -> Result<Self, DeblokError> {
        Self::with_history(transport, options, Vec::new())
    }

    /// Creates a session seeded with previously persisted messages.
    pub fn with_history(
        transport: Arc<dyn TurnTransport>,
        options: SessionOptions,
        history: Vec<Message>,
    ) -> Result<Self, DeblokError> {
        options.validate()?;
        let conversation = Conversation::with_messages(history).notices(options.notices.clone());
        Ok(Self {
            transport,
            conversation: Arc::new(Mutex::new(conversation)),
            options,
            active: None,
        })
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Snapshot of every message, including an in-progress reply.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.conversation).messages().cloned().collect()
    }

    /// Turn currently streaming into the conversation, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        lock(&self.conversation).active_turn()
    }

    /// Aborts the running turn, if any.
    pub fn abort(&mut self) {
        if let Some(handle) = self.active.take() {
            handle.abort();
        }
    }

    /// Appends `text` as a user message and starts streaming the reply.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_turn(&mut self, text: impl Into<String>) -> Result<TurnStream, DeblokError> {
        let turn_id = TurnId::new();
        let history = {
            let mut conversation = lock(&self.conversation);
            conversation.begin_turn(turn_id, text)?;
            conversation.history(self.options.history_window)
        };
        if let Some(previous) = self.active.take() {
            debug!(turn_id = %turn_id, "aborting previous turn");
            previous.abort();
        }

        let mut request = TurnRequest::new(history);
        request.folder_id = self.options.folder_id.clone();
        let mapping = self
            .options
            .mapping
            .clone()
            .unwrap_or_else(|| self.transport.mapping());

        let (tx, rx) = mpsc::channel(self.options.event_buffer_capacity);
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_handle, abort) = abort_pair();

        info!(
            turn_id = %turn_id,
            transport = self.transport.name(),
            messages = request.messages.len(),
            "turn started"
        );
        tokio::spawn(turn_task(TurnTask {
            turn_id,
            transport: self.transport.clone(),
            request,
            mapping,
            abort,
            sink: EventSink {
                conversation: self.conversation.clone(),
                tx,
                pending: VecDeque::new(),
                forwarding: true,
            },
            final_tx,
        }));

        self.active = Some(abort_handle.clone());
        Ok(TurnStream {
            turn_id,
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        })
    }

    /// Runs one turn to completion and returns the reply text.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<String, DeblokError> {
        self.start_turn(text)?.finish().await?.into_result()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.abort();
    }
}

fn lock(conversation: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    conversation.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Streaming handle returned by [`ChatSession::start_turn`].
///
/// Use `next_event()` to follow deltas as they arrive and `finish()` to get
/// the outcome. The conversation is updated whether or not events are read.
pub struct TurnStream {
    turn_id: TurnId,
    rx: mpsc::Receiver<TurnEvent>,
    final_rx: oneshot::Receiver<TurnOutcome>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl TurnStream {
    pub fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Returns a handle that can cancel the turn.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub fn abort(&self) {
        self.abort_handle.abort();
    }

    /// Waits for the next event. Returns `None` after `Finished`.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        if self.saw_terminal {
            return None;
        }
        let event = self.rx.recv().await;
        if matches!(&event, Some(TurnEvent::Finished { .. }) | None) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains the stream (if needed) and returns the turn outcome.
    ///
    /// Safe to call after consuming events manually with `next_event()`.
    pub async fn finish(mut self) -> Result<TurnOutcome, DeblokError> {
        while self.next_event().await.is_some() {}
        self.final_rx.await.map_err(|_| {
            DeblokError::protocol_msg(format!(
                "turn task ended without an outcome (turn_id={})",
                self.turn_id
            ))
        })
    }
}

struct TurnTask {
    turn_id: TurnId,
    transport: Arc<dyn TurnTransport>,
    request: TurnRequest,
    mapping: DeltaMapping,
    abort: AbortSignal,
    sink: EventSink,
    final_tx: oneshot::Sender<TurnOutcome>,
}

/// Applies events to the conversation, then forwards them to the stream.
///
/// Forwarding waits for room in the channel until the turn is aborted. After
/// that, events only go out while the channel has space, so a stream nobody
/// reads cannot keep a cancelled turn open. The conversation is always
/// updated.
struct EventSink {
    conversation: Arc<Mutex<Conversation>>,
    tx: mpsc::Sender<TurnEvent>,
    pending: VecDeque<TurnEvent>,
    forwarding: bool,
}

impl EventSink {
    async fn flush(&mut self, abort: &mut AbortSignal) {
        while let Some(event) = self.pending.pop_front() {
            let applied = lock(&self.conversation).apply(&event);
            if !applied {
                debug!(turn_id = %event.turn_id(), "dropping update for stale turn");
            }
            if !self.forwarding {
                continue;
            }
            if abort.is_aborted() {
                if self.tx.try_send(event).is_err() {
                    self.forwarding = false;
                }
                continue;
            }
            let delivered = tokio::select! {
                biased;
                sent = self.tx.send(event) => sent.is_ok(),
                _ = abort.aborted() => false,
            };
            if !delivered {
                self.forwarding = false;
            }
        }
    }

    async fn emit(&mut self, event: TurnEvent, abort: &mut AbortSignal) {
        self.pending.push_back(event);
        self.flush(abort).await;
    }
}

async fn turn_task(task: TurnTask) {
    let TurnTask {
        turn_id,
        transport,
        request,
        mapping,
        mut abort,
        mut sink,
        final_tx,
    } = task;

    let opened = tokio::select! {
        biased;
        _ = abort.aborted() => None,
        opened = transport.open(&request) => Some(opened),
    };
    let outcome = match opened {
        None => TurnOutcome::Cancelled {
            text: String::new(),
        },
        Some(Err(error)) => {
            warn!(turn_id = %turn_id, transport = transport.name(), error = %error, "turn request failed");
            TurnOutcome::Failed {
                error,
                text: String::new(),
            }
        }
        Some(Ok(body)) => read_body(turn_id, body, mapping, &mut abort, &mut sink).await,
    };

    info!(
        turn_id = %turn_id,
        phase = ?outcome.phase(),
        chars = outcome.text().chars().count(),
        "turn finished"
    );
    sink.emit(
        TurnEvent::Finished {
            turn_id,
            outcome: outcome.clone(),
        },
        &mut abort,
    )
    .await;
    let _ = final_tx.send(outcome);
}

async fn read_body(
    turn_id: TurnId,
    mut body: ByteStream,
    mapping: DeltaMapping,
    abort: &mut AbortSignal,
    sink: &mut EventSink,
) -> TurnOutcome {
    let mut reader = TurnReader::new(turn_id, mapping).abort_signal(abort.clone());
    if abort.is_aborted() {
        reader.cancel();
    }
    while !reader.is_finished() {
        let pending = &mut sink.pending;
        let mut queue = |event: &TurnEvent| pending.push_back(event.clone());
        tokio::select! {
            biased;
            _ = abort.aborted() => reader.cancel(),
            next = body.next() => match next {
                Some(Ok(chunk)) => reader.feed(&chunk, &mut queue),
                Some(Err(error)) => reader.fail(error),
                None => reader.end(&mut queue),
            },
        }
        sink.flush(abort).await;
    }
    reader.into_outcome()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamError;
    use crate::message::Role;
    use bytes::Bytes;
    use futures::stream;

    type Script = Result<Vec<&'static str>, StreamError>;

    /// Replays one scripted response per request; `hang` keeps the body open
    /// after the scripted chunks.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<(Script, bool)>>,
        requests: Mutex<Vec<TurnRequest>>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<(Script, bool)>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<TurnRequest> {
            self.requests.lock().expect("lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl TurnTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn open(&self, request: &TurnRequest) -> Result<ByteStream, StreamError> {
            self.requests.lock().expect("lock").push(request.clone());
            let (script, hang) = self
                .scripts
                .lock()
                .expect("lock")
                .pop_front()
                .expect("scripted response");
            let chunks: Vec<Result<Bytes, StreamError>> = script?
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            let chunks = stream::iter(chunks);
            let body: ByteStream = if hang {
                Box::pin(chunks.chain(stream::pending()))
            } else {
                Box::pin(chunks)
            };
            Ok(body)
        }
    }

    const BON: &str = "data: {\"type\":\"text\",\"text\":\"Bon\"}\n\n";
    const JOUR: &str = "data: {\"type\":\"text\",\"text\":\"jour\"}\n\n";
    const DONE: &str = "data: {\"type\":\"done\"}\n\n";

    fn session(transport: Arc<ScriptedTransport>, options: SessionOptions) -> ChatSession {
        ChatSession::new(transport, options).expect("session")
    }

    fn last_content(session: &ChatSession) -> String {
        session
            .messages()
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn send_completes_turn_and_sends_history() {
        let transport = ScriptedTransport::new(vec![
            (Ok(vec![BON, JOUR, DONE]), false),
            (Ok(vec![JOUR, DONE]), false),
        ]);
        let mut session = session(transport.clone(), SessionOptions::default().folder_id("f-9"));

        assert_eq!(session.send("Salut").await.expect("first"), "Bonjour");
        assert_eq!(session.send("Encore").await.expect("second"), "jour");
        assert_eq!(session.active_turn(), None);

        let requests = transport.requests();
        assert_eq!(requests[0].messages, vec![Message::user("Salut")]);
        assert_eq!(requests[0].folder_id.as_deref(), Some("f-9"));
        assert_eq!(
            requests[1].messages,
            vec![
                Message::user("Salut"),
                Message::assistant("Bonjour"),
                Message::user("Encore")
            ]
        );
    }

    #[tokio::test]
    async fn events_arrive_in_order_with_single_finish() {
        let transport = ScriptedTransport::new(vec![(Ok(vec![BON, JOUR, DONE]), false)]);
        let mut session = session(transport, SessionOptions::default());
        let mut turn = session.start_turn("Salut").expect("start");
        let turn_id = turn.turn_id();

        let mut events = Vec::new();
        while let Some(event) = turn.next_event().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                TurnEvent::Delta {
                    turn_id,
                    seq: 0,
                    text: "Bon".into()
                },
                TurnEvent::Delta {
                    turn_id,
                    seq: 1,
                    text: "jour".into()
                },
                TurnEvent::Finished {
                    turn_id,
                    outcome: TurnOutcome::Completed {
                        text: "Bonjour".into()
                    }
                },
            ]
        );
        assert!(turn.finish().await.expect("outcome").is_completed());
    }

    #[tokio::test]
    async fn request_failure_writes_one_notice() {
        let transport = ScriptedTransport::new(vec![(
            Err(StreamError::transport("endpoint responded with status 401", Some(401))),
            false,
        )]);
        let mut session = session(transport, SessionOptions::default());
        let err = session.send("Salut").await.expect_err("401");
        assert!(matches!(err, DeblokError::Stream(ref e) if e.status() == Some(401)));
        assert_eq!(last_content(&session), "\nErreur serveur. Réessaie.");
    }

    #[tokio::test]
    async fn abort_keeps_partial_text() {
        let transport = ScriptedTransport::new(vec![(Ok(vec![BON]), true)]);
        let mut session = session(transport, SessionOptions::default());
        let mut turn = session.start_turn("Salut").expect("start");

        assert!(matches!(
            turn.next_event().await,
            Some(TurnEvent::Delta { .. })
        ));
        turn.abort();
        let outcome = turn.finish().await.expect("outcome");
        assert_eq!(outcome, TurnOutcome::Cancelled { text: "Bon".into() });
        assert_eq!(last_content(&session), "Bon");
        assert_eq!(session.active_turn(), None);
    }

    #[tokio::test]
    async fn abort_ends_turn_even_when_stream_is_not_read() {
        const X: &str = "data: {\"type\":\"text\",\"text\":\"x\"}\n\n";
        let transport = ScriptedTransport::new(vec![(Ok(vec![X; 200]), true)]);
        let mut session = session(transport, SessionOptions::default().event_buffer_capacity(4));
        let turn = session.start_turn("Salut").expect("start");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        turn.abort();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while session.active_turn().is_some() {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn sealed after abort");

        let partial = last_content(&session);
        assert!(!partial.is_empty());
        assert!(partial.chars().all(|c| c == 'x'));
        assert_eq!(
            turn.finish().await.expect("outcome"),
            TurnOutcome::Cancelled { text: partial }
        );
    }

    #[tokio::test]
    async fn new_turn_cancels_previous_without_interleaving() {
        let transport = ScriptedTransport::new(vec![
            (Ok(vec![BON]), true),
            (Ok(vec![JOUR, DONE]), false),
        ]);
        let mut session = session(transport, SessionOptions::default());

        let mut first = session.start_turn("one").expect("first");
        assert!(matches!(
            first.next_event().await,
            Some(TurnEvent::Delta { .. })
        ));
        let second = session.start_turn("two").expect("second");

        assert_eq!(
            first.finish().await.expect("first outcome"),
            TurnOutcome::Cancelled { text: "Bon".into() }
        );
        assert!(second.finish().await.expect("second outcome").is_completed());

        let messages: Vec<(Role, String)> = session
            .messages()
            .into_iter()
            .map(|m| (m.role, m.content))
            .collect();
        assert_eq!(
            messages,
            vec![
                (Role::User, "one".to_string()),
                (Role::Assistant, "Bon".to_string()),
                (Role::User, "two".to_string()),
                (Role::Assistant, "jour".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn blank_message_is_rejected_before_request() {
        let transport = ScriptedTransport::new(Vec::new());
        let mut session = session(transport.clone(), SessionOptions::default());
        assert!(matches!(
            session.start_turn("   "),
            Err(DeblokError::Validation(_))
        ));
        assert!(transport.requests().is_empty());
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn history_window_limits_request() {
        let transport = ScriptedTransport::new(vec![(Ok(vec![DONE]), false)]);
        let mut session = ChatSession::with_history(
            transport.clone(),
            SessionOptions::default().history_window(2),
            vec![Message::user("a"), Message::assistant("b")],
        )
        .expect("session");
        session.send("c").await.expect("send");
        assert_eq!(
            transport.requests()[0].messages,
            vec![Message::assistant("b"), Message::user("c")]
        );
    }

    #[test]
    fn zero_sized_options_are_rejected() {
        let transport = ScriptedTransport::new(Vec::new());
        assert!(matches!(
            ChatSession::new(
                transport.clone(),
                SessionOptions::default().event_buffer_capacity(0)
            ),
            Err(DeblokError::Config(_))
        ));
        assert!(matches!(
            ChatSession::new(transport, SessionOptions::default().history_window(0)),
            Err(DeblokError::Config(_))
        ));
    }
}
