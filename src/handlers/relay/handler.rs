//! Relay WebSocket handler
//!
//! One task per client connection. The task owns the [`Session`] state
//! machine and the upstream link; it feeds client frames, upstream events
//! and timer expiries into the session and executes the actions it returns.
//! A separate sender task drains the [`Outbox`] into the client socket.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AudioFraming;
use crate::core::realtime::{
    BoxedRealtime, RealtimeProvider, RealtimeResult, UpstreamEvent, create_realtime_provider,
};
use crate::core::session::{
    ClientNotice, FrameDisposition, RelayStats, Session, SessionAction, UpstreamCommand,
};
use crate::errors::RelayError;
use crate::state::AppState;

use super::messages::{
    RelayIncomingMessage, RelayMessageRoute, RelayOutgoingMessage, decode_audio,
    parse_binary_frame,
};
use super::outbox::{OUTBOX_CAPACITY, Outbox};

/// Channel buffer for upstream events
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (1 MiB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MiB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Close the session after this long without a client frame
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket and runs one relay session on it.
pub async fn relay_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Relay WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state))
}

/// Run one relay session until the client leaves, idles out, or the server shuts down.
async fn handle_relay_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let session_id = Uuid::new_v4().to_string();
    let guard = app_state.sessions.register(session_id.clone());
    let cancel = guard.cancellation().clone();
    info!(session_id = %session_id, clients = app_state.sessions.len(), "Relay session started");

    let (sender, mut receiver) = socket.split();
    let outbox = Arc::new(Outbox::new(OUTBOX_CAPACITY));
    let mut sender_task = tokio::spawn(run_sender(
        sender,
        outbox.clone(),
        app_state.stats.clone(),
        session_id.clone(),
    ));

    let (upstream_tx, mut upstream_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let mut bridge = RelayBridge {
        session: Session::new(session_id.clone(), app_state.config.session_policy()),
        link: None,
        epoch: 0,
        upstream_tx,
        outbox: outbox.clone(),
        framing: app_state.config.audio_framing,
        app_state: app_state.clone(),
    };

    let idle = tokio::time::sleep(IDLE_TIMEOUT);
    tokio::pin!(idle);
    let mut sender_done = false;

    loop {
        let deadline = bridge.session.next_deadline();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(session_id = %session_id, "Server shutting down, closing relay session");
                break;
            }
            msg_result = receiver.next() => {
                idle.as_mut().reset(Instant::now() + IDLE_TIMEOUT);

                match msg_result {
                    Some(Ok(msg)) => {
                        if !bridge.handle_client_message(msg).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Client WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "Client closed the connection");
                        break;
                    }
                }
            }
            _ = &mut sender_task => {
                sender_done = true;
                if outbox.overflowed() {
                    warn!(session_id = %session_id, "Client stopped reading, closing relay session");
                } else {
                    info!(session_id = %session_id, "Client socket no longer writable");
                }
                break;
            }
            Some((epoch, event)) = upstream_rx.recv() => {
                bridge.handle_upstream_event(epoch, event).await;
            }
            _ = wait_for(deadline) => {
                let actions = bridge.session.on_tick(Instant::now());
                bridge.apply(actions).await;
            }
            _ = &mut idle => {
                warn!(session_id = %session_id, "Relay session idle for {}s, closing", IDLE_TIMEOUT.as_secs());
                outbox.push(RelayMessageRoute::error(&RelayError::UpstreamConnection(
                    "Connection closed due to inactivity".to_string(),
                )));
                break;
            }
        }
    }

    // Cleanup: the upstream link never outlives the client connection
    bridge.close_link().await;
    outbox.push(RelayMessageRoute::Close);
    outbox.close();
    if !sender_done
        && tokio::time::timeout(Duration::from_secs(1), sender_task)
            .await
            .is_err()
    {
        debug!(session_id = %session_id, "Sender task did not finish in time");
    }

    drop(guard);
    info!(session_id = %session_id, "Relay session terminated");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drain the outbox into the client socket.
async fn run_sender(
    mut sender: SplitSink<WebSocket, Message>,
    outbox: Arc<Outbox>,
    stats: Arc<RelayStats>,
    session_id: String,
) {
    while let Some(route) = outbox.recv().await {
        let is_audio = route.is_audio();

        let result = match route {
            RelayMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                Err(e) => {
                    error!(session_id = %session_id, "Failed to serialize outgoing message: {}", e);
                    continue;
                }
            },
            RelayMessageRoute::Binary(data) => sender.send(Message::Binary(data)).await,
            RelayMessageRoute::Close => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        };

        if let Err(e) = result {
            debug!(session_id = %session_id, "Failed to send WebSocket message: {}", e);
            break;
        }
        if is_audio {
            stats.record_audio_delta_sent();
        }
    }
}

/// Per-connection glue between the session, its upstream link and the client.
struct RelayBridge {
    session: Session,
    link: Option<BoxedRealtime>,
    /// Incremented for every new link; events from older links are ignored.
    epoch: u64,
    upstream_tx: mpsc::Sender<(u64, UpstreamEvent)>,
    outbox: Arc<Outbox>,
    framing: AudioFraming,
    app_state: Arc<AppState>,
}

impl RelayBridge {
    /// Returns `false` when the connection should end.
    async fn handle_client_message(&mut self, msg: Message) -> bool {
        match msg {
            Message::Text(text) => {
                let incoming: RelayIncomingMessage = match serde_json::from_str(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(session_id = %self.session.id(), "Failed to parse client message: {}", e);
                        self.reject(RelayError::MalformedMessage(format!(
                            "Invalid message format: {e}"
                        )));
                        return true;
                    }
                };

                if let Err(e) = incoming.validate_size() {
                    warn!(session_id = %self.session.id(), "Message validation failed: {}", e);
                    self.reject(e);
                    return true;
                }

                self.handle_incoming(incoming).await;
                true
            }
            Message::Binary(data) => {
                match parse_binary_frame(&data) {
                    Ok(pcm) => self.handle_audio(pcm).await,
                    Err(e) => self.reject(e),
                }
                true
            }
            Message::Ping(_) | Message::Pong(_) => true,
            Message::Close(_) => {
                info!(session_id = %self.session.id(), "Client close frame received");
                false
            }
        }
    }

    async fn handle_incoming(&mut self, msg: RelayIncomingMessage) {
        let actions = match msg {
            RelayIncomingMessage::Connect {
                supports_text_input,
            } => self.session.on_connect(supports_text_input),
            RelayIncomingMessage::Disconnect => self.session.on_disconnect(),
            RelayIncomingMessage::Audio { audio } => {
                match decode_audio(&audio) {
                    Ok(pcm) => self.handle_audio(pcm).await,
                    Err(e) => self.reject(e),
                }
                return;
            }
            RelayIncomingMessage::Text { text } => self.session.on_text(&text),
            RelayIncomingMessage::InterruptResponse => self.session.on_interrupt(Instant::now()),
            RelayIncomingMessage::Ping => {
                self.outbox
                    .push(RelayMessageRoute::Outgoing(RelayOutgoingMessage::Pong));
                return;
            }
        };
        self.apply(actions).await;
    }

    async fn handle_audio(&mut self, pcm: Bytes) {
        let (disposition, actions) = self.session.on_audio(pcm, Instant::now());
        self.app_state.stats.record_frame(disposition);
        if disposition == FrameDisposition::Ignored {
            debug!(session_id = %self.session.id(), "No upstream link, dropping audio");
        }
        self.apply(actions).await;
    }

    async fn handle_upstream_event(&mut self, epoch: u64, event: UpstreamEvent) {
        if epoch != self.epoch || self.link.is_none() {
            debug!(
                session_id = %self.session.id(),
                event = event.kind(),
                "Ignoring event from a replaced upstream link"
            );
            return;
        }
        let actions = self.session.on_upstream_event(event, Instant::now());
        self.apply(actions).await;
    }

    fn reject(&self, error: RelayError) {
        self.outbox.push(RelayMessageRoute::error(&error));
    }

    /// Execute session actions in order. Opening a link feeds its outcome back in.
    async fn apply(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<SessionAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::OpenUpstream => {
                    let follow_up = self.open_link().await;
                    queue.extend(follow_up);
                }
                SessionAction::CloseUpstream => self.close_link().await,
                SessionAction::Upstream(command) => {
                    if let Err(e) = self.execute(command).await {
                        warn!(session_id = %self.session.id(), "Upstream command failed: {}", e);
                        queue.extend(self.session.on_upstream_closed(Some(e.to_string())));
                    }
                }
                SessionAction::Notify(notice) => self.notify(notice),
            }
        }
    }

    fn notify(&self, notice: ClientNotice) {
        let stats = &self.app_state.stats;
        match &notice {
            ClientNotice::Interrupted => stats.record_interruption(),
            ClientNotice::ResponseDone { .. } => stats.record_response_completed(),
            _ => {}
        }

        let route = RelayMessageRoute::from_notice(notice, self.session.id(), self.framing);
        let dropped = self.outbox.push(route);
        if dropped > 0 {
            debug!(session_id = %self.session.id(), dropped, "Client outbox full, dropped audio");
            stats.record_audio_deltas_dropped(dropped as u64);
        }
    }

    async fn open_link(&mut self) -> Vec<SessionAction> {
        self.close_link().await;
        self.epoch += 1;
        let epoch = self.epoch;

        let provider = RealtimeProvider::OpenAI.to_string();
        let mut link =
            match create_realtime_provider(&provider, self.app_state.config.to_realtime_config()) {
                Ok(link) => link,
                Err(e) => {
                    error!(session_id = %self.session.id(), "Failed to create upstream link: {}", e);
                    return self.session.on_upstream_failed(e.to_string());
                }
            };

        let tx = self.upstream_tx.clone();
        let registered = link.on_event(Arc::new(move |event: UpstreamEvent| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send((epoch, event)).await;
            })
        }));
        if let Err(e) = registered {
            return self.session.on_upstream_failed(e.to_string());
        }

        match link.connect().await {
            Ok(()) => {
                info!(session_id = %self.session.id(), epoch, "Upstream link connected");
                self.link = Some(link);
                self.session.on_upstream_ready()
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), "Upstream connection failed: {}", e);
                self.session.on_upstream_failed(e.to_string())
            }
        }
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!(session_id = %self.session.id(), epoch = self.epoch, "Closing upstream link");
            if let Err(e) = link.disconnect().await {
                debug!(session_id = %self.session.id(), "Upstream disconnect failed: {}", e);
            }
        }
    }

    async fn execute(&mut self, command: UpstreamCommand) -> RealtimeResult<()> {
        let Some(link) = self.link.as_mut() else {
            debug!(session_id = %self.session.id(), ?command, "No upstream link, dropping command");
            return Ok(());
        };

        match command {
            UpstreamCommand::AppendAudio(pcm) => link.send_audio(pcm).await,
            UpstreamCommand::Commit => link.commit_audio_buffer().await,
            UpstreamCommand::ClearInput => link.clear_audio_buffer().await,
            UpstreamCommand::SendText(text) => link.send_text(&text).await,
            UpstreamCommand::CreateResponse(request) => link.create_response(Some(request)).await,
            UpstreamCommand::CancelResponse => link.cancel_response().await,
        }
    }
}
