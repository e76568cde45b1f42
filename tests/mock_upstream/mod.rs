//! Mock realtime engine
//!
//! Speaks the realtime event protocol over a plain WebSocket. Every client
//! event is recorded. `response.create` starts a scripted response that
//! streams audio deltas until it completes or is cancelled.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How scripted responses behave.
#[derive(Debug, Clone, Copy)]
pub struct MockBehavior {
    /// Audio deltas per response
    pub audio_chunks: usize,
    /// Delay before each delta
    pub chunk_interval: Duration,
    /// PCM bytes per delta
    pub chunk_bytes: usize,
    /// Answer `response.create` with a scripted response
    pub auto_respond: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            audio_chunks: 3,
            chunk_interval: Duration::from_millis(20),
            chunk_bytes: 480,
            auto_respond: true,
        }
    }
}

impl MockBehavior {
    /// A response that keeps streaming long enough to be interrupted.
    pub fn long_running() -> Self {
        Self {
            audio_chunks: 200,
            chunk_interval: Duration::from_millis(50),
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self {
            auto_respond: false,
            ..Self::default()
        }
    }
}

enum Command {
    Send(Value),
    Close,
}

/// One received event and where it arrived.
#[derive(Debug, Clone)]
pub struct Arrival {
    /// Connection number, starting at 1
    pub connection: usize,
    /// Position within that connection, starting at 0
    pub sequence: usize,
    pub event_type: String,
}

/// Handle to a running mock engine.
pub struct MockUpstream {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    arrivals: Arc<Mutex<Vec<Arrival>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Command>>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let current = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = received.clone();
            let arrivals = arrivals.clone();
            let current = current.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let (tx, rx) = mpsc::unbounded_channel();
                    *current.lock() = Some(tx);
                    let connection = connections.fetch_add(1, Ordering::SeqCst) + 1;
                    let recorder = Recorder {
                        connection,
                        next_sequence: 0,
                        received: received.clone(),
                        arrivals: arrivals.clone(),
                    };
                    tokio::spawn(handle_connection(stream, behavior, recorder, rx));
                }
            })
        };

        Self {
            addr,
            received,
            arrivals,
            current,
            connections,
            task,
        }
    }

    /// Endpoint to configure as `REALTIME_URL`.
    pub fn url(&self) -> String {
        format!("ws://{}/v1/realtime", self.addr)
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Event types received so far, in order.
    pub fn received_types(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.received_types()
            .iter()
            .filter(|t| t.as_str() == event_type)
            .count()
    }

    /// Event types received on one connection, in arrival order.
    pub fn arrivals(&self, connection: usize) -> Vec<String> {
        let mut arrivals: Vec<Arrival> = self
            .arrivals
            .lock()
            .iter()
            .filter(|a| a.connection == connection)
            .cloned()
            .collect();
        arrivals.sort_by_key(|a| a.sequence);
        arrivals.into_iter().map(|a| a.event_type).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` events of `event_type` arrived.
    pub async fn wait_for(&self, event_type: &str, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.count(event_type) >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Inject a server event into the newest connection.
    pub fn send(&self, event: Value) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Command::Send(event));
        }
    }

    /// Close the newest connection from the server side.
    pub fn close_connection(&self) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.send(Command::Close);
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Recorder {
    connection: usize,
    next_sequence: usize,
    received: Arc<Mutex<Vec<Value>>>,
    arrivals: Arc<Mutex<Vec<Arrival>>>,
}

impl Recorder {
    fn record(&mut self, event: &Value) {
        self.arrivals.lock().push(Arrival {
            connection: self.connection,
            sequence: self.next_sequence,
            event_type: event["type"].as_str().unwrap_or_default().to_string(),
        });
        self.next_sequence += 1;
        self.received.lock().push(event.clone());
    }
}

struct ActiveResponse {
    id: String,
    item_id: String,
    remaining: usize,
    sent: usize,
    next_at: Instant,
}

async fn handle_connection(
    stream: TcpStream,
    behavior: MockBehavior,
    mut recorder: Recorder,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws_stream.split();

    let created = json!({"type": "session.created", "session": {}});
    if write.send(Message::Text(created.to_string().into())).await.is_err() {
        return;
    }

    let mut response_counter = 0usize;
    let mut active: Option<ActiveResponse> = None;

    loop {
        let next_chunk = active.as_ref().map(|a| a.next_at);

        let outgoing: Vec<Value> = tokio::select! {
            msg = read.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                let Ok(event) = serde_json::from_str::<Value>(&text) else { continue };
                recorder.record(&event);

                match event["type"].as_str().unwrap_or_default() {
                    "session.update" => vec![json!({"type": "session.updated", "session": event["session"].clone()})],
                    "input_audio_buffer.commit" => vec![json!({"type": "input_audio_buffer.committed", "item_id": "item_input"})],
                    "input_audio_buffer.clear" => vec![json!({"type": "input_audio_buffer.cleared"})],
                    "response.create" if behavior.auto_respond && active.is_none() => {
                        response_counter += 1;
                        let id = format!("resp_{response_counter}");
                        active = Some(ActiveResponse {
                            id: id.clone(),
                            item_id: format!("item_{response_counter}"),
                            remaining: behavior.audio_chunks,
                            sent: 0,
                            next_at: Instant::now() + behavior.chunk_interval,
                        });
                        vec![json!({"type": "response.created", "response": {"id": id, "status": "in_progress"}})]
                    }
                    "response.cancel" => match active.take() {
                        Some(response) => vec![json!({
                            "type": "response.done",
                            "response": {"id": response.id, "status": "cancelled"}
                        })],
                        None => Vec::new(),
                    },
                    _ => Vec::new(),
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send(event)) => vec![event],
                Some(Command::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = wait_for(next_chunk) => {
                match active.as_mut() {
                    Some(response) => {
                        let mut events = Vec::new();
                        if response.remaining > 0 {
                            response.sent += 1;
                            response.remaining -= 1;
                            let pcm: Vec<u8> = (0..behavior.chunk_bytes)
                                .map(|i| (i + response.sent) as u8)
                                .collect();
                            if response.sent == 1 {
                                events.push(json!({
                                    "type": "response.text.delta",
                                    "response_id": response.id,
                                    "item_id": response.item_id,
                                    "delta": "Hello",
                                }));
                            }
                            events.push(json!({
                                "type": "response.audio.delta",
                                "response_id": response.id,
                                "item_id": response.item_id,
                                "delta": BASE64_STANDARD.encode(&pcm),
                            }));
                            response.next_at = Instant::now() + behavior.chunk_interval;
                        }
                        if response.remaining == 0 {
                            events.push(json!({
                                "type": "response.text.done",
                                "response_id": response.id,
                                "item_id": response.item_id,
                                "text": "Hello",
                            }));
                            events.push(json!({
                                "type": "response.audio.done",
                                "response_id": response.id,
                                "item_id": response.item_id,
                            }));
                            events.push(json!({
                                "type": "response.done",
                                "response": {"id": response.id, "status": "completed"},
                            }));
                            active = None;
                        }
                        events
                    }
                    None => Vec::new(),
                }
            }
        };

        for event in outgoing {
            if write
                .send(Message::Text(event.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
