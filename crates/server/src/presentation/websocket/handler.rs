use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use ticker_core::{SubscriberId, Symbol};
use ticker_streaming::PriceStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::message::{WsRequest, WsResponse, parse_stream_param, stream_name};
use crate::presentation::rest::{AppState, client_id};

const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub client_id: Option<String>,
}

/// Streams opened by one connection, keyed by symbol
#[derive(Default)]
struct Subscriptions {
    next_seq: u64,
    streams: HashMap<Symbol, (u64, CancellationToken)>,
}

impl Subscriptions {
    fn insert(&mut self, symbol: Symbol, disconnect: CancellationToken) -> u64 {
        self.next_seq += 1;
        if let Some((_, previous)) = self.streams.insert(symbol, (self.next_seq, disconnect)) {
            previous.cancel();
        }
        self.next_seq
    }

    /// Forget `symbol` only if it still maps to stream `seq`
    fn finished(&mut self, symbol: &Symbol, seq: u64) {
        if self.streams.get(symbol).is_some_and(|(s, _)| *s == seq) {
            self.streams.remove(symbol);
        }
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.streams.keys().map(stream_name).collect();
        names.sort();
        names
    }
}

type SharedSubscriptions = Arc<parking_lot::Mutex<Subscriptions>>;

/// Handle WebSocket upgrade
///
/// The client identity is the `x-client-id` header, else the `clientId`
/// query parameter, else a fresh id for this connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let client = client_id(&headers)
        .or_else(|| {
            query
                .client_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
        })
        .unwrap_or_else(|| SubscriberId::generate().to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state, client))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client: String) {
    let open = state.connection_opened();
    tracing::info!(client = %client, connections = open, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let subscriptions: SharedSubscriptions = Arc::default();

    // Channel for outgoing messages
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<WsRequest>(&text) {
            Ok(WsRequest::Subscribe { id, params }) => {
                let mut failures = Vec::new();
                for param in &params {
                    let symbol = match parse_stream_param(param) {
                        Ok(symbol) => symbol,
                        Err(e) => {
                            failures.push(WsResponse::invalid_param(id, param, &e));
                            continue;
                        }
                    };
                    let subscriber = SubscriberId::for_stream(&client, &symbol);
                    match state
                        .service
                        .subscribe(symbol.as_str(), Some(subscriber.as_str()))
                        .await
                    {
                        Ok(stream) => {
                            let seq = subscriptions
                                .lock()
                                .insert(symbol, stream.disconnect_handle());
                            tokio::spawn(forward_stream(
                                stream,
                                seq,
                                tx.clone(),
                                Arc::clone(&subscriptions),
                            ));
                        }
                        Err(e) => failures.push(WsResponse::stream_error(Some(id), &e)),
                    }
                }

                if failures.is_empty() {
                    send(&tx, &WsResponse::ok(id)).await;
                }
                for failure in &failures {
                    send(&tx, failure).await;
                }
            }
            Ok(WsRequest::Unsubscribe { id, params }) => {
                let mut failures = Vec::new();
                for param in &params {
                    let symbol = match parse_stream_param(param) {
                        Ok(symbol) => symbol,
                        Err(e) => {
                            failures.push(WsResponse::invalid_param(id, param, &e));
                            continue;
                        }
                    };
                    let subscriber = SubscriberId::for_stream(&client, &symbol);
                    if let Err(e) = state
                        .service
                        .unsubscribe(symbol.as_str(), subscriber.as_str())
                        .await
                    {
                        failures.push(WsResponse::stream_error(Some(id), &e));
                    }
                    if let Some((_, disconnect)) = subscriptions.lock().streams.remove(&symbol) {
                        disconnect.cancel();
                    }
                }

                if failures.is_empty() {
                    send(&tx, &WsResponse::ok(id)).await;
                }
                for failure in &failures {
                    send(&tx, failure).await;
                }
            }
            Ok(WsRequest::ListSubscriptions { id }) => {
                let current = subscriptions.lock().names();
                send(&tx, &WsResponse::subscriptions(id, current)).await;
            }
            Err(e) => {
                let error = WsResponse::error(None, -1, format!("Invalid request: {}", e));
                send(&tx, &error).await;
            }
        }
    }

    // Socket gone: every stream of this connection is disconnected
    let streams: Vec<_> = subscriptions.lock().streams.drain().collect();
    for (_, (_, disconnect)) in &streams {
        disconnect.cancel();
    }
    drop(tx);
    let _ = send_task.await;

    let open = state.connection_closed();
    tracing::info!(
        client = %client,
        streams = streams.len(),
        connections = open,
        "WebSocket disconnected"
    );
}

/// Pump one price stream into the connection's outbound queue
async fn forward_stream(
    mut stream: PriceStream,
    seq: u64,
    tx: mpsc::Sender<String>,
    subscriptions: SharedSubscriptions,
) {
    let symbol = stream.symbol().clone();
    while let Some(item) = stream.next().await {
        let frame = match &item {
            Ok(sample) => WsResponse::price(sample),
            Err(e) => WsResponse::stream_error(None, e),
        };
        if !send(&tx, &frame).await {
            break;
        }
    }
    stream.close().await;
    subscriptions.lock().finished(&symbol, seq);
    tracing::debug!(symbol = %symbol, "Stream forwarder finished");
}

async fn send(tx: &mpsc::Sender<String>, response: &WsResponse) -> bool {
    match serde_json::to_string(response) {
        Ok(json) => tx.send(json).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WebSocket frame");
            false
        }
    }
}
