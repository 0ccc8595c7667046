//! WebSocket relay between a browser and the upstream API
//!
//! Each upgrade on the proxy prefix becomes one [`RelaySession`]: the client
//! socket is accepted first, the upstream socket is dialled afterwards, and
//! client frames that arrive in between are held in a [`PendingQueue`].
//! Once upstream is open the queue is flushed in order before live relaying
//! starts. Both legs co-terminate.

use std::collections::VecDeque;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{
        ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket},
        FromRequestParts, WebSocketUpgrade,
    },
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        protocol::{frame::coding::CloseCode, CloseFrame as UpstreamCloseFrame},
        Message as UpstreamMessage,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::proxy::server::AppState;

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code sent to the surviving leg when the other one errors.
pub const ABNORMAL_CLOSE: u16 = 1011;
pub const UPSTREAM_ERROR_REASON: &str = "Upstream Error";
pub const CLIENT_ERROR_REASON: &str = "Client Error";
/// Close code used when a client floods the queue before upstream opens.
pub const QUEUE_OVERFLOW_CLOSE: u16 = 1008;
const QUEUE_OVERFLOW_REASON: &str = "Pending queue overflow";
/// How long a leg may take to finish its closing handshake.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Bounded FIFO of client frames received while upstream is connecting.
#[derive(Debug)]
pub struct PendingQueue<T> {
    items: VecDeque<T>,
    limit: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct QueueFull;

impl<T> PendingQueue<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            items: VecDeque::new(),
            limit,
        }
    }

    pub fn push(&mut self, item: T) -> Result<(), QueueFull> {
        if self.items.len() >= self.limit {
            return Err(QueueFull);
        }
        self.items.push_back(item);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Hand over every queued item in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }
}

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    ClientError,
    UpstreamError,
}

/// One client socket paired with one upstream socket.
pub struct RelaySession {
    id: Uuid,
    target: Url,
    protocol: Option<HeaderValue>,
    connect_timeout: Duration,
    queue_limit: usize,
}

impl RelaySession {
    pub fn new(
        target: Url,
        protocol: Option<HeaderValue>,
        connect_timeout: Duration,
        queue_limit: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            protocol,
            connect_timeout,
            queue_limit,
        }
    }

    pub async fn run(self, client: WebSocket) {
        let (mut client_tx, mut client_rx) = client.split();
        let mut pending = PendingQueue::new(self.queue_limit);

        let connect = connect_upstream(&self.target, self.protocol.as_ref(), self.connect_timeout);
        tokio::pin!(connect);

        // CONNECTING: buffer client frames until upstream is open
        let upstream = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(socket) => break socket,
                    Err(e) => {
                        tracing::error!(relay = %self.id, "Upstream WebSocket connect failed: {}", e);
                        close_leg(&mut client_tx, abnormal_client_close(UPSTREAM_ERROR_REASON)).await;
                        drain_until_closed(&mut client_rx).await;
                        return;
                    }
                },
                incoming = client_rx.next() => match incoming {
                    Some(Ok(ClientMessage::Close(_))) | None => {
                        tracing::debug!(relay = %self.id, "Client left before upstream opened");
                        drain_until_closed(&mut client_rx).await;
                        return;
                    }
                    Some(Ok(message)) => {
                        let Some(frame) = to_upstream(message) else { continue };
                        if pending.push(frame).is_err() {
                            tracing::warn!(relay = %self.id, "Pending queue full ({}), closing client", self.queue_limit);
                            close_leg(&mut client_tx, ClientMessage::Close(Some(ClientCloseFrame {
                                code: QUEUE_OVERFLOW_CLOSE,
                                reason: QUEUE_OVERFLOW_REASON.into(),
                            })))
                            .await;
                            drain_until_closed(&mut client_rx).await;
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(relay = %self.id, "Client error before upstream opened: {}", e);
                        return;
                    }
                }
            }
        };

        let (mut upstream_tx, mut upstream_rx) = upstream.split();

        // OPEN: flush the backlog before any live frame
        tracing::debug!(relay = %self.id, "Upstream open, flushing {} queued message(s)", pending.len());
        for frame in pending.drain() {
            if let Err(e) = upstream_tx.send(frame).await {
                tracing::error!(relay = %self.id, "Upstream send failed during flush: {}", e);
                close_leg(&mut client_tx, abnormal_client_close(UPSTREAM_ERROR_REASON)).await;
                drain_until_closed(&mut client_rx).await;
                return;
            }
        }

        let end = relay_frames(
            &mut client_tx,
            &mut client_rx,
            &mut upstream_tx,
            &mut upstream_rx,
        )
        .await;

        // Both legs are read until they end: the closed side so its queued
        // close reply gets flushed, the other side to receive the peer's reply.
        tokio::join!(
            drain_until_closed(&mut client_rx),
            drain_until_closed(&mut upstream_rx),
        );

        tracing::info!(relay = %self.id, "Relay closed: {:?}", end);
    }
}

/// Live relaying in both directions until either leg closes or errors.
async fn relay_frames<CT, CR, UT, UR>(
    client_tx: &mut CT,
    client_rx: &mut CR,
    upstream_tx: &mut UT,
    upstream_rx: &mut UR,
) -> RelayEnd
where
    CT: Sink<ClientMessage> + Unpin,
    CR: Stream<Item = Result<ClientMessage, axum::Error>> + Unpin,
    UT: Sink<UpstreamMessage> + Unpin,
    UR: Stream<Item = Result<UpstreamMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            incoming = client_rx.next() => match incoming {
                Some(Ok(ClientMessage::Close(frame))) => {
                    close_leg(upstream_tx, UpstreamMessage::Close(frame.map(close_to_upstream))).await;
                    return RelayEnd::ClientClosed;
                }
                Some(Ok(message)) => {
                    let Some(frame) = to_upstream(message) else { continue };
                    if upstream_tx.send(frame).await.is_err() {
                        close_leg(client_tx, abnormal_client_close(UPSTREAM_ERROR_REASON)).await;
                        return RelayEnd::UpstreamError;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!("Client leg error: {}", e);
                    close_leg(upstream_tx, abnormal_upstream_close(CLIENT_ERROR_REASON)).await;
                    return RelayEnd::ClientError;
                }
                None => {
                    close_leg(upstream_tx, UpstreamMessage::Close(None)).await;
                    return RelayEnd::ClientClosed;
                }
            },
            incoming = upstream_rx.next() => match incoming {
                Some(Ok(UpstreamMessage::Close(frame))) => {
                    close_leg(client_tx, ClientMessage::Close(frame.map(close_to_client))).await;
                    return RelayEnd::UpstreamClosed;
                }
                Some(Ok(message)) => {
                    let Some(frame) = to_client(message) else { continue };
                    if client_tx.send(frame).await.is_err() {
                        close_leg(upstream_tx, abnormal_upstream_close(CLIENT_ERROR_REASON)).await;
                        return RelayEnd::ClientError;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!("Upstream leg error: {}", e);
                    close_leg(client_tx, abnormal_client_close(UPSTREAM_ERROR_REASON)).await;
                    return RelayEnd::UpstreamError;
                }
                None => {
                    close_leg(client_tx, ClientMessage::Close(None)).await;
                    return RelayEnd::UpstreamClosed;
                }
            },
        }
    }
}

async fn connect_upstream(
    target: &Url,
    protocol: Option<&HeaderValue>,
    timeout: Duration,
) -> Result<UpstreamSocket, ProxyError> {
    let mut request = target.as_str().into_client_request()?;
    if let Some(protocol) = protocol {
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }

    let (socket, _) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| ProxyError::ConnectTimeout)??;
    Ok(socket)
}

/// Send a close frame on a leg, ignoring a peer that is already gone.
async fn close_leg<S, M>(sink: &mut S, frame: M)
where
    S: Sink<M> + Unpin,
{
    let _ = sink.send(frame).await;
}

/// Keep reading a leg until it ends, at most for `CLOSE_GRACE`. Reading is
/// what flushes a close reply queued by the WebSocket implementation.
async fn drain_until_closed<S, T, E>(stream: &mut S)
where
    S: Stream<Item = Result<T, E>> + Unpin,
{
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = stream.next().await {}
    })
    .await;
}

fn abnormal_client_close(reason: &'static str) -> ClientMessage {
    ClientMessage::Close(Some(ClientCloseFrame {
        code: ABNORMAL_CLOSE,
        reason: reason.into(),
    }))
}

fn abnormal_upstream_close(reason: &'static str) -> UpstreamMessage {
    UpstreamMessage::Close(Some(UpstreamCloseFrame {
        code: CloseCode::from(ABNORMAL_CLOSE),
        reason: reason.into(),
    }))
}

fn close_to_upstream(frame: ClientCloseFrame<'static>) -> UpstreamCloseFrame<'static> {
    UpstreamCloseFrame {
        code: CloseCode::from(frame.code),
        reason: frame.reason,
    }
}

fn close_to_client(frame: UpstreamCloseFrame<'static>) -> ClientCloseFrame<'static> {
    ClientCloseFrame {
        code: frame.code.into(),
        reason: frame.reason,
    }
}

/// Data frames cross unchanged; ping/pong stay on their own leg.
fn to_upstream(message: ClientMessage) -> Option<UpstreamMessage> {
    match message {
        ClientMessage::Text(text) => Some(UpstreamMessage::Text(text)),
        ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ClientMessage::Close(frame) => Some(UpstreamMessage::Close(frame.map(close_to_upstream))),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
    }
}

fn to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text)),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(close_to_client))),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
    }
}

/// Sub-protocols offered by the client, in preference order.
fn requested_protocols(header: Option<&HeaderValue>) -> Vec<String> {
    header
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Without a credential the upgrade is refused before any handshake and the
/// connection is torn down.
fn refuse_upgrade() -> Response {
    let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Accept a WebSocket upgrade on the proxy prefix and start a relay session.
pub async fn handle_upgrade(state: AppState, request: Request<Body>) -> Response {
    let Some(credential) = state.credential.clone() else {
        tracing::warn!("WebSocket upgrade refused: upstream API key is not configured");
        return refuse_upgrade();
    };

    let (mut parts, _body) = request.into_parts();
    let path = crate::proxy::upstream_path(parts.uri.path()).to_string();

    let target = match credential.websocket_url(&state.ws_base_url, &path, parts.uri.query()) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!("Cannot build upstream WebSocket URL for {}: {}", path, e);
            return e.into_response();
        }
    };

    let protocol = parts.headers.get(header::SEC_WEBSOCKET_PROTOCOL).cloned();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    tracing::info!("WebSocket relay requested for {}", path);

    let session = RelaySession::new(
        target,
        protocol.clone(),
        state.ws_connect_timeout,
        state.pending_queue_limit,
    );

    upgrade
        .protocols(requested_protocols(protocol.as_ref()))
        .on_upgrade(move |socket| session.run(socket))
}
