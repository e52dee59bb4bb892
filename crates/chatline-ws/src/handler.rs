use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chatline_core::{auth, AppState, DispatchError, Ephemeral};
use chatline_models::gateway::{
    ClientEvent, ServerEvent, CLOSE_HANDSHAKE_TIMEOUT, CLOSE_UNAUTHENTICATED,
};
use chatline_models::ChatId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::session::Session;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(20);

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let payload = serde_json::to_string(event).map_err(|_| ())?;
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_close(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // First frame must be a connect event carrying a valid token.
    let token = match tokio::time::timeout(HANDSHAKE_TIMEOUT, wait_for_connect(&mut receiver)).await
    {
        Ok(Some(token)) => token,
        Ok(None) => {
            send_close(&mut sender, CLOSE_UNAUTHENTICATED, "expected connect event").await;
            return;
        }
        Err(_) => {
            send_close(&mut sender, CLOSE_HANDSHAKE_TIMEOUT, "handshake timed out").await;
            return;
        }
    };

    let user_id = match auth::authenticate_connection(&token, &state.config.jwt_secret) {
        Ok(user_id) => user_id,
        Err(err) => {
            tracing::debug!(error = %err, "gateway handshake rejected");
            send_close(&mut sender, CLOSE_UNAUTHENTICATED, "invalid token").await;
            return;
        }
    };

    let session = Session::new(user_id);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    state
        .dispatcher
        .presence()
        .register(session.user_id, session.connection_id, event_tx);
    tracing::info!(
        user_id = session.user_id,
        connection_id = %session.connection_id,
        "gateway connection established"
    );

    if send_event(&mut sender, &ServerEvent::Ready { user_id }).await.is_err() {
        state.dispatcher.presence().unregister(session.connection_id);
        return;
    }

    let reason = run_session(&mut sender, &mut receiver, &session, &state, event_rx).await;

    state.dispatcher.presence().unregister(session.connection_id);
    tracing::info!(
        user_id = session.user_id,
        connection_id = %session.connection_id,
        reason,
        "gateway connection closed"
    );
}

async fn wait_for_connect(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Connect { token }) => Some(token),
                    _ => None,
                };
            }
            Message::Close(_) => return None,
            // Pings are answered by axum; ignore everything else pre-handshake.
            _ => {}
        }
    }
    None
}

async fn run_session(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
    session: &Session,
    state: &AppState,
    mut event_rx: mpsc::UnboundedReceiver<ServerEvent>,
) -> &'static str {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => event,
                            Err(err) => {
                                let _ = send_event(sender, &ServerEvent::Error {
                                    message: format!("unrecognized event: {err}"),
                                }).await;
                                continue;
                            }
                        };
                        if handle_client_event(sender, session, state, event).await.is_err() {
                            return "websocket send error";
                        }
                    }
                    Some(Ok(Message::Close(_))) => return "client close frame",
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return "websocket receive error",
                    None => return "websocket stream ended",
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => {
                        if send_event(sender, &event).await.is_err() {
                            return "websocket send error";
                        }
                    }
                    // Registry dropped our sender; the connection was evicted.
                    None => return "event channel closed",
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return "websocket ping send error";
                }
            }
        }
    }
}

async fn handle_client_event(
    sender: &mut SplitSink<WebSocket, Message>,
    session: &Session,
    state: &AppState,
    event: ClientEvent,
) -> Result<(), ()> {
    match event {
        // Reconnecting on an already-open socket is not part of the protocol.
        ClientEvent::Connect { .. } => {
            send_event(
                sender,
                &ServerEvent::Error {
                    message: "already connected".to_string(),
                },
            )
            .await
        }
        ClientEvent::SendMessage { chat_id, body } => {
            match state
                .dispatcher
                .dispatch(chat_id, session.user_id, Some(session.connection_id), &body)
                .await
            {
                // The fan-out skipped this connection; echo the persisted
                // message back so the sender sees it exactly once.
                Ok(message) => send_event(sender, &ServerEvent::MessageReceived(message)).await,
                Err(err) => send_dispatch_error(sender, session, chat_id, err).await,
            }
        }
        ClientEvent::TypingStart { chat_id } => {
            publish_ephemeral(sender, session, state, chat_id, Ephemeral::TypingStart).await
        }
        ClientEvent::TypingStop { chat_id } => {
            publish_ephemeral(sender, session, state, chat_id, Ephemeral::TypingStop).await
        }
    }
}

async fn publish_ephemeral(
    sender: &mut SplitSink<WebSocket, Message>,
    session: &Session,
    state: &AppState,
    chat_id: ChatId,
    kind: Ephemeral,
) -> Result<(), ()> {
    match state
        .dispatcher
        .publish(chat_id, session.user_id, Some(session.connection_id), kind)
        .await
    {
        Ok(()) => Ok(()),
        Err(err) => send_dispatch_error(sender, session, chat_id, err).await,
    }
}

/// Failures surface on the originating connection only; nothing is broadcast.
async fn send_dispatch_error(
    sender: &mut SplitSink<WebSocket, Message>,
    session: &Session,
    chat_id: ChatId,
    err: DispatchError,
) -> Result<(), ()> {
    let message = match &err {
        DispatchError::NotAParticipant => format!("not a participant of chat {chat_id}"),
        DispatchError::Persistence(_) => {
            tracing::error!(
                user_id = session.user_id,
                chat_id,
                error = %err,
                "message persistence failed"
            );
            "message could not be stored".to_string()
        }
    };
    send_event(sender, &ServerEvent::Error { message }).await
}
