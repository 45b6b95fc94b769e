use super::{ClientFrame, ConnectionHandle, ConnectionId, ServerFrame, SessionCommand};
use crate::services::{InboundQueue, Sender};
use crate::state::AppState;
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

/// Interval of the transport-level liveness check
const CLIENT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// No ping/pong from the peer for this long marks the transport dead
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket actor for one authenticated connection
///
/// Owns the socket. Everything else reaches it through the
/// `ConnectionHandle` stored in the registry.
pub struct WsSession {
    sender: Sender,
    handle: ConnectionHandle,
    commands: Option<UnboundedReceiver<SessionCommand>>,
    inbound: Option<InboundQueue>,
    hb: Instant,
    state: AppState,
}

impl WsSession {
    pub fn new(sender: Sender, state: AppState) -> Self {
        let (handle, commands) = ConnectionHandle::channel();
        Self {
            sender,
            handle,
            commands: Some(commands),
            inbound: None,
            hb: Instant::now(),
            state,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(CLIENT_CHECK_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    user_id = %act.sender.user_id,
                    "WebSocket peer silent, closing transport"
                );
                ctx.stop();
            }
        });
    }

    fn touch_presence(&self) {
        let presence = self.state.presence.clone();
        let user_id = self.sender.user_id;
        actix::spawn(async move {
            if let Err(e) = presence.touch(user_id).await {
                tracing::warn!(user_id = %user_id, error = %e, "failed to refresh presence marker");
            }
        });
    }

    fn handle_text(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        self.touch_presence();

        match ClientFrame::from_json(text) {
            Ok(ClientFrame::Message(inbound)) => {
                let queued = self
                    .inbound
                    .as_ref()
                    .map(|queue| queue.push(inbound))
                    .unwrap_or(false);
                if !queued {
                    tracing::warn!(user_id = %self.sender.user_id, "inbound queue closed, frame dropped");
                }
            }
            Err(e) => {
                tracing::debug!(user_id = %self.sender.user_id, error = %e, "unparsable frame");
                if let Ok(json) = ServerFrame::error("invalid frame: expected {type, data}").to_json() {
                    ctx.text(json);
                }
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            user_id = %self.sender.user_id,
            role = %self.sender.role,
            "WebSocket session started"
        );

        self.hb(ctx);

        // Outbound commands are drained by the actor itself, so the channel
        // closes exactly when the actor stops.
        if let Some(commands) = self.commands.take() {
            ctx.add_stream(futures::stream::unfold(commands, |mut rx| async move {
                rx.recv().await.map(|cmd| (cmd, rx))
            }));
        }

        self.inbound = Some(InboundQueue::spawn(
            self.state.router.clone(),
            self.sender.clone(),
        ));

        let state = self.state.clone();
        let sender = self.sender.clone();
        let handle = self.handle.clone();
        actix::spawn(async move {
            state.attach(&sender, handle).await;
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(user_id = %self.sender.user_id, "WebSocket session stopped");
        self.inbound = None;

        let registry = self.state.registry.clone();
        let user_id = self.sender.user_id;
        let connection_id = self.connection_id();
        actix::spawn(async move {
            registry.remove_if_current(user_id, connection_id).await;
        });
    }
}

impl StreamHandler<SessionCommand> for WsSession {
    fn handle(&mut self, cmd: SessionCommand, ctx: &mut Self::Context) {
        match cmd {
            SessionCommand::Frame(json) => ctx.text(json),
            SessionCommand::Probe => ctx.ping(b""),
            SessionCommand::Close => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Normal,
                    description: Some("connection closed by server".into()),
                }));
                ctx.stop();
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        // Every handle was dropped: nothing can reach this socket any more.
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.handle_text(&text, ctx);
            }
            Ok(ws::Message::Binary(_)) => {
                if let Ok(json) = ServerFrame::error("binary frames are not supported").to_json() {
                    ctx.text(json);
                }
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(user_id = %self.sender.user_id, ?reason, "close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(user_id = %self.sender.user_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}
